//! `PREPARE` request.

use std::borrow::Cow;

use crate::frame::frame_errors::{CqlRequestSerializationError, RequestDeserializationError};
use crate::frame::request::{DeserializableRequest, RequestOpcode, SerializableRequest};
use crate::frame::types;

/// Prepares a statement for later execution through EXECUTE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepare<'a> {
    pub query: Cow<'a, str>,
}

impl SerializableRequest for Prepare<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Prepare;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), CqlRequestSerializationError> {
        types::write_long_string(&self.query, buf)?;
        Ok(())
    }

    fn size_hint(&self) -> usize {
        4 + self.query.len()
    }
}

impl DeserializableRequest for Prepare<'_> {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, RequestDeserializationError> {
        let query = Cow::Owned(types::read_long_string(buf)?.to_owned());
        Ok(Self { query })
    }
}
