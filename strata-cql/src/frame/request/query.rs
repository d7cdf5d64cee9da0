//! `QUERY` request and the parameters it shares with `EXECUTE`.

use std::borrow::Cow;

use bytes::{BufMut, Bytes};

use crate::frame::frame_errors::{
    CqlRequestSerializationError, LowLevelDeserializationError, RequestDeserializationError,
};
use crate::frame::request::{DeserializableRequest, RequestOpcode, SerializableRequest};
use crate::frame::types::{self, SerialConsistency};
use crate::frame::value::SerializedValues;
use crate::Consistency;

// The flags byte says which optional fields follow it.
#[derive(Debug, Clone, Copy, Default)]
struct Flags(u8);

impl Flags {
    const VALUES: u8 = 0x01;
    const SKIP_METADATA: u8 = 0x02;
    const PAGE_SIZE: u8 = 0x04;
    const PAGING_STATE: u8 = 0x08;
    const SERIAL_CONSISTENCY: u8 = 0x10;
    const DEFAULT_TIMESTAMP: u8 = 0x20;
    const NAMES_FOR_VALUES: u8 = 0x40;
    const KNOWN: u8 = 0x7f;

    fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    fn set_if(&mut self, flag: u8, condition: bool) {
        if condition {
            self.0 |= flag;
        }
    }
}

/// Executes a statement given as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query<'q> {
    pub contents: Cow<'q, str>,
    pub parameters: QueryParameters<'q>,
}

impl SerializableRequest for Query<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Query;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), CqlRequestSerializationError> {
        types::write_long_string(&self.contents, buf)?;
        self.parameters.serialize(buf)?;
        Ok(())
    }

    fn size_hint(&self) -> usize {
        self.contents.len() + self.parameters.size_hint()
    }
}

impl DeserializableRequest for Query<'_> {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, RequestDeserializationError> {
        let contents = Cow::Owned(types::read_long_string(buf)?.to_owned());
        let parameters = QueryParameters::deserialize(buf)?;

        Ok(Self {
            contents,
            parameters,
        })
    }
}

/// Everything after the statement in QUERY and EXECUTE bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameters<'a> {
    pub consistency: Consistency,
    pub serial_consistency: Option<SerialConsistency>,
    pub timestamp: Option<i64>,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
    /// Asks the server to leave result metadata out; only meaningful for
    /// EXECUTE, where the metadata is known from PREPARE.
    pub skip_metadata: bool,
    pub values: Cow<'a, SerializedValues>,
}

impl Default for QueryParameters<'_> {
    fn default() -> Self {
        Self {
            consistency: Default::default(),
            serial_consistency: None,
            timestamp: None,
            page_size: None,
            paging_state: None,
            skip_metadata: false,
            values: Cow::Borrowed(SerializedValues::EMPTY),
        }
    }
}

impl QueryParameters<'_> {
    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<(), CqlRequestSerializationError> {
        let mut flags = Flags::default();
        flags.set_if(Flags::VALUES, !self.values.is_empty());
        flags.set_if(Flags::SKIP_METADATA, self.skip_metadata);
        flags.set_if(Flags::PAGE_SIZE, self.page_size.is_some());
        flags.set_if(Flags::PAGING_STATE, self.paging_state.is_some());
        flags.set_if(Flags::SERIAL_CONSISTENCY, self.serial_consistency.is_some());
        flags.set_if(Flags::DEFAULT_TIMESTAMP, self.timestamp.is_some());

        types::write_consistency(self.consistency, buf);
        buf.put_u8(flags.0);
        if flags.has(Flags::VALUES) {
            self.values.write_to_request(buf);
        }
        if let Some(page_size) = self.page_size {
            types::write_int(page_size, buf);
        }
        if let Some(paging_state) = &self.paging_state {
            types::write_bytes(paging_state, buf)?;
        }
        if let Some(serial_consistency) = self.serial_consistency {
            types::write_serial_consistency(serial_consistency, buf);
        }
        if let Some(timestamp) = self.timestamp {
            types::write_long(timestamp, buf);
        }
        Ok(())
    }

    fn size_hint(&self) -> usize {
        // consistency, flags, value count, page size, serial consistency, timestamp
        2 + 1 + 2 + 4 + 2 + 8
            + self.values.buffer_size()
            + self.paging_state.as_ref().map_or(0, |p| 4 + p.len())
    }

    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, RequestDeserializationError> {
        let consistency = types::read_consistency(buf)?;
        let flags = Flags(types::read_raw_bytes(1, buf)?[0]);
        let unknown = flags.0 & !Flags::KNOWN;
        if unknown != 0 {
            return Err(RequestDeserializationError::UnknownFlags { flags: unknown });
        }
        if flags.has(Flags::NAMES_FOR_VALUES) {
            return Err(RequestDeserializationError::NamedValuesUnsupported);
        }

        let values = if flags.has(Flags::VALUES) {
            SerializedValues::new_from_frame(buf)?
        } else {
            SerializedValues::new()
        };
        let page_size = match flags.has(Flags::PAGE_SIZE) {
            true => Some(types::read_int(buf).map_err(LowLevelDeserializationError::from)?),
            false => None,
        };
        let paging_state = match flags.has(Flags::PAGING_STATE) {
            true => Some(Bytes::copy_from_slice(types::read_bytes(buf)?)),
            false => None,
        };
        let serial_consistency = match flags.has(Flags::SERIAL_CONSISTENCY) {
            true => {
                let consistency = types::read_consistency(buf)?;
                Some(SerialConsistency::try_from(consistency).map_err(|_| {
                    RequestDeserializationError::ExpectedSerialConsistency(consistency)
                })?)
            }
            false => None,
        };
        let timestamp = match flags.has(Flags::DEFAULT_TIMESTAMP) {
            true => Some(types::read_long(buf).map_err(LowLevelDeserializationError::from)?),
            false => None,
        };

        Ok(Self {
            consistency,
            serial_consistency,
            timestamp,
            page_size,
            paging_state,
            skip_metadata: flags.has(Flags::SKIP_METADATA),
            values: Cow::Owned(values),
        })
    }
}
