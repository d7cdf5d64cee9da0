use crate::frame::frame_errors::CqlResponseParseError;
use crate::frame::request::options;
use crate::frame::types;
use crate::frame::Compression;
use std::collections::HashMap;

/// Options the server accepts in STARTUP, each with its allowed values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Supported {
    pub options: HashMap<String, Vec<String>>,
}

impl Supported {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CqlResponseParseError> {
        let options = types::read_string_multimap(buf)
            .map_err(CqlResponseParseError::CqlSupportedParseError)?;

        Ok(Supported { options })
    }

    /// Whether the server advertises `compression` among its COMPRESSION values.
    pub fn supports_compression(&self, compression: Compression) -> bool {
        self.options
            .get(options::COMPRESSION)
            .is_some_and(|algorithms| {
                algorithms
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(compression.as_str()))
            })
    }
}
