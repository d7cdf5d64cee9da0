//! Requests sent by the client.

pub mod auth_response;
pub mod execute;
pub mod options;
pub mod prepare;
pub mod query;
pub mod register;
pub mod startup;

use bytes::Bytes;

pub use auth_response::AuthResponse;
pub use execute::Execute;
pub use options::Options;
pub use prepare::Prepare;
pub use query::Query;
pub use register::Register;
pub use startup::Startup;

use super::frame_errors::{CqlRequestSerializationError, RequestDeserializationError};
use super::types::SerialConsistency;
use super::TryFromPrimitiveError;
use crate::Consistency;

/// Opcode of a request, used to identify the request type in a frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RequestOpcode {
    /// Initializes the connection. Answered with READY or AUTHENTICATE.
    Startup = 0x01,
    /// Asks which STARTUP options the server supports. Answered with SUPPORTED.
    Options = 0x05,
    /// Executes an unprepared statement.
    Query = 0x07,
    /// Prepares a statement for later EXECUTE.
    Prepare = 0x09,
    /// Executes a prepared statement.
    Execute = 0x0A,
    /// Subscribes the connection to server events.
    Register = 0x0B,
    /// Answers an authentication challenge.
    AuthResponse = 0x0F,
}

const REQUEST_OPCODES: [(RequestOpcode, &str); 7] = [
    (RequestOpcode::Startup, "STARTUP"),
    (RequestOpcode::Options, "OPTIONS"),
    (RequestOpcode::Query, "QUERY"),
    (RequestOpcode::Prepare, "PREPARE"),
    (RequestOpcode::Execute, "EXECUTE"),
    (RequestOpcode::Register, "REGISTER"),
    (RequestOpcode::AuthResponse, "AUTH_RESPONSE"),
];

impl TryFrom<u8> for RequestOpcode {
    type Error = TryFromPrimitiveError<u8>;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        REQUEST_OPCODES
            .iter()
            .map(|(opcode, _)| *opcode)
            .find(|opcode| *opcode as u8 == value)
            .ok_or(TryFromPrimitiveError {
                enum_name: "RequestOpcode",
                primitive: value,
            })
    }
}

impl std::fmt::Display for RequestOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = REQUEST_OPCODES
            .iter()
            .find(|(opcode, _)| opcode == self)
            .map_or("UNKNOWN", |(_, name)| name);
        f.write_str(name)
    }
}

/// Requests that can be serialized into a frame body.
pub trait SerializableRequest {
    const OPCODE: RequestOpcode;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), CqlRequestSerializationError>;

    /// Expected body size, used to pick a buffer from the memory pool.
    fn size_hint(&self) -> usize {
        0
    }

    fn to_bytes(&self) -> Result<Bytes, CqlRequestSerializationError> {
        let mut v = Vec::new();
        self.serialize(&mut v)?;
        Ok(v.into())
    }
}

/// Requests that can be deserialized from a frame body.
///
/// The driver never reads requests; this is for servers and test doubles
/// asserting on what was sent.
pub trait DeserializableRequest: SerializableRequest + Sized {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, RequestDeserializationError>;
}

/// A request read back from a frame.
#[derive(Debug)]
#[non_exhaustive]
pub enum Request<'r> {
    Startup(Startup<'r>),
    Options,
    Query(Query<'r>),
    Prepare(Prepare<'r>),
    Execute(Execute<'r>),
    Register(Register),
    AuthResponse(AuthResponse),
}

impl Request<'_> {
    pub fn deserialize(
        buf: &mut &[u8],
        opcode: RequestOpcode,
    ) -> Result<Self, RequestDeserializationError> {
        match opcode {
            RequestOpcode::Startup => Startup::deserialize(buf).map(Self::Startup),
            RequestOpcode::Options => Ok(Self::Options),
            RequestOpcode::Query => Query::deserialize(buf).map(Self::Query),
            RequestOpcode::Prepare => Prepare::deserialize(buf).map(Self::Prepare),
            RequestOpcode::Execute => Execute::deserialize(buf).map(Self::Execute),
            RequestOpcode::Register => Register::deserialize(buf).map(Self::Register),
            RequestOpcode::AuthResponse => AuthResponse::deserialize(buf).map(Self::AuthResponse),
        }
    }

    pub fn opcode(&self) -> RequestOpcode {
        match self {
            Request::Startup(_) => RequestOpcode::Startup,
            Request::Options => RequestOpcode::Options,
            Request::Query(_) => RequestOpcode::Query,
            Request::Prepare(_) => RequestOpcode::Prepare,
            Request::Execute(_) => RequestOpcode::Execute,
            Request::Register(_) => RequestOpcode::Register,
            Request::AuthResponse(_) => RequestOpcode::AuthResponse,
        }
    }

    /// Retrieves consistency from request frame, if present.
    pub fn get_consistency(&self) -> Option<Consistency> {
        match self {
            Request::Query(q) => Some(q.parameters.consistency),
            Request::Execute(e) => Some(e.parameters.consistency),
            _ => None,
        }
    }

    /// Retrieves serial consistency from request frame.
    pub fn get_serial_consistency(&self) -> Option<Option<SerialConsistency>> {
        match self {
            Request::Query(q) => Some(q.parameters.serial_consistency),
            Request::Execute(e) => Some(e.parameters.serial_consistency),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use assert_matches::assert_matches;
    use bytes::Bytes;

    use crate::frame::frame_errors::RequestDeserializationError;
    use crate::frame::request::{
        execute::Execute,
        query::{Query, QueryParameters},
        DeserializableRequest, Request, RequestOpcode, SerializableRequest,
    };
    use crate::frame::server_event_type::EventType;
    use crate::frame::types::{self, SerialConsistency};
    use crate::frame::value::SerializedValues;
    use crate::registry::TypeRegistry;
    use crate::value::{ColumnType, CqlValue};
    use crate::Consistency;

    use super::{Register, Startup};

    fn int_values(ints: &[i32]) -> SerializedValues {
        let registry = TypeRegistry::default();
        let mut vals = SerializedValues::new();
        for i in ints {
            vals.add_value(&registry, &ColumnType::Int, &CqlValue::Int(*i))
                .unwrap();
        }
        vals
    }

    #[test]
    fn query_and_execute_read_back_as_written() {
        let query = Query {
            contents: Cow::Borrowed("SELECT host_id from system.peers"),
            parameters: QueryParameters {
                consistency: Consistency::All,
                serial_consistency: Some(SerialConsistency::Serial),
                page_size: Some(323),
                paging_state: Some(Bytes::from_static(&[2, 1, 3, 7])),
                values: Cow::Owned(int_values(&[2137])),
                ..Default::default()
            },
        };
        let body = query.to_bytes().unwrap();
        assert_eq!(Query::deserialize(&mut &body[..]).unwrap(), query);

        let execute = Execute {
            id: Bytes::from_static(&[2, 4, 5, 2, 6, 7, 3, 1]),
            parameters: QueryParameters {
                consistency: Consistency::Any,
                timestamp: Some(3423434),
                skip_metadata: true,
                values: Cow::Owned(int_values(&[42, 2137])),
                ..Default::default()
            },
        };
        let body = execute.to_bytes().unwrap();
        assert_eq!(Execute::deserialize(&mut &body[..]).unwrap(), execute);
    }

    #[test]
    fn deser_rejects_unknown_flags() {
        let contents = Cow::Borrowed("SELECT host_id from system.peers");
        let parameters = QueryParameters {
            serial_consistency: Some(SerialConsistency::LocalSerial),
            ..Default::default()
        };
        let query = Query {
            contents: contents.clone(),
            parameters,
        };

        let mut buf = Vec::new();
        query.serialize(&mut buf).unwrap();

        // Sanity check: query deserializes to the equivalent.
        let query_deserialized = Query::deserialize(&mut &buf[..]).unwrap();
        assert_eq!(&query_deserialized, &query);

        // Find flags in buffer: after the long string and the consistency.
        let mut buf_ptr = buf.as_slice();
        let serialised_contents = types::read_long_string(&mut buf_ptr).unwrap();
        assert_eq!(serialised_contents, contents);
        let consistency = types::read_consistency(&mut buf_ptr).unwrap();
        assert_eq!(consistency, Consistency::default());

        let flags_idx = buf.len() - buf_ptr.len();
        buf[flags_idx] |= 0x80;

        assert_matches!(
            Query::deserialize(&mut &buf[..]),
            Err(RequestDeserializationError::UnknownFlags { flags: 0x80 })
        );
    }

    #[test]
    fn deser_rejects_non_serial_serial_consistency() {
        let query = Query {
            contents: Cow::Borrowed("INSERT INTO t (a) VALUES (1) IF NOT EXISTS"),
            parameters: QueryParameters {
                serial_consistency: Some(SerialConsistency::Serial),
                ..Default::default()
            },
        };
        let mut buf = Vec::new();
        query.serialize(&mut buf).unwrap();
        // Serial consistency is the last field here; overwrite it with ONE.
        let len = buf.len();
        buf[len - 2..].copy_from_slice(&(Consistency::One as u16).to_be_bytes());

        assert_matches!(
            Query::deserialize(&mut &buf[..]),
            Err(RequestDeserializationError::ExpectedSerialConsistency(
                Consistency::One
            ))
        );
    }

    #[test]
    fn generic_request_dispatch() {
        let startup = Startup {
            options: [(Cow::Borrowed("CQL_VERSION"), Cow::Borrowed("3.0.0"))]
                .into_iter()
                .collect(),
        };
        let body = startup.to_bytes().unwrap();
        let req = Request::deserialize(&mut &body[..], RequestOpcode::Startup).unwrap();
        assert_eq!(req.opcode(), RequestOpcode::Startup);
        assert_matches!(req, Request::Startup(s) if s.options["CQL_VERSION"] == "3.0.0");

        let register = Register {
            event_types_to_register_for: vec![EventType::TopologyChange, EventType::SchemaChange],
        };
        let body = register.to_bytes().unwrap();
        assert_matches!(
            Request::deserialize(&mut &body[..], RequestOpcode::Register),
            Ok(Request::Register(r)) if r.event_types_to_register_for
                == [EventType::TopologyChange, EventType::SchemaChange]
        );

        let query = Query {
            contents: Cow::Borrowed("SELECT 1"),
            parameters: QueryParameters {
                consistency: Consistency::Two,
                ..Default::default()
            },
        };
        let body = query.to_bytes().unwrap();
        let req = Request::deserialize(&mut &body[..], RequestOpcode::Query).unwrap();
        assert_eq!(req.get_consistency(), Some(Consistency::Two));
        assert_eq!(req.get_serial_consistency(), Some(None));
    }

    #[test]
    fn opcode_from_primitive() {
        assert_eq!(RequestOpcode::try_from(0x0A), Ok(RequestOpcode::Execute));
        assert!(RequestOpcode::try_from(0x0D).is_err());
        assert_eq!(RequestOpcode::AuthResponse.to_string(), "AUTH_RESPONSE");
    }
}
