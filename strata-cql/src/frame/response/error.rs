use crate::frame::frame_errors::{CqlErrorParseError, LowLevelDeserializationError};
use crate::frame::types;
use crate::Consistency;
use bytes::{BufMut, Bytes};
use thiserror::Error;

/// ERROR response: a server-reported error kind with its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub error: DbError,
    pub reason: String,
}

// Reads the fields following the message of one error kind, naming the
// kind and the field in parse errors.
struct ErrorFields<'a, 'b> {
    buf: &'a mut &'b [u8],
    db_error: &'static str,
}

impl<'a, 'b> ErrorFields<'a, 'b> {
    fn new(buf: &'a mut &'b [u8], db_error: &'static str) -> Self {
        ErrorFields { buf, db_error }
    }

    fn field<T, E: Into<LowLevelDeserializationError>>(
        &self,
        field: &'static str,
        result: Result<T, E>,
    ) -> Result<T, CqlErrorParseError> {
        result.map_err(|err| CqlErrorParseError::MalformedErrorField {
            db_error: self.db_error,
            field,
            err: err.into(),
        })
    }

    fn int(&mut self, field: &'static str) -> Result<i32, CqlErrorParseError> {
        let value = types::read_int(self.buf);
        self.field(field, value)
    }

    fn consistency(&mut self) -> Result<Consistency, CqlErrorParseError> {
        let value = types::read_consistency(self.buf);
        self.field("CONSISTENCY", value)
    }

    fn flag(&mut self, field: &'static str) -> Result<bool, CqlErrorParseError> {
        let value = types::read_raw_bytes(1, self.buf).map(|b| b[0] != 0);
        self.field(field, value)
    }

    fn string(&mut self, field: &'static str) -> Result<String, CqlErrorParseError> {
        let value = types::read_string(self.buf).map(str::to_owned);
        self.field(field, value)
    }

    fn string_list(&mut self, field: &'static str) -> Result<Vec<String>, CqlErrorParseError> {
        let value = types::read_string_list(self.buf);
        self.field(field, value)
    }

    fn write_type(&mut self) -> Result<WriteType, CqlErrorParseError> {
        self.string("WRITE_TYPE").map(|s| WriteType::from(s.as_str()))
    }

    fn short_bytes(&mut self, field: &'static str) -> Result<Bytes, CqlErrorParseError> {
        let value = types::read_short_bytes(self.buf).map(Bytes::copy_from_slice);
        self.field(field, value)
    }
}

impl Error {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CqlErrorParseError> {
        let code = types::read_int(buf)
            .map_err(|err| CqlErrorParseError::ErrorCodeParseError(err.into()))?;
        let reason = types::read_string(buf)
            .map_err(CqlErrorParseError::ReasonParseError)?
            .to_owned();

        let error = match code {
            0x0000 => DbError::ServerError,
            0x000A => DbError::ProtocolError,
            0x0100 => DbError::AuthenticationError,
            0x1000 => {
                let mut f = ErrorFields::new(buf, "UNAVAILABLE");
                DbError::Unavailable {
                    consistency: f.consistency()?,
                    required: f.int("REQUIRED")?,
                    alive: f.int("ALIVE")?,
                }
            }
            0x1001 => DbError::Overloaded,
            0x1002 => DbError::IsBootstrapping,
            0x1003 => DbError::TruncateError,
            0x1100 => {
                let mut f = ErrorFields::new(buf, "WRITE_TIMEOUT");
                DbError::WriteTimeout {
                    consistency: f.consistency()?,
                    received: f.int("RECEIVED")?,
                    required: f.int("REQUIRED")?,
                    write_type: f.write_type()?,
                }
            }
            0x1200 => {
                let mut f = ErrorFields::new(buf, "READ_TIMEOUT");
                DbError::ReadTimeout {
                    consistency: f.consistency()?,
                    received: f.int("RECEIVED")?,
                    required: f.int("REQUIRED")?,
                    data_present: f.flag("DATA_PRESENT")?,
                }
            }
            0x1300 => {
                let mut f = ErrorFields::new(buf, "READ_FAILURE");
                DbError::ReadFailure {
                    consistency: f.consistency()?,
                    received: f.int("RECEIVED")?,
                    required: f.int("REQUIRED")?,
                    numfailures: f.int("NUM_FAILURES")?,
                    data_present: f.flag("DATA_PRESENT")?,
                }
            }
            0x1400 => {
                let mut f = ErrorFields::new(buf, "FUNCTION_FAILURE");
                DbError::FunctionFailure {
                    keyspace: f.string("KEYSPACE")?,
                    function: f.string("FUNCTION")?,
                    arg_types: f.string_list("ARG_TYPES")?,
                }
            }
            0x1500 => {
                let mut f = ErrorFields::new(buf, "WRITE_FAILURE");
                DbError::WriteFailure {
                    consistency: f.consistency()?,
                    received: f.int("RECEIVED")?,
                    required: f.int("REQUIRED")?,
                    numfailures: f.int("NUM_FAILURES")?,
                    write_type: f.write_type()?,
                }
            }
            0x2000 => DbError::SyntaxError,
            0x2100 => DbError::Unauthorized,
            0x2200 => DbError::Invalid,
            0x2300 => DbError::ConfigError,
            0x2400 => {
                let mut f = ErrorFields::new(buf, "ALREADY_EXISTS");
                DbError::AlreadyExists {
                    keyspace: f.string("KEYSPACE")?,
                    table: f.string("TABLE")?,
                }
            }
            0x2500 => DbError::Unprepared {
                statement_id: ErrorFields::new(buf, "UNPREPARED").short_bytes("STATEMENT_ID")?,
            },
            _ => DbError::Other(code),
        };

        Ok(Error { error, reason })
    }

    /// Writes the body the way a server sends it.
    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<(), std::num::TryFromIntError> {
        types::write_int(self.error.code(), buf);
        types::write_string(&self.reason, buf)?;
        match &self.error {
            DbError::Unavailable {
                consistency,
                required,
                alive,
            } => {
                types::write_consistency(*consistency, buf);
                types::write_int(*required, buf);
                types::write_int(*alive, buf);
            }
            DbError::WriteTimeout {
                consistency,
                received,
                required,
                write_type,
            } => {
                types::write_consistency(*consistency, buf);
                types::write_int(*received, buf);
                types::write_int(*required, buf);
                types::write_string(write_type.as_str(), buf)?;
            }
            DbError::ReadTimeout {
                consistency,
                received,
                required,
                data_present,
            } => {
                types::write_consistency(*consistency, buf);
                types::write_int(*received, buf);
                types::write_int(*required, buf);
                buf.put_u8(*data_present as u8);
            }
            DbError::ReadFailure {
                consistency,
                received,
                required,
                numfailures,
                data_present,
            } => {
                types::write_consistency(*consistency, buf);
                types::write_int(*received, buf);
                types::write_int(*required, buf);
                types::write_int(*numfailures, buf);
                buf.put_u8(*data_present as u8);
            }
            DbError::FunctionFailure {
                keyspace,
                function,
                arg_types,
            } => {
                types::write_string(keyspace, buf)?;
                types::write_string(function, buf)?;
                types::write_string_list(arg_types, buf)?;
            }
            DbError::WriteFailure {
                consistency,
                received,
                required,
                numfailures,
                write_type,
            } => {
                types::write_consistency(*consistency, buf);
                types::write_int(*received, buf);
                types::write_int(*required, buf);
                types::write_int(*numfailures, buf);
                types::write_string(write_type.as_str(), buf)?;
            }
            DbError::AlreadyExists { keyspace, table } => {
                types::write_string(keyspace, buf)?;
                types::write_string(table, buf)?;
            }
            DbError::Unprepared { statement_id } => {
                types::write_short_bytes(statement_id, buf)?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// An error sent by the database in response to a request.
///
/// These are data: the request failed, the node and connection are fine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("Syntax error in the statement")]
    SyntaxError,

    #[error("Statement is well formed but invalid")]
    Invalid,

    /// A keyspace or table with this name exists already.
    #[error("Keyspace or table exists already (keyspace: {keyspace}, table: {table})")]
    AlreadyExists {
        keyspace: String,
        /// Empty when the keyspace itself exists.
        table: String,
    },

    /// A user defined function threw.
    #[error(
        "Function {keyspace}.{function} failed (arg_types: {arg_types:?})"
    )]
    FunctionFailure {
        keyspace: String,
        function: String,
        arg_types: Vec<String>,
    },

    #[error("Credentials were rejected")]
    AuthenticationError,

    #[error("User is not allowed to run the statement")]
    Unauthorized,

    #[error("Statement conflicts with the server configuration")]
    ConfigError,

    /// The coordinator knows too few live replicas to even try.
    #[error(
        "Too few live replicas for the consistency level \
        (consistency: {consistency}, required: {required}, alive: {alive})"
    )]
    Unavailable {
        consistency: Consistency,
        required: i32,
        alive: i32,
    },

    #[error("Coordinator is overloaded")]
    Overloaded,

    #[error("Coordinator is bootstrapping")]
    IsBootstrapping,

    #[error("Truncate failed")]
    TruncateError,

    /// Replicas did not answer a read before the coordinator gave up.
    #[error(
        "Read timed out (consistency: {consistency}, received: {received}, \
        required: {required}, data_present: {data_present})"
    )]
    ReadTimeout {
        consistency: Consistency,
        received: i32,
        required: i32,
        /// Whether the replica asked for the data itself answered.
        data_present: bool,
    },

    /// Replicas did not acknowledge a write before the coordinator gave up.
    #[error(
        "Write timed out (consistency: {consistency}, received: {received}, \
        required: {required}, write_type: {write_type})"
    )]
    WriteTimeout {
        consistency: Consistency,
        received: i32,
        required: i32,
        write_type: WriteType,
    },

    #[error(
        "Read failed on {numfailures} replicas (consistency: {consistency}, \
        received: {received}, required: {required}, data_present: {data_present})"
    )]
    ReadFailure {
        consistency: Consistency,
        received: i32,
        required: i32,
        numfailures: i32,
        data_present: bool,
    },

    #[error(
        "Write failed on {numfailures} replicas (consistency: {consistency}, \
        received: {received}, required: {required}, write_type: {write_type})"
    )]
    WriteFailure {
        consistency: Consistency,
        received: i32,
        required: i32,
        numfailures: i32,
        write_type: WriteType,
    },

    /// The node does not know this prepared statement; prepare it there
    /// and retry.
    #[error("Statement {statement_id:?} is not prepared on this node")]
    Unprepared {
        statement_id: Bytes,
    },

    #[error("Server error")]
    ServerError,

    /// The server could not make sense of what we sent.
    #[error("Protocol error")]
    ProtocolError,

    /// A code this client does not know.
    #[error("Unknown error code {0:#06x}")]
    Other(i32),
}

impl DbError {
    /// Error code as sent on the wire.
    pub fn code(&self) -> i32 {
        match self {
            DbError::ServerError => 0x0000,
            DbError::ProtocolError => 0x000A,
            DbError::AuthenticationError => 0x0100,
            DbError::Unavailable { .. } => 0x1000,
            DbError::Overloaded => 0x1001,
            DbError::IsBootstrapping => 0x1002,
            DbError::TruncateError => 0x1003,
            DbError::WriteTimeout { .. } => 0x1100,
            DbError::ReadTimeout { .. } => 0x1200,
            DbError::ReadFailure { .. } => 0x1300,
            DbError::FunctionFailure { .. } => 0x1400,
            DbError::WriteFailure { .. } => 0x1500,
            DbError::SyntaxError => 0x2000,
            DbError::Unauthorized => 0x2100,
            DbError::Invalid => 0x2200,
            DbError::ConfigError => 0x2300,
            DbError::AlreadyExists { .. } => 0x2400,
            DbError::Unprepared { .. } => 0x2500,
            DbError::Other(code) => *code,
        }
    }
}

/// What kind of write timed out or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteType {
    Simple,
    Batch,
    UnloggedBatch,
    Counter,
    /// The write to the batch log itself.
    BatchLog,
    /// A lightweight transaction.
    Cas,
    /// Any kind introduced after this client was written.
    Other(String),
}

const WRITE_TYPES: [(WriteType, &str); 6] = [
    (WriteType::Simple, "SIMPLE"),
    (WriteType::Batch, "BATCH"),
    (WriteType::UnloggedBatch, "UNLOGGED_BATCH"),
    (WriteType::Counter, "COUNTER"),
    (WriteType::BatchLog, "BATCH_LOG"),
    (WriteType::Cas, "CAS"),
];

impl std::fmt::Display for WriteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for WriteType {
    fn from(name: &str) -> WriteType {
        WRITE_TYPES
            .iter()
            .find(|(_, known)| *known == name)
            .map(|(write_type, _)| write_type.clone())
            .unwrap_or_else(|| WriteType::Other(name.to_owned()))
    }
}

impl WriteType {
    /// Name as sent on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            WriteType::Other(name) => name,
            known => WRITE_TYPES
                .iter()
                .find(|(write_type, _)| write_type == known)
                .map_or("", |(_, name)| name),
        }
    }
}
