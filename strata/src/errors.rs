//! Errors returned by the driver.

use std::sync::Arc;

use thiserror::Error;

use crate::authentication::AuthError;
pub use crate::frame::frame_errors::{
    CompressionError, CqlErrorParseError, CqlEventParseError, CqlRequestSerializationError,
    CqlResponseParseError, CqlResultParseError, FrameError, LowLevelDeserializationError,
};
use crate::frame::request::RequestOpcode;
pub use crate::frame::response::error::DbError;
use crate::frame::response::ResponseOpcode;
use crate::statement::PartitionKeyError;

/// Error that occurred while executing a request.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum QueryError {
    /// Database sent a response containing some error with a message
    #[error("Database returned an error: {0}, Error message: {1}")]
    DbError(DbError, String),

    /// Caller passed values that could not be serialized.
    #[error("Invalid request: {0}")]
    BadQuery(#[from] CqlRequestSerializationError),

    /// The connection the request was sent on broke before the response came back.
    #[error(transparent)]
    BrokenConnection(#[from] BrokenConnectionError),

    /// A new connection was needed for the request, but could not be opened.
    #[error("Failed to open a connection: {0}")]
    ConnectionError(#[from] ConnectionError),

    /// All 32768 stream ids of the connection are in use.
    #[error("Unable to allocate stream id")]
    UnableToAllocStreamId,

    /// Server answered with something the request does not allow.
    #[error("Protocol Error: {0}")]
    ProtocolError(&'static str),

    /// Body extensions or compression of the response were malformed.
    #[error("Failed to parse response body extensions: {0}")]
    BodyExtensionsParseError(FrameError),

    /// Response body could not be parsed.
    #[error(transparent)]
    CqlResponseParseError(#[from] CqlResponseParseError),

    /// Bound values do not yield the partition key of a prepared statement.
    #[error("Failed to compute the partition key: {0}")]
    PartitionKeyError(#[from] PartitionKeyError),

    /// Caller's cancellation signal fired before the request completed.
    #[error("Request was cancelled")]
    Cancelled,

    /// No node is up, or every node is at its connection limit.
    #[error("No connection available: every node is down or at capacity")]
    NoConnectionAvailable,
}

impl QueryError {
    /// Whether the error says something about the health of the connection or
    /// node that served the request, as opposed to the request itself.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            QueryError::BrokenConnection(_) | QueryError::ConnectionError(_)
        )
    }
}

impl From<crate::frame::response::Error> for QueryError {
    fn from(error: crate::frame::response::Error) -> QueryError {
        QueryError::DbError(error.error, error.reason)
    }
}

/// Error that occurred while opening a connection.
///
/// Such errors make the node the connection was opened to count as failing.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Connection did not complete in the configured time.
    #[error("Connect timeout elapsed")]
    ConnectTimeout,

    /// Socket level failure.
    #[error(transparent)]
    IoError(Arc<std::io::Error>),

    /// A request of the handshake failed.
    #[error(transparent)]
    ConnectionSetupRequestError(#[from] ConnectionSetupRequestError),

    /// Connection broke during the handshake.
    #[error(transparent)]
    BrokenConnection(#[from] BrokenConnectionError),
}

impl From<std::io::Error> for ConnectionError {
    fn from(value: std::io::Error) -> Self {
        ConnectionError::IoError(Arc::new(value))
    }
}

/// Failure of one request sent while setting up a connection: OPTIONS,
/// STARTUP, AUTH_RESPONSE or REGISTER.
#[derive(Error, Debug, Clone)]
#[error("Failed to perform a connection setup request. Request: {request_kind}, reason: {error}")]
pub struct ConnectionSetupRequestError {
    request_kind: RequestOpcode,
    error: ConnectionSetupRequestErrorKind,
}

impl ConnectionSetupRequestError {
    pub(crate) fn new(request_kind: RequestOpcode, error: ConnectionSetupRequestErrorKind) -> Self {
        ConnectionSetupRequestError {
            request_kind,
            error,
        }
    }

    /// The request that failed.
    pub fn request_kind(&self) -> RequestOpcode {
        self.request_kind
    }

    /// Why it failed.
    pub fn error(&self) -> &ConnectionSetupRequestErrorKind {
        &self.error
    }
}

/// Reason of a [`ConnectionSetupRequestError`].
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectionSetupRequestErrorKind {
    /// Failed to serialize the request.
    #[error("Failed to serialize CQL request: {0}")]
    CqlRequestSerialization(#[from] CqlRequestSerializationError),

    /// Response body extensions were malformed.
    #[error("Failed to parse response body extensions: {0}")]
    BodyExtensionsParseError(FrameError),

    /// Response could not be parsed.
    #[error(transparent)]
    CqlResponseParseError(#[from] CqlResponseParseError),

    /// Server answered with an error.
    #[error("Database returned an error: {0}, Error message: {1}")]
    DbError(DbError, String),

    /// Server answered with a response the request does not allow.
    #[error("Received unexpected response from the server: {0:?}")]
    UnexpectedResponse(ResponseOpcode),

    /// Connection broke while waiting for the response.
    #[error(transparent)]
    BrokenConnection(#[from] BrokenConnectionError),

    /// No stream id was free.
    #[error("Unable to allocate stream id")]
    UnableToAllocStreamId,

    /// Server demands authentication, but no authenticator was configured.
    #[error("Authentication is required. You can use ClusterConfig::user(\"user\", \"pass\") to provide credentials or ClusterConfig::authenticator_provider to provide custom authenticator")]
    MissingAuthentication,

    /// Authenticator failed to start a session.
    #[error("Failed to start client's auth session: {0}")]
    StartAuthSessionError(AuthError),

    /// Authenticator rejected a challenge.
    #[error("Failed to evaluate auth challenge on client side: {0}")]
    AuthChallengeEvaluationError(AuthError),

    /// Authenticator rejected the success message.
    #[error("Failed to finish auth challenge on client side: {0}")]
    AuthFinishError(AuthError),
}

impl From<QueryError> for ConnectionSetupRequestErrorKind {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::DbError(error, reason) => Self::DbError(error, reason),
            QueryError::BadQuery(e) => Self::CqlRequestSerialization(e),
            QueryError::BrokenConnection(e) => Self::BrokenConnection(e),
            QueryError::BodyExtensionsParseError(e) => Self::BodyExtensionsParseError(e),
            QueryError::CqlResponseParseError(e) => Self::CqlResponseParseError(e),
            QueryError::UnableToAllocStreamId => Self::UnableToAllocStreamId,
            QueryError::ConnectionError(ConnectionError::BrokenConnection(e)) => {
                Self::BrokenConnection(e)
            }
            // Not produced by requests on an established connection.
            other => {
                Self::BrokenConnection(BrokenConnectionErrorKind::Setup(other.to_string()).into())
            }
        }
    }
}

/// The connection can no longer be used.
///
/// Every request waiting on the connection receives a clone of this error,
/// and so does the node owning the connection.
#[derive(Error, Debug, Clone)]
#[error("Connection broken, reason: {0}")]
pub struct BrokenConnectionError(Arc<BrokenConnectionErrorKind>);

impl BrokenConnectionError {
    /// Why the connection broke.
    pub fn kind(&self) -> &BrokenConnectionErrorKind {
        &self.0
    }
}

impl From<BrokenConnectionErrorKind> for BrokenConnectionError {
    fn from(kind: BrokenConnectionErrorKind) -> Self {
        BrokenConnectionError(Arc::new(kind))
    }
}

/// Reason of a [`BrokenConnectionError`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BrokenConnectionErrorKind {
    /// Reading a frame failed: I/O error, malformed header or oversized body.
    #[error("Failed to read frame: {0}")]
    FrameError(FrameError),

    /// Writing a frame failed.
    #[error("Failed sending request: {0}")]
    WriteError(std::io::Error),

    /// A response came for a stream id nobody is waiting for.
    #[error("Received a server frame with unexpected stream id: {0}")]
    UnexpectedStreamId(i16),

    /// Too many requests were cancelled without their responses ever arriving.
    #[error("Too many orphaned stream ids: {0}")]
    TooManyOrphanedStreamIds(u16),

    /// An event pushed by the server could not be handled.
    #[error("Failed to handle server event: {0}")]
    CqlEventHandlingError(#[from] CqlEventHandlingError),

    /// The connection's background worker is gone.
    #[error("The connection's worker was dropped")]
    ChannelError,

    /// Handshake could not go on.
    #[error("Connection setup failed: {0}")]
    Setup(String),
}

/// Failure while handling a frame on stream -1.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CqlEventHandlingError {
    /// Event body could not be parsed.
    #[error("Failed to deserialize EVENT response: {0}")]
    CqlEventParseError(#[from] CqlEventParseError),

    /// Frame on the event stream was not an EVENT.
    #[error("Received unexpected server response on stream -1: {0:?}. Expected EVENT response")]
    UnexpectedResponse(ResponseOpcode),

    /// Frame on the event stream could not be parsed.
    #[error("Failed to parse a frame on stream -1: {0}")]
    ParseError(String),

    /// Nobody receives the events anymore.
    #[error("Failed to send event info via channel. The channel is probably closed")]
    SendError,
}

/// Invalid configuration. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Setting key is not recognized.
    #[error("Unknown setting: {0}")]
    UnknownKey(String),

    /// Setting value cannot be parsed.
    #[error("Invalid value {value:?} for setting {key}: {reason}")]
    InvalidValue {
        /// The setting.
        key: String,
        /// Its value as given.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Enum option spelled in an unknown way.
    #[error("Unknown {option}: {value:?}")]
    UnknownVariant {
        /// Name of the option.
        option: &'static str,
        /// The spelling.
        value: String,
    },

    /// No node to contact was given.
    #[error("Empty known nodes list")]
    EmptyNodeList,

    /// A known node's host name does not resolve.
    #[error("Failed to resolve address {address}: {reason}")]
    UnresolvableAddress {
        /// Host name as given.
        address: String,
        /// Resolver's message.
        reason: String,
    },

    /// Configured authenticator name is not in the registry.
    #[error("Unknown authenticator: {0}")]
    UnknownAuthenticator(String),

    /// Settings contradict each other.
    #[error("Invalid configuration: {0}")]
    InvalidCombination(String),
}

/// Error returned when creating a [`Cluster`](crate::cluster::Cluster).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum NewClusterError {
    /// Configuration is invalid.
    #[error(transparent)]
    ConfigError(#[from] ConfigError),

    /// Node discovery failed and was configured as required.
    #[error("Node discovery failed: {0}")]
    DiscoveryError(#[from] DiscoveryError),
}

/// Failure to learn the cluster's nodes from a seed.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The seed could not be reached.
    #[error("Failed to connect to seed {address}: {error}")]
    Connection {
        /// Address of the seed.
        address: std::net::SocketAddr,
        /// Cause.
        error: ConnectionError,
    },

    /// A discovery query failed.
    #[error("Discovery query failed: {0}")]
    QueryError(#[from] QueryError),

    /// A discovery query did not return rows.
    #[error("Discovery query {0:?} did not return rows")]
    NotRows(&'static str),

    /// A required column is missing from the result.
    #[error("Column {0} missing from discovery result")]
    MissingColumn(&'static str),

    /// A column has an unexpected type or value.
    #[error("Malformed value in column {column}: {reason}")]
    MalformedColumn {
        /// Column name.
        column: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// No seed answered.
    #[error("None of the {0} seeds could be queried")]
    NoSeedReachable(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Consistency;

    #[test]
    fn db_error_keeps_server_fields() {
        let err: QueryError = crate::frame::response::Error {
            error: DbError::Unavailable {
                consistency: Consistency::Quorum,
                required: 3,
                alive: 1,
            },
            reason: "not enough replicas".to_owned(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Database returned an error: Too few live replicas for the consistency level \
            (consistency: QUORUM, required: 3, alive: 1), Error message: not enough replicas"
        );
        assert!(!err.is_connection_failure());
    }

    #[test]
    fn broken_connection_is_a_connection_failure() {
        let err: QueryError =
            BrokenConnectionError::from(BrokenConnectionErrorKind::UnexpectedStreamId(7)).into();
        assert!(err.is_connection_failure());
        assert_eq!(
            err.to_string(),
            "Connection broken, reason: Received a server frame with unexpected stream id: 7"
        );
        assert!(!QueryError::Cancelled.is_connection_failure());
    }
}
