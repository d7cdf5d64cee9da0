//! Errors that can occur while encoding or decoding frames.

use std::num::TryFromIntError;
use std::sync::Arc;

use super::TryFromPrimitiveError;
use crate::registry::TypeRegistryError;
use thiserror::Error;

/// An error that occurred while reading a frame header or body from the wire,
/// or while unwrapping its body extensions.
///
/// Any of these leaves the stream in an unknown position, so the connection
/// that produced it must not be used anymore.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum FrameError {
    /// Frame had the direction bit of a client frame where a server frame was expected.
    #[error("Received frame marked as coming from a client")]
    FrameFromClient,

    /// Frame had the direction bit of a server frame where a client frame was expected.
    #[error("Received frame marked as coming from the server")]
    FrameFromServer,

    /// Protocol version other than 4.
    #[error("Received a frame from version {0}, but only 4 is supported")]
    VersionNotSupported(u8),

    /// Declared body length exceeds the configured limit.
    #[error("Frame body of {size} bytes exceeds the maximum allowed size of {max} bytes")]
    TooLargeFrame {
        /// Declared body length.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Stream ended before the whole body was read.
    #[error("Connection was closed before body was read: missing {0} out of {1}")]
    ConnectionClosed(usize, usize),

    /// Frame is flagged as compressed, but no compression was negotiated.
    #[error("Frame is compressed, but no compression negotiated for connection.")]
    NoCompressionNegotiated,

    /// Body compression or decompression failed.
    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// Unknown opcode in the header.
    #[error("Unrecognized opcode: {0}")]
    UnknownOpcode(#[from] TryFromPrimitiveError<u8>),

    /// Body extensions (tracing id, warnings, custom payload) were malformed.
    #[error("Malformed body extensions: {0}")]
    BodyExtensionParseError(LowLevelDeserializationError),

    /// Read failed.
    #[error("I/O error while reading a frame: {0}")]
    StdIoError(Arc<std::io::Error>),
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::StdIoError(Arc::new(err))
    }
}

/// A failure of the block compression codecs.
///
/// The Snappy-format decoder reports every out-of-bounds access as one of these
/// instead of reading or writing past a buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompressionError {
    /// The varint length header ended before its last byte.
    #[error("Compressed block ends inside its length header")]
    TruncatedHeader,

    /// The varint length header does not fit in 32 bits.
    #[error("Compressed block length header overflows 32 bits")]
    HeaderOverflow,

    /// The declared uncompressed length cannot be produced from the given input.
    #[error("Declared uncompressed length {declared} is impossible for {available} bytes of input")]
    ImpossibleLength {
        /// Length from the header.
        declared: usize,
        /// Bytes of tag stream following the header.
        available: usize,
    },

    /// A literal run extends past the end of the input.
    #[error("Literal of {len} bytes at input offset {at} runs past the end of the input")]
    TruncatedLiteral {
        /// Offset of the literal's first byte.
        at: usize,
        /// Length of the literal.
        len: usize,
    },

    /// A tag's trailing bytes (literal length or copy offset) are missing.
    #[error("Tag at input offset {at} is missing its trailing bytes")]
    TruncatedTag {
        /// Offset of the tag byte.
        at: usize,
    },

    /// A back-reference points before the beginning of the output.
    #[error("Copy with offset {offset} refers before the start of the output ({produced} bytes produced)")]
    InvalidOffset {
        /// Offset of the back-reference.
        offset: usize,
        /// Output produced so far.
        produced: usize,
    },

    /// The tag stream produces more output than the header declared.
    #[error("Decompressed data exceeds the declared length of {declared} bytes")]
    OutputOverflow {
        /// Length from the header.
        declared: usize,
    },

    /// The tag stream ended before producing the declared length.
    #[error("Decompressed {produced} bytes, but the header declared {declared}")]
    LengthMismatch {
        /// Length from the header.
        declared: usize,
        /// Length actually produced.
        produced: usize,
    },

    /// Input is too long for the 32-bit length header.
    #[error("Cannot compress {0} bytes: input exceeds the 32-bit length header")]
    InputTooLarge(usize),

    /// LZ4 body is shorter than its 4-byte length prefix.
    #[error("LZ4 body is missing its length prefix")]
    Lz4MissingLength,

    /// LZ4 decompression failed.
    #[error("Error decompressing lz4 data: {0}")]
    Lz4DecompressError(String),

    /// LZ4 compression failed.
    #[error("Error compressing lz4 data: {0}")]
    Lz4CompressError(String),
}

impl From<lz4_flex::block::DecompressError> for CompressionError {
    fn from(err: lz4_flex::block::DecompressError) -> Self {
        CompressionError::Lz4DecompressError(err.to_string())
    }
}

/// A low level deserialization error.
///
/// Returned by the primitive readers in [`types`](super::types).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum LowLevelDeserializationError {
    /// A read from the buffer failed.
    #[error(transparent)]
    IoError(Arc<std::io::Error>),

    /// A length did not fit the target integer type.
    #[error(transparent)]
    TryFromIntError(#[from] TryFromIntError),

    /// Fewer bytes were left in the buffer than the length prefix promised.
    #[error("Too few bytes received: expected {expected}, received {received}")]
    TooFewBytesReceived {
        /// Promised length.
        expected: usize,
        /// Bytes actually left.
        received: usize,
    },

    /// A [value] length below -2.
    #[error("Invalid value length: {0}")]
    InvalidValueLength(i32),

    /// A consistency code that is not defined.
    #[error("Unknown consistency: {0}")]
    UnknownConsistency(#[from] TryFromPrimitiveError<u16>),

    /// An [inet] whose address length is neither 4 nor 16.
    #[error("Invalid inet bytes length: {0}. Accepted lengths are 4 and 16 bytes.")]
    InvalidInetLength(u8),

    /// A [string] that is not valid UTF-8.
    #[error("UTF8 deserialization failed: {0}")]
    UTF8DeserializationError(#[from] std::str::Utf8Error),
}

impl From<std::io::Error> for LowLevelDeserializationError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(Arc::new(value))
    }
}

impl From<std::array::TryFromSliceError> for LowLevelDeserializationError {
    fn from(_: std::array::TryFromSliceError) -> Self {
        Self::TooFewBytesReceived {
            expected: 16,
            received: 0,
        }
    }
}

/// An error that occurred while serializing a request body.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum CqlRequestSerializationError {
    /// A string, byte blob or collection is too long for its length prefix.
    #[error("Value too long for its length prefix: {0}")]
    LengthOverflow(#[from] TryFromIntError),

    /// More bound values than a request can carry.
    #[error("Too many bound values: {0}, at most {max} are allowed", max = u16::MAX)]
    TooManyValues(usize),

    /// A bound value could not be serialized by the type registry.
    #[error("Failed to serialize a bound value: {0}")]
    ValueSerialization(#[from] TypeRegistryError),

    /// Compressing the body failed.
    #[error(transparent)]
    Compression(#[from] CompressionError),
}

/// An error returned when deserializing a request, which is only needed by
/// servers and test doubles.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum RequestDeserializationError {
    /// A primitive could not be read.
    #[error("Low level deser error: {0}")]
    LowLevelDeserialization(#[from] LowLevelDeserializationError),

    /// Query flags contain bits this protocol version does not define.
    #[error("Specified flags are not recognised: {flags:02x}")]
    UnknownFlags {
        /// The unknown bits.
        flags: u8,
    },

    /// REGISTER named an event type that does not exist.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// Values bound by name are not read back.
    #[error("Named values in frame are currently unsupported")]
    NamedValuesUnsupported,

    /// A serial consistency field held a non-serial consistency.
    #[error("Expected SerialConsistency, got regular Consistency: {0}")]
    ExpectedSerialConsistency(crate::Consistency),
}

/// An error that occurred while parsing a response body.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum CqlResponseParseError {
    /// ERROR body.
    #[error("Failed to deserialize ERROR response: {0}")]
    CqlErrorParseError(#[from] CqlErrorParseError),

    /// RESULT body.
    #[error("Failed to deserialize RESULT response: {0}")]
    CqlResultParseError(#[from] CqlResultParseError),

    /// EVENT body.
    #[error("Failed to deserialize EVENT response: {0}")]
    CqlEventParseError(#[from] CqlEventParseError),

    /// AUTHENTICATE body.
    #[error("Failed to deserialize AUTHENTICATE response: {0}")]
    CqlAuthenticateParseError(LowLevelDeserializationError),

    /// AUTH_SUCCESS body.
    #[error("Failed to deserialize AUTH_SUCCESS response: {0}")]
    CqlAuthSuccessParseError(LowLevelDeserializationError),

    /// AUTH_CHALLENGE body.
    #[error("Failed to deserialize AUTH_CHALLENGE response: {0}")]
    CqlAuthChallengeParseError(LowLevelDeserializationError),

    /// SUPPORTED body.
    #[error("Failed to deserialize SUPPORTED response: {0}")]
    CqlSupportedParseError(LowLevelDeserializationError),
}

/// An error type returned when deserialization of ERROR response fails.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum CqlErrorParseError {
    /// Error code could not be read.
    #[error("Malformed error code: {0}")]
    ErrorCodeParseError(LowLevelDeserializationError),

    /// Reason string could not be read.
    #[error("Malformed error reason: {0}")]
    ReasonParseError(LowLevelDeserializationError),

    /// One of the structured fields of a specific error could not be read.
    #[error("Malformed error field {field} of DB error {db_error}: {err}")]
    MalformedErrorField {
        /// Name of the error kind.
        db_error: &'static str,
        /// Name of the field.
        field: &'static str,
        /// Cause.
        err: LowLevelDeserializationError,
    },
}

/// An error type returned when deserialization of RESULT response fails.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum CqlResultParseError {
    /// Result kind could not be read.
    #[error("Malformed RESULT response id: {0}")]
    ResultIdParseError(LowLevelDeserializationError),

    /// Result kind is not defined.
    #[error("Unknown RESULT response id: {0}")]
    UnknownResultId(i32),

    /// Rows or prepared metadata could not be read.
    #[error("Malformed result metadata: {0}")]
    MetadataParseError(LowLevelDeserializationError),

    /// A column type option id is not defined.
    #[error("Unknown column type id: {0:#06x}")]
    UnknownColumnType(u16),

    /// Collection, tuple or UDT types are nested past the given limit.
    #[error("Column type nested deeper than {0} levels")]
    TypeNestingTooDeep(usize),

    /// Metadata announced a different number of columns than it described.
    #[error("Column count {col_count} does not match the {col_specs_count} column specs")]
    ColumnCountMismatch {
        /// Announced count.
        col_count: usize,
        /// Described columns.
        col_specs_count: usize,
    },

    /// Rows came without metadata and none was cached for the statement.
    #[error("Rows came without metadata and no cached metadata was provided")]
    MissingMetadata,

    /// Row contents could not be read.
    #[error("Malformed rows content: {0}")]
    RowsParseError(LowLevelDeserializationError),

    /// A cell could not be deserialized into its declared type.
    #[error("Failed to deserialize column {column}: {err}")]
    ValueDeserialization {
        /// Column name.
        column: String,
        /// Cause.
        err: TypeRegistryError,
    },

    /// RESULT::SetKeyspace body.
    #[error("Malformed RESULT::SetKeyspace response: {0}")]
    SetKeyspaceParseError(LowLevelDeserializationError),

    /// RESULT::Prepared body.
    #[error("Malformed RESULT::Prepared response: {0}")]
    PreparedParseError(LowLevelDeserializationError),

    /// RESULT::SchemaChange body.
    #[error("Malformed RESULT::SchemaChange response: {0}")]
    SchemaChangeParseError(#[from] CqlEventParseError),
}

/// An error type returned when deserialization of EVENT response
/// (or the schema change part of a RESULT) fails.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum CqlEventParseError {
    /// Event type string could not be read.
    #[error("Malformed event type string: {0}")]
    EventTypeParseError(LowLevelDeserializationError),

    /// Event type is not defined.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// Change type string is not defined.
    #[error("Unknown change type: {0}")]
    UnknownChangeType(String),

    /// Schema change target is not defined.
    #[error("Unknown schema change target: {0}")]
    UnknownTarget(String),

    /// One of the event fields could not be read.
    #[error("Malformed event field: {0}")]
    FieldParseError(#[from] LowLevelDeserializationError),
}
