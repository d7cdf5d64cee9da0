//! Frame layout of protocol version 4.
//!
//! Every frame is a 9-byte header followed by a body:
//!
//! ```text
//! version (1) | flags (1) | stream (2) | opcode (1) | body length (4)
//! ```
//!
//! The top bit of `version` tells responses (set) from requests (clear).

pub mod frame_errors;
pub mod request;
pub mod response;
pub mod server_event_type;
pub mod snappy;
pub mod types;
pub mod value;

use crate::frame::frame_errors::{CompressionError, CqlRequestSerializationError, FrameError};
use crate::memory_pool::{MemoryPool, PooledBuffer};
use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use std::fmt::Display;
use std::str::FromStr;
use std::{collections::HashMap, convert::TryFrom};

use request::{RequestOpcode, SerializableRequest};
use response::ResponseOpcode;

pub const HEADER_SIZE: usize = 9;

/// The only protocol version spoken.
pub const PROTOCOL_VERSION: u8 = 0x04;
const DIRECTION_RESPONSE: u8 = 0x80;

// Frame flags
pub const FLAG_COMPRESSION: u8 = 0x01;
pub const FLAG_TRACING: u8 = 0x02;
pub const FLAG_CUSTOM_PAYLOAD: u8 = 0x04;
pub const FLAG_WARNING: u8 = 0x08;

/// Default limit for the body length of incoming frames.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// The wire protocol compression algorithm.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum Compression {
    /// LZ4 compression algorithm.
    Lz4,
    /// Snappy compression algorithm.
    Snappy,
}

impl Compression {
    /// Name used in STARTUP options and in SUPPORTED responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Lz4 => "lz4",
            Compression::Snappy => "snappy",
        }
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned for compression names other than `lz4` and `snappy`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown compression: {0}")]
pub struct UnknownCompression(pub String);

impl FromStr for Compression {
    type Err = UnknownCompression;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lz4" => Ok(Compression::Lz4),
            "snappy" => Ok(Compression::Snappy),
            _ => Err(UnknownCompression(s.to_owned())),
        }
    }
}

/// A request frame ready to be written, except for its stream id.
///
/// The bytes live in a buffer taken from a [`MemoryPool`] and go back to it
/// when the request is dropped.
#[derive(Debug)]
pub struct SerializedRequest {
    data: PooledBuffer,
}

impl SerializedRequest {
    pub fn make<R: SerializableRequest>(
        req: &R,
        compression: Option<Compression>,
        tracing: bool,
        pool: &MemoryPool,
    ) -> Result<SerializedRequest, CqlRequestSerializationError> {
        let mut data = pool.take(HEADER_SIZE + req.size_hint());
        data.resize(HEADER_SIZE, 0);
        match compression {
            Some(compression) => {
                let mut body = pool.take(req.size_hint());
                req.serialize(&mut body)?;
                compress_append(&body, compression, &mut data)?;
            }
            None => req.serialize(&mut data)?,
        }

        let body_len = u32::try_from(data.len() - HEADER_SIZE)?;
        let mut flags = 0;
        if compression.is_some() {
            flags |= FLAG_COMPRESSION;
        }
        if tracing {
            flags |= FLAG_TRACING;
        }
        // Bytes 2..4 hold the stream id, set right before writing.
        data[..2].copy_from_slice(&[PROTOCOL_VERSION, flags]);
        data[4] = R::OPCODE as u8;
        data[5..HEADER_SIZE].copy_from_slice(&body_len.to_be_bytes());

        Ok(Self { data })
    }

    pub fn set_stream(&mut self, stream: i16) {
        self.data[2..4].copy_from_slice(&stream.to_be_bytes());
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data[..]
    }
}

/// Parts of the frame header which are not determined by the request/response type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameParams {
    pub version: u8,
    pub flags: u8,
    pub stream: i16,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: 0x00,
            stream: 0,
        }
    }
}

impl FrameParams {
    pub fn for_request(&self) -> FrameParams {
        Self {
            version: self.version & !DIRECTION_RESPONSE,
            ..*self
        }
    }

    pub fn for_response(&self) -> FrameParams {
        Self {
            version: self.version | DIRECTION_RESPONSE,
            ..*self
        }
    }
}

/// Appends a complete frame with the given header fields and body.
///
/// Requests built by the driver go through [`SerializedRequest`]; this is for
/// frames whose body is already at hand, such as responses of a test server.
pub fn write_frame(
    params: FrameParams,
    opcode: u8,
    body: &[u8],
    out: &mut impl BufMut,
) -> Result<(), CqlRequestSerializationError> {
    let body_len: u32 = body.len().try_into()?;
    out.put_u8(params.version);
    out.put_u8(params.flags);
    out.put_i16(params.stream);
    out.put_u8(opcode);
    out.put_u32(body_len);
    out.put_slice(body);
    Ok(())
}

async fn read_frame_header(
    reader: &mut (impl AsyncRead + Unpin),
    expect_response: bool,
    max_frame_size: usize,
) -> Result<(FrameParams, u8, usize), FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let version = header[0];
    let from_server = version & DIRECTION_RESPONSE != 0;
    if from_server != expect_response {
        return Err(if from_server {
            FrameError::FrameFromServer
        } else {
            FrameError::FrameFromClient
        });
    }
    if version & !DIRECTION_RESPONSE != PROTOCOL_VERSION {
        return Err(FrameError::VersionNotSupported(version & !DIRECTION_RESPONSE));
    }

    let length = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
    if length > max_frame_size {
        return Err(FrameError::TooLargeFrame {
            size: length,
            max: max_frame_size,
        });
    }
    let params = FrameParams {
        version,
        flags: header[1],
        stream: i16::from_be_bytes([header[2], header[3]]),
    };
    Ok((params, header[4], length))
}

// Grows with the data that actually arrives rather than trusting the
// declared length up front.
const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

async fn read_body(
    reader: &mut (impl AsyncRead + Unpin),
    length: usize,
) -> Result<Bytes, FrameError> {
    let mut body = Vec::with_capacity(length.min(INITIAL_BODY_CAPACITY));
    let read = reader.take(length as u64).read_to_end(&mut body).await?;
    if read < length {
        return Err(FrameError::ConnectionClosed(length - read, length));
    }
    Ok(body.into())
}

/// Reads one response frame. Bodies longer than `max_frame_size` are rejected
/// before anything is allocated for them.
pub async fn read_response_frame(
    reader: &mut (impl AsyncRead + Unpin),
    max_frame_size: usize,
) -> Result<(FrameParams, ResponseOpcode, Bytes), FrameError> {
    let (params, opcode, length) = read_frame_header(reader, true, max_frame_size).await?;
    let opcode = ResponseOpcode::try_from(opcode)?;
    let body = read_body(reader, length).await?;
    Ok((params, opcode, body))
}

/// Reads one request frame, the way a server would.
pub async fn read_request_frame(
    reader: &mut (impl AsyncRead + Unpin),
    max_frame_size: usize,
) -> Result<(FrameParams, RequestOpcode, Bytes), FrameError> {
    let (params, opcode, length) = read_frame_header(reader, false, max_frame_size).await?;
    let opcode = RequestOpcode::try_from(opcode)?;
    let body = read_body(reader, length).await?;
    Ok((params, opcode, body))
}

#[derive(Debug)]
pub struct ResponseBodyWithExtensions {
    pub trace_id: Option<Uuid>,
    pub warnings: Vec<String>,
    pub body: Bytes,
    pub custom_payload: Option<HashMap<String, Bytes>>,
}

// Strips one extension off the front of the body when `present`.
fn take_extension<T>(
    body: &mut Bytes,
    present: bool,
    read: impl FnOnce(&mut &[u8]) -> Result<T, frame_errors::LowLevelDeserializationError>,
) -> Result<Option<T>, FrameError> {
    if !present {
        return Ok(None);
    }
    let mut rest = &body[..];
    let value = read(&mut rest).map_err(FrameError::BodyExtensionParseError)?;
    let consumed = body.len() - rest.len();
    body.advance(consumed);
    Ok(Some(value))
}

/// Decompresses the body if needed and strips the extensions announced by
/// `flags`, in the order they appear on the wire.
///
/// A decompressed body lives in a buffer taken from `pool`; the buffer goes
/// back once every slice of the returned body is dropped.
pub fn parse_response_body_extensions(
    flags: u8,
    compression: Option<Compression>,
    mut body: Bytes,
    pool: &MemoryPool,
) -> Result<ResponseBodyWithExtensions, FrameError> {
    if flags & FLAG_COMPRESSION != 0 {
        let compression = compression.ok_or(FrameError::NoCompressionNegotiated)?;
        let mut uncompressed = pool.take(decompressed_len(&body, compression)?);
        decompress_into(&body, compression, &mut uncompressed)?;
        body = uncompressed.into_bytes();
    }

    let trace_id = take_extension(&mut body, flags & FLAG_TRACING != 0, types::read_uuid)?;
    let warnings = take_extension(&mut body, flags & FLAG_WARNING != 0, types::read_string_list)?
        .unwrap_or_default();
    let custom_payload =
        take_extension(&mut body, flags & FLAG_CUSTOM_PAYLOAD != 0, types::read_bytes_map)?;

    Ok(ResponseBodyWithExtensions {
        trace_id,
        warnings,
        body,
        custom_payload,
    })
}

/// Compresses `uncomp_body` and appends the result to `out`.
///
/// LZ4 bodies carry a 4-byte big-endian uncompressed length before the block;
/// Snappy-format blocks carry their own length header.
pub fn compress_append(
    uncomp_body: &[u8],
    compression: Compression,
    out: &mut Vec<u8>,
) -> Result<(), CompressionError> {
    match compression {
        Compression::Lz4 => {
            let len = u32::try_from(uncomp_body.len())
                .map_err(|_| CompressionError::InputTooLarge(uncomp_body.len()))?;
            out.put_u32(len);
            let start = out.len();
            out.resize(start + lz4_flex::block::get_maximum_output_size(uncomp_body.len()), 0);
            let written = lz4_flex::block::compress_into(uncomp_body, &mut out[start..])
                .map_err(|e| CompressionError::Lz4CompressError(e.to_string()))?;
            out.truncate(start + written);
            Ok(())
        }
        Compression::Snappy => snappy::compress_into(uncomp_body, out).map(|_| ()),
    }
}

// LZ4 cannot expand a block by more than this factor.
const LZ4_MAX_EXPANSION: usize = 255;

// Splits an LZ4 body into its declared length and the block.
fn lz4_length_prefix(mut comp_body: &[u8]) -> Result<(usize, &[u8]), CompressionError> {
    if comp_body.len() < std::mem::size_of::<u32>() {
        return Err(CompressionError::Lz4MissingLength);
    }
    let uncomp_len = comp_body.get_u32() as usize;
    if uncomp_len > comp_body.len().saturating_mul(LZ4_MAX_EXPANSION) {
        return Err(CompressionError::Lz4DecompressError(format!(
            "declared length {} is impossible for {} bytes of input",
            uncomp_len,
            comp_body.len()
        )));
    }
    Ok((uncomp_len, comp_body))
}

/// Length of the body once decompressed, as declared by its header.
pub fn decompressed_len(comp_body: &[u8], compression: Compression) -> Result<usize, CompressionError> {
    match compression {
        Compression::Lz4 => lz4_length_prefix(comp_body).map(|(len, _)| len),
        Compression::Snappy => snappy::decompress_len(comp_body),
    }
}

/// Decompresses `comp_body` and appends the result to `out`.
pub fn decompress_into(
    comp_body: &[u8],
    compression: Compression,
    out: &mut Vec<u8>,
) -> Result<(), CompressionError> {
    match compression {
        Compression::Lz4 => {
            let (uncomp_len, block) = lz4_length_prefix(comp_body)?;
            let start = out.len();
            out.resize(start + uncomp_len, 0);
            let written = lz4_flex::block::decompress_into(block, &mut out[start..]);
            match written {
                Ok(written) if written == uncomp_len => Ok(()),
                Ok(written) => {
                    out.truncate(start);
                    Err(CompressionError::Lz4DecompressError(format!(
                        "decompressed {} bytes, but the prefix declared {}",
                        written, uncomp_len
                    )))
                }
                Err(e) => {
                    out.truncate(start);
                    Err(e.into())
                }
            }
        }
        Compression::Snappy => snappy::decompress_into(comp_body, out).map(|_| ()),
    }
}

pub fn decompress(comp_body: &[u8], compression: Compression) -> Result<Vec<u8>, CompressionError> {
    let mut out = Vec::new();
    decompress_into(comp_body, compression, &mut out)?;
    Ok(out)
}

/// An error type for parsing an enum value from a primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No discrimant in enum `{enum_name}` matches the value `{primitive:?}`")]
pub struct TryFromPrimitiveError<T: Copy + std::fmt::Debug> {
    enum_name: &'static str,
    primitive: T,
}
