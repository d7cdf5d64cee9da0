//! Primitive in-wire types of the native protocol: integers, lengths,
//! strings, byte blobs, maps, consistencies, inet addresses and decimals.

use super::frame_errors::LowLevelDeserializationError;
use super::TryFromPrimitiveError;
use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::net::{IpAddr, SocketAddr};
use std::str::{self, FromStr};
use thiserror::Error;
use uuid::Uuid;

/// Consistency level of a request.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Consistency {
    Any = 0x0000,
    One = 0x0001,
    Two = 0x0002,
    Three = 0x0003,
    Quorum = 0x0004,
    All = 0x0005,
    #[default]
    LocalQuorum = 0x0006,
    EachQuorum = 0x0007,
    LocalOne = 0x000A,

    // Reads can use these to go through Paxos.
    Serial = 0x0008,
    LocalSerial = 0x0009,
}

impl Consistency {
    const ALL: [Consistency; 11] = [
        Consistency::Any,
        Consistency::One,
        Consistency::Two,
        Consistency::Three,
        Consistency::Quorum,
        Consistency::All,
        Consistency::LocalQuorum,
        Consistency::EachQuorum,
        Consistency::Serial,
        Consistency::LocalSerial,
        Consistency::LocalOne,
    ];

    pub fn is_serial(&self) -> bool {
        matches!(self, Consistency::Serial | Consistency::LocalSerial)
    }

    /// The upper snake case name used in configuration and server messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::LocalOne => "LOCAL_ONE",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
        }
    }
}

impl TryFrom<u16> for Consistency {
    type Error = TryFromPrimitiveError<u16>;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|c| *c as u16 == value)
            .ok_or(TryFromPrimitiveError {
                enum_name: "Consistency",
                primitive: value,
            })
    }
}

/// Returned when a consistency name is not recognized.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown consistency name: {0}")]
pub struct ParseConsistencyError(pub String);

impl FromStr for Consistency {
    type Err = ParseConsistencyError;

    /// Accepts `LOCAL_QUORUM`, `LocalQuorum` and `local-quorum` alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().replace('_', "") == normalized)
            .ok_or_else(|| ParseConsistencyError(s.to_owned()))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i16)]
pub enum SerialConsistency {
    Serial = 0x0008,
    LocalSerial = 0x0009,
}

impl TryFrom<i16> for SerialConsistency {
    type Error = TryFromPrimitiveError<i16>;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0x0008 => Ok(Self::Serial),
            0x0009 => Ok(Self::LocalSerial),
            _ => Err(TryFromPrimitiveError {
                enum_name: "SerialConsistency",
                primitive: value,
            }),
        }
    }
}

#[derive(Debug, Error)]
#[error("Expected Consistency Serial or LocalSerial, got: {0}")]
pub struct NonSerialConsistencyError(Consistency);

impl TryFrom<Consistency> for SerialConsistency {
    type Error = NonSerialConsistencyError;

    fn try_from(c: Consistency) -> Result<Self, Self::Error> {
        match c {
            Consistency::Serial => Ok(SerialConsistency::Serial),
            Consistency::LocalSerial => Ok(SerialConsistency::LocalSerial),
            other => Err(NonSerialConsistencyError(other)),
        }
    }
}

impl std::fmt::Display for Consistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for SerialConsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerialConsistency::Serial => f.write_str("SERIAL"),
            SerialConsistency::LocalSerial => f.write_str("LOCAL_SERIAL"),
        }
    }
}

/// A [value] as it appears in a frame: `null`, `not set`, or bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RawValue<'a> {
    Null,
    Unset,
    Value(&'a [u8]),
}

impl<'a> RawValue<'a> {
    #[inline]
    pub fn as_value(&self) -> Option<&'a [u8]> {
        match self {
            RawValue::Value(v) => Some(v),
            RawValue::Null | RawValue::Unset => None,
        }
    }
}

pub(crate) fn read_raw_bytes<'a>(
    count: usize,
    buf: &mut &'a [u8],
) -> Result<&'a [u8], LowLevelDeserializationError> {
    if buf.len() < count {
        return Err(LowLevelDeserializationError::TooFewBytesReceived {
            expected: count,
            received: buf.len(),
        });
    }
    let (ret, rest) = buf.split_at(count);
    *buf = rest;
    Ok(ret)
}

type WriteResult = Result<(), std::num::TryFromIntError>;

pub fn read_int(buf: &mut &[u8]) -> Result<i32, std::io::Error> {
    buf.read_i32::<BigEndian>()
}

pub fn write_int(v: i32, buf: &mut impl BufMut) {
    buf.put_i32(v);
}

pub fn read_long(buf: &mut &[u8]) -> Result<i64, std::io::Error> {
    buf.read_i64::<BigEndian>()
}

pub fn write_long(v: i64, buf: &mut impl BufMut) {
    buf.put_i64(v);
}

pub fn read_short(buf: &mut &[u8]) -> Result<u16, std::io::Error> {
    buf.read_u16::<BigEndian>()
}

pub fn write_short(v: u16, buf: &mut impl BufMut) {
    buf.put_u16(v);
}

/// An [int] length; negative values are an error here.
pub fn read_int_length(buf: &mut &[u8]) -> Result<usize, LowLevelDeserializationError> {
    Ok(usize::try_from(read_int(buf)?)?)
}

pub(crate) fn write_int_length(len: usize, buf: &mut impl BufMut) -> WriteResult {
    write_int(i32::try_from(len)?, buf);
    Ok(())
}

pub(crate) fn read_short_length(buf: &mut &[u8]) -> Result<usize, std::io::Error> {
    read_short(buf).map(usize::from)
}

pub(crate) fn write_short_length(len: usize, buf: &mut impl BufMut) -> WriteResult {
    write_short(u16::try_from(len)?, buf);
    Ok(())
}

// [short] count followed by that many items.
fn read_short_seq<'a, T>(
    buf: &mut &'a [u8],
    mut item: impl FnMut(&mut &'a [u8]) -> Result<T, LowLevelDeserializationError>,
) -> Result<Vec<T>, LowLevelDeserializationError> {
    let count = read_short_length(buf)?;
    (0..count).map(|_| item(buf)).collect()
}

fn write_short_seq<B: BufMut, T>(
    items: impl ExactSizeIterator<Item = T>,
    buf: &mut B,
    mut item: impl FnMut(T, &mut B) -> WriteResult,
) -> WriteResult {
    write_short_length(items.len(), buf)?;
    items.into_iter().try_for_each(|i| item(i, buf))
}

/// Reads [bytes], where a negative length stands for `null`.
pub fn read_bytes_opt<'a>(
    buf: &mut &'a [u8],
) -> Result<Option<&'a [u8]>, LowLevelDeserializationError> {
    match read_int(buf)? {
        len if len < 0 => Ok(None),
        len => read_raw_bytes(len as usize, buf).map(Some),
    }
}

/// Same as [`read_bytes_opt`], but `null` is a deserialization error.
pub fn read_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], LowLevelDeserializationError> {
    let len = read_int_length(buf)?;
    read_raw_bytes(len, buf)
}

/// Reads a [value]: -1 is `null`, -2 is `not set`.
pub fn read_value<'a>(buf: &mut &'a [u8]) -> Result<RawValue<'a>, LowLevelDeserializationError> {
    match read_int(buf)? {
        -2 => Ok(RawValue::Unset),
        -1 => Ok(RawValue::Null),
        len if len >= 0 => read_raw_bytes(len as usize, buf).map(RawValue::Value),
        len => Err(LowLevelDeserializationError::InvalidValueLength(len)),
    }
}

pub fn read_short_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], LowLevelDeserializationError> {
    let len = read_short_length(buf)?;
    read_raw_bytes(len, buf)
}

pub fn write_bytes(v: &[u8], buf: &mut impl BufMut) -> WriteResult {
    write_int_length(v.len(), buf)?;
    buf.put_slice(v);
    Ok(())
}

pub fn write_bytes_opt(v: Option<impl AsRef<[u8]>>, buf: &mut impl BufMut) -> WriteResult {
    match v {
        Some(bytes) => write_bytes(bytes.as_ref(), buf),
        None => {
            write_int(-1, buf);
            Ok(())
        }
    }
}

pub fn write_short_bytes(v: &[u8], buf: &mut impl BufMut) -> WriteResult {
    write_short_length(v.len(), buf)?;
    buf.put_slice(v);
    Ok(())
}

pub fn read_bytes_map(
    buf: &mut &[u8],
) -> Result<HashMap<String, Bytes>, LowLevelDeserializationError> {
    let entries = read_short_seq(buf, |buf| {
        let key = read_string(buf)?.to_owned();
        Ok((key, Bytes::copy_from_slice(read_bytes(buf)?)))
    })?;
    Ok(entries.into_iter().collect())
}

pub fn write_bytes_map<V: AsRef<[u8]>>(
    v: &HashMap<String, V>,
    buf: &mut impl BufMut,
) -> WriteResult {
    write_short_seq(v.iter(), buf, |(key, val), buf| {
        write_string(key, buf)?;
        write_bytes(val.as_ref(), buf)
    })
}

fn utf8(raw: &[u8]) -> Result<&str, LowLevelDeserializationError> {
    Ok(str::from_utf8(raw)?)
}

pub fn read_string<'a>(buf: &mut &'a [u8]) -> Result<&'a str, LowLevelDeserializationError> {
    read_short_bytes(buf).and_then(utf8)
}

pub fn write_string(v: &str, buf: &mut impl BufMut) -> WriteResult {
    write_short_bytes(v.as_bytes(), buf)
}

pub fn read_long_string<'a>(buf: &mut &'a [u8]) -> Result<&'a str, LowLevelDeserializationError> {
    read_bytes(buf).and_then(utf8)
}

pub fn write_long_string(v: &str, buf: &mut impl BufMut) -> WriteResult {
    write_bytes(v.as_bytes(), buf)
}

pub fn read_string_map(
    buf: &mut &[u8],
) -> Result<HashMap<String, String>, LowLevelDeserializationError> {
    let entries = read_short_seq(buf, |buf| {
        Ok((read_string(buf)?.to_owned(), read_string(buf)?.to_owned()))
    })?;
    Ok(entries.into_iter().collect())
}

pub fn write_string_map(
    v: &HashMap<impl AsRef<str>, impl AsRef<str>>,
    buf: &mut impl BufMut,
) -> WriteResult {
    write_short_seq(v.iter(), buf, |(key, val), buf| {
        write_string(key.as_ref(), buf)?;
        write_string(val.as_ref(), buf)
    })
}

pub fn read_string_list(buf: &mut &[u8]) -> Result<Vec<String>, LowLevelDeserializationError> {
    read_short_seq(buf, |buf| read_string(buf).map(str::to_owned))
}

pub fn write_string_list(v: &[String], buf: &mut impl BufMut) -> WriteResult {
    write_short_seq(v.iter(), buf, |s, buf| write_string(s, buf))
}

pub fn read_string_multimap(
    buf: &mut &[u8],
) -> Result<HashMap<String, Vec<String>>, LowLevelDeserializationError> {
    let entries = read_short_seq(buf, |buf| {
        Ok((read_string(buf)?.to_owned(), read_string_list(buf)?))
    })?;
    Ok(entries.into_iter().collect())
}

pub fn write_string_multimap(
    v: &HashMap<String, Vec<String>>,
    buf: &mut impl BufMut,
) -> WriteResult {
    write_short_seq(v.iter(), buf, |(key, val), buf| {
        write_string(key, buf)?;
        write_string_list(val, buf)
    })
}

pub fn read_uuid(buf: &mut &[u8]) -> Result<Uuid, LowLevelDeserializationError> {
    let raw = read_raw_bytes(16, buf)?;
    let raw_array: [u8; 16] = raw.try_into()?;
    Ok(Uuid::from_bytes(raw_array))
}

pub fn write_uuid(uuid: &Uuid, buf: &mut impl BufMut) {
    buf.put_slice(&uuid.as_bytes()[..]);
}

pub fn read_consistency(buf: &mut &[u8]) -> Result<Consistency, LowLevelDeserializationError> {
    let raw = read_short(buf)?;
    Consistency::try_from(raw).map_err(LowLevelDeserializationError::UnknownConsistency)
}

pub fn write_consistency(c: Consistency, buf: &mut impl BufMut) {
    write_short(c as u16, buf);
}

pub fn write_serial_consistency(c: SerialConsistency, buf: &mut impl BufMut) {
    write_short(c as u16, buf);
}

pub fn read_inet(buf: &mut &[u8]) -> Result<SocketAddr, LowLevelDeserializationError> {
    let ip: IpAddr = match buf.read_u8()? {
        4 => <[u8; 4]>::try_from(read_raw_bytes(4, buf)?)?.into(),
        16 => <[u8; 16]>::try_from(read_raw_bytes(16, buf)?)?.into(),
        len => return Err(LowLevelDeserializationError::InvalidInetLength(len)),
    };
    let port = read_int(buf)?;
    Ok(SocketAddr::new(ip, port as u16))
}

pub fn write_inet(addr: SocketAddr, buf: &mut impl BufMut) {
    let octets = match addr.ip() {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };
    buf.put_u8(octets.len() as u8);
    buf.put_slice(&octets);
    write_int(i32::from(addr.port()), buf)
}

/// Writes a decimal: a 4-byte scale followed by the big-endian two's
/// complement unscaled value. The caller provides the [bytes] length prefix.
pub fn write_decimal(scale: i32, unscaled_be: &[u8], buf: &mut impl BufMut) {
    buf.put_i32(scale);
    buf.put_slice(unscaled_be);
}

/// Inverse of [`write_decimal`]; consumes the whole buffer.
pub fn read_decimal<'a>(buf: &mut &'a [u8]) -> Result<(i32, &'a [u8]), LowLevelDeserializationError> {
    let scale = read_int(buf)?;
    let unscaled = std::mem::take(buf);
    Ok((scale, unscaled))
}

/// Drops redundant leading sign bytes from a big-endian two's complement integer.
pub fn trim_twos_complement(mut bytes: &[u8]) -> &[u8] {
    while bytes.len() > 1 {
        let redundant = (bytes[0] == 0x00 && bytes[1] & 0x80 == 0)
            || (bytes[0] == 0xff && bytes[1] & 0x80 != 0);
        if !redundant {
            break;
        }
        bytes = &bytes[1..];
    }
    bytes
}
