//! Name-keyed table of value codecs.
//!
//! A [`TypeRegistry`] turns [`CqlValue`]s into the bytes of a [value] and
//! back, given the [`ColumnType`] the server declared. It is assembled from a
//! compiled-in list of codecs for the native and composite types; extra
//! codecs for server-side custom types can be registered explicitly under
//! their class name.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes};
use thiserror::Error;
use uuid::Uuid;

use crate::frame::frame_errors::LowLevelDeserializationError;
use crate::frame::types;
use crate::value::{ColumnType, CqlDecimal, CqlValue, CqlVarint};

/// Failure of a value codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TypeRegistryError {
    /// No codec is registered for the type.
    #[error("No codec registered for type {0}")]
    UnknownType(String),

    /// The value cannot be represented as the declared type.
    #[error("Cannot serialize {value} as {typ}")]
    TypeMismatch {
        /// Declared type.
        typ: String,
        /// Kind of the offered value.
        value: &'static str,
    },

    /// The bytes are not a valid encoding of the declared type.
    #[error("Malformed {typ} value: {reason}")]
    Malformed {
        /// Declared type.
        typ: String,
        /// What was wrong.
        reason: String,
    },

    /// A collection or a blob is too long for its length prefix.
    #[error("Value of type {0} is too long for its length prefix")]
    ValueTooLong(String),
}

impl TypeRegistryError {
    fn mismatch(typ: &ColumnType, value: &CqlValue) -> Self {
        TypeRegistryError::TypeMismatch {
            typ: typ.to_string(),
            value: value_kind(value),
        }
    }

    fn malformed(typ: &ColumnType, reason: impl fmt::Display) -> Self {
        TypeRegistryError::Malformed {
            typ: typ.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn value_kind(value: &CqlValue) -> &'static str {
    match value {
        CqlValue::Ascii(_) => "ascii",
        CqlValue::Boolean(_) => "boolean",
        CqlValue::Blob(_) => "blob",
        CqlValue::Counter(_) => "counter",
        CqlValue::Decimal(_) => "decimal",
        CqlValue::Date(_) => "date",
        CqlValue::Double(_) => "double",
        CqlValue::Empty => "empty",
        CqlValue::Float(_) => "float",
        CqlValue::Int(_) => "int",
        CqlValue::BigInt(_) => "bigint",
        CqlValue::Text(_) => "text",
        CqlValue::Timestamp(_) => "timestamp",
        CqlValue::Inet(_) => "inet",
        CqlValue::List(_) => "list",
        CqlValue::Map(_) => "map",
        CqlValue::Set(_) => "set",
        CqlValue::UserDefinedType { .. } => "user defined type",
        CqlValue::SmallInt(_) => "smallint",
        CqlValue::TinyInt(_) => "tinyint",
        CqlValue::Time(_) => "time",
        CqlValue::Timeuuid(_) => "timeuuid",
        CqlValue::Tuple(_) => "tuple",
        CqlValue::Uuid(_) => "uuid",
        CqlValue::Varint(_) => "varint",
    }
}

/// Converts values of one or more types to and from their wire form.
///
/// Codecs for composite types call back into the registry for their elements.
pub trait TypeCodec: Send + Sync + fmt::Debug {
    /// Appends the encoding of `value` (without a length prefix) to `out`.
    fn serialize(
        &self,
        typ: &ColumnType,
        value: &CqlValue,
        registry: &TypeRegistry,
        out: &mut Vec<u8>,
    ) -> Result<(), TypeRegistryError>;

    /// Decodes a non-null, non-empty value.
    fn deserialize(
        &self,
        typ: &ColumnType,
        bytes: &[u8],
        registry: &TypeRegistry,
    ) -> Result<CqlValue, TypeRegistryError>;
}

/// Table of codecs keyed by type name.
#[derive(Clone)]
pub struct TypeRegistry {
    codecs: HashMap<String, Arc<dyn TypeCodec>>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.codecs.keys().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("codecs", &names).finish()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtin_codecs()
    }
}

const NATIVE_TYPE_NAMES: [&str; 20] = [
    "ascii",
    "boolean",
    "blob",
    "counter",
    "date",
    "decimal",
    "double",
    "float",
    "int",
    "bigint",
    "text",
    "varchar",
    "timestamp",
    "inet",
    "smallint",
    "tinyint",
    "time",
    "timeuuid",
    "uuid",
    "varint",
];

impl TypeRegistry {
    /// A registry without any codecs.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// A registry with codecs for all native types, collections, tuples and
    /// user defined types.
    pub fn with_builtin_codecs() -> Self {
        let mut registry = Self::empty();
        let native: Arc<dyn TypeCodec> = Arc::new(NativeCodec);
        for name in NATIVE_TYPE_NAMES {
            registry.register(name, native.clone());
        }
        let collection: Arc<dyn TypeCodec> = Arc::new(CollectionCodec);
        for name in ["list", "set", "map"] {
            registry.register(name, collection.clone());
        }
        registry.register("tuple", Arc::new(TupleCodec));
        registry.register("udt", Arc::new(UdtCodec));
        registry
    }

    /// Adds a codec, or replaces the one registered under the same name.
    /// Returns the replaced codec.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        codec: Arc<dyn TypeCodec>,
    ) -> Option<Arc<dyn TypeCodec>> {
        self.codecs.insert(name.into(), codec)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    fn codec_for(&self, typ: &ColumnType) -> Result<&dyn TypeCodec, TypeRegistryError> {
        let name = typ.codec_name();
        if let Some(codec) = self.codecs.get(name) {
            return Ok(codec.as_ref());
        }
        // Custom class names may be registered without their package prefix.
        if let ColumnType::Custom(class) = typ {
            if let Some((_, codec)) = self.codecs.iter().find(|(registered, _)| {
                class
                    .strip_suffix(registered.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
            }) {
                return Ok(codec.as_ref());
            }
        }
        Err(TypeRegistryError::UnknownType(typ.to_string()))
    }

    /// Serializes `value` as `typ`, without a length prefix.
    pub fn serialize(&self, typ: &ColumnType, value: &CqlValue) -> Result<Bytes, TypeRegistryError> {
        let mut out = Vec::new();
        self.serialize_into(typ, value, &mut out)?;
        Ok(out.into())
    }

    fn serialize_into(
        &self,
        typ: &ColumnType,
        value: &CqlValue,
        out: &mut Vec<u8>,
    ) -> Result<(), TypeRegistryError> {
        if let CqlValue::Empty = value {
            return Ok(());
        }
        self.codec_for(typ)?.serialize(typ, value, self, out)
    }

    /// Appends `value` as a length-prefixed [value]; `None` is written as null.
    pub fn write_value(
        &self,
        typ: &ColumnType,
        value: Option<&CqlValue>,
        out: &mut Vec<u8>,
    ) -> Result<(), TypeRegistryError> {
        let Some(value) = value else {
            types::write_int(-1, out);
            return Ok(());
        };
        let len_pos = out.len();
        out.put_i32(0);
        self.serialize_into(typ, value, out)?;
        let len: i32 = (out.len() - len_pos - 4)
            .try_into()
            .map_err(|_| TypeRegistryError::ValueTooLong(typ.to_string()))?;
        out[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
        Ok(())
    }

    /// Deserializes a value of type `typ`; `None` stands for null.
    ///
    /// Zero bytes decode to [`CqlValue::Empty`] unless the type has a natural
    /// empty value (text, blob, collections).
    pub fn deserialize(
        &self,
        typ: &ColumnType,
        bytes: Option<&[u8]>,
    ) -> Result<Option<CqlValue>, TypeRegistryError> {
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        if bytes.is_empty()
            && !matches!(
                typ,
                ColumnType::Ascii | ColumnType::Text | ColumnType::Blob | ColumnType::Custom(_)
            )
            && !typ.is_collection()
        {
            return Ok(Some(CqlValue::Empty));
        }
        self.codec_for(typ)?
            .deserialize(typ, bytes, self)
            .map(Some)
    }

    /// Reads one length-prefixed [value] from `buf` and deserializes it.
    pub fn read_value(
        &self,
        typ: &ColumnType,
        buf: &mut &[u8],
    ) -> Result<Option<CqlValue>, TypeRegistryError> {
        let bytes = types::read_bytes_opt(buf).map_err(|err| TypeRegistryError::malformed(typ, err))?;
        self.deserialize(typ, bytes)
    }
}

fn fixed<const N: usize>(typ: &ColumnType, bytes: &[u8]) -> Result<[u8; N], TypeRegistryError> {
    bytes.try_into().map_err(|_| {
        TypeRegistryError::malformed(typ, format!("expected {} bytes, got {}", N, bytes.len()))
    })
}

fn low_level(typ: &ColumnType) -> impl Fn(LowLevelDeserializationError) -> TypeRegistryError + '_ {
    move |err| TypeRegistryError::malformed(typ, err)
}

/// Codec of all native (non-composite) types.
#[derive(Debug)]
struct NativeCodec;

impl TypeCodec for NativeCodec {
    fn serialize(
        &self,
        typ: &ColumnType,
        value: &CqlValue,
        _registry: &TypeRegistry,
        out: &mut Vec<u8>,
    ) -> Result<(), TypeRegistryError> {
        match (typ, value) {
            (ColumnType::Ascii, CqlValue::Ascii(s) | CqlValue::Text(s)) if s.is_ascii() => {
                out.put_slice(s.as_bytes())
            }
            (ColumnType::Text, CqlValue::Text(s) | CqlValue::Ascii(s)) => {
                out.put_slice(s.as_bytes())
            }
            (ColumnType::Boolean, CqlValue::Boolean(b)) => out.put_u8(u8::from(*b)),
            (ColumnType::Blob, CqlValue::Blob(b)) => out.put_slice(b),
            (ColumnType::Counter, CqlValue::Counter(v) | CqlValue::BigInt(v))
            | (ColumnType::BigInt, CqlValue::BigInt(v) | CqlValue::Counter(v))
            | (ColumnType::Timestamp, CqlValue::Timestamp(v))
            | (ColumnType::Time, CqlValue::Time(v)) => out.put_i64(*v),
            (ColumnType::Decimal, CqlValue::Decimal(d)) => {
                let (unscaled, scale) = d.as_signed_be_bytes_slice_and_exponent();
                types::write_decimal(scale, unscaled, out);
            }
            (ColumnType::Date, CqlValue::Date(d)) => out.put_u32(*d),
            (ColumnType::Double, CqlValue::Double(d)) => out.put_f64(*d),
            (ColumnType::Float, CqlValue::Float(f)) => out.put_f32(*f),
            (ColumnType::Int, CqlValue::Int(i)) => out.put_i32(*i),
            (ColumnType::SmallInt, CqlValue::SmallInt(i)) => out.put_i16(*i),
            (ColumnType::TinyInt, CqlValue::TinyInt(i)) => out.put_i8(*i),
            (ColumnType::Inet, CqlValue::Inet(addr)) => match addr {
                IpAddr::V4(v4) => out.put_slice(&v4.octets()),
                IpAddr::V6(v6) => out.put_slice(&v6.octets()),
            },
            (ColumnType::Uuid | ColumnType::Timeuuid, CqlValue::Uuid(u) | CqlValue::Timeuuid(u)) => {
                out.put_slice(u.as_bytes())
            }
            (ColumnType::Varint, CqlValue::Varint(v)) => out.put_slice(v.as_signed_bytes_be_slice()),
            (typ, value) => return Err(TypeRegistryError::mismatch(typ, value)),
        }
        Ok(())
    }

    fn deserialize(
        &self,
        typ: &ColumnType,
        bytes: &[u8],
        _registry: &TypeRegistry,
    ) -> Result<CqlValue, TypeRegistryError> {
        let value = match typ {
            ColumnType::Ascii => {
                if !bytes.is_ascii() {
                    return Err(TypeRegistryError::malformed(typ, "non-ASCII characters"));
                }
                CqlValue::Ascii(String::from_utf8_lossy(bytes).into_owned())
            }
            ColumnType::Text => CqlValue::Text(
                std::str::from_utf8(bytes)
                    .map_err(|err| TypeRegistryError::malformed(typ, err))?
                    .to_owned(),
            ),
            ColumnType::Boolean => CqlValue::Boolean(fixed::<1>(typ, bytes)?[0] != 0),
            ColumnType::Blob => CqlValue::Blob(bytes.to_vec()),
            ColumnType::Counter => CqlValue::Counter(i64::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::BigInt => CqlValue::BigInt(i64::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Timestamp => CqlValue::Timestamp(i64::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Time => CqlValue::Time(i64::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Decimal => {
                let (scale, unscaled) =
                    types::read_decimal(&mut &*bytes).map_err(low_level(typ))?;
                CqlValue::Decimal(CqlDecimal::from_signed_be_bytes_and_exponent(
                    unscaled.to_vec(),
                    scale,
                ))
            }
            ColumnType::Date => CqlValue::Date(u32::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Double => CqlValue::Double(f64::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Float => CqlValue::Float(f32::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Int => CqlValue::Int(i32::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::SmallInt => CqlValue::SmallInt(i16::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::TinyInt => CqlValue::TinyInt(i8::from_be_bytes(fixed(typ, bytes)?)),
            ColumnType::Inet => CqlValue::Inet(match bytes.len() {
                4 => IpAddr::from(fixed::<4>(typ, bytes)?),
                16 => IpAddr::from(fixed::<16>(typ, bytes)?),
                len => {
                    return Err(TypeRegistryError::malformed(
                        typ,
                        format!("address of {len} bytes"),
                    ))
                }
            }),
            ColumnType::Uuid => CqlValue::Uuid(Uuid::from_bytes(fixed(typ, bytes)?)),
            ColumnType::Timeuuid => CqlValue::Timeuuid(Uuid::from_bytes(fixed(typ, bytes)?)),
            ColumnType::Varint => {
                CqlValue::Varint(CqlVarint::from_signed_bytes_be_slice(bytes))
            }
            other => return Err(TypeRegistryError::UnknownType(other.to_string())),
        };
        Ok(value)
    }
}

/// Lists, sets and maps: an [int] element count followed by [bytes] elements.
#[derive(Debug)]
struct CollectionCodec;

fn write_count(typ: &ColumnType, count: usize, out: &mut Vec<u8>) -> Result<(), TypeRegistryError> {
    let count: i32 = count
        .try_into()
        .map_err(|_| TypeRegistryError::ValueTooLong(typ.to_string()))?;
    types::write_int(count, out);
    Ok(())
}

fn read_count(typ: &ColumnType, buf: &mut &[u8]) -> Result<usize, TypeRegistryError> {
    types::read_int_length(buf).map_err(low_level(typ))
}

fn read_element(
    registry: &TypeRegistry,
    collection: &ColumnType,
    elem: &ColumnType,
    buf: &mut &[u8],
) -> Result<CqlValue, TypeRegistryError> {
    registry
        .read_value(elem, buf)?
        .ok_or_else(|| TypeRegistryError::malformed(collection, "null element"))
}

impl TypeCodec for CollectionCodec {
    fn serialize(
        &self,
        typ: &ColumnType,
        value: &CqlValue,
        registry: &TypeRegistry,
        out: &mut Vec<u8>,
    ) -> Result<(), TypeRegistryError> {
        match (typ, value) {
            (ColumnType::List(elem), CqlValue::List(items) | CqlValue::Set(items))
            | (ColumnType::Set(elem), CqlValue::Set(items) | CqlValue::List(items)) => {
                write_count(typ, items.len(), out)?;
                for item in items {
                    registry.write_value(elem, Some(item), out)?;
                }
            }
            (ColumnType::Map(key_type, value_type), CqlValue::Map(entries)) => {
                write_count(typ, entries.len(), out)?;
                for (key, value) in entries {
                    registry.write_value(key_type, Some(key), out)?;
                    registry.write_value(value_type, Some(value), out)?;
                }
            }
            (typ, value) => return Err(TypeRegistryError::mismatch(typ, value)),
        }
        Ok(())
    }

    fn deserialize(
        &self,
        typ: &ColumnType,
        mut bytes: &[u8],
        registry: &TypeRegistry,
    ) -> Result<CqlValue, TypeRegistryError> {
        let buf = &mut bytes;
        let value = match typ {
            ColumnType::List(elem) | ColumnType::Set(elem) => {
                let count = read_count(typ, buf)?;
                // Each element takes at least its 4-byte length.
                let mut items = Vec::with_capacity(count.min(buf.len() / 4));
                for _ in 0..count {
                    items.push(read_element(registry, typ, elem, buf)?);
                }
                if matches!(typ, ColumnType::List(_)) {
                    CqlValue::List(items)
                } else {
                    CqlValue::Set(items)
                }
            }
            ColumnType::Map(key_type, value_type) => {
                let count = read_count(typ, buf)?;
                let mut entries = Vec::with_capacity(count.min(buf.len() / 8));
                for _ in 0..count {
                    let key = read_element(registry, typ, key_type, buf)?;
                    let value = read_element(registry, typ, value_type, buf)?;
                    entries.push((key, value));
                }
                CqlValue::Map(entries)
            }
            other => return Err(TypeRegistryError::UnknownType(other.to_string())),
        };
        if !buf.is_empty() {
            return Err(TypeRegistryError::malformed(
                typ,
                format!("{} trailing bytes", buf.len()),
            ));
        }
        Ok(value)
    }
}

/// Tuples: one [bytes] per element type, nulls allowed.
#[derive(Debug)]
struct TupleCodec;

impl TypeCodec for TupleCodec {
    fn serialize(
        &self,
        typ: &ColumnType,
        value: &CqlValue,
        registry: &TypeRegistry,
        out: &mut Vec<u8>,
    ) -> Result<(), TypeRegistryError> {
        let (ColumnType::Tuple(elem_types), CqlValue::Tuple(elems)) = (typ, value) else {
            return Err(TypeRegistryError::mismatch(typ, value));
        };
        if elems.len() > elem_types.len() {
            return Err(TypeRegistryError::mismatch(typ, value));
        }
        for (elem_type, elem) in elem_types.iter().zip(elems) {
            registry.write_value(elem_type, elem.as_ref(), out)?;
        }
        Ok(())
    }

    fn deserialize(
        &self,
        typ: &ColumnType,
        mut bytes: &[u8],
        registry: &TypeRegistry,
    ) -> Result<CqlValue, TypeRegistryError> {
        let ColumnType::Tuple(elem_types) = typ else {
            return Err(TypeRegistryError::UnknownType(typ.to_string()));
        };
        let buf = &mut bytes;
        let mut elems = Vec::with_capacity(elem_types.len());
        for elem_type in elem_types {
            // Trailing elements may be omitted.
            if buf.is_empty() {
                elems.push(None);
                continue;
            }
            elems.push(registry.read_value(elem_type, buf)?);
        }
        Ok(CqlValue::Tuple(elems))
    }
}

/// User defined types: one [bytes] per declared field, in declaration order.
#[derive(Debug)]
struct UdtCodec;

impl TypeCodec for UdtCodec {
    fn serialize(
        &self,
        typ: &ColumnType,
        value: &CqlValue,
        registry: &TypeRegistry,
        out: &mut Vec<u8>,
    ) -> Result<(), TypeRegistryError> {
        let (ColumnType::UserDefinedType { field_types, .. }, CqlValue::UserDefinedType { fields, .. }) =
            (typ, value)
        else {
            return Err(TypeRegistryError::mismatch(typ, value));
        };
        for (name, field_type) in field_types {
            let field = fields
                .iter()
                .find(|(n, _)| n == name)
                .and_then(|(_, v)| v.as_ref());
            registry.write_value(field_type, field, out)?;
        }
        Ok(())
    }

    fn deserialize(
        &self,
        typ: &ColumnType,
        mut bytes: &[u8],
        registry: &TypeRegistry,
    ) -> Result<CqlValue, TypeRegistryError> {
        let ColumnType::UserDefinedType {
            keyspace,
            type_name,
            field_types,
        } = typ
        else {
            return Err(TypeRegistryError::UnknownType(typ.to_string()));
        };
        let buf = &mut bytes;
        let mut fields = Vec::with_capacity(field_types.len());
        for (name, field_type) in field_types {
            let value = if buf.is_empty() {
                None
            } else {
                registry.read_value(field_type, buf)?
            };
            fields.push((name.clone(), value));
        }
        Ok(CqlValue::UserDefinedType {
            keyspace: keyspace.clone(),
            type_name: type_name.clone(),
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::net::Ipv4Addr;

    fn roundtrip(typ: &ColumnType, value: CqlValue) {
        let registry = TypeRegistry::default();
        let bytes = registry.serialize(typ, &value).unwrap();
        assert_eq!(
            registry.deserialize(typ, Some(&bytes)).unwrap(),
            Some(value),
            "type {typ}"
        );
    }

    #[test]
    fn native_values() {
        roundtrip(&ColumnType::Int, CqlValue::Int(-7));
        roundtrip(&ColumnType::BigInt, CqlValue::BigInt(i64::MAX));
        roundtrip(&ColumnType::Text, CqlValue::Text("kremówki".to_owned()));
        roundtrip(&ColumnType::Ascii, CqlValue::Ascii("abc".to_owned()));
        roundtrip(&ColumnType::Boolean, CqlValue::Boolean(true));
        roundtrip(&ColumnType::Double, CqlValue::Double(2.5));
        roundtrip(&ColumnType::Float, CqlValue::Float(-0.25));
        roundtrip(&ColumnType::SmallInt, CqlValue::SmallInt(-300));
        roundtrip(&ColumnType::TinyInt, CqlValue::TinyInt(-3));
        roundtrip(&ColumnType::Date, CqlValue::Date(1 << 31));
        roundtrip(
            &ColumnType::Inet,
            CqlValue::Inet(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
        );
        roundtrip(&ColumnType::Uuid, CqlValue::Uuid(Uuid::from_u128(42)));
        roundtrip(&ColumnType::Varint, CqlValue::Varint(CqlVarint::from(-129)));
    }

    #[test]
    fn decimal_is_scale_then_unscaled_bytes() {
        let registry = TypeRegistry::default();
        // 123.45
        let value = CqlValue::Decimal(CqlDecimal::from_unscaled(12345i64, 2));
        let bytes = registry.serialize(&ColumnType::Decimal, &value).unwrap();
        assert_eq!(&bytes[..], [0, 0, 0, 2, 0x30, 0x39]);
        assert_eq!(
            registry
                .deserialize(&ColumnType::Decimal, Some(&bytes))
                .unwrap(),
            Some(value)
        );

        // -1.5 == -15 * 10^-1
        let value = CqlValue::Decimal(CqlDecimal::from_unscaled(-15i64, 1));
        let bytes = registry.serialize(&ColumnType::Decimal, &value).unwrap();
        assert_eq!(&bytes[..], [0, 0, 0, 1, 0xf1]);
    }

    #[test]
    fn collections_are_count_prefixed() {
        let registry = TypeRegistry::default();
        let typ: ColumnType = "list<int>".parse().unwrap();
        let bytes = registry
            .serialize(&typ, &CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2)]))
            .unwrap();
        assert_eq!(
            &bytes[..],
            [0, 0, 0, 2, 0, 0, 0, 4, 0, 0, 0, 1, 0, 0, 0, 4, 0, 0, 0, 2]
        );

        roundtrip(
            &"map<text, set<bigint>>".parse().unwrap(),
            CqlValue::Map(vec![(
                CqlValue::Text("a".to_owned()),
                CqlValue::Set(vec![CqlValue::BigInt(1), CqlValue::BigInt(2)]),
            )]),
        );
        roundtrip(&typ, CqlValue::List(vec![]));
    }

    #[test]
    fn tuples_and_udts_allow_nulls() {
        let typ: ColumnType = "tuple<int, text>".parse().unwrap();
        roundtrip(&typ, CqlValue::Tuple(vec![Some(CqlValue::Int(1)), None]));

        let registry = TypeRegistry::default();
        let bytes = registry
            .serialize(&typ, &CqlValue::Tuple(vec![None, None]))
            .unwrap();
        assert_eq!(&bytes[..], [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);

        let udt = ColumnType::UserDefinedType {
            keyspace: "ks".to_owned(),
            type_name: "point".to_owned(),
            field_types: vec![
                ("x".to_owned(), ColumnType::Int),
                ("y".to_owned(), ColumnType::Int),
            ],
        };
        roundtrip(
            &udt,
            CqlValue::UserDefinedType {
                keyspace: "ks".to_owned(),
                type_name: "point".to_owned(),
                fields: vec![
                    ("x".to_owned(), Some(CqlValue::Int(3))),
                    ("y".to_owned(), None),
                ],
            },
        );
    }

    #[test]
    fn null_and_empty() {
        let registry = TypeRegistry::default();
        assert_eq!(registry.deserialize(&ColumnType::Int, None).unwrap(), None);
        assert_eq!(
            registry.deserialize(&ColumnType::Int, Some(&[])).unwrap(),
            Some(CqlValue::Empty)
        );
        assert_eq!(
            registry.deserialize(&ColumnType::Text, Some(&[])).unwrap(),
            Some(CqlValue::Text(String::new()))
        );

        let mut out = Vec::new();
        registry.write_value(&ColumnType::Int, None, &mut out).unwrap();
        registry
            .write_value(&ColumnType::Int, Some(&CqlValue::Empty), &mut out)
            .unwrap();
        assert_eq!(out, [0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]);
    }

    #[test]
    fn mismatches_and_malformed_bytes() {
        let registry = TypeRegistry::default();
        assert_matches!(
            registry.serialize(&ColumnType::Int, &CqlValue::Text("1".to_owned())),
            Err(TypeRegistryError::TypeMismatch { value: "text", .. })
        );
        assert_matches!(
            registry.serialize(&ColumnType::Ascii, &CqlValue::Text("zażółć".to_owned())),
            Err(TypeRegistryError::TypeMismatch { .. })
        );
        assert_matches!(
            registry.deserialize(&ColumnType::Int, Some(&[1, 2, 3])),
            Err(TypeRegistryError::Malformed { .. })
        );
        assert_matches!(
            registry.deserialize(&"list<int>".parse().unwrap(), Some(&[0, 0, 0, 1, 0, 0])),
            Err(TypeRegistryError::Malformed { .. })
        );
        assert_matches!(
            registry.deserialize(&ColumnType::Text, Some(&[0xff])),
            Err(TypeRegistryError::Malformed { .. })
        );
    }

    #[derive(Debug)]
    struct ReversedBlobCodec;

    impl TypeCodec for ReversedBlobCodec {
        fn serialize(
            &self,
            typ: &ColumnType,
            value: &CqlValue,
            _registry: &TypeRegistry,
            out: &mut Vec<u8>,
        ) -> Result<(), TypeRegistryError> {
            let CqlValue::Blob(b) = value else {
                return Err(TypeRegistryError::mismatch(typ, value));
            };
            out.extend(b.iter().rev());
            Ok(())
        }

        fn deserialize(
            &self,
            _typ: &ColumnType,
            bytes: &[u8],
            _registry: &TypeRegistry,
        ) -> Result<CqlValue, TypeRegistryError> {
            Ok(CqlValue::Blob(bytes.iter().rev().copied().collect()))
        }
    }

    #[test]
    fn custom_codecs_are_found_by_class_suffix() {
        let mut registry = TypeRegistry::default();
        let typ = ColumnType::Custom("com.example.ReversedType".to_owned());
        assert_matches!(
            registry.serialize(&typ, &CqlValue::Blob(vec![1])),
            Err(TypeRegistryError::UnknownType(_))
        );

        assert!(registry
            .register("ReversedType", Arc::new(ReversedBlobCodec))
            .is_none());
        let bytes = registry
            .serialize(&typ, &CqlValue::Blob(vec![1, 2, 3]))
            .unwrap();
        assert_eq!(&bytes[..], [3, 2, 1]);
        assert_eq!(
            registry.deserialize(&typ, Some(&bytes)).unwrap(),
            Some(CqlValue::Blob(vec![1, 2, 3]))
        );

        // Elements of composite types go through the registry too.
        let list = ColumnType::List(Box::new(typ));
        let bytes = registry
            .serialize(&list, &CqlValue::List(vec![CqlValue::Blob(vec![4, 5])]))
            .unwrap();
        assert_eq!(&bytes[..], [0, 0, 0, 1, 0, 0, 0, 2, 5, 4]);
    }
}
