//! Column types and the dynamically typed values that travel in frames.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

use crate::frame::types::trim_twos_complement;

/// Type of a column, a bind marker or a collection element.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// A server-side type the protocol only knows by its class name.
    Custom(String),
    Ascii,
    Boolean,
    Blob,
    Counter,
    Date,
    Decimal,
    Double,
    Float,
    Int,
    BigInt,
    Text,
    Timestamp,
    Inet,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Set(Box<ColumnType>),
    UserDefinedType {
        keyspace: String,
        type_name: String,
        field_types: Vec<(String, ColumnType)>,
    },
    SmallInt,
    TinyInt,
    Time,
    Timeuuid,
    Tuple(Vec<ColumnType>),
    Uuid,
    Varint,
}

static NATIVE_NAMES: &[(&str, &str, ColumnType)] = &[
    ("ascii", "AsciiType", ColumnType::Ascii),
    ("boolean", "BooleanType", ColumnType::Boolean),
    ("blob", "BytesType", ColumnType::Blob),
    ("counter", "CounterColumnType", ColumnType::Counter),
    ("date", "SimpleDateType", ColumnType::Date),
    ("decimal", "DecimalType", ColumnType::Decimal),
    ("double", "DoubleType", ColumnType::Double),
    ("float", "FloatType", ColumnType::Float),
    ("int", "Int32Type", ColumnType::Int),
    ("bigint", "LongType", ColumnType::BigInt),
    ("text", "UTF8Type", ColumnType::Text),
    ("varchar", "UTF8Type", ColumnType::Text),
    ("timestamp", "TimestampType", ColumnType::Timestamp),
    ("inet", "InetAddressType", ColumnType::Inet),
    ("smallint", "ShortType", ColumnType::SmallInt),
    ("tinyint", "ByteType", ColumnType::TinyInt),
    ("time", "TimeType", ColumnType::Time),
    ("timeuuid", "TimeUUIDType", ColumnType::Timeuuid),
    ("uuid", "UUIDType", ColumnType::Uuid),
    ("varint", "IntegerType", ColumnType::Varint),
];

impl ColumnType {
    /// The native type with the given CQL name (`"int"`), or `None`.
    pub fn native(name: &str) -> Option<ColumnType> {
        NATIVE_NAMES
            .iter()
            .find(|(cql, _, _)| cql.eq_ignore_ascii_case(name))
            .map(|(_, _, typ)| typ.clone())
    }

    /// Name under which the codec of this type is registered in a
    /// [`TypeRegistry`](crate::registry::TypeRegistry). Collections, tuples
    /// and user defined types are keyed by their kind only.
    pub fn codec_name(&self) -> &str {
        match self {
            ColumnType::Custom(class) => class,
            ColumnType::List(_) => "list",
            ColumnType::Map(_, _) => "map",
            ColumnType::Set(_) => "set",
            ColumnType::Tuple(_) => "tuple",
            ColumnType::UserDefinedType { .. } => "udt",
            native => NATIVE_NAMES
                .iter()
                .find(|(_, _, typ)| typ == native)
                .map(|(cql, _, _)| *cql)
                .unwrap_or("blob"),
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            ColumnType::List(_) | ColumnType::Set(_) | ColumnType::Map(_, _)
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Custom(class) => write!(f, "'{class}'"),
            ColumnType::List(elem) => write!(f, "list<{elem}>"),
            ColumnType::Set(elem) => write!(f, "set<{elem}>"),
            ColumnType::Map(key, value) => write!(f, "map<{key}, {value}>"),
            ColumnType::Tuple(elems) => {
                f.write_str("tuple<")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{elem}")?;
                }
                f.write_str(">")
            }
            ColumnType::UserDefinedType {
                keyspace,
                type_name,
                ..
            } => write!(f, "{keyspace}.{type_name}"),
            native => f.write_str(native.codec_name()),
        }
    }
}

/// A type name could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Cannot parse type name {name:?}: {reason}")]
pub struct ColumnTypeParseError {
    name: String,
    reason: &'static str,
}

/// Parses CQL type names (`int`, `list<text>`, `frozen<map<text, int>>`,
/// `tuple<int, text>`) and server class names
/// (`org.apache.cassandra.db.marshal.Int32Type`,
/// `org.apache.cassandra.db.marshal.ListType(org.apache.cassandra.db.marshal.UTF8Type)`).
///
/// Class names are matched by suffix, so the package prefix is optional.
/// Unknown class names become [`ColumnType::Custom`].
impl FromStr for ColumnType {
    type Err = ColumnTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = TypeNameParser { input: s, pos: 0 };
        let typ = parser.parse()?;
        parser.skip_whitespace();
        if parser.pos != s.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(typ)
    }
}

struct TypeNameParser<'a> {
    input: &'a str,
    pos: usize,
}

impl TypeNameParser<'_> {
    fn error(&self, reason: &'static str) -> ColumnTypeParseError {
        ColumnTypeParseError {
            name: self.input.to_owned(),
            reason,
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.input[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn identifier(&mut self) -> &str {
        self.skip_whitespace();
        let rest = &self.input[self.pos..];
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.' || c == '$'))
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.input[self.pos..].starts_with(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), ColumnTypeParseError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error("unbalanced type parameters"))
        }
    }

    fn parameters(&mut self, close: char) -> Result<Vec<ColumnType>, ColumnTypeParseError> {
        let mut params = vec![self.parse()?];
        while self.eat(',') {
            params.push(self.parse()?);
        }
        self.expect(close)?;
        Ok(params)
    }

    fn parse(&mut self) -> Result<ColumnType, ColumnTypeParseError> {
        let ident = self.identifier().to_owned();
        if ident.is_empty() {
            return Err(self.error("expected a type name"));
        }
        let short = ident.rsplit('.').next().unwrap_or(&ident);
        let lower = short.to_ascii_lowercase();

        let open = if self.eat('<') {
            Some('>')
        } else if self.eat('(') {
            Some(')')
        } else {
            None
        };

        let Some(close) = open else {
            if let Some(native) = ColumnType::native(&lower) {
                return Ok(native);
            }
            return Ok(NATIVE_NAMES
                .iter()
                .find(|(_, class, _)| class.eq_ignore_ascii_case(short))
                .map(|(_, _, typ)| typ.clone())
                .unwrap_or(ColumnType::Custom(ident)));
        };

        let mut params = self.parameters(close)?;
        let single = |params: &mut Vec<ColumnType>, this: &Self| match params.len() {
            1 => params.pop().ok_or_else(|| this.error("missing type parameter")),
            _ => Err(this.error("expected exactly one type parameter")),
        };
        match lower.as_str() {
            "list" | "listtype" => Ok(ColumnType::List(Box::new(single(&mut params, self)?))),
            "set" | "settype" => Ok(ColumnType::Set(Box::new(single(&mut params, self)?))),
            "frozen" | "frozentype" | "reversedtype" => single(&mut params, self),
            "map" | "maptype" => {
                if params.len() != 2 {
                    return Err(self.error("map takes exactly two type parameters"));
                }
                let value = params.pop().ok_or_else(|| self.error("missing map value type"))?;
                let key = params.pop().ok_or_else(|| self.error("missing map key type"))?;
                Ok(ColumnType::Map(Box::new(key), Box::new(value)))
            }
            "tuple" | "tupletype" => Ok(ColumnType::Tuple(params)),
            _ => Err(self.error("unknown parameterized type")),
        }
    }
}

/// Native representation of a CQL `varint`: big-endian two's complement bytes.
///
/// Bytes are sent as given; comparison normalizes redundant leading sign bytes,
/// so `[0x00, 0x01]` equals `[0x01]`.
#[derive(Clone, Eq, Debug)]
pub struct CqlVarint(Vec<u8>);

impl CqlVarint {
    pub fn from_signed_bytes_be(digits: Vec<u8>) -> Self {
        Self(digits)
    }

    pub fn from_signed_bytes_be_slice(digits: &[u8]) -> Self {
        Self(digits.to_vec())
    }

    pub fn as_signed_bytes_be_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_signed_bytes_be(self) -> Vec<u8> {
        self.0
    }

    fn normalized(&self) -> &[u8] {
        if self.0.is_empty() {
            return &[0];
        }
        trim_twos_complement(&self.0)
    }
}

impl From<i64> for CqlVarint {
    fn from(value: i64) -> Self {
        Self(trim_twos_complement(&value.to_be_bytes()).to_vec())
    }
}

impl PartialEq for CqlVarint {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl std::hash::Hash for CqlVarint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized().hash(state)
    }
}

#[cfg(feature = "num-bigint-04")]
impl From<num_bigint_04::BigInt> for CqlVarint {
    fn from(value: num_bigint_04::BigInt) -> Self {
        Self(value.to_signed_bytes_be())
    }
}

#[cfg(feature = "num-bigint-04")]
impl From<CqlVarint> for num_bigint_04::BigInt {
    fn from(val: CqlVarint) -> Self {
        num_bigint_04::BigInt::from_signed_bytes_be(&val.0)
    }
}

/// Native representation of a CQL `decimal`: `unscaled * 10^-scale`.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct CqlDecimal {
    unscaled: CqlVarint,
    scale: i32,
}

impl CqlDecimal {
    pub fn from_signed_be_bytes_and_exponent(bytes: Vec<u8>, scale: i32) -> Self {
        Self {
            unscaled: CqlVarint::from_signed_bytes_be(bytes),
            scale,
        }
    }

    pub fn from_unscaled(unscaled: impl Into<CqlVarint>, scale: i32) -> Self {
        Self {
            unscaled: unscaled.into(),
            scale,
        }
    }

    pub fn scale(&self) -> i32 {
        self.scale
    }

    pub fn unscaled(&self) -> &CqlVarint {
        &self.unscaled
    }

    pub fn as_signed_be_bytes_slice_and_exponent(&self) -> (&[u8], i32) {
        (self.unscaled.as_signed_bytes_be_slice(), self.scale)
    }
}

/// A dynamically typed value.
#[derive(Clone, Debug, PartialEq)]
pub enum CqlValue {
    Ascii(String),
    Boolean(bool),
    Blob(Vec<u8>),
    Counter(i64),
    Decimal(CqlDecimal),
    /// Days since -5877641-06-23, i.e. 2^31 days before the unix epoch.
    Date(u32),
    Double(f64),
    Empty,
    Float(f32),
    Int(i32),
    BigInt(i64),
    Text(String),
    /// Milliseconds since the unix epoch.
    Timestamp(i64),
    Inet(IpAddr),
    List(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
    Set(Vec<CqlValue>),
    UserDefinedType {
        keyspace: String,
        type_name: String,
        /// In the order of the type's definition.
        fields: Vec<(String, Option<CqlValue>)>,
    },
    SmallInt(i16),
    TinyInt(i8),
    /// Nanoseconds since midnight.
    Time(i64),
    Timeuuid(Uuid),
    Tuple(Vec<Option<CqlValue>>),
    Uuid(Uuid),
    Varint(CqlVarint),
}

impl CqlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Ascii(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Self::Ascii(s) | Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<i64> {
        match self {
            Self::BigInt(i) | Self::Counter(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) | Self::Timeuuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_inet(&self) -> Option<IpAddr> {
        match self {
            Self::Inet(a) => Some(*a),
            _ => None,
        }
    }

    /// Elements of a list or a set.
    pub fn as_seq(&self) -> Option<&[CqlValue]> {
        match self {
            Self::List(v) | Self::Set(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_seq(self) -> Option<Vec<CqlValue>> {
        match self {
            Self::List(v) | Self::Set(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(CqlValue, CqlValue)]> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_cql_decimal(self) -> Option<CqlDecimal> {
        match self {
            Self::Decimal(d) => Some(d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cql_type_names() {
        assert_eq!("int".parse(), Ok(ColumnType::Int));
        assert_eq!("VARCHAR".parse(), Ok(ColumnType::Text));
        assert_eq!(
            "list<text>".parse(),
            Ok(ColumnType::List(Box::new(ColumnType::Text)))
        );
        assert_eq!(
            "frozen<map<text, int>>".parse(),
            Ok(ColumnType::Map(
                Box::new(ColumnType::Text),
                Box::new(ColumnType::Int)
            ))
        );
        assert_eq!(
            "tuple<int, set<uuid>>".parse(),
            Ok(ColumnType::Tuple(vec![
                ColumnType::Int,
                ColumnType::Set(Box::new(ColumnType::Uuid))
            ]))
        );
    }

    #[test]
    fn parse_class_names() {
        assert_eq!(
            "org.apache.cassandra.db.marshal.Int32Type".parse(),
            Ok(ColumnType::Int)
        );
        assert_eq!(
            "org.apache.cassandra.db.marshal.SetType(org.apache.cassandra.db.marshal.UTF8Type)"
                .parse(),
            Ok(ColumnType::Set(Box::new(ColumnType::Text)))
        );
        assert_eq!(
            "com.example.GeoPointType".parse(),
            Ok(ColumnType::Custom("com.example.GeoPointType".to_owned()))
        );
    }

    #[test]
    fn malformed_type_names() {
        assert!("list<int".parse::<ColumnType>().is_err());
        assert!("map<int>".parse::<ColumnType>().is_err());
        assert!("list<int, int>".parse::<ColumnType>().is_err());
        assert!("".parse::<ColumnType>().is_err());
        assert!("int>".parse::<ColumnType>().is_err());
        assert!("whatever<int>".parse::<ColumnType>().is_err());
    }

    #[test]
    fn display_roundtrips_through_parse() {
        let typ = ColumnType::Map(
            Box::new(ColumnType::Text),
            Box::new(ColumnType::List(Box::new(ColumnType::BigInt))),
        );
        assert_eq!(typ.to_string(), "map<text, list<bigint>>");
        assert_eq!(typ.to_string().parse(), Ok(typ));
    }

    #[test]
    fn varint_equality_ignores_redundant_sign_bytes() {
        assert_eq!(
            CqlVarint::from_signed_bytes_be(vec![0x00, 0x01]),
            CqlVarint::from_signed_bytes_be(vec![0x01])
        );
        assert_eq!(
            CqlVarint::from_signed_bytes_be(vec![0xff, 0xff, 0x80]),
            CqlVarint::from(-128)
        );
        assert_ne!(
            CqlVarint::from_signed_bytes_be(vec![0x00, 0x80]),
            CqlVarint::from_signed_bytes_be(vec![0x80])
        );
        assert_eq!(CqlVarint::from_signed_bytes_be(vec![]), CqlVarint::from(0));
        assert_eq!(CqlVarint::from(300).as_signed_bytes_be_slice(), [0x01, 0x2c]);
    }
}
