//! Token computation for the partitioners a cluster may run:
//! Murmur3 (the default), Random (an MD5 digest) and ByteOrdered (the key
//! itself). Tokens decide which nodes own a partition.

use std::fmt;

use bytes::Bytes;
use md5::{Digest, Md5};
use strata_cql::frame::value::SerializedValues;
use thiserror::Error;

use crate::routing::Token;

/// Partitioner of a cluster, as named in `system.local`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
#[non_exhaustive]
pub enum PartitionerName {
    /// `org.apache.cassandra.dht.Murmur3Partitioner`
    #[default]
    Murmur3,
    /// `org.apache.cassandra.dht.RandomPartitioner`
    Random,
    /// `org.apache.cassandra.dht.ByteOrderedPartitioner`
    ByteOrdered,
}

impl PartitionerName {
    /// Matches the partitioner by the end of its (usually fully qualified)
    /// class name, ignoring case. Unknown partitioners give `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if name.ends_with("murmur3partitioner") {
            Some(PartitionerName::Murmur3)
        } else if name.ends_with("randompartitioner") {
            Some(PartitionerName::Random)
        } else if name.ends_with("byteorderedpartitioner") {
            Some(PartitionerName::ByteOrdered)
        } else {
            None
        }
    }

    /// Parses a token the way the server prints it in `tokens` columns:
    /// a signed decimal for Murmur3, an unsigned decimal for Random and
    /// hex digits for ByteOrdered.
    pub fn parse_token(&self, token: &str) -> Result<Token, TokenParseError> {
        let invalid = |reason: String| TokenParseError {
            token: token.to_owned(),
            reason,
        };
        match self {
            PartitionerName::Murmur3 => token
                .parse::<i64>()
                .map(Token::murmur3)
                .map_err(|e| invalid(e.to_string())),
            PartitionerName::Random => token
                .parse::<u128>()
                .map(Token::Md5)
                .map_err(|e| invalid(e.to_string())),
            PartitionerName::ByteOrdered => parse_hex(token).map(Token::Bytes).map_err(invalid),
        }
    }
}

impl fmt::Display for PartitionerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartitionerName::Murmur3 => "Murmur3Partitioner",
            PartitionerName::Random => "RandomPartitioner",
            PartitionerName::ByteOrdered => "ByteOrderedPartitioner",
        })
    }
}

fn parse_hex(s: &str) -> Result<Bytes, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() % 2 != 0 {
        return Err("odd number of hex digits".to_owned());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex digits at offset {i}"))
        })
        .collect::<Result<Vec<u8>, String>>()
        .map(Bytes::from)
}

/// A token string that does not fit the partitioner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid token {token:?}: {reason}")]
pub struct TokenParseError {
    token: String,
    reason: String,
}

/// Failed to compute a token from bound values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TokenCalculationError {
    /// A component of a composite key is longer than its 2-byte length prefix allows.
    #[error("Value bytes too long to create partition key, max 65 535 allowed! value.len(): {0}")]
    ValueTooLong(usize),
    /// The component at this position is null or unset; no token can be
    /// computed for such a key.
    #[error("Partition key component {0} has no value")]
    MissingComponent(usize),
}

/// Streaming token computation; feeding a key in pieces gives the same
/// token as feeding it whole.
pub(crate) enum TokenHasher {
    Murmur3(Murmur3Hasher),
    Random(Md5),
    ByteOrdered(Vec<u8>),
}

impl TokenHasher {
    pub(crate) fn new(partitioner: PartitionerName) -> Self {
        match partitioner {
            PartitionerName::Murmur3 => TokenHasher::Murmur3(Murmur3Hasher::default()),
            PartitionerName::Random => TokenHasher::Random(Md5::new()),
            PartitionerName::ByteOrdered => TokenHasher::ByteOrdered(Vec::new()),
        }
    }

    pub(crate) fn write(&mut self, data: &[u8]) {
        match self {
            TokenHasher::Murmur3(hasher) => hasher.write(data),
            TokenHasher::Random(digest) => digest.update(data),
            TokenHasher::ByteOrdered(key) => key.extend_from_slice(data),
        }
    }

    /// The token of everything written so far.
    pub(crate) fn finish(&self) -> Token {
        match self {
            TokenHasher::Murmur3(hasher) => hasher.finish(),
            // The digest read as an unsigned big-endian integer.
            TokenHasher::Random(digest) => Token::Md5(
                digest
                    .clone()
                    .finalize()
                    .iter()
                    .fold(0u128, |acc, &b| acc << 8 | u128::from(b)),
            ),
            TokenHasher::ByteOrdered(key) => Token::Bytes(Bytes::copy_from_slice(key)),
        }
    }
}

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

fn mix_k1(k1: u64) -> u64 {
    k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

fn mix_k2(k2: u64) -> u64 {
    k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1)
}

fn fmix(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^ (k >> 33)
}

// Little-endian, at most 8 bytes.
fn le_u64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0, |acc, &b| acc << 8 | u64::from(b))
}

/// The x64 128-bit MurmurHash3 variant the server uses, keeping the high
/// half. Tail bytes are sign-extended before mixing, as the server does.
#[derive(Default)]
pub(crate) struct Murmur3Hasher {
    h1: u64,
    h2: u64,
    // Bytes not yet forming a whole 16-byte block.
    tail: [u8; 16],
    tail_len: usize,
    total_len: usize,
}

impl Murmur3Hasher {
    fn block(&mut self, block: &[u8]) {
        self.h1 ^= mix_k1(le_u64(&block[..8]));
        self.h1 = self
            .h1
            .rotate_left(27)
            .wrapping_add(self.h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        self.h2 ^= mix_k2(le_u64(&block[8..16]));
        self.h2 = self
            .h2
            .rotate_left(31)
            .wrapping_add(self.h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    fn write(&mut self, mut data: &[u8]) {
        self.total_len += data.len();

        if self.tail_len > 0 {
            let take = (16 - self.tail_len).min(data.len());
            self.tail[self.tail_len..self.tail_len + take].copy_from_slice(&data[..take]);
            self.tail_len += take;
            data = &data[take..];
            if self.tail_len < 16 {
                return;
            }
            let block = self.tail;
            self.block(&block);
            self.tail_len = 0;
        }

        let mut blocks = data.chunks_exact(16);
        for block in &mut blocks {
            self.block(block);
        }
        let rest = blocks.remainder();
        self.tail[..rest.len()].copy_from_slice(rest);
        self.tail_len = rest.len();
    }

    fn finish(&self) -> Token {
        let signed = |bytes: &[u8]| {
            bytes.iter().enumerate().fold(0u64, |k, (i, &b)| {
                k ^ ((b as i8 as i64 as u64) << (i * 8))
            })
        };
        let tail = &self.tail[..self.tail_len];
        let (mut h1, mut h2) = (self.h1, self.h2);

        if tail.len() > 8 {
            h2 ^= mix_k2(signed(&tail[8..]));
        }
        if !tail.is_empty() {
            h1 ^= mix_k1(signed(&tail[..tail.len().min(8)]));
        }

        let len = self.total_len as u64;
        h1 ^= len;
        h2 ^= len;
        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_add(h1);
        h1 = fmix(h1);
        h2 = fmix(h2);

        Token::murmur3(h1.wrapping_add(h2) as i64)
    }
}

/// Calculates the token of an already serialized partition key, such as a
/// statement's routing key.
pub fn calculate_token(partitioner: &PartitionerName, partition_key: &[u8]) -> Token {
    let mut hasher = TokenHasher::new(*partitioner);
    hasher.write(partition_key);
    hasher.finish()
}

// A single component is used as is; composite keys are written as
// (u16 length, bytes, 0x00) for each component.
fn write_partition_key(
    components: &[&[u8]],
    mut sink: impl FnMut(&[u8]),
) -> Result<(), TokenCalculationError> {
    if let [single] = components {
        sink(single);
        return Ok(());
    }
    for component in components {
        let len = u16::try_from(component.len())
            .map_err(|_| TokenCalculationError::ValueTooLong(component.len()))?;
        sink(&len.to_be_bytes());
        sink(component);
        sink(&[0]);
    }
    Ok(())
}

/// Serializes the components of a partition key into a routing key.
pub fn routing_key(components: &[&[u8]]) -> Result<Bytes, TokenCalculationError> {
    let mut key = Vec::new();
    write_partition_key(components, |part| key.extend_from_slice(part))?;
    Ok(key.into())
}

/// Calculates the token for given partitioner and serialized partition key values.
///
/// NOTE: the provided values must completely constitute partition key
/// and be in the order defined in CREATE TABLE statement. Every component
/// must have a value.
pub fn calculate_token_for_partition_key(
    serialized_partition_key_values: &SerializedValues,
    partitioner: &PartitionerName,
) -> Result<Token, TokenCalculationError> {
    let components = serialized_partition_key_values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            value
                .as_value()
                .ok_or(TokenCalculationError::MissingComponent(index))
        })
        .collect::<Result<Vec<&[u8]>, _>>()?;
    let mut hasher = TokenHasher::new(*partitioner);
    write_partition_key(&components, |part| hasher.write(part))?;
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rand_pcg::Pcg32;
    use strata_cql::value::{ColumnType, CqlValue};
    use strata_cql::TypeRegistry;

    use crate::test_utils::setup_tracing;

    use super::*;

    fn assert_correct_murmur3_hash(pk: &'static str, expected_hash: i64) {
        let hash = calculate_token(&PartitionerName::Murmur3, pk.as_bytes());
        assert_eq!(hash, Token::Murmur3(expected_hash));
    }

    #[test]
    fn test_murmur3_partitioner() {
        setup_tracing();
        for s in [
            ("test", -6017608668500074083),
            ("xd", 4507812186440344727),
            ("primary_key", -1632642444691073360),
            ("kremówki", 4354931215268080151),
        ] {
            assert_correct_murmur3_hash(s.0, s.1);
        }
    }

    #[test]
    fn test_random_partitioner() {
        setup_tracing();
        // MD5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(
            calculate_token(&PartitionerName::Random, b""),
            Token::Md5(0xd41d8cd98f00b204e9800998ecf8427e)
        );
        // MD5("abc") = 900150983cd24fb0d6963f7d28e17f72
        assert_eq!(
            calculate_token(&PartitionerName::Random, b"abc"),
            Token::Md5(0x900150983cd24fb0d6963f7d28e17f72)
        );
    }

    #[test]
    fn test_byte_ordered_partitioner() {
        assert_eq!(
            calculate_token(&PartitionerName::ByteOrdered, &[0x00, 0xab]),
            Token::Bytes(Bytes::from_static(&[0x00, 0xab]))
        );
    }

    #[test]
    fn partitioners_output_same_result_no_matter_how_input_is_partitioned() {
        setup_tracing();
        let inputs: &[&[u8]] = &[
            b"",
            b"0",
            "Ala ma kota, a kota ma Ala.".as_bytes(),
            "Zażółć gęślą jaźń. Wsiadł rycerz Szaławiła na bułanego konia. Litwo, ojczyzno moja, ...".as_bytes(),
        ];

        let seed = 0x2137;
        let mut randgen = Pcg32::new(seed, 0);

        // Splits the given data 2^n times and feeds partitioner with the chunks got.
        fn split_and_feed(
            randgen: &mut impl Rng,
            partitioner: &mut TokenHasher,
            data: &[u8],
            n: usize,
        ) {
            if n == 0 {
                partitioner.write(data);
            } else {
                let pivot = if !data.is_empty() {
                    randgen.random_range(0..data.len())
                } else {
                    0
                };
                let (data1, data2) = data.split_at(pivot);
                for data in [data1, data2] {
                    split_and_feed(randgen, partitioner, data, n - 1);
                }
            }
        }

        fn check_for_partitioner(
            partitioner: PartitionerName,
            randgen: &mut impl Rng,
            input: &[u8],
        ) {
            let result_single_batch = calculate_token(&partitioner, input);

            let results_chunks = (0..1000).map(|_| {
                let mut partitioner_hasher = TokenHasher::new(partitioner);
                split_and_feed(randgen, &mut partitioner_hasher, input, 2);
                partitioner_hasher.finish()
            });

            for result_chunk in results_chunks {
                assert_eq!(result_single_batch, result_chunk)
            }
        }

        for input in inputs {
            for partitioner in [
                PartitionerName::Murmur3,
                PartitionerName::Random,
                PartitionerName::ByteOrdered,
            ] {
                check_for_partitioner(partitioner, &mut randgen, input);
            }
        }
    }

    #[test]
    fn partitioner_names_match_by_suffix() {
        assert_eq!(
            PartitionerName::from_name("org.apache.cassandra.dht.Murmur3Partitioner"),
            Some(PartitionerName::Murmur3)
        );
        assert_eq!(
            PartitionerName::from_name("RANDOMPARTITIONER"),
            Some(PartitionerName::Random)
        );
        assert_eq!(
            PartitionerName::from_name("org.apache.cassandra.dht.ByteOrderedPartitioner"),
            Some(PartitionerName::ByteOrdered)
        );
        assert_eq!(
            PartitionerName::from_name("com.scylladb.dht.CDCPartitioner"),
            None
        );
    }

    #[test]
    fn tokens_are_parsed_per_partitioner() {
        assert_eq!(
            PartitionerName::Murmur3.parse_token("-42"),
            Ok(Token::Murmur3(-42))
        );
        assert_eq!(
            PartitionerName::Murmur3.parse_token("-9223372036854775808"),
            Ok(Token::Murmur3(i64::MAX))
        );
        assert_eq!(
            PartitionerName::Random.parse_token("170141183460469231731687303715884105727"),
            Ok(Token::Md5(i128::MAX as u128))
        );
        assert_eq!(
            PartitionerName::ByteOrdered.parse_token("00ff10"),
            Ok(Token::Bytes(Bytes::from_static(&[0x00, 0xff, 0x10])))
        );
        assert!(PartitionerName::Murmur3.parse_token("abc").is_err());
        assert!(PartitionerName::Random.parse_token("-1").is_err());
        assert!(PartitionerName::ByteOrdered.parse_token("abc").is_err());
        assert!(PartitionerName::ByteOrdered.parse_token("zz").is_err());
    }

    #[test]
    fn composite_partition_keys() {
        let registry = TypeRegistry::default();
        let mut single = SerializedValues::new();
        single
            .add_value(&registry, &ColumnType::Text, &CqlValue::Text("test".into()))
            .unwrap();
        assert_eq!(
            calculate_token_for_partition_key(&single, &PartitionerName::Murmur3).unwrap(),
            Token::Murmur3(-6017608668500074083)
        );

        let mut composite = SerializedValues::new();
        composite
            .add_value(&registry, &ColumnType::Int, &CqlValue::Int(7))
            .unwrap();
        composite
            .add_value(&registry, &ColumnType::Text, &CqlValue::Text("ab".into()))
            .unwrap();
        let key = routing_key(&[&7i32.to_be_bytes(), b"ab"]).unwrap();
        assert_eq!(
            &key[..],
            &[0, 4, 0, 0, 0, 7, 0, 0, 2, b'a', b'b', 0][..]
        );
        assert_eq!(
            calculate_token_for_partition_key(&composite, &PartitionerName::Murmur3).unwrap(),
            calculate_token(&PartitionerName::Murmur3, &key)
        );

        let long = vec![0u8; 70_000];
        assert_eq!(
            routing_key(&[&long, b"x"]),
            Err(TokenCalculationError::ValueTooLong(70_000))
        );
        assert_eq!(&routing_key(&[b"solo"]).unwrap()[..], b"solo");
    }

    #[test]
    fn null_or_unset_components_have_no_token() {
        let registry = TypeRegistry::default();
        let mut with_null = SerializedValues::new();
        with_null
            .add_value(&registry, &ColumnType::Int, &CqlValue::Int(7))
            .unwrap();
        with_null.add_null().unwrap();
        assert_eq!(
            calculate_token_for_partition_key(&with_null, &PartitionerName::Murmur3),
            Err(TokenCalculationError::MissingComponent(1))
        );

        let mut with_unset = SerializedValues::new();
        with_unset.add_unset().unwrap();
        assert_eq!(
            calculate_token_for_partition_key(&with_unset, &PartitionerName::Murmur3),
            Err(TokenCalculationError::MissingComponent(0))
        );
    }
}
