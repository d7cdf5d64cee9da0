//! Entities whose goal is to route requests to the nodes owning the data:
//! - token representation,
//! - partitioners, which compute a token from a partition key,
//! - the token map, which finds the owners of a token.

pub mod partitioner;
/// The token ring: which nodes own which tokens.
pub mod token_map;

use std::fmt;

use bytes::Bytes;

pub use partitioner::{calculate_token, PartitionerName};
pub use token_map::TokenMap;

/// Position of a partition on the ring.
///
/// Each partitioner produces its own kind of token. Tokens of the same kind
/// are totally ordered; a ring only ever holds tokens of one kind.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Token {
    /// Murmur3 token. `i64::MIN` is not a valid value, see [`Token::murmur3`].
    Murmur3(i64),
    /// MD5 digest read as an unsigned big-endian integer.
    Md5(u128),
    /// Raw key bytes, compared as unsigned bytes.
    Bytes(Bytes),
}

impl Token {
    /// Creates a Murmur3 token, normalizing the value if necessary.
    ///
    /// `i64::MIN` stands for "minus infinity" on the ring and is replaced
    /// with `i64::MAX` so that no key lands before the first token.
    #[inline]
    pub fn murmur3(value: i64) -> Self {
        Token::Murmur3(if value == i64::MIN { i64::MAX } else { value })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Murmur3(value) => write!(f, "{value}"),
            Token::Md5(value) => write!(f, "{value}"),
            Token::Bytes(bytes) => {
                for b in bytes.iter() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}
