use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, warn};

use super::{calculate_token, PartitionerName, Token};
use crate::cluster::Node;

/// Owners of one token. Rings rarely place a token on more than a few nodes.
pub type TokenOwners = SmallVec<[Arc<Node>; 2]>;

/// The ring: tokens in ascending order, each with the nodes owning it.
///
/// A key belongs to the owners of the greatest token not greater than the
/// key's token. Keys below the smallest token wrap around to the owners of
/// the greatest one.
///
/// The map is immutable; topology changes build a new one.
#[derive(Debug, Clone, Default)]
pub struct TokenMap {
    partitioner: Option<PartitionerName>,
    ring: Vec<(Token, TokenOwners)>,
}

impl TokenMap {
    /// An empty map; every lookup finds nobody.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the ring from the tokens the nodes claim.
    ///
    /// Without a partitioner the map stays empty and routing falls back to
    /// token-unaware selection. Tokens the partitioner cannot parse are
    /// skipped.
    pub fn build(nodes: &[Arc<Node>], partitioner: Option<PartitionerName>) -> Self {
        let Some(partitioner) = partitioner else {
            debug!("No known partitioner, token map stays empty");
            return Self::empty();
        };

        let mut entries: Vec<(Token, Arc<Node>)> = Vec::new();
        for node in nodes {
            for token in node.tokens() {
                match partitioner.parse_token(token) {
                    Ok(token) => entries.push((token, node.clone())),
                    Err(e) => warn!("[{}] Skipping token: {}", node.address(), e),
                }
            }
        }
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut ring: Vec<(Token, TokenOwners)> = Vec::with_capacity(entries.len());
        for (token, node) in entries {
            match ring.last_mut() {
                Some((last, owners)) if *last == token => {
                    if !owners.iter().any(|owner| Arc::ptr_eq(owner, &node)) {
                        owners.push(node);
                    }
                }
                _ => ring.push((token, smallvec::smallvec![node])),
            }
        }

        Self {
            partitioner: Some(partitioner),
            ring,
        }
    }

    /// Partitioner the tokens were parsed with.
    pub fn partitioner(&self) -> Option<PartitionerName> {
        self.partitioner
    }

    /// True when no node had a parseable token.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Number of distinct tokens on the ring.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Tokens in ring order.
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.ring.iter().map(|(token, _)| token)
    }

    /// Position on the ring of the entry responsible for `token`.
    pub fn ring_index(&self, token: &Token) -> Option<usize> {
        if self.ring.is_empty() {
            return None;
        }
        match self.ring.binary_search_by(|(t, _)| t.cmp(token)) {
            Ok(idx) => Some(idx),
            Err(0) => Some(self.ring.len() - 1),
            Err(idx) => Some(idx - 1),
        }
    }

    /// Nodes owning `token`. Empty if the ring is.
    pub fn owners_of_token(&self, token: &Token) -> &[Arc<Node>] {
        match self.ring_index(token) {
            Some(idx) => &self.ring[idx].1,
            None => &[],
        }
    }

    /// Nodes owning the serialized partition key.
    pub fn get_responsible_nodes(&self, partition_key: &[u8]) -> &[Arc<Node>] {
        match self.partitioner {
            Some(partitioner) if !self.ring.is_empty() => {
                self.owners_of_token(&calculate_token(&partitioner, partition_key))
            }
            _ => &[],
        }
    }
}
