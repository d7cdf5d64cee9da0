//! Async driver for clusters of CQL-speaking column-store nodes.
//!
//! # Driver overview
//! ### Connecting
//! All driver activity revolves around the [Cluster](crate::cluster::Cluster).
//! It is created from a [ClusterConfig](crate::config::ClusterConfig) naming a
//! few known nodes; more nodes can be discovered from their peer tables.
//!
//! ```rust,no_run
//! use strata::cluster::Cluster;
//! use strata::config::{ClusterConfig, DiscoveryScope};
//! use std::error::Error;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn Error>> {
//!     let config = ClusterConfig::new()
//!         .known_node("127.0.0.1")
//!         .known_node("10.0.0.2:9043")
//!         .discovery_scope(DiscoveryScope::Datacenter);
//!     let cluster = Cluster::new(config).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! Connections are opened lazily, per node, up to the configured limits.
//! Requests go to the least loaded node (or a random one, depending on the
//! [connection strategy](crate::config::ConnectionStrategyKind)); statements
//! carrying a routing key are sent to the nodes owning the key's token first.
//!
//! ### Making queries
//! ```rust
//! # use strata::cluster::Cluster;
//! # use std::error::Error;
//! # async fn check_only_compiles(cluster: &Cluster) -> Result<(), Box<dyn Error>> {
//! use strata::statement::Statement;
//!
//! let result = cluster
//!     .query(&Statement::new("SELECT a, b FROM ks.tab WHERE a = 1").single_row())
//!     .await?;
//! let row = result.single_row()?;
//! let b = row.get("b").and_then(|v| v.as_text());
//! # Ok(())
//! # }
//! ```
//!
//! Every request first takes a permit from the cluster-wide admission
//! semaphore; excess callers wait for a permit instead of failing.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use strata_cql::frame;
pub use strata_cql::value;
pub use strata_cql::{Consistency, MemoryPool, PoolLimits, TypeRegistry};

/// Authenticators used in the connection handshake.
pub mod authentication;
/// The cluster, its nodes and connection strategies.
pub mod cluster;
/// Cluster configuration.
pub mod config;
/// Errors returned by the driver.
pub mod errors;
/// Connections to single nodes.
pub mod network;
/// Results of requests.
pub mod response;
/// Tokens, partitioners and the token map.
pub mod routing;
/// Statements, prepared or not.
pub mod statement;

pub(crate) mod utils;

#[cfg(test)]
pub(crate) use utils::test_utils;

pub use cluster::Cluster;
pub use config::ClusterConfig;
pub use response::QueryResult;
pub use statement::{PreparedStatement, Statement};
