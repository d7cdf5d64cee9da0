//! Connection strategies decide which node, and which of its connections,
//! serves a request.
//!
//! A strategy sees every node of the cluster plus the nodes owning the
//! request's token, if the request has a routing key. Owners are tried first.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use rand::rng;
use rand::seq::SliceRandom;
use tracing::trace;

use super::node::Node;
use crate::config::ConnectionStrategyKind;
use crate::errors::{ConnectionError, QueryError};
use crate::network::Connection;

/// Picks the connection a request is sent on.
#[async_trait]
pub trait ConnectionStrategy: Send + Sync + fmt::Debug {
    /// Returns a connection to one of `nodes`, trying `preferred` first.
    ///
    /// Fails with the last connection error met on the way, or with
    /// [`QueryError::NoConnectionAvailable`] when every node is down or
    /// at capacity.
    async fn get_connection(
        &self,
        nodes: &[Arc<Node>],
        preferred: &[Arc<Node>],
    ) -> Result<Arc<Connection>, QueryError>;

    /// Called once the request sent on `connection` completed.
    fn return_connection(&self, _connection: &Arc<Connection>) {}
}

pub(crate) fn new_strategy(kind: ConnectionStrategyKind) -> Box<dyn ConnectionStrategy> {
    match kind {
        ConnectionStrategyKind::Balanced => Box::new(BalancedStrategy),
        ConnectionStrategyKind::Random => Box::new(RandomStrategy),
        ConnectionStrategyKind::Exclusive => Box::new(ExclusiveStrategy::default()),
    }
}

// Preferred nodes first, then the others, each node once.
fn candidates(nodes: &[Arc<Node>], preferred: &[Arc<Node>]) -> (Vec<Arc<Node>>, Vec<Arc<Node>>) {
    let others = nodes
        .iter()
        .filter(|node| !preferred.iter().any(|p| Arc::ptr_eq(p, node)))
        .cloned()
        .collect();
    (preferred.to_vec(), others)
}

fn no_connection(last_error: Option<ConnectionError>) -> QueryError {
    match last_error {
        Some(err) => QueryError::ConnectionError(err),
        None => QueryError::NoConnectionAvailable,
    }
}

async fn first_connection(
    order: impl IntoIterator<Item = Arc<Node>>,
) -> Result<Arc<Connection>, QueryError> {
    let mut last_error = None;
    for node in order {
        match node.get_or_create_connection().await {
            Ok(Some(connection)) => return Ok(connection),
            Ok(None) => trace!("[{}] Node cannot serve, trying the next one", node.address()),
            Err(err) => last_error = Some(err),
        }
    }
    Err(no_connection(last_error))
}

/// Sends each request to the least loaded node.
#[derive(Debug, Default, Clone, Copy)]
pub struct BalancedStrategy;

#[async_trait]
impl ConnectionStrategy for BalancedStrategy {
    async fn get_connection(
        &self,
        nodes: &[Arc<Node>],
        preferred: &[Arc<Node>],
    ) -> Result<Arc<Connection>, QueryError> {
        let (mut preferred, mut others) = candidates(nodes, preferred);
        // Loads change under our feet; a snapshot is good enough.
        preferred.sort_by_cached_key(|node| node.load());
        others.sort_by_cached_key(|node| node.load());
        first_connection(preferred.into_iter().chain(others)).await
    }
}

/// Sends each request to a random node.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomStrategy;

#[async_trait]
impl ConnectionStrategy for RandomStrategy {
    async fn get_connection(
        &self,
        nodes: &[Arc<Node>],
        preferred: &[Arc<Node>],
    ) -> Result<Arc<Connection>, QueryError> {
        let (mut preferred, mut others) = candidates(nodes, preferred);
        {
            let mut rng = rng();
            preferred.shuffle(&mut rng);
            others.shuffle(&mut rng);
        }
        first_connection(preferred.into_iter().chain(others)).await
    }
}

/// Gives each request a connection nobody else uses until it is returned.
///
/// The number of requests in flight is then bounded by the number of
/// connections the cluster may open.
#[derive(Default)]
pub struct ExclusiveStrategy {
    checked_out: DashSet<u64>,
}

impl fmt::Debug for ExclusiveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveStrategy")
            .field("checked_out", &self.checked_out.len())
            .finish()
    }
}

impl ExclusiveStrategy {
    /// Connections currently handed out.
    pub fn checked_out(&self) -> usize {
        self.checked_out.len()
    }
}

#[async_trait]
impl ConnectionStrategy for ExclusiveStrategy {
    async fn get_connection(
        &self,
        nodes: &[Arc<Node>],
        preferred: &[Arc<Node>],
    ) -> Result<Arc<Connection>, QueryError> {
        let (mut preferred, mut others) = candidates(nodes, preferred);
        preferred.sort_by_cached_key(|node| node.load());
        others.sort_by_cached_key(|node| node.load());

        let is_claimed = |connection: &Connection| self.checked_out.contains(&connection.id());
        let mut last_error = None;
        for node in preferred.into_iter().chain(others) {
            loop {
                match node.get_unclaimed_connection(&is_claimed).await {
                    Ok(Some(connection)) => {
                        // Someone else may have claimed it in the meantime.
                        if self.checked_out.insert(connection.id()) {
                            return Ok(connection);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        last_error = Some(err);
                        break;
                    }
                }
            }
        }
        Err(no_connection(last_error))
    }

    fn return_connection(&self, connection: &Arc<Connection>) {
        self.checked_out.remove(&connection.id());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::cluster::node::tests::test_node_config;
    use crate::cluster::node::NodeConfig;
    use crate::test_utils::{setup_tracing, FakeServer, FakeServerConfig};

    fn node_for(server: &FakeServer, config: NodeConfig) -> Arc<Node> {
        Node::new(server.address(), None, None, Vec::new(), Arc::new(config))
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn balanced_prefers_owners_then_least_loaded() {
        setup_tracing();
        let busy = FakeServer::start(FakeServerConfig {
            query_delay: Duration::from_millis(300),
            ..Default::default()
        })
        .await;
        let idle = FakeServer::start(FakeServerConfig::default()).await;
        let busy_node = node_for(&busy, test_node_config());
        let idle_node = node_for(&idle, test_node_config());
        let nodes = vec![busy_node.clone(), idle_node.clone()];

        let first = BalancedStrategy.get_connection(&nodes, &[]).await.unwrap();
        let statement = "INSERT INTO ks.t (a) VALUES (1)".into();
        let pending = first.query(&statement);
        let pick = async {
            while first.load() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            BalancedStrategy.get_connection(&nodes, &[]).await.unwrap()
        };
        let (result, second) = tokio::join!(pending, pick);
        result.unwrap();
        assert_ne!(first.connect_address(), second.connect_address());

        // Owners win even when busier.
        let owner = BalancedStrategy
            .get_connection(&nodes, &[busy_node.clone()])
            .await
            .unwrap();
        assert_eq!(owner.connect_address(), busy.address());
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn down_nodes_are_skipped_and_errors_reported() {
        setup_tracing();
        let dead = FakeServer::start(FakeServerConfig::default()).await;
        dead.set_refusing(true);
        let alive = FakeServer::start(FakeServerConfig::default()).await;
        let dead_node = node_for(&dead, test_node_config());
        let alive_node = node_for(&alive, test_node_config());

        let connection = RandomStrategy
            .get_connection(&[dead_node.clone(), alive_node], &[dead_node.clone()])
            .await
            .unwrap();
        assert_eq!(connection.connect_address(), alive.address());
        assert!(!dead_node.is_up());

        // Down nodes are skipped silently.
        assert_matches!(
            BalancedStrategy.get_connection(&[dead_node], &[]).await,
            Err(QueryError::NoConnectionAvailable)
        );

        let another_dead = FakeServer::start(FakeServerConfig::default()).await;
        another_dead.set_refusing(true);
        let node = node_for(&another_dead, test_node_config());
        assert_matches!(
            BalancedStrategy.get_connection(&[node], &[]).await,
            Err(QueryError::ConnectionError(_))
        );
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn exclusive_hands_out_each_connection_once() {
        setup_tracing();
        let server = FakeServer::start(FakeServerConfig::default()).await;
        let node = node_for(&server, test_node_config());
        let nodes = vec![node];
        let strategy = ExclusiveStrategy::default();

        let first = strategy.get_connection(&nodes, &[]).await.unwrap();
        let second = strategy.get_connection(&nodes, &[]).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(strategy.checked_out(), 2);
        assert_matches!(
            strategy.get_connection(&nodes, &[]).await,
            Err(QueryError::NoConnectionAvailable)
        );

        strategy.return_connection(&first);
        let again = strategy.get_connection(&nodes, &[]).await.unwrap();
        assert_eq!(again.id(), first.id());
        assert_eq!(server.connections_opened(), 2);
    }
}
