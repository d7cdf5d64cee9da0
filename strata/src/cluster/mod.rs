//! The cluster as a whole: its nodes, the token map routing requests to them,
//! and the admission control every request goes through.
//!
//! This includes:
//! - node's representation ([Node]), which owns a pool of connections,
//! - [ClusterState], a snapshot of the nodes and of the token map,
//!   replaced atomically on every topology change,
//! - [strategies](strategy) picking the connection each request is sent on,
//! - discovery of peers through the seeds' system tables.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ClusterConfig, ConnectionStrategyKind, DiscoveryScope};
use crate::errors::{NewClusterError, QueryError};
use crate::frame::value::SerializedValues;
use crate::network::Connection;
use crate::response::QueryResult;
use crate::routing::{PartitionerName, TokenMap};
use crate::statement::{PreparedStatement, Statement};

mod discovery;
pub(crate) mod node;
pub mod strategy;

use discovery::NodeInfo;
use node::{ConnectionBudget, NodeConfig};
pub use node::{Node, NodeStatus};
use strategy::ConnectionStrategy;

/// Snapshot of the cluster's topology.
///
/// Snapshots are immutable; topology changes publish a new one.
#[derive(Debug, Default)]
pub struct ClusterState {
    nodes: Vec<Arc<Node>>,
    token_map: Arc<TokenMap>,
}

impl ClusterState {
    fn new(nodes: Vec<Arc<Node>>, partitioner: Option<PartitionerName>) -> Self {
        let token_map = Arc::new(TokenMap::build(&nodes, partitioner));
        Self { nodes, token_map }
    }

    /// All nodes of the cluster.
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Token map built from these nodes.
    pub fn token_map(&self) -> &Arc<TokenMap> {
        &self.token_map
    }

    /// Node with the given address, if any.
    pub fn node(&self, address: SocketAddr) -> Option<&Arc<Node>> {
        self.nodes.iter().find(|node| node.address() == address)
    }
}

/// A connected set of nodes serving requests.
///
/// Connections are opened lazily, the first time a request needs one. Every
/// request takes a permit of a cluster-wide semaphore first, which bounds
/// the number of requests in flight; callers beyond the limit wait.
pub struct Cluster {
    state: ArcSwap<ClusterState>,
    // Serializes topology changes; readers go through `state` only.
    topology_lock: StdMutex<()>,
    node_config: Arc<NodeConfig>,
    partitioner: Option<PartitionerName>,
    strategy: Box<dyn ConnectionStrategy>,
    throttle: Semaphore,
    throttle_capacity: usize,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("state", &self.state.load())
            .field("partitioner", &self.partitioner)
            .field("strategy", &self.strategy)
            .field("throttle_capacity", &self.throttle_capacity)
            .finish_non_exhaustive()
    }
}

// Hands the connection back to the strategy when the request ends,
// however it ends.
struct Checkout<'a> {
    strategy: &'a dyn ConnectionStrategy,
    connection: Arc<Connection>,
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        self.strategy.return_connection(&self.connection);
    }
}

/// Requests the cluster admits at once when not configured explicitly:
/// every connection the cluster may open, times the requests each one
/// carries.
fn compute_throttle_capacity(config: &ClusterConfig, node_count: usize) -> usize {
    if config.max_concurrent_queries > 0 {
        return config.max_concurrent_queries;
    }
    let mut connections = node_count.saturating_mul(config.max_connections_per_node);
    if config.max_connections > 0 {
        connections = connections.min(config.max_connections);
    }
    let fanout = match config.connection_strategy {
        ConnectionStrategyKind::Exclusive => 1,
        _ => config.max_queries_per_connection,
    };
    connections.saturating_mul(fanout).clamp(1, Semaphore::MAX_PERMITS)
}

impl Cluster {
    /// Creates a cluster from its configuration.
    ///
    /// Known nodes are resolved and, if a discovery scope is configured,
    /// their peers are added. Discovery failures only leave the cluster
    /// with its known nodes, unless discovery is configured as required.
    /// No connection is kept open; nodes connect on first use.
    pub async fn new(config: ClusterConfig) -> Result<Cluster, NewClusterError> {
        config.validate()?;
        let connection_config = config.connection_config()?;
        let seeds = config.resolve_known_nodes().await?;

        let mut infos: Vec<NodeInfo> = seeds
            .iter()
            .map(|&address| NodeInfo {
                address,
                datacenter: None,
                rack: None,
                tokens: Vec::new(),
            })
            .collect();
        let mut partitioner = config.partitioner;

        if config.discovery_scope != DiscoveryScope::None {
            match discovery::discover(
                &seeds,
                config.discovery_scope,
                config.port,
                &connection_config,
            )
            .await
            {
                Ok(topology) => {
                    if partitioner.is_none() {
                        partitioner = topology
                            .partitioner
                            .as_deref()
                            .and_then(PartitionerName::from_name);
                        if partitioner.is_none() {
                            warn!(
                                "Unknown partitioner {:?}, requests will not be token aware",
                                topology.partitioner
                            );
                        }
                    }
                    for discovered in topology.nodes {
                        match infos.iter_mut().find(|i| i.address == discovered.address) {
                            Some(info) => *info = discovered,
                            None => infos.push(discovered),
                        }
                    }
                }
                Err(err) if config.discovery_required => return Err(err.into()),
                Err(err) => warn!(
                    "Node discovery failed, going on with the {} known nodes: {}",
                    infos.len(),
                    err
                ),
            }
        }

        let node_config = Arc::new(NodeConfig {
            connection: connection_config,
            max_connections_per_node: config.max_connections_per_node,
            new_connection_threshold: config.new_connection_threshold,
            min_down_time: config.min_down_time,
            max_down_time: config.max_down_time,
            max_connection_idle_time: config.max_connection_idle_time,
            budget: Arc::new(ConnectionBudget::new(config.max_connections)),
        });
        let nodes: Vec<Arc<Node>> = infos
            .into_iter()
            .map(|info| {
                Node::new(
                    info.address,
                    info.datacenter,
                    info.rack,
                    info.tokens,
                    node_config.clone(),
                )
            })
            .collect();

        let throttle_capacity = compute_throttle_capacity(&config, nodes.len());
        info!(
            "Cluster of {} nodes, {} strategy, up to {} concurrent requests",
            nodes.len(),
            config.connection_strategy,
            throttle_capacity
        );

        Ok(Cluster {
            state: ArcSwap::from_pointee(ClusterState::new(nodes, partitioner)),
            topology_lock: StdMutex::new(()),
            node_config,
            partitioner,
            strategy: strategy::new_strategy(config.connection_strategy),
            throttle: Semaphore::new(throttle_capacity),
            throttle_capacity,
        })
    }

    /// Runs an unprepared statement.
    ///
    /// Statements with a routing key go to the nodes owning the key first.
    pub async fn query(&self, statement: &Statement) -> Result<QueryResult, QueryError> {
        self.query_cancellable(statement, &CancellationToken::new())
            .await
    }

    /// Like [`Cluster::query`], giving up with [`QueryError::Cancelled`] once
    /// `cancel` fires.
    ///
    /// A request already written to a connection is not retracted; its
    /// response is discarded when it comes.
    pub async fn query_cancellable(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, QueryError> {
        let routing_key = statement.get_routing_key().cloned();
        self.run_request(routing_key.as_deref(), cancel, |connection| async move {
            connection.query(statement).await
        })
        .await
    }

    /// Prepares a statement on one node.
    ///
    /// Other nodes learn the statement the first time it is executed on
    /// them.
    pub async fn prepare(
        &self,
        statement: impl Into<Statement>,
    ) -> Result<PreparedStatement, QueryError> {
        let statement = statement.into();
        self.run_request(None, &CancellationToken::new(), |connection| async move {
            connection.prepare(&statement).await
        })
        .await
    }

    /// Executes a prepared statement, on the nodes owning its partition key
    /// first.
    pub async fn execute(
        &self,
        prepared: &PreparedStatement,
        values: &SerializedValues,
    ) -> Result<QueryResult, QueryError> {
        self.execute_cancellable(prepared, values, &CancellationToken::new())
            .await
    }

    /// Like [`Cluster::execute`], giving up with [`QueryError::Cancelled`]
    /// once `cancel` fires.
    pub async fn execute_cancellable(
        &self,
        prepared: &PreparedStatement,
        values: &SerializedValues,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, QueryError> {
        let partition_key = prepared.compute_partition_key(values)?;
        self.run_request(partition_key.as_deref(), cancel, |connection| async move {
            connection.execute(prepared, values).await
        })
        .await
    }

    // Admission, connection choice and the request itself, each of them
    // interrupted by `cancel`.
    async fn run_request<T, F, Fut>(
        &self,
        routing_key: Option<&[u8]>,
        cancel: &CancellationToken,
        request: F,
    ) -> Result<T, QueryError>
    where
        F: FnOnce(Arc<Connection>) -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        let run = async {
            // The semaphore is never closed.
            let _permit = self
                .throttle
                .acquire()
                .await
                .map_err(|_| QueryError::NoConnectionAvailable)?;
            let connection = self.get_connection(routing_key).await?;
            let _checkout = Checkout {
                strategy: self.strategy.as_ref(),
                connection: connection.clone(),
            };
            request(connection).await
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueryError::Cancelled),
            result = run => result,
        }
    }

    /// Picks a connection the way requests do, without taking a permit.
    ///
    /// Hand it back with [`Cluster::return_connection`] once done.
    pub async fn get_connection(
        &self,
        routing_key: Option<&[u8]>,
    ) -> Result<Arc<Connection>, QueryError> {
        let state = self.state.load_full();
        let preferred = match routing_key {
            Some(key) => state.token_map.get_responsible_nodes(key),
            None => &[],
        };
        self.strategy.get_connection(&state.nodes, preferred).await
    }

    /// Ends the use of a connection returned by [`Cluster::get_connection`].
    pub fn return_connection(&self, connection: &Arc<Connection>) {
        self.strategy.return_connection(connection);
    }

    /// Current topology snapshot.
    pub fn state(&self) -> Arc<ClusterState> {
        self.state.load_full()
    }

    /// Current nodes of the cluster.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.state.load().nodes.clone()
    }

    /// Token map of the current nodes.
    pub fn token_map(&self) -> Arc<TokenMap> {
        self.state.load().token_map.clone()
    }

    /// Partitioner reported by the nodes or configured.
    pub fn partitioner(&self) -> Option<PartitionerName> {
        self.partitioner
    }

    /// Nodes owning the partition whose serialized key is `partition_key`.
    pub fn get_responsible_nodes(&self, partition_key: &[u8]) -> Vec<Arc<Node>> {
        self.state
            .load()
            .token_map
            .get_responsible_nodes(partition_key)
            .to_vec()
    }

    /// Requests admitted at once.
    pub fn throttle_capacity(&self) -> usize {
        self.throttle_capacity
    }

    /// Permits not taken by requests in flight.
    pub fn available_permits(&self) -> usize {
        self.throttle.available_permits()
    }

    fn lock_topology(&self) -> MutexGuard<'_, ()> {
        self.topology_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, nodes: Vec<Arc<Node>>) {
        debug!("Publishing topology of {} nodes", nodes.len());
        self.state
            .store(Arc::new(ClusterState::new(nodes, self.partitioner)));
    }

    fn new_node(&self, address: SocketAddr, tokens: Vec<String>) -> Arc<Node> {
        Node::new(address, None, None, tokens, self.node_config.clone())
    }

    /// Adds a node owning `tokens`. Returns false if a node with that
    /// address is already there.
    pub fn add_node(&self, address: SocketAddr, tokens: Vec<String>) -> bool {
        let _guard = self.lock_topology();
        let state = self.state.load();
        if state.node(address).is_some() {
            return false;
        }
        let mut nodes = state.nodes.clone();
        nodes.push(self.new_node(address, tokens));
        self.publish(nodes);
        true
    }

    /// Removes a node. Requests in flight on its connections complete.
    pub fn remove_node(&self, address: SocketAddr) -> bool {
        let _guard = self.lock_topology();
        let state = self.state.load();
        if state.node(address).is_none() {
            return false;
        }
        let nodes = state
            .nodes
            .iter()
            .filter(|node| node.address() != address)
            .cloned()
            .collect();
        self.publish(nodes);
        true
    }

    /// Removes every node. Requests fail until nodes are added again.
    pub fn clear_nodes(&self) {
        let _guard = self.lock_topology();
        self.publish(Vec::new());
    }

    /// Replaces the topology. Nodes keeping their address and tokens keep
    /// their connections.
    pub fn replace_nodes(&self, nodes: impl IntoIterator<Item = (SocketAddr, Vec<String>)>) {
        let _guard = self.lock_topology();
        let state = self.state.load();
        let nodes = nodes
            .into_iter()
            .map(|(address, tokens)| match state.node(address) {
                Some(node) if node.tokens() == tokens.as_slice() => node.clone(),
                _ => self.new_node(address, tokens),
            })
            .collect();
        self.publish(nodes);
    }
}
