//! Cluster configuration.
//!
//! A [`ClusterConfig`] is built either with its consuming builder methods or
//! from plain key/value settings with [`ClusterConfig::from_settings`].

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use tokio::net::lookup_host;
use tokio::sync::mpsc;
use tracing::debug;

use crate::authentication::{AuthenticatorProvider, AuthenticatorRegistry, Credentials};
use crate::errors::ConfigError;
use crate::frame::request::options::DEFAULT_CQL_VERSION;
use crate::frame::response::event::Event;
use crate::frame::{Compression, DEFAULT_MAX_FRAME_SIZE};
use crate::network::ConnectionConfig;
use crate::routing::PartitionerName;
use crate::statement::Consistency;
use crate::{MemoryPool, TypeRegistry};

/// Port nodes listen on unless told otherwise.
pub const DEFAULT_PORT: u16 = 9042;

/// Which peers of a seed become nodes of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryScope {
    /// Only the known nodes.
    #[default]
    None,
    /// Peers in the seed's datacenter and rack.
    Rack,
    /// Peers in the seed's datacenter.
    Datacenter,
    /// Every peer.
    Cluster,
}

impl DiscoveryScope {
    fn as_str(&self) -> &'static str {
        match self {
            DiscoveryScope::None => "none",
            DiscoveryScope::Rack => "rack",
            DiscoveryScope::Datacenter => "datacenter",
            DiscoveryScope::Cluster => "cluster",
        }
    }
}

impl fmt::Display for DiscoveryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(DiscoveryScope::None),
            "rack" => Ok(DiscoveryScope::Rack),
            "datacenter" | "dc" => Ok(DiscoveryScope::Datacenter),
            "cluster" => Ok(DiscoveryScope::Cluster),
            _ => Err(ConfigError::UnknownVariant {
                option: "discovery scope",
                value: s.to_owned(),
            }),
        }
    }
}

/// How requests are spread over nodes and connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStrategyKind {
    /// Least loaded node first.
    #[default]
    Balanced,
    /// Random node.
    Random,
    /// One request per connection at a time.
    Exclusive,
}

impl ConnectionStrategyKind {
    fn as_str(&self) -> &'static str {
        match self {
            ConnectionStrategyKind::Balanced => "balanced",
            ConnectionStrategyKind::Random => "random",
            ConnectionStrategyKind::Exclusive => "exclusive",
        }
    }
}

impl fmt::Display for ConnectionStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(ConnectionStrategyKind::Balanced),
            "random" => Ok(ConnectionStrategyKind::Random),
            "exclusive" => Ok(ConnectionStrategyKind::Exclusive),
            _ => Err(ConfigError::UnknownVariant {
                option: "connection strategy",
                value: s.to_owned(),
            }),
        }
    }
}

/// Configuration of a [`Cluster`](crate::cluster::Cluster).
///
/// Collaborators (the memory pool, the type registry, authenticators and the
/// event channel) are injected here and shared by every connection of the
/// cluster.
#[derive(Clone)]
pub struct ClusterConfig {
    /// Host names or addresses, with or without port.
    pub known_nodes: Vec<String>,
    /// Port used for known nodes given without one, and for discovered peers.
    pub port: u16,
    /// Which peers of the known nodes are added.
    pub discovery_scope: DiscoveryScope,
    /// Fail cluster creation when discovery fails, instead of going on with
    /// the known nodes only.
    pub discovery_required: bool,
    /// How requests pick a connection.
    pub connection_strategy: ConnectionStrategyKind,
    /// Connections one node may have open.
    pub max_connections_per_node: usize,
    /// Connections across the whole cluster. 0 means unbounded.
    pub max_connections: usize,
    /// Load of a node's least loaded connection above which the node opens
    /// another one.
    pub new_connection_threshold: usize,
    /// Down time after a node's first failure. Doubles with each further one.
    pub min_down_time: Duration,
    /// Upper bound of the down time.
    pub max_down_time: Duration,
    /// Requests in flight across the cluster. 0 means computed from the
    /// connection limits.
    pub max_concurrent_queries: usize,
    /// Requests in flight on one connection, used to compute the limit above.
    pub max_queries_per_connection: usize,
    /// Connections idle for longer are closed by the node's sweeper.
    pub max_connection_idle_time: Duration,
    /// Time allowed to open a connection and finish its handshake.
    pub connect_timeout: Duration,
    /// Compression asked for in STARTUP, if the node supports it.
    pub compression: Option<Compression>,
    /// Sets `TCP_NODELAY` on sockets.
    pub tcp_nodelay: bool,
    /// TCP keepalive idle time. Keepalive is off when not set.
    pub tcp_keepalive_interval: Option<Duration>,
    /// Credentials for the named authenticator.
    pub credentials: Option<Credentials>,
    /// Name looked up in [`ClusterConfig::authenticator_registry`] when
    /// credentials are given.
    pub authenticator: String,
    /// CQL version sent in STARTUP.
    pub cql_version: String,
    /// Consistency of statements that do not set one.
    pub default_consistency: Consistency,
    /// Response bodies larger than this break the connection.
    pub max_frame_size: usize,
    /// Partitioner of the cluster. Learned by discovery when not set.
    pub partitioner: Option<PartitionerName>,
    /// Authenticator factories by name.
    pub authenticator_registry: AuthenticatorRegistry,
    /// Takes precedence over [`ClusterConfig::credentials`].
    pub authenticator_provider: Option<Arc<dyn AuthenticatorProvider>>,
    /// Buffers for request frames and compression.
    pub memory_pool: MemoryPool,
    /// Codecs for bound values and result rows.
    pub type_registry: Arc<TypeRegistry>,
    /// Receives topology, status and schema events of every connection.
    pub event_sender: Option<mpsc::Sender<Event>>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            known_nodes: Vec::new(),
            port: DEFAULT_PORT,
            discovery_scope: DiscoveryScope::None,
            discovery_required: false,
            connection_strategy: ConnectionStrategyKind::Balanced,
            max_connections_per_node: 2,
            max_connections: 0,
            new_connection_threshold: 10,
            min_down_time: Duration::from_millis(500),
            max_down_time: Duration::from_secs(60),
            max_concurrent_queries: 0,
            max_queries_per_connection: 128,
            max_connection_idle_time: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            compression: None,
            tcp_nodelay: true,
            tcp_keepalive_interval: None,
            credentials: None,
            authenticator: "PasswordAuthenticator".to_owned(),
            cql_version: DEFAULT_CQL_VERSION.to_owned(),
            default_consistency: Consistency::LocalQuorum,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            partitioner: None,
            authenticator_registry: AuthenticatorRegistry::default(),
            authenticator_provider: None,
            memory_pool: MemoryPool::default(),
            type_registry: Arc::new(TypeRegistry::default()),
            event_sender: None,
        }
    }
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("known_nodes", &self.known_nodes)
            .field("port", &self.port)
            .field("discovery_scope", &self.discovery_scope)
            .field("discovery_required", &self.discovery_required)
            .field("connection_strategy", &self.connection_strategy)
            .field("max_connections_per_node", &self.max_connections_per_node)
            .field("max_connections", &self.max_connections)
            .field("new_connection_threshold", &self.new_connection_threshold)
            .field("min_down_time", &self.min_down_time)
            .field("max_down_time", &self.max_down_time)
            .field("max_concurrent_queries", &self.max_concurrent_queries)
            .field("max_queries_per_connection", &self.max_queries_per_connection)
            .field("max_connection_idle_time", &self.max_connection_idle_time)
            .field("connect_timeout", &self.connect_timeout)
            .field("compression", &self.compression)
            .field("credentials", &self.credentials)
            .field("authenticator", &self.authenticator)
            .field("default_consistency", &self.default_consistency)
            .field("partitioner", &self.partitioner)
            .finish_non_exhaustive()
    }
}

// Setting keys compare equal regardless of case, `_`, `-` and spaces.
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn invalid(key: &str, value: &str, reason: impl fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
        reason: reason.to_string(),
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e| invalid(key, value, e))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_number::<u64>(key, value).map(Duration::from_millis)
}

impl ClusterConfig {
    /// Default configuration, without known nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from key/value settings.
    ///
    /// Keys match regardless of case, `_`, `-` and spaces, so `max_down_time`,
    /// `MaxDownTime` and `max-down-time` are the same setting. Durations are
    /// given in milliseconds.
    ///
    /// ```
    /// # use strata::config::{ClusterConfig, DiscoveryScope};
    /// let config = ClusterConfig::from_settings([
    ///     ("Nodes", "10.0.0.1, 10.0.0.2:9043"),
    ///     ("discovery_scope", "datacenter"),
    ///     ("max_down_time", "30000"),
    /// ])
    /// .unwrap();
    /// assert_eq!(config.known_nodes, ["10.0.0.1", "10.0.0.2:9043"]);
    /// assert_eq!(config.discovery_scope, DiscoveryScope::Datacenter);
    /// ```
    pub fn from_settings<I, K, V>(settings: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in settings {
            config.apply_setting(key.as_ref(), value.as_ref())?;
        }
        Ok(config)
    }

    /// Applies one key/value setting. See [`ClusterConfig::from_settings`].
    pub fn apply_setting(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match normalize_key(key).as_str() {
            "nodes" | "servers" => {
                self.known_nodes = value
                    .split(',')
                    .map(str::trim)
                    .filter(|node| !node.is_empty())
                    .map(str::to_owned)
                    .collect();
            }
            "port" => self.port = parse_number(key, value)?,
            "discoveryscope" => self.discovery_scope = value.parse()?,
            "discoveryrequired" => self.discovery_required = parse_bool(key, value)?,
            "connectionstrategy" => self.connection_strategy = value.parse()?,
            "maxconnectionspernode" => self.max_connections_per_node = parse_number(key, value)?,
            "maxconnections" => self.max_connections = parse_number(key, value)?,
            "newconnectionthreshold" => self.new_connection_threshold = parse_number(key, value)?,
            "maxdowntime" => self.max_down_time = parse_millis(key, value)?,
            "mindowntime" => self.min_down_time = parse_millis(key, value)?,
            "maxconcurrentqueries" => self.max_concurrent_queries = parse_number(key, value)?,
            "maxqueriesperconnection" => {
                self.max_queries_per_connection = parse_number(key, value)?
            }
            "maxconnectionidletime" => self.max_connection_idle_time = parse_millis(key, value)?,
            "connecttimeout" => self.connect_timeout = parse_millis(key, value)?,
            "compression" => {
                self.compression = match value.trim().to_ascii_lowercase().as_str() {
                    "none" | "" => None,
                    other => Some(other.parse().map_err(|_| ConfigError::UnknownVariant {
                        option: "compression",
                        value: value.to_owned(),
                    })?),
                }
            }
            "username" => {
                self.credentials
                    .get_or_insert_with(|| Credentials {
                        username: String::new(),
                        password: String::new(),
                    })
                    .username = value.to_owned();
            }
            "password" => {
                self.credentials
                    .get_or_insert_with(|| Credentials {
                        username: String::new(),
                        password: String::new(),
                    })
                    .password = value.to_owned();
            }
            "authenticator" => self.authenticator = value.trim().to_owned(),
            "cqlversion" => self.cql_version = value.trim().to_owned(),
            "defaultconsistency" => {
                self.default_consistency = value.parse().map_err(|_| ConfigError::UnknownVariant {
                    option: "consistency",
                    value: value.to_owned(),
                })?
            }
            "maxframesize" => self.max_frame_size = parse_number(key, value)?,
            "tcpnodelay" => self.tcp_nodelay = parse_bool(key, value)?,
            "partitioner" => {
                self.partitioner = Some(PartitionerName::from_name(value).ok_or_else(|| {
                    ConfigError::UnknownVariant {
                        option: "partitioner",
                        value: value.to_owned(),
                    }
                })?)
            }
            _ => return Err(ConfigError::UnknownKey(key.to_owned())),
        }
        Ok(())
    }

    /// Adds a known node: a host name or an address, optionally with a port.
    ///
    /// ```
    /// # use strata::config::ClusterConfig;
    /// let config = ClusterConfig::new()
    ///     .known_node("db1.example.com")
    ///     .known_node("10.0.0.2:9043");
    /// ```
    pub fn known_node(mut self, node: impl Into<String>) -> Self {
        self.known_nodes.push(node.into());
        self
    }

    /// Adds several known nodes.
    pub fn known_nodes(mut self, nodes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.known_nodes.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Port used for nodes given without one, and for discovered peers.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Which peers of the seeds join the cluster.
    pub fn discovery_scope(mut self, scope: DiscoveryScope) -> Self {
        self.discovery_scope = scope;
        self
    }

    /// Fails cluster construction when discovery fails, instead of falling back to the seeds.
    pub fn discovery_required(mut self, required: bool) -> Self {
        self.discovery_required = required;
        self
    }

    /// How connections are picked for requests.
    pub fn connection_strategy(mut self, strategy: ConnectionStrategyKind) -> Self {
        self.connection_strategy = strategy;
        self
    }

    /// Connections a single node may have open.
    pub fn max_connections_per_node(mut self, max: usize) -> Self {
        self.max_connections_per_node = max;
        self
    }

    /// Caps connections across the cluster. 0 means unbounded.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Load above which a node opens another connection, if it may.
    pub fn new_connection_threshold(mut self, threshold: usize) -> Self {
        self.new_connection_threshold = threshold;
        self
    }

    /// Bounds of the time a failing node is left alone. The time doubles
    /// with every consecutive failure.
    pub fn down_time(mut self, min: Duration, max: Duration) -> Self {
        self.min_down_time = min;
        self.max_down_time = max;
        self
    }

    /// Caps requests in flight across the cluster. 0 means computed from the
    /// connection limits.
    pub fn max_concurrent_queries(mut self, max: usize) -> Self {
        self.max_concurrent_queries = max;
        self
    }

    /// Requests one connection is expected to carry at once. Used to size the admission semaphore.
    pub fn max_queries_per_connection(mut self, max: usize) -> Self {
        self.max_queries_per_connection = max;
        self
    }

    /// Connections without traffic for this long are closed.
    pub fn max_connection_idle_time(mut self, idle_time: Duration) -> Self {
        self.max_connection_idle_time = idle_time;
        self
    }

    /// Time allowed for opening a connection, handshake included.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Compression to ask the nodes for. Nodes that do not support it get
    /// uncompressed frames.
    pub fn compression(mut self, compression: Option<Compression>) -> Self {
        self.compression = compression;
        self
    }

    /// Sets `TCP_NODELAY` on connection sockets.
    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// Enables TCP keepalive with the given idle time.
    pub fn tcp_keepalive_interval(mut self, interval: Duration) -> Self {
        self.tcp_keepalive_interval = Some(interval);
        self
    }

    /// Credentials for the configured authenticator.
    ///
    /// ```
    /// # use strata::config::ClusterConfig;
    /// let config = ClusterConfig::new()
    ///     .known_node("127.0.0.1")
    ///     .user("cassandra", "cassandra");
    /// ```
    pub fn user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Name of the authenticator built from the credentials.
    pub fn authenticator(mut self, name: impl Into<String>) -> Self {
        self.authenticator = name.into();
        self
    }

    /// Registry the authenticator name is resolved in.
    pub fn authenticator_registry(mut self, registry: AuthenticatorRegistry) -> Self {
        self.authenticator_registry = registry;
        self
    }

    /// Uses `provider` for authentication, whatever the credentials.
    pub fn authenticator_provider(mut self, provider: Arc<dyn AuthenticatorProvider>) -> Self {
        self.authenticator_provider = Some(provider);
        self
    }

    /// CQL version sent in STARTUP.
    pub fn cql_version(mut self, version: impl Into<String>) -> Self {
        self.cql_version = version.into();
        self
    }

    /// Consistency of statements that set none.
    pub fn default_consistency(mut self, consistency: Consistency) -> Self {
        self.default_consistency = consistency;
        self
    }

    /// Largest response body accepted, in bytes.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Partitioner to use when the nodes do not report one.
    pub fn partitioner(mut self, partitioner: PartitionerName) -> Self {
        self.partitioner = Some(partitioner);
        self
    }

    /// Buffer pool shared with other clusters, for instance.
    pub fn memory_pool(mut self, pool: MemoryPool) -> Self {
        self.memory_pool = pool;
        self
    }

    /// Registry used to serialize values and decode rows.
    pub fn type_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.type_registry = registry;
        self
    }

    /// Forwards server events of every connection to `sender`.
    pub fn event_sender(mut self, sender: mpsc::Sender<Event>) -> Self {
        self.event_sender = Some(sender);
        self
    }

    /// Checks the settings against each other.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.known_nodes.is_empty() {
            return Err(ConfigError::EmptyNodeList);
        }
        if self.max_connections_per_node == 0 {
            return Err(ConfigError::InvalidCombination(
                "max_connections_per_node must be positive".to_owned(),
            ));
        }
        if self.max_queries_per_connection == 0 {
            return Err(ConfigError::InvalidCombination(
                "max_queries_per_connection must be positive".to_owned(),
            ));
        }
        if self.min_down_time > self.max_down_time {
            return Err(ConfigError::InvalidCombination(format!(
                "min_down_time ({:?}) is greater than max_down_time ({:?})",
                self.min_down_time, self.max_down_time
            )));
        }
        self.resolve_authenticator().map(|_| ())
    }

    fn resolve_authenticator(&self) -> Result<Option<Arc<dyn AuthenticatorProvider>>, ConfigError> {
        if let Some(provider) = &self.authenticator_provider {
            return Ok(Some(provider.clone()));
        }
        self.credentials
            .as_ref()
            .map(|credentials| {
                self.authenticator_registry
                    .resolve(&self.authenticator, credentials)
                    .ok_or_else(|| ConfigError::UnknownAuthenticator(self.authenticator.clone()))
            })
            .transpose()
    }

    pub(crate) fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        Ok(ConnectionConfig {
            compression: self.compression,
            tcp_nodelay: self.tcp_nodelay,
            tcp_keepalive_interval: self.tcp_keepalive_interval,
            connect_timeout: self.connect_timeout,
            event_sender: self.event_sender.clone(),
            default_consistency: self.default_consistency,
            authenticator: self.resolve_authenticator()?,
            cql_version: self.cql_version.clone(),
            max_frame_size: self.max_frame_size,
            memory_pool: self.memory_pool.clone(),
            type_registry: self.type_registry.clone(),
            ..Default::default()
        })
    }

    /// Resolves the known nodes to addresses, dropping duplicates.
    pub(crate) async fn resolve_known_nodes(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        let resolved =
            futures::future::try_join_all(self.known_nodes.iter().map(|node| self.resolve(node)))
                .await?;
        Ok(resolved.into_iter().unique().collect())
    }

    async fn resolve(&self, node: &str) -> Result<SocketAddr, ConfigError> {
        if let Ok(addr) = node.parse::<SocketAddr>() {
            return Ok(addr);
        }
        if let Ok(ip) = node.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        let unresolvable = |reason: String| ConfigError::UnresolvableAddress {
            address: node.to_owned(),
            reason,
        };
        // `lookup_host` wants "host:port"; fall back to the configured port.
        let addrs = match lookup_host(node).await {
            Ok(addrs) => itertools::Either::Left(addrs),
            Err(_) => itertools::Either::Right(
                lookup_host((node, self.port))
                    .await
                    .map_err(|e| unresolvable(e.to_string()))?,
            ),
        };
        let addr = addrs
            .find_or_last(|addr| matches!(addr, SocketAddr::V4(_)))
            .ok_or_else(|| unresolvable("no addresses".to_owned()))?;
        debug!("Resolved {} to {}", node, addr);
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn settings_are_applied() {
        let config = ClusterConfig::from_settings([
            ("servers", "10.0.0.1,10.0.0.2:9043, "),
            ("Port", "9142"),
            ("discovery-scope", "Rack"),
            ("DiscoveryRequired", "true"),
            ("connection_strategy", "exclusive"),
            ("max connections per node", "4"),
            ("max_connections", "16"),
            ("new_connection_threshold", "3"),
            ("min_down_time", "100"),
            ("max_down_time", "2000"),
            ("max_concurrent_queries", "64"),
            ("max_queries_per_connection", "32"),
            ("max_connection_idle_time", "1500"),
            ("connect_timeout", "250"),
            ("compression", "LZ4"),
            ("username", "user"),
            ("password", "pass"),
            ("cql_version", "3.4.5"),
            ("default_consistency", "local_one"),
            ("max_frame_size", "1024"),
            ("tcp_nodelay", "no"),
            ("partitioner", "org.apache.cassandra.dht.RandomPartitioner"),
        ])
        .unwrap();

        assert_eq!(config.known_nodes, ["10.0.0.1", "10.0.0.2:9043"]);
        assert_eq!(config.port, 9142);
        assert_eq!(config.discovery_scope, DiscoveryScope::Rack);
        assert!(config.discovery_required);
        assert_eq!(config.connection_strategy, ConnectionStrategyKind::Exclusive);
        assert_eq!(config.max_connections_per_node, 4);
        assert_eq!(config.max_connections, 16);
        assert_eq!(config.new_connection_threshold, 3);
        assert_eq!(config.min_down_time, Duration::from_millis(100));
        assert_eq!(config.max_down_time, Duration::from_secs(2));
        assert_eq!(config.max_concurrent_queries, 64);
        assert_eq!(config.max_queries_per_connection, 32);
        assert_eq!(config.max_connection_idle_time, Duration::from_millis(1500));
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.compression, Some(Compression::Lz4));
        assert_eq!(
            config.credentials,
            Some(Credentials {
                username: "user".to_owned(),
                password: "pass".to_owned(),
            })
        );
        assert_eq!(config.cql_version, "3.4.5");
        assert_eq!(config.default_consistency, Consistency::LocalOne);
        assert_eq!(config.max_frame_size, 1024);
        assert!(!config.tcp_nodelay);
        assert_eq!(config.partitioner, Some(PartitionerName::Random));
        config.validate().unwrap();
    }

    #[test]
    fn defaults() {
        let config = ClusterConfig::from_settings([("nodes", "127.0.0.1")]).unwrap();
        assert_eq!(config.port, 9042);
        assert_eq!(config.discovery_scope, DiscoveryScope::None);
        assert_eq!(config.connection_strategy, ConnectionStrategyKind::Balanced);
        assert_eq!(config.max_connections_per_node, 2);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.new_connection_threshold, 10);
        assert_eq!(config.min_down_time, Duration::from_millis(500));
        assert_eq!(config.max_down_time, Duration::from_secs(60));
        assert_eq!(config.max_queries_per_connection, 128);
        assert_eq!(config.max_connection_idle_time, Duration::from_secs(10));
        assert_eq!(config.compression, None);
        assert_eq!(config.default_consistency, Consistency::LocalQuorum);
        assert_eq!(config.max_frame_size, 256 * 1024 * 1024);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn bad_settings_fail_fast() {
        assert_matches!(
            ClusterConfig::from_settings([("retry_policy", "x")]),
            Err(ConfigError::UnknownKey(key)) if key == "retry_policy"
        );
        assert_matches!(
            ClusterConfig::from_settings([("port", "ninety")]),
            Err(ConfigError::InvalidValue { key, .. }) if key == "port"
        );
        assert_matches!(
            ClusterConfig::from_settings([("tcp_nodelay", "maybe")]),
            Err(ConfigError::InvalidValue { .. })
        );
        assert_matches!(
            ClusterConfig::from_settings([("discovery_scope", "galaxy")]),
            Err(ConfigError::UnknownVariant { option: "discovery scope", .. })
        );
        assert_matches!(
            ClusterConfig::from_settings([("compression", "zstd")]),
            Err(ConfigError::UnknownVariant { option: "compression", .. })
        );
        assert_matches!(
            ClusterConfig::from_settings([("default_consistency", "most")]),
            Err(ConfigError::UnknownVariant { option: "consistency", .. })
        );
    }

    #[test]
    fn enum_spellings_round_trip() {
        for scope in [
            DiscoveryScope::None,
            DiscoveryScope::Rack,
            DiscoveryScope::Datacenter,
            DiscoveryScope::Cluster,
        ] {
            assert_eq!(scope.to_string().parse::<DiscoveryScope>().unwrap(), scope);
        }
        for kind in [
            ConnectionStrategyKind::Balanced,
            ConnectionStrategyKind::Random,
            ConnectionStrategyKind::Exclusive,
        ] {
            assert_eq!(kind.to_string().parse::<ConnectionStrategyKind>().unwrap(), kind);
        }
    }

    #[test]
    fn validation() {
        assert_matches!(ClusterConfig::new().validate(), Err(ConfigError::EmptyNodeList));

        let base = ClusterConfig::new().known_node("127.0.0.1");
        assert_matches!(
            base.clone()
                .down_time(Duration::from_secs(2), Duration::from_secs(1))
                .validate(),
            Err(ConfigError::InvalidCombination(_))
        );
        assert_matches!(
            base.clone().max_connections_per_node(0).validate(),
            Err(ConfigError::InvalidCombination(_))
        );
        assert_matches!(
            base.clone()
                .user("user", "pass")
                .authenticator("KerberosAuthenticator")
                .validate(),
            Err(ConfigError::UnknownAuthenticator(name)) if name == "KerberosAuthenticator"
        );

        let config = base
            .user("user", "pass")
            .authenticator("org.apache.cassandra.auth.PasswordAuthenticator");
        config.validate().unwrap();
        assert!(config.connection_config().unwrap().authenticator.is_some());
    }

    #[tokio::test]
    async fn known_nodes_resolve_with_default_port() {
        let config = ClusterConfig::new()
            .port(9100)
            .known_node("127.0.0.3")
            .known_node("127.0.0.2:9200")
            .known_node("127.0.0.3:9100")
            .known_node("localhost");
        let resolved = config.resolve_known_nodes().await.unwrap();

        assert_eq!(resolved[0], SocketAddr::from(([127, 0, 0, 3], 9100)));
        assert_eq!(resolved[1], SocketAddr::from(([127, 0, 0, 2], 9200)));
        // The duplicate is gone; localhost resolves with the configured port.
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[2].port(), 9100);
        assert!(resolved[2].ip().is_loopback());

        assert_matches!(
            ClusterConfig::new()
                .known_node("no-such-host.invalid")
                .resolve_known_nodes()
                .await,
            Err(ConfigError::UnresolvableAddress { .. })
        );
    }
}
