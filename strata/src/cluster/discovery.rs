//! Learning the cluster's nodes from the system tables of a seed.

use std::net::{IpAddr, SocketAddr};

use tracing::{debug, warn};

use crate::config::DiscoveryScope;
use crate::errors::DiscoveryError;
use crate::network::{open_connection, Connection, ConnectionConfig};
use crate::response::{NamedRow, QueryResult};
use crate::statement::{Consistency, Statement};
use crate::value::CqlValue;

const LOCAL_QUERY: &str = "SELECT data_center, rack, partitioner, tokens FROM system.local";
const PEERS_QUERY: &str = "SELECT peer, rpc_address, data_center, rack, tokens FROM system.peers";

/// A node as described by the system tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodeInfo {
    pub(crate) address: SocketAddr,
    pub(crate) datacenter: Option<String>,
    pub(crate) rack: Option<String>,
    pub(crate) tokens: Vec<String>,
}

/// What one seed told about the cluster.
#[derive(Debug, Clone)]
pub(crate) struct Topology {
    /// Partitioner class name, as the server names it.
    pub(crate) partitioner: Option<String>,
    /// The seed first, then the peers within the discovery scope.
    pub(crate) nodes: Vec<NodeInfo>,
}

/// Asks the seeds, in order, for the cluster topology. The first seed
/// that answers wins.
pub(crate) async fn discover(
    seeds: &[SocketAddr],
    scope: DiscoveryScope,
    port: u16,
    connection_config: &ConnectionConfig,
) -> Result<Topology, DiscoveryError> {
    let mut last_error = None;
    for &seed in seeds {
        match discover_from(seed, scope, port, connection_config).await {
            Ok(topology) => {
                debug!(
                    "[{}] Discovered {} nodes within scope {}",
                    seed,
                    topology.nodes.len(),
                    scope
                );
                return Ok(topology);
            }
            Err(err) => {
                warn!("[{}] Discovery failed: {}", seed, err);
                if !matches!(err, DiscoveryError::Connection { .. }) {
                    last_error = Some(err);
                }
            }
        }
    }
    Err(last_error.unwrap_or(DiscoveryError::NoSeedReachable(seeds.len())))
}

async fn discover_from(
    seed: SocketAddr,
    scope: DiscoveryScope,
    port: u16,
    connection_config: &ConnectionConfig,
) -> Result<Topology, DiscoveryError> {
    // Events are of no use to a connection that lives for two queries.
    let config = ConnectionConfig {
        event_sender: None,
        ..connection_config.clone()
    };
    let (connection, _error_receiver) = open_connection(seed, &config)
        .await
        .map_err(|error| DiscoveryError::Connection {
            address: seed,
            error,
        })?;

    let local = system_query(&connection, LOCAL_QUERY).await?;
    let local_row = local
        .first_row()
        .map_err(|_| DiscoveryError::NotRows(LOCAL_QUERY))?
        .ok_or(DiscoveryError::NotRows(LOCAL_QUERY))?;
    let partitioner = text_column(&local_row, "partitioner")?;
    let seed_info = NodeInfo {
        address: seed,
        datacenter: text_column(&local_row, "data_center")?,
        rack: text_column(&local_row, "rack")?,
        tokens: tokens_column(&local_row)?,
    };

    let mut nodes = vec![seed_info];
    if scope != DiscoveryScope::None {
        let peers = system_query(&connection, PEERS_QUERY).await?;
        if !peers.is_rows() {
            return Err(DiscoveryError::NotRows(PEERS_QUERY));
        }
        for row in peers.rows_iter() {
            let peer = peer_info(&row, port)?;
            if in_scope(scope, &nodes[0], &peer) && !nodes.iter().any(|n| n.address == peer.address)
            {
                nodes.push(peer);
            }
        }
    }

    Ok(Topology { partitioner, nodes })
}

async fn system_query(
    connection: &Connection,
    query: &'static str,
) -> Result<QueryResult, DiscoveryError> {
    let mut statement = Statement::new(query);
    statement.set_consistency(Consistency::One);
    let result = connection.query(&statement).await?;
    if !result.is_rows() {
        return Err(DiscoveryError::NotRows(query));
    }
    Ok(result)
}

fn in_scope(scope: DiscoveryScope, seed: &NodeInfo, peer: &NodeInfo) -> bool {
    match scope {
        DiscoveryScope::None => false,
        DiscoveryScope::Rack => seed.datacenter == peer.datacenter && seed.rack == peer.rack,
        DiscoveryScope::Datacenter => seed.datacenter == peer.datacenter,
        DiscoveryScope::Cluster => true,
    }
}

fn peer_info(row: &NamedRow<'_>, port: u16) -> Result<NodeInfo, DiscoveryError> {
    let peer = inet_column(row, "peer")?.ok_or(DiscoveryError::MalformedColumn {
        column: "peer",
        reason: "null".to_owned(),
    })?;
    // Nodes listening on every interface advertise an unspecified rpc address.
    let ip = match inet_column(row, "rpc_address")? {
        Some(rpc_address) if !rpc_address.is_unspecified() => rpc_address,
        _ => peer,
    };

    Ok(NodeInfo {
        address: SocketAddr::new(ip, port),
        datacenter: text_column(row, "data_center")?,
        rack: text_column(row, "rack")?,
        tokens: tokens_column(row)?,
    })
}

fn column<'a>(
    row: &NamedRow<'a>,
    column: &'static str,
) -> Result<Option<&'a CqlValue>, DiscoveryError> {
    if !row.has_column(column) {
        return Err(DiscoveryError::MissingColumn(column));
    }
    Ok(row.get(column))
}

fn malformed(column: &'static str, value: &CqlValue) -> DiscoveryError {
    DiscoveryError::MalformedColumn {
        column,
        reason: format!("unexpected value {:?}", value),
    }
}

fn text_column(row: &NamedRow<'_>, name: &'static str) -> Result<Option<String>, DiscoveryError> {
    column(row, name)?
        .map(|value| {
            value
                .as_text()
                .map(str::to_owned)
                .ok_or_else(|| malformed(name, value))
        })
        .transpose()
}

fn inet_column(row: &NamedRow<'_>, name: &'static str) -> Result<Option<IpAddr>, DiscoveryError> {
    column(row, name)?
        .map(|value| value.as_inet().ok_or_else(|| malformed(name, value)))
        .transpose()
}

fn tokens_column(row: &NamedRow<'_>) -> Result<Vec<String>, DiscoveryError> {
    let Some(value) = column(row, "tokens")? else {
        return Ok(Vec::new());
    };
    let tokens = value.as_seq().ok_or_else(|| malformed("tokens", value))?;
    tokens
        .iter()
        .map(|token| {
            token
                .as_text()
                .map(str::to_owned)
                .ok_or_else(|| malformed("tokens", token))
        })
        .collect()
}
