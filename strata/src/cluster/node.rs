use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use futures::future::RemoteHandle;
use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::errors::ConnectionError;
use crate::network::{open_connection, Connection, ConnectionConfig, ErrorReceiver};

/// Settings every node of a cluster shares.
#[derive(Debug)]
pub(crate) struct NodeConfig {
    pub(crate) connection: ConnectionConfig,
    pub(crate) max_connections_per_node: usize,
    /// Load of the least loaded connection above which another one is opened.
    pub(crate) new_connection_threshold: usize,
    pub(crate) min_down_time: Duration,
    pub(crate) max_down_time: Duration,
    pub(crate) max_connection_idle_time: Duration,
    pub(crate) budget: Arc<ConnectionBudget>,
}

/// Cluster-wide cap on open connections, shared by all nodes.
#[derive(Debug)]
pub(crate) struct ConnectionBudget {
    // 0 means unbounded
    max: usize,
    used: AtomicUsize,
}

impl ConnectionBudget {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            max,
            used: AtomicUsize::new(0),
        }
    }

    fn try_acquire(&self) -> bool {
        if self.max == 0 {
            self.used.fetch_add(1, Ordering::AcqRel);
            return true;
        }
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.max).then_some(used + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.used.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }
}

/// How long a node stays down after `failures` consecutive failures:
/// `min_down_time * 2^failures`, never more than `max_down_time`.
pub(crate) fn down_time(min_down_time: Duration, max_down_time: Duration, failures: u32) -> Duration {
    let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
    min_down_time
        .checked_mul(factor)
        .map_or(max_down_time, |time| time.min(max_down_time))
}

/// Health of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Requests may be sent to the node. This is optimistic after a
    /// reactivation: the node proves healthy once a connection opens.
    Up,
    /// The node is waiting out its back-off.
    Down,
}

struct NodeState {
    status: NodeStatus,
    failure_count: u32,
    connections: Vec<Arc<Connection>>,
    // Connection attempts in progress; they count towards the per-node cap.
    opening: usize,
    reactivation: Option<RemoteHandle<()>>,
    sweeper: Option<RemoteHandle<()>>,
}

impl NodeState {
    fn live_connections(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.connections.iter().filter(|c| !c.is_broken())
    }
}

/// One server of the cluster and its pool of connections.
///
/// Connections are opened on demand, up to the per-node cap. When the last
/// connection of a node fails, or an attempt to open one fails while none
/// is open, the node goes down for an exponentially growing time.
pub struct Node {
    address: SocketAddr,
    datacenter: Option<String>,
    rack: Option<String>,
    tokens: Vec<String>,

    config: Arc<NodeConfig>,
    state: RwLock<NodeState>,
    // Callers waiting for this node's connection attempts to settle.
    waiting: AtomicUsize,
    attempt_settled: Notify,
    this: Weak<Node>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("datacenter", &self.datacenter)
            .field("rack", &self.rack)
            .field("status", &self.status())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

// How a caller wants to use a connection of the node.
enum Selection<'a> {
    // Least loaded connection, opening another one above the load threshold.
    Shared,
    // A connection not claimed by anyone else.
    Unclaimed(&'a (dyn Fn(&Connection) -> bool + Sync)),
}

enum Step<'a> {
    Open,
    Wait(tokio::sync::futures::Notified<'a>),
}

// Keeps the node's bookkeeping right for an attempt to open a connection,
// including when the attempt is dropped halfway.
struct OpeningSlot<'a> {
    node: &'a Node,
    budget_held: bool,
}

impl Drop for OpeningSlot<'_> {
    fn drop(&mut self) {
        self.node.write_state().opening -= 1;
        if self.budget_held {
            self.node.config.budget.release();
        }
        self.node.attempt_settled.notify_waiters();
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Node {
    pub(crate) fn new(
        address: SocketAddr,
        datacenter: Option<String>,
        rack: Option<String>,
        tokens: Vec<String>,
        config: Arc<NodeConfig>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Node {
            address,
            datacenter,
            rack,
            tokens,
            config,
            state: RwLock::new(NodeState {
                status: NodeStatus::Up,
                failure_count: 0,
                connections: Vec::new(),
                opening: 0,
                reactivation: None,
                sweeper: None,
            }),
            waiting: AtomicUsize::new(0),
            attempt_settled: Notify::new(),
            this: this.clone(),
        })
    }

    /// Address requests to this node are sent to.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Datacenter the node reported, if it was discovered.
    pub fn datacenter(&self) -> Option<&str> {
        self.datacenter.as_deref()
    }

    /// Rack the node reported, if it was discovered.
    pub fn rack(&self) -> Option<&str> {
        self.rack.as_deref()
    }

    /// Tokens the node owns, as the server prints them.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Whether the node is up or backing off.
    pub fn status(&self) -> NodeStatus {
        self.read_state().status
    }

    /// Shorthand for `status() == NodeStatus::Up`.
    pub fn is_up(&self) -> bool {
        self.status() == NodeStatus::Up
    }

    /// Consecutive failures, reset by the next connection that opens.
    pub fn failure_count(&self) -> u32 {
        self.read_state().failure_count
    }

    /// Open connections, broken ones included until they are removed.
    pub fn connection_count(&self) -> usize {
        self.read_state().connections.len()
    }

    /// Snapshot of the node's live connections.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.read_state().live_connections().cloned().collect()
    }

    /// Requests in flight on the node's connections, plus callers waiting for
    /// one of its connections to open.
    pub fn load(&self) -> usize {
        let in_flight: usize = self
            .read_state()
            .live_connections()
            .map(|c| c.load())
            .sum();
        in_flight + self.waiting.load(Ordering::Acquire)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, NodeState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, NodeState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the least loaded connection, opening a new one if there is
    /// none or the least loaded one is above the threshold, as long as the
    /// per-node and cluster-wide caps allow.
    ///
    /// `Ok(None)` means the node cannot serve: it is down, or it has no
    /// connection and may not open one.
    pub(crate) async fn get_or_create_connection(
        &self,
    ) -> Result<Option<Arc<Connection>>, ConnectionError> {
        self.acquire(Selection::Shared).await
    }

    /// Like [`Node::get_or_create_connection`], but only returns connections
    /// for which `is_claimed` is false, and does not wait for them.
    pub(crate) async fn get_unclaimed_connection(
        &self,
        is_claimed: &(dyn Fn(&Connection) -> bool + Sync),
    ) -> Result<Option<Arc<Connection>>, ConnectionError> {
        self.acquire(Selection::Unclaimed(is_claimed)).await
    }

    async fn acquire(
        &self,
        selection: Selection<'_>,
    ) -> Result<Option<Arc<Connection>>, ConnectionError> {
        self.waiting.fetch_add(1, Ordering::AcqRel);
        let _waiting = WaitingGuard(&self.waiting);

        loop {
            let step = {
                let mut state = self.write_state();
                if state.status == NodeStatus::Down {
                    return Ok(None);
                }

                let total = state.connections.len() + state.opening;
                let can_open = total < self.config.max_connections_per_node;

                match &selection {
                    Selection::Shared => {
                        let best = state.live_connections().min_by_key(|c| c.load()).cloned();
                        match best {
                            Some(c) if c.load() <= self.config.new_connection_threshold || !can_open => {
                                return Ok(Some(c));
                            }
                            best => {
                                if can_open && self.config.budget.try_acquire() {
                                    state.opening += 1;
                                    Step::Open
                                } else if best.is_some() {
                                    return Ok(best);
                                } else if state.opening > 0 {
                                    Step::Wait(self.attempt_settled.notified())
                                } else {
                                    trace!("[{}] No connection and no room for one", self.address);
                                    return Ok(None);
                                }
                            }
                        }
                    }
                    Selection::Unclaimed(is_claimed) => {
                        if let Some(c) = state.live_connections().find(|&c| !is_claimed(&**c)) {
                            return Ok(Some(c.clone()));
                        }
                        if can_open && self.config.budget.try_acquire() {
                            state.opening += 1;
                            Step::Open
                        } else {
                            return Ok(None);
                        }
                    }
                }
            };

            match step {
                Step::Open => return self.open_new_connection().await.map(Some),
                Step::Wait(notified) => notified.await,
            }
        }
    }

    // The caller has already counted the attempt in `opening` and taken a
    // unit of the connection budget.
    async fn open_new_connection(&self) -> Result<Arc<Connection>, ConnectionError> {
        let mut slot = OpeningSlot {
            node: self,
            budget_held: true,
        };

        match open_connection(self.address, &self.config.connection).await {
            Ok((connection, error_receiver)) => {
                let connection = Arc::new(connection);
                {
                    let mut state = self.write_state();
                    state.connections.push(connection.clone());
                    state.failure_count = 0;
                    state.status = NodeStatus::Up;
                    state.reactivation = None;
                    if state.sweeper.is_none() {
                        state.sweeper = Some(self.spawn_sweeper());
                    }
                    trace!(
                        "[{}] Connection {} added, now there are {}; {} open in the cluster",
                        self.address,
                        connection.id(),
                        state.connections.len(),
                        self.config.budget.used()
                    );
                }
                // The connection now owns the budget unit.
                slot.budget_held = false;
                drop(slot);
                self.spawn_watcher(connection.id(), error_receiver);
                Ok(connection)
            }
            Err(err) => {
                drop(slot);
                debug!("[{}] Failed to open connection: {}", self.address, err);
                let mut state = self.write_state();
                if state.live_connections().next().is_none() {
                    self.fail(&mut state);
                }
                Err(err)
            }
        }
    }

    // Removes the connection from the node. Returns whether it was there.
    fn remove_connection(&self, state: &mut NodeState, connection_id: u64) -> bool {
        let Some(idx) = state
            .connections
            .iter()
            .position(|c| c.id() == connection_id)
        else {
            return false;
        };
        state.connections.swap_remove(idx);
        self.config.budget.release();
        true
    }

    /// Forgets a connection whose router died. The node goes down if that
    /// was its last live connection.
    pub(crate) fn connection_broken(&self, connection_id: u64, error: &ConnectionError) {
        let mut state = self.write_state();
        if !self.remove_connection(&mut state, connection_id) {
            return;
        }
        debug!(
            "[{}] Connection {} removed after failure: {}",
            self.address, connection_id, error
        );
        if state.live_connections().next().is_none() {
            self.fail(&mut state);
        }
    }

    // Marks the node down and arms the reactivation timer, unless it is
    // down already.
    fn fail(&self, state: &mut NodeState) {
        if state.status == NodeStatus::Down {
            return;
        }
        let down_for = down_time(
            self.config.min_down_time,
            self.config.max_down_time,
            state.failure_count,
        );
        if down_for < self.config.max_down_time {
            state.failure_count += 1;
        }
        state.status = NodeStatus::Down;
        warn!(
            "[{}] Node is down, failure {}; retrying in {:?}",
            self.address, state.failure_count, down_for
        );

        let node = self.this.clone();
        let (task, handle) = async move {
            tokio::time::sleep(down_for).await;
            if let Some(node) = node.upgrade() {
                let mut state = node.write_state();
                state.status = NodeStatus::Up;
                debug!("[{}] Node reactivated", node.address);
                // Dropping our own handle only detaches the finishing task.
                state.reactivation = None;
            }
        }
        .remote_handle();
        tokio::spawn(task);
        state.reactivation = Some(handle);
    }

    fn spawn_watcher(&self, connection_id: u64, error_receiver: ErrorReceiver) {
        let node = self.this.clone();
        tokio::spawn(async move {
            // An Err here means the connection was dropped, not broken.
            if let Ok(error) = error_receiver.await {
                if let Some(node) = node.upgrade() {
                    node.connection_broken(connection_id, &error);
                }
            }
        });
    }

    // Periodically drops connections idle for longer than the idle time.
    // Stops once the node has no connection left.
    fn spawn_sweeper(&self) -> RemoteHandle<()> {
        let node = self.this.clone();
        let idle_time = self.config.max_connection_idle_time;
        let period = (idle_time / 2).max(Duration::from_millis(10));

        let (task, handle) = async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(node) = node.upgrade() else {
                    return;
                };
                if node.sweep_idle_connections(idle_time) {
                    return;
                }
            }
        }
        .remote_handle();
        tokio::spawn(task);
        handle
    }

    // Returns true when the sweeper is no longer needed.
    fn sweep_idle_connections(&self, idle_time: Duration) -> bool {
        let mut state = self.write_state();
        let idle: Vec<u64> = state
            .connections
            .iter()
            .filter(|c| c.is_idle(idle_time))
            .map(|c| c.id())
            .collect();
        for connection_id in idle {
            if self.remove_connection(&mut state, connection_id) {
                debug!(
                    "[{}] Closing idle connection {}",
                    self.address, connection_id
                );
            }
        }

        if state.connections.is_empty() && state.opening == 0 {
            trace!("[{}] No connections left, stopping the sweeper", self.address);
            state.sweeper = None;
            return true;
        }
        false
    }

    #[cfg(test)]
    pub(crate) fn has_sweeper(&self) -> bool {
        self.read_state().sweeper.is_some()
    }
}
