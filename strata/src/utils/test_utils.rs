//! In-process server speaking just enough of the protocol to exercise
//! connections, nodes and clusters without a real database.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::frame::request::{options, Request, RequestOpcode};
use crate::frame::response::error::DbError;
use crate::frame::response::event::{SchemaChangeEvent, SchemaChangeType};
use crate::frame::response::result::{
    self, ColumnSpec, PartitionKeyIndex, Prepared, PreparedMetadata, ResultMetadata, Row, Rows,
    TableSpec,
};
use crate::frame::response::{Error, ResponseOpcode};
use crate::frame::{self, types, Compression, FrameParams};
use crate::value::{ColumnType, CqlValue};
use crate::TypeRegistry;

pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

/// Row of `system.local`.
#[derive(Clone, Debug)]
pub(crate) struct LocalInfo {
    pub(crate) data_center: String,
    pub(crate) rack: String,
    pub(crate) partitioner: String,
    pub(crate) tokens: Vec<String>,
}

impl Default for LocalInfo {
    fn default() -> Self {
        Self {
            data_center: "dc1".to_owned(),
            rack: "rack1".to_owned(),
            partitioner: "org.apache.cassandra.dht.Murmur3Partitioner".to_owned(),
            tokens: vec!["0".to_owned()],
        }
    }
}

/// Row of `system.peers`.
#[derive(Clone, Debug)]
pub(crate) struct PeerInfo {
    pub(crate) peer: IpAddr,
    pub(crate) rpc_address: Option<IpAddr>,
    pub(crate) data_center: String,
    pub(crate) rack: String,
    pub(crate) tokens: Vec<String>,
}

impl PeerInfo {
    pub(crate) fn new(peer: [u8; 4], data_center: &str, rack: &str, tokens: &[&str]) -> Self {
        Self {
            peer: IpAddr::from(peer),
            rpc_address: Some(IpAddr::from(peer)),
            data_center: data_center.to_owned(),
            rack: rack.to_owned(),
            tokens: tokens.iter().map(|t| (*t).to_owned()).collect(),
        }
    }
}

pub(crate) struct FakeServerConfig {
    pub(crate) supported_compression: Vec<&'static str>,
    /// Username and password required by the server, if any.
    pub(crate) credentials: Option<(String, String)>,
    pub(crate) local: LocalInfo,
    pub(crate) peers: Vec<PeerInfo>,
    /// Column left out of `system.local` results.
    pub(crate) omit_local_column: Option<&'static str>,
    /// How long ordinary queries take.
    pub(crate) query_delay: Duration,
    /// Answer the first EXECUTE with UNPREPARED.
    pub(crate) unprepared_once: bool,
    /// Warnings attached to results of ordinary queries.
    pub(crate) warnings: Vec<String>,
}

impl Default for FakeServerConfig {
    fn default() -> Self {
        Self {
            supported_compression: vec!["snappy", "lz4"],
            credentials: None,
            local: LocalInfo::default(),
            peers: Vec::new(),
            omit_local_column: None,
            query_delay: Duration::ZERO,
            unprepared_once: false,
            warnings: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Counters {
    connections_opened: AtomicUsize,
    open_connections: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    max_connection_load: AtomicUsize,
    queries_served: AtomicUsize,
    prepares: AtomicUsize,
    executions: AtomicUsize,
    compressed_frames: AtomicUsize,
}

struct Shared {
    config: FakeServerConfig,
    registry: TypeRegistry,
    counters: Counters,
    startup_options: Mutex<Vec<HashMap<String, String>>>,
    event_writers: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    unprepared_sent: AtomicBool,
    refusing: AtomicBool,
    stalled: watch::Sender<bool>,
    drop_token: Mutex<CancellationToken>,
}

pub(crate) struct FakeServer {
    address: SocketAddr,
    shared: Arc<Shared>,
    accept_token: CancellationToken,
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.accept_token.cancel();
        lock(&self.shared.drop_token).cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

fn bump_max(max: &AtomicUsize, value: usize) {
    max.fetch_max(value, Ordering::SeqCst);
}

impl FakeServer {
    pub(crate) async fn start(config: FakeServerConfig) -> FakeServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (stalled, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            config,
            registry: TypeRegistry::default(),
            counters: Counters::default(),
            startup_options: Mutex::new(Vec::new()),
            event_writers: Mutex::new(Vec::new()),
            unprepared_sent: AtomicBool::new(false),
            refusing: AtomicBool::new(false),
            stalled,
            drop_token: Mutex::new(CancellationToken::new()),
        });
        let accept_token = CancellationToken::new();

        let accept_shared = shared.clone();
        let token = accept_token.clone();
        tokio::spawn(async move {
            loop {
                let (socket, _) = tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(accepted) => accepted,
                        Err(_) => break,
                    },
                };
                if accept_shared.refusing.load(Ordering::SeqCst) {
                    drop(socket);
                    continue;
                }
                tokio::spawn(serve_connection(socket, accept_shared.clone()));
            }
        });

        FakeServer {
            address,
            shared,
            accept_token,
        }
    }

    pub(crate) fn address(&self) -> SocketAddr {
        self.address
    }

    pub(crate) fn connections_opened(&self) -> usize {
        self.shared.counters.connections_opened.load(Ordering::SeqCst)
    }

    pub(crate) fn open_connections(&self) -> usize {
        self.shared.counters.open_connections.load(Ordering::SeqCst)
    }

    /// Ordinary queries being processed right now.
    pub(crate) fn in_flight(&self) -> usize {
        self.shared.counters.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.shared.counters.max_in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of ordinary queries seen at once on one connection.
    pub(crate) fn max_connection_load(&self) -> usize {
        self.shared
            .counters
            .max_connection_load
            .load(Ordering::SeqCst)
    }

    pub(crate) fn queries_served(&self) -> usize {
        self.shared.counters.queries_served.load(Ordering::SeqCst)
    }

    pub(crate) fn prepares(&self) -> usize {
        self.shared.counters.prepares.load(Ordering::SeqCst)
    }

    pub(crate) fn executions(&self) -> usize {
        self.shared.counters.executions.load(Ordering::SeqCst)
    }

    pub(crate) fn compressed_frames(&self) -> usize {
        self.shared.counters.compressed_frames.load(Ordering::SeqCst)
    }

    pub(crate) fn startup_options(&self) -> Vec<HashMap<String, String>> {
        lock(&self.shared.startup_options).clone()
    }

    /// While stalled, ordinary queries are received but never answered.
    pub(crate) fn set_stalled(&self, stalled: bool) {
        self.shared.stalled.send_replace(stalled);
    }

    /// While refusing, new connections are closed right after accepting.
    pub(crate) fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Closes every open connection.
    pub(crate) fn drop_connections(&self) {
        let mut token = lock(&self.shared.drop_token);
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Sends a keyspace creation event to every connection that registered.
    pub(crate) fn push_schema_change(&self, keyspace: &str) {
        let event = SchemaChangeEvent::KeyspaceChange {
            change_type: SchemaChangeType::Created,
            keyspace_name: keyspace.to_owned(),
        };
        let mut body = Vec::new();
        types::write_string("SCHEMA_CHANGE", &mut body).unwrap();
        event.serialize(&mut body).unwrap();
        let params = FrameParams {
            stream: -1,
            ..Default::default()
        }
        .for_response();
        let mut frame = Vec::new();
        frame::write_frame(params, ResponseOpcode::Event as u8, &body, &mut frame).unwrap();

        lock(&self.shared.event_writers).retain(|writer| writer.send(frame.clone()).is_ok());
    }
}

// State of one accepted connection.
struct ConnectionState {
    shared: Arc<Shared>,
    writer: mpsc::UnboundedSender<Vec<u8>>,
    compression: Mutex<Option<Compression>>,
    load: AtomicUsize,
}

impl ConnectionState {
    fn respond(&self, request: FrameParams, opcode: ResponseOpcode, body: &[u8]) {
        self.respond_with_warnings(request, opcode, body, &[]);
    }

    fn respond_with_warnings(
        &self,
        request: FrameParams,
        opcode: ResponseOpcode,
        body: &[u8],
        warnings: &[String],
    ) {
        let mut flags = 0;
        let mut full_body = Vec::new();
        if !warnings.is_empty() {
            flags |= frame::FLAG_WARNING;
            types::write_string_list(warnings, &mut full_body).unwrap();
        }
        full_body.extend_from_slice(body);

        let compression = *lock(&self.compression);
        let full_body = match compression {
            Some(compression) if opcode != ResponseOpcode::Ready => {
                flags |= frame::FLAG_COMPRESSION;
                let mut compressed = Vec::new();
                frame::compress_append(&full_body, compression, &mut compressed).unwrap();
                compressed
            }
            _ => full_body,
        };

        let params = FrameParams {
            flags,
            stream: request.stream,
            ..request
        }
        .for_response();
        let mut frame = Vec::new();
        frame::write_frame(params, opcode as u8, &full_body, &mut frame).unwrap();
        let _ = self.writer.send(frame);
    }

    fn respond_error(&self, request: FrameParams, error: DbError, reason: &str) {
        let mut body = Vec::new();
        Error {
            error,
            reason: reason.to_owned(),
        }
        .serialize(&mut body)
        .unwrap();
        self.respond(request, ResponseOpcode::Error, &body);
    }

    fn respond_result(&self, request: FrameParams, result: &result::Result, warnings: &[String]) {
        let mut body = Vec::new();
        result.serialize(&self.shared.registry, &mut body).unwrap();
        self.respond_with_warnings(request, ResponseOpcode::Result, &body, warnings);
    }
}

async fn serve_connection(socket: TcpStream, shared: Arc<Shared>) {
    shared
        .counters
        .connections_opened
        .fetch_add(1, Ordering::SeqCst);
    shared.counters.open_connections.fetch_add(1, Ordering::SeqCst);
    let drop_token = lock(&shared.drop_token).clone();

    let (read_half, mut write_half) = socket.into_split();
    let (writer, mut outgoing) = mpsc::unbounded_channel::<Vec<u8>>();
    let state = Arc::new(ConnectionState {
        shared: shared.clone(),
        writer,
        compression: Mutex::new(None),
        load: AtomicUsize::new(0),
    });

    let write_token = drop_token.clone();
    let write_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = write_token.cancelled() => break,
                frame = outgoing.recv() => match frame {
                    Some(frame) => {
                        if write_half.write_all(&frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    loop {
        let read = tokio::select! {
            _ = drop_token.cancelled() => break,
            read = frame::read_request_frame(&mut reader, frame::DEFAULT_MAX_FRAME_SIZE) => read,
        };
        let Ok((params, opcode, body)) = read else {
            break;
        };
        let body = if params.flags & frame::FLAG_COMPRESSION != 0 {
            shared
                .counters
                .compressed_frames
                .fetch_add(1, Ordering::SeqCst);
            let Some(compression) = *lock(&state.compression) else {
                break;
            };
            Bytes::from(frame::decompress(&body, compression).unwrap())
        } else {
            body
        };
        handle_request(&state, params, opcode, body);
    }

    write_task.abort();
    shared.counters.open_connections.fetch_sub(1, Ordering::SeqCst);
}

fn handle_request(
    state: &Arc<ConnectionState>,
    params: FrameParams,
    opcode: RequestOpcode,
    body: Bytes,
) {
    let shared = &state.shared;
    let request = Request::deserialize(&mut &body[..], opcode).unwrap();
    match request {
        Request::Options => {
            let mut supported = HashMap::new();
            supported.insert(
                options::COMPRESSION.to_owned(),
                shared
                    .config
                    .supported_compression
                    .iter()
                    .map(|c| (*c).to_owned())
                    .collect(),
            );
            supported.insert(
                options::CQL_VERSION.to_owned(),
                vec![options::DEFAULT_CQL_VERSION.to_owned()],
            );
            let mut body = Vec::new();
            types::write_string_multimap(&supported, &mut body).unwrap();
            state.respond(params, ResponseOpcode::Supported, &body);
        }
        Request::Startup(startup) => {
            let options: HashMap<String, String> = startup
                .options
                .into_iter()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            let compression = options
                .get(options::COMPRESSION)
                .map(|name| name.parse::<Compression>().unwrap());
            lock(&shared.startup_options).push(options);

            // Everything after STARTUP may be compressed, except READY.
            *lock(&state.compression) = compression;
            if shared.config.credentials.is_some() {
                let mut body = Vec::new();
                types::write_string(
                    "org.apache.cassandra.auth.PasswordAuthenticator",
                    &mut body,
                )
                .unwrap();
                state.respond(params, ResponseOpcode::Authenticate, &body);
            } else {
                state.respond(params, ResponseOpcode::Ready, &[]);
            }
        }
        Request::AuthResponse(auth) => {
            let expected = shared.config.credentials.as_ref().map(|(user, pass)| {
                let mut token = vec![0u8];
                token.extend_from_slice(user.as_bytes());
                token.push(0);
                token.extend_from_slice(pass.as_bytes());
                token
            });
            if expected.is_some() && auth.response == expected {
                let mut body = Vec::new();
                types::write_int(-1, &mut body);
                state.respond(params, ResponseOpcode::AuthSuccess, &body);
            } else {
                state.respond_error(
                    params,
                    DbError::AuthenticationError,
                    "Username and/or password are incorrect",
                );
            }
        }
        Request::Register(_) => {
            lock(&shared.event_writers).push(state.writer.clone());
            state.respond(params, ResponseOpcode::Ready, &[]);
        }
        Request::Query(query) => {
            if let Some(rows) = system_rows(&shared.config, &query.contents) {
                state.respond_result(params, &result::Result::Rows(rows), &[]);
                return;
            }
            tokio::spawn(serve_ordinary_query(state.clone(), params));
        }
        Request::Prepare(prepare) => {
            shared.counters.prepares.fetch_add(1, Ordering::SeqCst);
            let prepared = prepared_for(&prepare.query);
            state.respond_result(params, &result::Result::Prepared(prepared), &[]);
        }
        Request::Execute(execute) => {
            shared.counters.executions.fetch_add(1, Ordering::SeqCst);
            if shared.config.unprepared_once && !shared.unprepared_sent.swap(true, Ordering::SeqCst)
            {
                state.respond_error(
                    params,
                    DbError::Unprepared {
                        statement_id: execute.id,
                    },
                    "Prepared statement not found",
                );
            } else {
                state.respond_result(params, &result::Result::Void, &[]);
            }
        }
        _ => state.respond_error(params, DbError::ProtocolError, "Unsupported request"),
    }
}

async fn serve_ordinary_query(state: Arc<ConnectionState>, params: FrameParams) {
    let shared = &state.shared;
    let in_flight = shared.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    bump_max(&shared.counters.max_in_flight, in_flight);
    let load = state.load.fetch_add(1, Ordering::SeqCst) + 1;
    bump_max(&shared.counters.max_connection_load, load);

    let mut stalled = shared.stalled.subscribe();
    // Never answers while stalled; the connection is eventually dropped.
    let _ = stalled.wait_for(|stalled| !*stalled).await;
    if !shared.config.query_delay.is_zero() {
        tokio::time::sleep(shared.config.query_delay).await;
    }

    shared.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    state.load.fetch_sub(1, Ordering::SeqCst);
    shared.counters.queries_served.fetch_add(1, Ordering::SeqCst);
    state.respond_result(params, &result::Result::Void, &shared.config.warnings);
}

fn prepared_for(statement: &str) -> Prepared {
    let spec = TableSpec::new("ks", "t");
    let bind_markers = statement.matches('?').count();
    let col_specs: Vec<ColumnSpec> = (0..bind_markers)
        .map(|i| ColumnSpec::new(format!("c{i}"), ColumnType::Int, spec.clone()))
        .collect();
    let pk_indexes = if bind_markers > 0 {
        vec![PartitionKeyIndex {
            index: 0,
            sequence: 0,
        }]
    } else {
        Vec::new()
    };
    // Same text, same id, like a real server's digest.
    let id = Bytes::from(format!("{:016x}", fnv(statement.as_bytes())));

    Prepared {
        id,
        prepared_metadata: PreparedMetadata {
            flags: 0,
            col_count: col_specs.len(),
            pk_indexes,
            col_specs,
        },
        result_metadata: ResultMetadata::default(),
    }
}

fn fnv(data: &[u8]) -> u64 {
    data.iter().fold(0xcbf29ce484222325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x100000001b3)
    })
}

fn text_set(tokens: &[String]) -> Option<CqlValue> {
    Some(CqlValue::Set(
        tokens.iter().map(|t| CqlValue::Text(t.clone())).collect(),
    ))
}

fn system_rows(config: &FakeServerConfig, statement: &str) -> Option<Rows> {
    let text_set_type = || ColumnType::Set(Box::new(ColumnType::Text));
    let (spec, columns, rows): (TableSpec, Vec<(&str, ColumnType)>, Vec<Vec<Option<CqlValue>>>) =
        if statement.contains("system.local") {
            let local = &config.local;
            let columns = vec![
                ("data_center", ColumnType::Text),
                ("rack", ColumnType::Text),
                ("partitioner", ColumnType::Text),
                ("tokens", text_set_type()),
            ];
            let row = vec![
                Some(CqlValue::Text(local.data_center.clone())),
                Some(CqlValue::Text(local.rack.clone())),
                Some(CqlValue::Text(local.partitioner.clone())),
                text_set(&local.tokens),
            ];
            (TableSpec::new("system", "local"), columns, vec![row])
        } else if statement.contains("system.peers") {
            let columns = vec![
                ("peer", ColumnType::Inet),
                ("rpc_address", ColumnType::Inet),
                ("data_center", ColumnType::Text),
                ("rack", ColumnType::Text),
                ("tokens", text_set_type()),
            ];
            let rows = config
                .peers
                .iter()
                .map(|peer| {
                    vec![
                        Some(CqlValue::Inet(peer.peer)),
                        peer.rpc_address.map(CqlValue::Inet),
                        Some(CqlValue::Text(peer.data_center.clone())),
                        Some(CqlValue::Text(peer.rack.clone())),
                        text_set(&peer.tokens),
                    ]
                })
                .collect();
            (TableSpec::new("system", "peers"), columns, rows)
        } else {
            return None;
        };

    let omitted = if spec.table_name == "local" {
        config.omit_local_column
    } else {
        None
    };
    let keep: Vec<bool> = columns.iter().map(|(name, _)| Some(*name) != omitted).collect();
    let col_specs = columns
        .into_iter()
        .zip(&keep)
        .filter(|(_, keep)| **keep)
        .map(|((name, typ), _)| ColumnSpec::new(name, typ, spec.clone()))
        .collect();
    let rows: Vec<Row> = rows
        .into_iter()
        .map(|columns| Row {
            columns: columns
                .into_iter()
                .zip(&keep)
                .filter(|(_, keep)| **keep)
                .map(|(value, _)| value)
                .collect(),
        })
        .collect();

    Some(Rows {
        metadata: Arc::new(ResultMetadata::new(col_specs)),
        paging_state: None,
        rows_count: rows.len(),
        rows,
        serialized_size: 0,
    })
}
