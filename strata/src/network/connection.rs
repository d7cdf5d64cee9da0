use crate::authentication::AuthenticatorProvider;
use crate::errors::{
    BrokenConnectionError, BrokenConnectionErrorKind, ConnectionError,
    ConnectionSetupRequestError, ConnectionSetupRequestErrorKind, CqlEventHandlingError,
    QueryError,
};
use crate::frame::frame_errors::CqlResponseParseError;
use crate::frame::request::options::{self, Options};
use crate::frame::request::{self, RequestOpcode, SerializableRequest};
use crate::frame::response::authenticate::Authenticate;
use crate::frame::response::error::DbError;
use crate::frame::response::event::Event;
use crate::frame::response::result::{self, ResultMetadata};
use crate::frame::response::{Error, NonErrorResponse, Response, ResponseOpcode, Supported};
use crate::frame::server_event_type::EventType;
use crate::frame::value::SerializedValues;
use crate::frame::{self, Compression, FrameParams, SerializedRequest};
use crate::response::{QueryResponse, QueryResult};
use crate::statement::{Consistency, PreparedStatement, Statement};
use crate::{MemoryPool, TypeRegistry};
use bytes::Bytes;
use futures::{future::RemoteHandle, FutureExt};
use socket2::{SockRef, TcpKeepalive};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{self, AtomicBool, AtomicU64, AtomicUsize};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::streams::{Completion, RequestId, Streams};

/// Default number of overdue orphaned streams after which a connection is
/// considered broken.
const DEFAULT_ORPHAN_LIMIT: usize = 1024;
// Orphans younger than this are not counted; their responses may still come.
const ORPHAN_GRACE_PERIOD: Duration = Duration::from_secs(1);
// Requests queued for the writer before callers wait for room.
const SUBMIT_QUEUE_SIZE: usize = 1024;
const SOCKET_BUFFER_SIZE: usize = 8192;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// A single connection to a node.
///
/// Requests from many callers are multiplexed over the socket, each one
/// tagged with a stream id of its own. A router task owned by the connection
/// writes the requests and matches responses back to their callers.
pub struct Connection {
    _router: RemoteHandle<()>,

    id: u64,
    connect_address: SocketAddr,
    config: ConnectionConfig,

    submit: mpsc::Sender<Task>,
    // Unbounded so that dropped request futures can report from `Drop`.
    orphans: mpsc::UnboundedSender<RequestId>,
    next_request_id: AtomicU64,

    activity: Arc<Activity>,
    broken: Arc<AtomicBool>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connect_address", &self.connect_address)
            .field("load", &self.load())
            .field("broken", &self.is_broken())
            .finish_non_exhaustive()
    }
}

type ResponseSender = oneshot::Sender<Result<RawResponse, QueryError>>;

// Pending requests of a connection and the last time one started or ended.
struct Activity {
    load: AtomicUsize,
    last: StdMutex<Instant>,
}

impl Activity {
    fn last(&self) -> MutexGuard<'_, Instant> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(self: &Arc<Self>) -> PendingToken {
        self.load.fetch_add(1, atomic::Ordering::AcqRel);
        *self.last() = Instant::now();
        PendingToken(self.clone())
    }
}

// One unit of load. It travels with the request through the submit queue
// and the stream table, and is dropped once the request's stream is freed
// or the request is given up on before it got one.
struct PendingToken(Arc<Activity>);

impl Drop for PendingToken {
    fn drop(&mut self) {
        self.0.load.fetch_sub(1, atomic::Ordering::AcqRel);
        *self.0.last() = Instant::now();
    }
}

// What the stream table keeps for a request.
struct Pending {
    response_sender: ResponseSender,
    token: PendingToken,
}

impl Pending {
    // Releases the load before the caller can observe the outcome.
    fn complete(self, outcome: Result<RawResponse, QueryError>) {
        let Pending {
            response_sender,
            token,
        } = self;
        drop(token);
        // The caller may have stopped listening.
        let _ = response_sender.send(outcome);
    }
}

struct Task {
    request_id: RequestId,
    request: SerializedRequest,
    pending: Pending,
}

struct RawResponse {
    params: FrameParams,
    opcode: ResponseOpcode,
    body: Bytes,
}

// Reports the request as orphaned unless disarmed once its response is in.
struct OrphanGuard<'a> {
    request_id: RequestId,
    orphans: Option<&'a mpsc::UnboundedSender<RequestId>>,
}

impl OrphanGuard<'_> {
    fn disarm(mut self) {
        self.orphans = None;
    }
}

impl Drop for OrphanGuard<'_> {
    fn drop(&mut self) {
        if let Some(orphans) = self.orphans {
            let _ = orphans.send(self.request_id);
        }
    }
}

/// Settings shared by every connection the cluster opens.
#[derive(Clone)]
pub(crate) struct ConnectionConfig {
    pub(crate) compression: Option<Compression>,
    pub(crate) tcp_nodelay: bool,
    pub(crate) tcp_keepalive_interval: Option<Duration>,
    pub(crate) connect_timeout: Duration,
    // Some only if the user asked for server events
    pub(crate) event_sender: Option<mpsc::Sender<Event>>,
    pub(crate) default_consistency: Consistency,
    pub(crate) authenticator: Option<Arc<dyn AuthenticatorProvider>>,
    pub(crate) cql_version: String,
    pub(crate) max_frame_size: usize,
    pub(crate) orphan_limit: usize,
    pub(crate) memory_pool: MemoryPool,
    pub(crate) type_registry: Arc<TypeRegistry>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            compression: None,
            tcp_nodelay: true,
            tcp_keepalive_interval: None,
            connect_timeout: Duration::from_secs(5),
            event_sender: None,
            default_consistency: Default::default(),
            authenticator: None,
            cql_version: options::DEFAULT_CQL_VERSION.to_owned(),
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            orphan_limit: DEFAULT_ORPHAN_LIMIT,
            memory_pool: MemoryPool::default(),
            type_registry: Arc::new(TypeRegistry::default()),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("compression", &self.compression)
            .field("tcp_nodelay", &self.tcp_nodelay)
            .field("tcp_keepalive_interval", &self.tcp_keepalive_interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("event_sender", &self.event_sender.is_some())
            .field("default_consistency", &self.default_consistency)
            .field("authenticator", &self.authenticator.is_some())
            .field("cql_version", &self.cql_version)
            .field("max_frame_size", &self.max_frame_size)
            .field("orphan_limit", &self.orphan_limit)
            .finish_non_exhaustive()
    }
}

/// Resolves with the error that broke the connection. Never resolves with
/// an error for connections that were simply dropped.
pub(crate) type ErrorReceiver = oneshot::Receiver<ConnectionError>;

fn set_keepalive(stream: &TcpStream, idle: Duration) -> std::io::Result<()> {
    // Our interval is the idle time before probing starts, which socket2
    // calls "time".
    let keepalive = TcpKeepalive::new().with_time(idle);
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "macos",
        target_os = "ios",
    ))]
    let keepalive = keepalive
        .with_interval(Duration::from_secs(1))
        .with_retries(10);
    #[cfg(windows)]
    let keepalive = keepalive.with_interval(Duration::from_secs(1));
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

impl Connection {
    // Connects the socket and starts the router. No frame is sent yet.
    async fn new(
        connect_address: SocketAddr,
        config: ConnectionConfig,
    ) -> Result<(Self, ErrorReceiver), ConnectionError> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(connect_address))
            .await
            .map_err(|_| ConnectionError::ConnectTimeout)??;
        stream.set_nodelay(config.tcp_nodelay)?;
        if let Some(idle) = config.tcp_keepalive_interval {
            set_keepalive(&stream, idle)?;
        }

        let (submit, tasks) = mpsc::channel(SUBMIT_QUEUE_SIZE);
        let (orphans, orphan_receiver) = mpsc::unbounded_channel();
        let (error_sender, error_receiver) = oneshot::channel();
        let broken = Arc::new(AtomicBool::new(false));

        let router = Router {
            address: connect_address,
            event_sender: config.event_sender.clone(),
            compression: config.compression,
            max_frame_size: config.max_frame_size,
            orphan_limit: config.orphan_limit,
            type_registry: config.type_registry.clone(),
            memory_pool: config.memory_pool.clone(),
            streams: StdMutex::new(Streams::new()),
        };
        let (task, router_handle) = router
            .run(stream, tasks, orphan_receiver, error_sender, broken.clone())
            .remote_handle();
        tokio::task::spawn(task);

        let connection = Connection {
            _router: router_handle,
            id: NEXT_CONNECTION_ID.fetch_add(1, atomic::Ordering::Relaxed),
            connect_address,
            config,
            submit,
            orphans,
            next_request_id: AtomicU64::new(0),
            activity: Arc::new(Activity {
                load: AtomicUsize::new(0),
                last: StdMutex::new(Instant::now()),
            }),
            broken,
        };
        Ok((connection, error_receiver))
    }

    /// Process-wide unique id of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address this connection was opened to.
    pub fn connect_address(&self) -> SocketAddr {
        self.connect_address
    }

    /// Compression negotiated with the server.
    pub fn compression(&self) -> Option<Compression> {
        self.config.compression
    }

    /// Number of requests whose responses have not arrived yet. Requests
    /// whose callers gave up count until their late responses arrive.
    pub fn load(&self) -> usize {
        self.activity.load.load(atomic::Ordering::Acquire)
    }

    /// Whether the connection carried no request for at least `idle_time`.
    pub fn is_idle(&self, idle_time: Duration) -> bool {
        self.load() == 0 && self.activity.last().elapsed() >= idle_time
    }

    /// Whether the router died; such a connection fails every request.
    pub fn is_broken(&self) -> bool {
        self.broken.load(atomic::Ordering::Acquire)
    }

    /// Runs an unprepared statement.
    pub async fn query(&self, statement: &Statement) -> Result<QueryResult, QueryError> {
        let query = request::Query {
            contents: Cow::Borrowed(&statement.contents),
            parameters: statement.query_parameters(self.config.default_consistency),
        };
        self.send_request(&query, true, statement.config.tracing, None)
            .await?
            .into_query_result(self.connect_address)
    }

    /// Prepares a statement on the node of this connection.
    pub async fn prepare(&self, statement: &Statement) -> Result<PreparedStatement, QueryError> {
        let prepare = request::Prepare {
            query: Cow::Borrowed(&statement.contents),
        };
        let response = self
            .send_request(&prepare, true, statement.config.tracing, None)
            .await?
            .into_non_error_query_response()?;

        let NonErrorResponse::Result(result::Result::Prepared(prepared)) = response.response else {
            return Err(QueryError::ProtocolError(
                "PREPARE: Unexpected server response",
            ));
        };
        Ok(PreparedStatement::new(
            prepared.id,
            statement.contents.clone(),
            prepared.prepared_metadata,
            prepared.result_metadata,
            statement.config.clone(),
        ))
    }

    /// Executes a prepared statement with the given bound values.
    ///
    /// If the server forgot the statement, it is prepared again and the
    /// execution retried once.
    pub async fn execute(
        &self,
        prepared: &PreparedStatement,
        values: &SerializedValues,
    ) -> Result<QueryResult, QueryError> {
        let execute = request::Execute {
            id: prepared.get_id().clone(),
            parameters: prepared.query_parameters(self.config.default_consistency, values),
        };
        let metadata = Some(prepared.get_result_metadata());
        let tracing = prepared.config.tracing;

        let response = self.send_request(&execute, true, tracing, metadata).await?;
        let unprepared = matches!(
            response.response,
            Response::Error(Error {
                error: DbError::Unprepared { .. },
                ..
            })
        );
        if !unprepared {
            return response.into_query_result(self.connect_address);
        }

        debug!(
            "[{}] Statement is not prepared on the node, preparing it again",
            self.connect_address
        );
        let mut statement = Statement::new(prepared.get_statement());
        statement.config = prepared.config.clone();
        // The id is a digest of the statement text, so it cannot change.
        if self.prepare(&statement).await?.get_id() != prepared.get_id() {
            return Err(QueryError::ProtocolError(
                "Prepared statement id changed after repreparation",
            ));
        }
        self.send_request(&execute, true, tracing, metadata)
            .await?
            .into_query_result(self.connect_address)
    }

    async fn send_request(
        &self,
        request: &impl SerializableRequest,
        compress: bool,
        tracing: bool,
        cached_metadata: Option<&Arc<ResultMetadata>>,
    ) -> Result<QueryResponse, QueryError> {
        let compression = self.config.compression.filter(|_| compress);
        let request =
            SerializedRequest::make(request, compression, tracing, &self.config.memory_pool)?;
        let request_id = self.next_request_id.fetch_add(1, atomic::Ordering::Relaxed);
        let (response_sender, response_receiver) = oneshot::channel();
        let pending = Pending {
            response_sender,
            token: self.activity.start(),
        };

        let guard = OrphanGuard {
            request_id,
            orphans: Some(&self.orphans),
        };
        self.submit
            .send(Task {
                request_id,
                request,
                pending,
            })
            .await
            .map_err(channel_closed)?;
        let raw = response_receiver.await.map_err(channel_closed)??;
        guard.disarm();

        decode_response(
            raw,
            self.config.compression,
            &self.config.type_registry,
            &self.config.memory_pool,
            cached_metadata,
        )
    }

    // Sends a handshake request; server errors fail the handshake.
    async fn setup_request<R: SerializableRequest>(
        &self,
        request: &R,
        compress: bool,
    ) -> Result<Response, ConnectionSetupRequestError> {
        let fail = |kind: ConnectionSetupRequestErrorKind| ConnectionSetupRequestError::new(R::OPCODE, kind);
        let response = self
            .send_request(request, compress, false, None)
            .await
            .map_err(|e| fail(e.into()))?
            .response;
        match response {
            Response::Error(Error { error, reason }) => {
                Err(fail(ConnectionSetupRequestErrorKind::DbError(error, reason)))
            }
            response => Ok(response),
        }
    }

    async fn options(&self) -> Result<Supported, ConnectionSetupRequestError> {
        match self.setup_request(&Options, false).await? {
            Response::Supported(supported) => Ok(supported),
            other => Err(unexpected_response(RequestOpcode::Options, &other)),
        }
    }

    async fn startup(
        &self,
        options: HashMap<Cow<'_, str>, Cow<'_, str>>,
    ) -> Result<Option<Authenticate>, ConnectionSetupRequestError> {
        match self
            .setup_request(&request::Startup { options }, false)
            .await?
        {
            Response::Ready => Ok(None),
            Response::Authenticate(authenticate) => Ok(Some(authenticate)),
            other => Err(unexpected_response(RequestOpcode::Startup, &other)),
        }
    }

    async fn authenticate(
        &self,
        authenticate: &Authenticate,
    ) -> Result<(), ConnectionSetupRequestError> {
        let fail = |kind: ConnectionSetupRequestErrorKind| {
            ConnectionSetupRequestError::new(RequestOpcode::AuthResponse, kind)
        };

        let provider = self
            .config
            .authenticator
            .as_ref()
            .ok_or_else(|| fail(ConnectionSetupRequestErrorKind::MissingAuthentication))?;
        let (mut token, mut session) = provider
            .start_authentication_session(&authenticate.authenticator_name)
            .await
            .map_err(|e| fail(ConnectionSetupRequestErrorKind::StartAuthSessionError(e)))?;

        loop {
            let response = self
                .setup_request(&request::AuthResponse { response: token }, false)
                .await?;
            token = match response {
                Response::AuthChallenge(challenge) => session
                    .evaluate_challenge(challenge.authenticate_message.as_deref())
                    .await
                    .map_err(|e| {
                        fail(ConnectionSetupRequestErrorKind::AuthChallengeEvaluationError(e))
                    })?,
                Response::AuthSuccess(success) => {
                    return session
                        .success(success.success_message.as_deref())
                        .await
                        .map_err(|e| fail(ConnectionSetupRequestErrorKind::AuthFinishError(e)));
                }
                other => return Err(unexpected_response(RequestOpcode::AuthResponse, &other)),
            };
        }
    }

    async fn register(&self) -> Result<(), ConnectionSetupRequestError> {
        let register = request::Register {
            event_types_to_register_for: EventType::ALL.to_vec(),
        };
        match self.setup_request(&register, true).await? {
            Response::Ready => Ok(()),
            other => Err(unexpected_response(RequestOpcode::Register, &other)),
        }
    }
}

// The router is gone, taking the request with it.
fn channel_closed<E>(_: E) -> QueryError {
    BrokenConnectionError::from(BrokenConnectionErrorKind::ChannelError).into()
}

fn decode_response(
    raw: RawResponse,
    compression: Option<Compression>,
    type_registry: &TypeRegistry,
    memory_pool: &MemoryPool,
    cached_metadata: Option<&Arc<ResultMetadata>>,
) -> Result<QueryResponse, QueryError> {
    let body =
        frame::parse_response_body_extensions(raw.params.flags, compression, raw.body, memory_pool)
            .map_err(QueryError::BodyExtensionsParseError)?;

    for warning in &body.warnings {
        warn!(
            warning = warning.as_str(),
            "Response from the database contains a warning",
        );
    }

    let response = Response::deserialize(
        type_registry,
        raw.opcode,
        &mut &body.body[..],
        cached_metadata,
    )?;
    Ok(QueryResponse {
        response,
        warnings: body.warnings,
        tracing_id: body.trace_id,
        custom_payload: body.custom_payload,
    })
}

fn unexpected_response(request_kind: RequestOpcode, response: &Response) -> ConnectionSetupRequestError {
    ConnectionSetupRequestError::new(
        request_kind,
        ConnectionSetupRequestErrorKind::UnexpectedResponse(response.opcode()),
    )
}

// Owns the socket of one connection. The reader, the writer and the orphan
// watcher run concurrently on a single task and share the stream table.
// None of them holds its lock across an await point.
struct Router {
    address: SocketAddr,
    event_sender: Option<mpsc::Sender<Event>>,
    compression: Option<Compression>,
    max_frame_size: usize,
    orphan_limit: usize,
    type_registry: Arc<TypeRegistry>,
    memory_pool: MemoryPool,
    streams: StdMutex<Streams<Pending>>,
}

impl Router {
    fn streams(&self) -> MutexGuard<'_, Streams<Pending>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(
        self,
        stream: impl AsyncRead + AsyncWrite,
        tasks: mpsc::Receiver<Task>,
        orphans: mpsc::UnboundedReceiver<RequestId>,
        error_sender: oneshot::Sender<ConnectionError>,
        broken: Arc<AtomicBool>,
    ) {
        let (read_half, write_half) = split(stream);
        let outcome = futures::try_join!(
            self.read_responses(BufReader::with_capacity(SOCKET_BUFFER_SIZE, read_half)),
            self.write_requests(BufWriter::with_capacity(SOCKET_BUFFER_SIZE, write_half), tasks),
            self.watch_orphans(orphans),
        );
        // A clean exit means the connection was dropped.
        let Err(error) = outcome else {
            return;
        };

        broken.store(true, atomic::Ordering::Release);
        debug!("[{}] Connection broken: {}", self.address, error);

        let waiting = self
            .streams
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_waiting();
        for pending in waiting {
            pending.complete(Err(error.clone().into()));
        }
        let _ = error_sender.send(error.into());
    }

    async fn read_responses(
        &self,
        mut reader: impl AsyncRead + Unpin,
    ) -> Result<(), BrokenConnectionError> {
        loop {
            let (params, opcode, body) = frame::read_response_frame(&mut reader, self.max_frame_size)
                .await
                .map_err(BrokenConnectionErrorKind::FrameError)?;
            let response = RawResponse {
                params,
                opcode,
                body,
            };

            match params.stream {
                -1 => {
                    if let Some(event_sender) = &self.event_sender {
                        self.forward_event(response, event_sender)
                            .await
                            .map_err(BrokenConnectionErrorKind::CqlEventHandlingError)?;
                    }
                }
                // Other negative streams belong to the server.
                stream if stream < 0 => {}
                stream => {
                    let completion = self.streams().complete(stream);
                    match completion {
                        Completion::Waiting(pending) => pending.complete(Ok(response)),
                        Completion::Orphaned(_) => {
                            trace!("[{}] Dropped late response on stream {}", self.address, stream)
                        }
                        Completion::Unknown => {
                            debug!(
                                "[{}] Received response with unexpected StreamId {}",
                                self.address, stream
                            );
                            return Err(BrokenConnectionErrorKind::UnexpectedStreamId(stream).into());
                        }
                    }
                }
            }
        }
    }

    // Ends once the connection is dropped and the submit channel closes.
    async fn write_requests(
        &self,
        mut writer: impl AsyncWrite + Unpin,
        mut tasks: mpsc::Receiver<Task>,
    ) -> Result<(), BrokenConnectionError> {
        while let Some(first) = tasks.recv().await {
            let mut next = Some(first);
            let mut written = (0usize, 0usize);
            // Drain what is queued before flushing once.
            while let Some(task) = next.take() {
                let Task {
                    request_id,
                    mut request,
                    pending,
                } = task;
                let allocated = self.streams().allocate(request_id, pending);
                let stream = match allocated {
                    Ok(stream) => stream,
                    Err(pending) => {
                        error!("[{}] Could not allocate stream id", self.address);
                        pending.complete(Err(QueryError::UnableToAllocStreamId));
                        break;
                    }
                };
                request.set_stream(stream);
                writer
                    .write_all(request.get_data())
                    .await
                    .map_err(BrokenConnectionErrorKind::WriteError)?;
                written.0 += 1;
                written.1 += request.get_data().len();
                next = tasks.try_recv().ok();
            }
            trace!(
                "Sending {} requests; {} bytes; {} streams in use",
                written.0,
                written.1,
                self.streams().in_use()
            );
            writer
                .flush()
                .await
                .map_err(BrokenConnectionErrorKind::WriteError)?;
        }
        Ok(())
    }

    // Frees the handlers of dropped requests and breaks the connection once
    // too many of their responses are overdue.
    async fn watch_orphans(
        &self,
        mut orphans: mpsc::UnboundedReceiver<RequestId>,
    ) -> Result<(), BrokenConnectionError> {
        let mut check = tokio::time::interval(ORPHAN_GRACE_PERIOD);
        loop {
            tokio::select! {
                _ = check.tick() => {
                    let overdue = self.streams().old_orphans(ORPHAN_GRACE_PERIOD);
                    if overdue > self.orphan_limit {
                        warn!("[{}] Too many old orphaned stream ids: {}", self.address, overdue);
                        let reported = u16::try_from(overdue).unwrap_or(u16::MAX);
                        return Err(BrokenConnectionErrorKind::TooManyOrphanedStreamIds(reported).into());
                    }
                }
                Some(request_id) = orphans.recv() => {
                    if let Some(stream) = self.streams().orphan(request_id) {
                        debug!("[{}] Orphaned stream {} of request {}", self.address, stream, request_id);
                    }
                }
                else => return Ok(()),
            }
        }
    }

    async fn forward_event(
        &self,
        response: RawResponse,
        event_sender: &mpsc::Sender<Event>,
    ) -> Result<(), CqlEventHandlingError> {
        let event = match decode_response(
            response,
            self.compression,
            &self.type_registry,
            &self.memory_pool,
            None,
        ) {
            Ok(QueryResponse {
                response: Response::Event(event),
                ..
            }) => event,
            Ok(other) => {
                error!("Expected to receive Event response, got {:?}", other.response);
                return Err(CqlEventHandlingError::UnexpectedResponse(
                    other.response.opcode(),
                ));
            }
            Err(QueryError::CqlResponseParseError(CqlResponseParseError::CqlEventParseError(e))) => {
                return Err(e.into())
            }
            Err(e) => return Err(CqlEventHandlingError::ParseError(e.to_string())),
        };
        event_sender
            .send(event)
            .await
            .map_err(|_| CqlEventHandlingError::SendError)
    }
}

/// Opens a connection and performs the handshake:
/// OPTIONS, STARTUP with negotiated options, authentication if the server
/// asks for it, and REGISTER if the connection forwards events.
pub(crate) async fn open_connection(
    addr: SocketAddr,
    config: &ConnectionConfig,
) -> Result<(Connection, ErrorReceiver), ConnectionError> {
    let (mut connection, error_receiver) = Connection::new(addr, config.clone()).await?;
    let supported = connection.options().await?;

    let mut startup: HashMap<Cow<'_, str>, Cow<'_, str>> = [
        (options::CQL_VERSION, config.cql_version.as_str()),
        (options::DRIVER_NAME, options::DEFAULT_DRIVER_NAME),
        (options::DRIVER_VERSION, options::DEFAULT_DRIVER_VERSION),
    ]
    .into_iter()
    .map(|(key, value)| (Cow::Borrowed(key), Cow::Borrowed(value)))
    .collect();

    match config.compression {
        Some(compression) if supported.supports_compression(compression) => {
            startup.insert(
                Cow::Borrowed(options::COMPRESSION),
                Cow::Borrowed(compression.as_str()),
            );
        }
        Some(compression) => {
            warn!(
                "[{}] Server does not support {} compression, continuing uncompressed",
                addr, compression
            );
            connection.config.compression = None;
        }
        None => {}
    }

    if let Some(authenticate) = connection.startup(startup).await? {
        connection.authenticate(&authenticate).await?;
    }
    if connection.config.event_sender.is_some() {
        connection.register().await?;
    }

    debug!("[{}] Opened connection {}", addr, connection.id);
    Ok((connection, error_receiver))
}
