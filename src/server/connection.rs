use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ServerError;
use super::frame::{FrameHeader, HEADER_LEN};
use super::message::{Endpoint, IdChange, LoginRequest, Message, ServerIdent, SharedFileEntry};
use crate::alert::Alert;
use crate::codec;
use crate::constants::{LOW_ID_BOUNDARY, MAX_QUEUED_FRAMES};
use crate::hash::Md4Hash;
use crate::session::SessionFacade;
use crate::settings::SessionSettings;

const WATCHDOG_FLOOR: Duration = Duration::from_millis(10);
const WATCHDOG_CEILING: Duration = Duration::from_secs(1);

/// The connection lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Resolving,
    Connecting,
    LoggingIn,
    Ready,
    Closed,
}

/// The mutable connection record, guarded by one lock.
struct Status {
    state: ConnectionState,
    endpoint: Option<SocketAddrV4>,
    client_id: u32,
    tcp_flags: u32,
    aux_port: u32,
    user_count: u32,
    file_count: u32,
    server_ident: Option<ServerIdent>,
    got_id: bool,
    got_status: bool,
    ready_fired: bool,
}

impl Status {
    fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            endpoint: None,
            client_id: 0,
            tcp_flags: 0,
            aux_port: 0,
            user_count: 0,
            file_count: 0,
            server_ident: None,
            got_id: false,
            got_status: false,
            ready_fired: false,
        }
    }
}

type Frame = (FrameHeader, Bytes);

struct Inner<S> {
    session: Arc<S>,
    status: Mutex<Status>,
    out_tx: Mutex<Option<mpsc::Sender<Frame>>>,
    deadline: Mutex<Instant>,
    cancel: CancellationToken,
}

/// A long-lived TCP session to an ed2k index server.
///
/// The connection resolves and connects to the configured server, logs
/// in, then keeps the session alive with periodic empty offer-files
/// announces while dispatching inbound frames into alerts and transfer
/// callbacks. All observable behavior flows through the
/// [`SessionFacade`] supplied at construction.
///
/// The companion UDP channel (conventionally the server's TCP port + 3,
/// see [`SessionSettings::server_udp_port`]) is an extension point this
/// crate leaves unopened.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use red2k::server::ServerConnection;
/// # use red2k::session::SessionFacade;
///
/// # async fn example<S: SessionFacade>(session: Arc<S>) {
/// let connection = ServerConnection::new(session);
/// connection.start();
/// # }
/// ```
pub struct ServerConnection<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for ServerConnection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: SessionFacade> ServerConnection<S> {
    /// Creates an idle connection bound to the hosting session.
    pub fn new(session: Arc<S>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                status: Mutex::new(Status::new()),
                out_tx: Mutex::new(None),
                deadline: Mutex::new(Instant::now()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Begins resolving and connecting. Idempotent once started.
    pub fn start(&self) {
        let settings = self.inner.session.settings();
        {
            let mut status = self.inner.status.lock();
            if status.state != ConnectionState::Idle {
                return;
            }
            status.state = ConnectionState::Resolving;
        }

        info!(
            "connecting to server {}:{}",
            settings.server_hostname, settings.server_port
        );
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(error) = inner.clone().drive(settings).await {
                inner.close_with(Some(error));
            }
        });
    }

    /// Tears the connection down. Idempotent.
    ///
    /// With a reason, exactly one `server_connection_failed` alert
    /// carries it before `server_stopped` fires; a hosting session
    /// shutting down passes [`ServerError::SessionClosing`]. With
    /// `None` the teardown is silent, the normal cancellation path.
    pub fn close(&self, error: Option<ServerError>) {
        self.inner.close_with(error);
    }

    /// Enqueues a pre-encoded search tree. No-op once stopped.
    pub fn post_search_request(&self, query: Bytes) {
        self.inner.enqueue(Message::SearchRequest { query });
    }

    /// Asks for sources of `(hash, size)`. No-op once stopped.
    pub fn post_sources_request(&self, hash: Md4Hash, size: u64) {
        self.inner.enqueue(Message::GetSources { hash, size });
    }

    /// Announces shared files; the empty announce doubles as the
    /// keepalive. No-op once stopped.
    pub fn post_announce(&self, files: Vec<SharedFileEntry>) {
        self.inner.enqueue(Message::OfferFiles { files });
    }

    /// Asks for the server's list of known servers. No-op once stopped.
    pub fn post_server_list_request(&self) {
        self.inner.enqueue(Message::GetServerList);
    }

    /// Asks the server to relay a connect-back to a low-id client.
    /// No-op once stopped.
    pub fn post_callback_request(&self, client_id: u32) {
        self.inner.enqueue(Message::CallbackRequest { client_id });
    }

    /// Returns `true` once closed (or never started).
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Returns `true` while resolving, connecting, or logging in.
    pub fn initializing(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Resolving | ConnectionState::Connecting | ConnectionState::LoggingIn
        )
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.status.lock().state
    }

    /// The resolved server endpoint, once resolution succeeded.
    pub fn server_endpoint(&self) -> Option<SocketAddrV4> {
        self.inner.status.lock().endpoint
    }

    /// The server-assigned client id; zero until the id-change arrives.
    pub fn client_id(&self) -> u32 {
        self.inner.status.lock().client_id
    }

    /// The server's self-description, if one was received.
    pub fn server_ident(&self) -> Option<ServerIdent> {
        self.inner.status.lock().server_ident.clone()
    }
}

impl<S: SessionFacade> Inner<S> {
    fn is_stopped(&self) -> bool {
        matches!(
            self.status.lock().state,
            ConnectionState::Idle | ConnectionState::Closed
        )
    }

    fn arm_deadline(&self, period: Duration) {
        *self.deadline.lock() = Instant::now() + period;
    }

    /// Enqueues a message if running. The queue is bounded; at the cap
    /// the frame is dropped and the call degrades to a logged no-op.
    fn enqueue(&self, message: Message) {
        if self.is_stopped() {
            return;
        }

        let tx = match self.out_tx.lock().as_ref() {
            Some(tx) => tx.clone(),
            None => return,
        };

        let payload = message.encode();
        let header = FrameHeader::plain(message.opcode(), payload.len());
        if tx.try_send((header, payload)).is_err() {
            warn!(
                "write queue at cap ({} frames), dropping frame 0x{:02x}: {}",
                MAX_QUEUED_FRAMES,
                header.opcode,
                ServerError::QueueFull
            );
        }
    }

    fn post_alert(&self, alert: Alert) {
        if self.session.should_post(alert.kind()) {
            self.session.post_alert(alert);
        }
    }

    /// Resolve, connect, log in, then read until cancelled or failed.
    async fn drive(self: Arc<Self>, settings: SessionSettings) -> Result<(), ServerError> {
        let endpoint = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            resolved = self.resolve(&settings) => resolved?,
        };

        {
            let mut status = self.status.lock();
            if status.state == ConnectionState::Closed {
                return Ok(());
            }
            status.endpoint = Some(endpoint);
            status.state = ConnectionState::Connecting;
        }
        debug!("server name resolved: {}", endpoint);

        let stream = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            connected = self.connect(&settings, endpoint) => connected?,
        };

        {
            let mut status = self.status.lock();
            if status.state == ConnectionState::Closed {
                return Ok(());
            }
            status.state = ConnectionState::LoggingIn;
        }
        info!("connected to server {}", endpoint);

        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel(MAX_QUEUED_FRAMES);
        *self.out_tx.lock() = Some(out_tx);

        self.arm_deadline(settings.server_timeout);
        tokio::spawn(self.clone().write_loop(write_half, out_rx, settings.clone()));
        tokio::spawn(self.clone().watchdog(settings.server_timeout));

        // The login frame must be queued before the first header read so
        // a server greeting us immediately cannot race the handshake.
        self.enqueue(Message::LoginRequest(LoginRequest::from_settings(
            &settings,
        )));

        self.read_loop(read_half, settings).await
    }

    async fn resolve(&self, settings: &SessionSettings) -> Result<SocketAddrV4, ServerError> {
        let host = settings.server_hostname.clone();
        let resolved = timeout(
            settings.peer_connect_timeout,
            lookup_host((host.clone(), settings.server_port)),
        )
        .await
        .map_err(|_| ServerError::TimedOut)?
        .map_err(|_| ServerError::ResolveFailed(host.clone()))?;

        for addr in resolved {
            if let SocketAddr::V4(v4) = addr {
                return Ok(v4);
            }
        }
        Err(ServerError::ResolveFailed(host))
    }

    async fn connect(
        &self,
        settings: &SessionSettings,
        endpoint: SocketAddrV4,
    ) -> Result<TcpStream, ServerError> {
        timeout(settings.peer_connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| ServerError::TimedOut)?
            .map_err(ServerError::ConnectFailed)
    }

    /// Drains the outbound queue one frame at a time, so at most one
    /// frame is ever in flight and enqueue order is transmit order.
    async fn write_loop(
        self: Arc<Self>,
        mut write_half: OwnedWriteHalf,
        mut out_rx: mpsc::Receiver<Frame>,
        settings: SessionSettings,
    ) {
        loop {
            let (header, payload) = tokio::select! {
                _ = self.cancel.cancelled() => return,
                frame = out_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => return,
                },
            };

            let mut wire = BytesMut::with_capacity(HEADER_LEN + payload.len());
            wire.put_slice(&header.encode());
            wire.put_slice(&payload);

            debug!(
                "send opcode 0x{:02x}, {} payload bytes",
                header.opcode,
                payload.len()
            );

            if let Err(error) = write_half.write_all(&wire).await {
                if !self.cancel.is_cancelled() {
                    self.close_with(Some(ServerError::Io(error)));
                }
                return;
            }
            self.arm_deadline(settings.server_timeout);
        }
    }

    /// Exactly two sequential reads per inbound frame: the six-octet
    /// header, then the payload into the plain or packed buffer.
    async fn read_loop(
        self: Arc<Self>,
        mut read_half: OwnedReadHalf,
        settings: SessionSettings,
    ) -> Result<(), ServerError> {
        let mut header_raw = [0u8; HEADER_LEN];

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                read = read_half.read_exact(&mut header_raw) => { read?; }
            }
            self.arm_deadline(settings.server_timeout);

            let header = FrameHeader::decode(&header_raw)?;
            let mut payload = vec![0u8; header.payload_len()];
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                read = read_half.read_exact(&mut payload) => { read?; }
            }

            let payload = if header.is_packed() {
                match codec::inflate_bounded(&payload, settings.max_inflated_frame_bytes as usize)
                {
                    Ok(inflated) => Bytes::from(inflated),
                    Err(error) => {
                        // A bad zlib stream poisons only this frame; the
                        // framing itself is still in sync.
                        warn!(
                            "dropping packed frame 0x{:02x}: {}",
                            header.opcode, error
                        );
                        continue;
                    }
                }
            } else {
                Bytes::from(payload)
            };

            debug!(
                "receive opcode 0x{:02x}, {} payload bytes",
                header.opcode,
                payload.len()
            );

            let message =
                Message::decode(header.opcode, payload).map_err(ServerError::into_decode_error)?;
            Self::dispatch(&self, message);
        }
    }

    fn dispatch(this: &Arc<Self>, message: Message) {
        if this.is_stopped() {
            return;
        }

        match message {
            Message::ServerMessage { message } => {
                info!("server message: {}", message);
                this.post_alert(Alert::ServerMessage { message });
            }
            Message::ServerStatus { users, files } => {
                debug!("server status: {} users, {} files", users, files);
                let ready = {
                    let mut status = this.status.lock();
                    status.user_count = users;
                    status.file_count = files;
                    status.got_status = true;
                    this.ready_transition(&mut status)
                };
                this.post_alert(Alert::ServerStatus { users, files });
                if let Some(ready) = ready {
                    Self::fire_ready(this, ready);
                }
            }
            Message::IdChange(id_change) => {
                Self::handle_id_change(this, id_change);
            }
            Message::ServerIdent(ident) => {
                debug!("server ident: {} at {}", ident.hash, ident.endpoint);
                this.status.lock().server_ident = Some(ident);
            }
            Message::ServerList { servers } => {
                debug!("server list with {} entries", servers.len());
            }
            Message::FoundSources { hash, sources } => {
                this.handle_found_sources(hash, sources);
            }
            Message::SearchResult { results } => {
                debug!("search result with {} entries", results.len());
                this.post_alert(Alert::SearchResult { results });
            }
            Message::Reject => debug!("server rejected the previous request"),
            Message::Disconnect => debug!("server requested disconnect"),
            Message::UsersList { payload } => {
                debug!("users list, {} bytes", payload.len());
            }
            Message::CallbackRequested { payload } => {
                debug!("callback requested, {} bytes", payload.len());
            }
            Message::Unknown { opcode, payload } => {
                debug!(
                    "unhandled opcode 0x{:02x}, {} bytes skipped",
                    opcode,
                    payload.len()
                );
            }
            // Client-direction traffic arriving inbound is noise.
            other => {
                debug!("unexpected inbound message 0x{:02x}", other.opcode());
            }
        }
    }

    fn handle_id_change(this: &Arc<Self>, id_change: IdChange) {
        let IdChange {
            client_id,
            tcp_flags,
            aux_port,
        } = id_change;

        if client_id < LOW_ID_BOUNDARY {
            info!("assigned low id {}; callbacks will be relayed", client_id);
        } else {
            info!("assigned client id {}", client_id);
        }

        let ready = {
            let mut status = this.status.lock();
            status.client_id = client_id;
            status.tcp_flags = tcp_flags;
            status.aux_port = aux_port;
            status.got_id = true;
            this.ready_transition(&mut status)
        };
        if let Some(ready) = ready {
            Self::fire_ready(this, ready);
        }
    }

    fn handle_found_sources(&self, hash: Md4Hash, sources: Vec<Endpoint>) {
        match self.session.find_transfer(&hash) {
            Some(transfer) => {
                debug!("{} sources for transfer {}", sources.len(), hash);
                transfer.set_sources(sources);
            }
            None => {
                debug!("sources for unknown transfer {}, dropped", hash);
            }
        }
    }

    /// Flips to `Ready` the first time both the id-change and a server
    /// status have been observed, in either order. Later occurrences of
    /// either only refresh the cached fields.
    fn ready_transition(&self, status: &mut Status) -> Option<(u32, u32, u32, u32, u32)> {
        if status.ready_fired || !status.got_id || !status.got_status {
            return None;
        }
        status.ready_fired = true;
        status.state = ConnectionState::Ready;
        Some((
            status.client_id,
            status.file_count,
            status.user_count,
            status.tcp_flags,
            status.aux_port,
        ))
    }

    fn fire_ready(this: &Arc<Self>, ready: (u32, u32, u32, u32, u32)) {
        let (client_id, files, users, tcp_flags, aux_port) = ready;
        info!(
            "server session ready: id {}, {} users, {} files",
            client_id, users, files
        );

        this.session
            .server_ready(client_id, files, users, tcp_flags, aux_port);
        this.post_alert(Alert::ServerConnectionInitialized {
            client_id,
            files,
            users,
        });

        let keep_alive = this.session.settings().server_keep_alive_timeout;
        tokio::spawn(this.clone().keep_alive_loop(keep_alive));
    }

    /// Emits an empty offer-files announce every period to hold the
    /// session open.
    async fn keep_alive_loop(self: Arc<Self>, period: Duration) {
        let mut ticker = interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.is_stopped() {
                return;
            }
            debug!("keepalive: empty offer-files announce");
            self.enqueue(Message::OfferFiles { files: Vec::new() });
        }
    }

    /// Steady recurring check of the operation deadline. The deadline
    /// slot is re-armed on connect, on every completed send, and on
    /// every header read.
    async fn watchdog(self: Arc<Self>, operation_timeout: Duration) {
        let period = (operation_timeout / 4).clamp(WATCHDOG_FLOOR, WATCHDOG_CEILING);
        let mut ticker = interval(period);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.is_stopped() {
                return;
            }
            if Instant::now() >= *self.deadline.lock() {
                self.close_with(Some(ServerError::TimedOut));
                return;
            }
        }
    }

    /// Terminal teardown: cancel every outstanding operation, release
    /// the queue, post at most one failure alert, notify the session
    /// once. Safe to call from any task, any number of times.
    fn close_with(&self, error: Option<ServerError>) {
        {
            let mut status = self.status.lock();
            if status.state == ConnectionState::Closed {
                return;
            }
            status.state = ConnectionState::Closed;
        }

        self.cancel.cancel();
        *self.out_tx.lock() = None;

        match &error {
            Some(error) => info!("server connection closed: {}", error),
            None => info!("server connection closed"),
        }

        if let Some(error) = error {
            self.post_alert(Alert::ServerConnectionFailed { error });
        }
        self.session.server_stopped();
    }
}
