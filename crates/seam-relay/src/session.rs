//! WebSocket session: one exclusively-owned upstream connection.
//!
//! A [`Session`] owns the connection handle outright. All external effect is
//! mediated through [`Session::send`] and [`Session::ingest`]; the read and
//! write loops are the only code that touches the socket. The session's
//! cancellation scope is a child of the token passed to [`Session::connect`],
//! so cancelling the parent tears the session down but never the reverse.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Capacity of the inbound and outbound frame queues.
const QUEUE_DEPTH: usize = 32;

/// How long a network read may block before cancellation is re-checked.
const READ_DEADLINE: Duration = Duration::from_secs(1);

/// Deadline for answering a peer ping.
const PONG_DEADLINE: Duration = Duration::from_secs(5);

/// Deadline for delivering the normal-closure frame.
const CLOSE_DEADLINE: Duration = Duration::from_secs(2);

/// How long `close()` waits for the connection handle to be released.
const RELEASE_DEADLINE: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Handler invoked for each inbound frame, in wire order.
pub type FrameHandler = Box<dyn FnMut(Vec<u8>) + Send + Sync + 'static>;

/// Lifecycle of a session. No transition leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Errors from the connection handshake.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The peer rejected the upgrade; carries its HTTP status.
    #[error("handshake rejected with HTTP status {status}")]
    Rejected { status: u16 },

    #[error("invalid header `{0}`")]
    Header(String),

    #[error("transport error: {0}")]
    Transport(#[from] WsError),
}

/// Errors from session wiring and shutdown.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `register_handler` was called twice. The handler is set exactly once.
    #[error("inbound handler already registered")]
    HandlerAlreadySet,

    /// `start` was called with no handler registered. This is a wiring bug:
    /// the read loop refuses to run rather than silently drop inbound data.
    #[error("inbound handler not registered before start")]
    HandlerMissing,

    #[error("session loops already started")]
    AlreadyStarted,

    #[error("timed out waiting for the connection to be released")]
    CloseTimeout,
}

/// Messages routed through the write loop. Pongs share the queue with data
/// frames so only one task ever touches the sink.
enum Outbound {
    Frame(Vec<u8>),
    Pong(Vec<u8>),
}

/// Connection halves and queue ends consumed by `start()`.
struct Pending {
    sink: WsSink,
    source: WsSource,
    outbound_rx: mpsc::Receiver<Outbound>,
    inbound_rx: mpsc::Receiver<Vec<u8>>,
}

/// One authenticated WebSocket session.
pub struct Session {
    outbound_tx: mpsc::Sender<Outbound>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    token: CancellationToken,
    state_tx: Arc<watch::Sender<SessionState>>,
    state_rx: watch::Receiver<SessionState>,
    last_activity: Arc<Mutex<Instant>>,
    handler: Option<FrameHandler>,
    pending: Option<Pending>,
    started: AtomicBool,
    close_requested: AtomicBool,
}

impl Session {
    /// Perform the WebSocket handshake and create a session.
    ///
    /// No retry is attempted here; retry policy belongs to the caller. The
    /// read/write/dispatch loops are not running until [`Session::start`].
    ///
    /// # Errors
    ///
    /// [`ConnectError::Rejected`] with the peer's HTTP status if the upgrade
    /// is refused, [`ConnectError::Transport`] for any other failure.
    pub async fn connect(
        url: &str,
        headers: &[(String, String)],
        parent: &CancellationToken,
    ) -> Result<Self, ConnectError> {
        let mut request = url.into_client_request()?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConnectError::Header(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ConnectError::Header(value.clone()))?;
            request.headers_mut().insert(name, value);
        }

        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);

        debug!("connecting to {url}");
        let (stream, _response) = connect_async(request).await.map_err(|err| match err {
            WsError::Http(response) => ConnectError::Rejected {
                status: response.status().as_u16(),
            },
            other => ConnectError::Transport(other),
        })?;
        debug!("connected to {url}");

        let (sink, source) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_DEPTH);

        state_tx.send_replace(SessionState::Open);

        Ok(Self {
            outbound_tx,
            inbound_tx,
            token: parent.child_token(),
            state_tx: Arc::new(state_tx),
            state_rx,
            last_activity: Arc::new(Mutex::new(Instant::now())),
            handler: None,
            pending: Some(Pending {
                sink,
                source,
                outbound_rx,
                inbound_rx,
            }),
            started: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
        })
    }

    /// Register the inbound frame handler. Must be called exactly once,
    /// before [`Session::start`].
    ///
    /// # Errors
    ///
    /// [`SessionError::HandlerAlreadySet`] on a second registration.
    pub fn register_handler(&mut self, handler: FrameHandler) -> Result<(), SessionError> {
        if self.handler.is_some() || self.started.load(Ordering::SeqCst) {
            return Err(SessionError::HandlerAlreadySet);
        }
        self.handler = Some(handler);
        Ok(())
    }

    /// Spawn the read, write, and inbound-dispatch loops.
    ///
    /// # Errors
    ///
    /// [`SessionError::HandlerMissing`] if no handler is registered — the
    /// read loop will not run into an unset handler — and
    /// [`SessionError::AlreadyStarted`] on a second call.
    ///
    /// # Panics
    ///
    /// In debug builds a missing handler panics instead, to surface the
    /// wiring bug at the call site.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.pending.is_none() {
            return Err(SessionError::AlreadyStarted);
        }
        if self.handler.is_none() {
            #[cfg(debug_assertions)]
            panic!("Session::start called before register_handler");
            #[cfg(not(debug_assertions))]
            return Err(SessionError::HandlerMissing);
        }
        let Some(pending) = self.pending.take() else {
            return Err(SessionError::AlreadyStarted);
        };
        let Some(handler) = self.handler.take() else {
            return Err(SessionError::HandlerMissing);
        };
        self.started.store(true, Ordering::SeqCst);

        let token = self.token.clone();
        let inbound_tx = self.inbound_tx.clone();
        let outbound_tx = self.outbound_tx.clone();
        let last_activity = self.last_activity.clone();
        tokio::spawn(read_loop(
            pending.source,
            inbound_tx,
            outbound_tx,
            token.clone(),
            last_activity,
        ));

        let state = self.state_tx.clone();
        tokio::spawn(write_loop(
            pending.sink,
            pending.outbound_rx,
            token.clone(),
            state,
        ));

        tokio::spawn(dispatch_loop(pending.inbound_rx, handler, token));

        Ok(())
    }

    /// Enqueue a frame for the write loop. Blocks past the queue bound;
    /// dropped with a warning once the session scope is cancelled.
    pub async fn send(&self, frame: Vec<u8>) {
        if self.token.is_cancelled() {
            warn!("session cancelled, dropping outbound frame");
            return;
        }
        tokio::select! {
            () = self.token.cancelled() => {
                warn!("session cancelled, dropping outbound frame");
            }
            sent = self.outbound_tx.send(Outbound::Frame(frame)) => {
                if sent.is_err() {
                    warn!("write loop gone, dropping outbound frame");
                }
            }
        }
    }

    /// Push a received frame onto the inbound queue for handler dispatch.
    ///
    /// Used by the read loop; public so tests can inject traffic without a
    /// live peer.
    pub async fn ingest(&self, frame: Vec<u8>) {
        push_inbound(&self.inbound_tx, &self.token, frame).await;
    }

    /// Close the session: request the normal-closure frame, cancel the scope,
    /// and wait for the connection handle to be released. Idempotent — every
    /// call after the first is a no-op returning `Ok`.
    ///
    /// # Errors
    ///
    /// [`SessionError::CloseTimeout`] if the connection is not released
    /// within the release deadline.
    pub async fn close(&self) -> Result<(), SessionError> {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("session close requested");
        advance(&self.state_tx, SessionState::Closing);
        self.token.cancel();

        if !self.started.load(Ordering::SeqCst) {
            // No write loop to run the close handshake; the connection is
            // released when the session is dropped.
            advance(&self.state_tx, SessionState::Closed);
            return Ok(());
        }

        let mut state = self.state_rx.clone();
        let released = state.wait_for(|s| *s == SessionState::Closed);
        match tokio::time::timeout(RELEASE_DEADLINE, released).await {
            Ok(_) => Ok(()),
            Err(_) => Err(SessionError::CloseTimeout),
        }
    }

    /// The session's cancellation scope. Child scopes (e.g. the local accept
    /// loop) hang off this token.
    #[must_use]
    pub fn scope(&self) -> &CancellationToken {
        &self.token
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for lifecycle transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Instant of the last peer activity observed (pong bookkeeping).
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
            .lock()
            .map_or_else(|poisoned| *poisoned.into_inner(), |guard| *guard)
    }
}

/// Forward-only state transition; `Closed` is terminal.
fn advance(state: &watch::Sender<SessionState>, next: SessionState) {
    state.send_if_modified(|current| {
        if *current < next {
            trace!("session state {current:?} -> {next:?}");
            *current = next;
            true
        } else {
            false
        }
    });
}

async fn push_inbound(tx: &mpsc::Sender<Vec<u8>>, token: &CancellationToken, frame: Vec<u8>) {
    if token.is_cancelled() {
        warn!("session cancelled, dropping inbound frame");
        return;
    }
    tokio::select! {
        () = token.cancelled() => {
            warn!("session cancelled, dropping inbound frame");
        }
        sent = tx.send(frame) => {
            if sent.is_err() {
                warn!("dispatch loop gone, dropping inbound frame");
            }
        }
    }
}

/// Read loop: pulls frames off the wire and hands them to the inbound queue.
/// Reads are bounded by `READ_DEADLINE` so cancellation is observed even
/// while blocked; an expired deadline just re-issues the read.
async fn read_loop(
    mut source: WsSource,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    outbound_tx: mpsc::Sender<Outbound>,
    token: CancellationToken,
    last_activity: Arc<Mutex<Instant>>,
) {
    loop {
        let next = tokio::select! {
            () = token.cancelled() => {
                debug!("read loop: session cancelled");
                break;
            }
            next = tokio::time::timeout(READ_DEADLINE, source.next()) => next,
        };

        let Ok(next) = next else {
            continue; // deadline expired with no cancellation: not an error
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                push_inbound(&inbound_tx, &token, text.into_bytes()).await;
            }
            Some(Ok(Message::Binary(data))) => {
                push_inbound(&inbound_tx, &token, data).await;
            }
            Some(Ok(Message::Ping(payload))) => {
                trace!("ping received, queueing pong");
                let pong = tokio::time::timeout(
                    PONG_DEADLINE,
                    outbound_tx.send(Outbound::Pong(payload)),
                )
                .await;
                match pong {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => warn!("failed to queue pong"),
                }
            }
            Some(Ok(Message::Pong(_))) => {
                trace!("pong received");
                if let Ok(mut at) = last_activity.lock() {
                    *at = Instant::now();
                }
            }
            Some(Ok(Message::Close(frame))) => {
                debug!("close frame from peer: {frame:?}");
                token.cancel();
                break;
            }
            Some(Ok(_)) => {} // raw frames are handled inside tungstenite
            Some(Err(err)) => {
                warn!("read error: {err}");
                token.cancel();
                break;
            }
            None => {
                debug!("connection closed by peer");
                token.cancel();
                break;
            }
        }
    }
}

/// Write loop: drains the outbound queue into the sink. On cancellation it
/// performs the close handshake and releases the connection, which is what
/// moves the session to `Closed`.
async fn write_loop(
    mut sink: WsSink,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    token: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
) {
    loop {
        tokio::select! {
            () = token.cancelled() => {
                debug!("write loop: session cancelled");
                break;
            }
            item = outbound_rx.recv() => match item {
                Some(Outbound::Frame(frame)) => {
                    let text = String::from_utf8_lossy(&frame).into_owned();
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        error!("write error: {err}");
                        token.cancel();
                        break;
                    }
                }
                Some(Outbound::Pong(payload)) => {
                    // Pong failure is logged, not fatal.
                    if let Err(err) = sink.send(Message::Pong(payload)).await {
                        warn!("failed to send pong: {err}");
                    }
                }
                None => break,
            },
        }
    }

    advance(&state, SessionState::Closing);

    let close = Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "session closing".into(),
    }));
    match tokio::time::timeout(CLOSE_DEADLINE, sink.send(close)).await {
        Ok(Ok(())) => {}
        // The peer may have initiated the handshake already.
        Ok(Err(err)) => debug!("close frame not delivered: {err}"),
        Err(_) => warn!("close frame timed out"),
    }
    if let Ok(Err(err)) = tokio::time::timeout(CLOSE_DEADLINE, sink.close()).await {
        debug!("connection release: {err}");
    }

    advance(&state, SessionState::Closed);
    debug!("connection released");
}

/// Dispatch loop: decouples "bytes arrived" from "handler executes" so a slow
/// handler stalls at the queue bound, not the wire.
async fn dispatch_loop(
    mut inbound_rx: mpsc::Receiver<Vec<u8>>,
    mut handler: FrameHandler,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = token.cancelled() => {
                debug!("dispatch loop: session cancelled");
                break;
            }
            frame = inbound_rx.recv() => match frame {
                Some(frame) => handler(frame),
                None => break,
            },
        }
    }
}
