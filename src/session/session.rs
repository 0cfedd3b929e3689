//! A single client connection
//!
//! A session owns one WebSocket connection for its whole life. Two tasks work
//! on it: the read loop (`consume`) and the writer/keep-alive loop it spawns.
//! All writes to the socket go through the writer, except the final close
//! frame. The write half sits behind its own lock so a stalled peer never
//! holds up the state lock, and `close` interrupts a write in progress.

use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::{OutgoingQueue, QueueError};
use super::{SessionError, SessionResult, WriteError};
use crate::config::SocketConfig;
use crate::registry::SessionRegistry;
use crate::socketapi::Envelope;

/// Upper bound on a single data or ping frame write
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

pub(crate) type FrameSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;
pub(crate) type FrameStream =
    Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// Lifecycle of a session; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Constructed, nothing read or written yet
    Open,
    /// Read loop and writer task running
    Live,
    /// Close started; no more sends are accepted
    Closing,
    /// Connection released and deregistered
    Closed,
}

/// Who is on the other end, as established by the acceptance layer
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub user_id: String,
    pub username: String,
    /// Token expiry, unix seconds
    pub expiry: i64,
    pub client_addr: SocketAddr,
}

impl SessionIdentity {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        expiry: i64,
        client_addr: SocketAddr,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            expiry,
            client_addr,
        }
    }
}

/// State guarded by the per-session lock
pub(crate) struct SessionState {
    pub(crate) status: SessionStatus,
    pub(crate) username: String,
    /// When the keep-alive timer fires next; `None` once stopped
    pub(crate) ping_at: Option<Instant>,
    /// Reads blocking past this instant fail
    pub(crate) read_deadline: Instant,
}

impl SessionState {
    pub(crate) fn is_closed(&self) -> bool {
        matches!(self.status, SessionStatus::Closing | SessionStatus::Closed)
    }
}

/// One authenticated client connection
pub struct Session {
    pub(crate) id: Uuid,
    user_id: String,
    expiry: i64,
    client_addr: SocketAddr,

    pub(crate) ping_period: Duration,
    pub(crate) pong_wait: Duration,
    write_wait: Duration,
    pub(crate) received_message_decrement_count: u32,
    pub(crate) max_message_size: usize,

    pub(crate) state: Mutex<SessionState>,
    /// Write half of the connection; taken by `close`
    pub(crate) sink: Mutex<Option<FrameSink>>,
    /// Held while the keep-alive timer is being re-armed
    pub(crate) reset_gate: AtomicBool,
    pub(crate) closed_tx: watch::Sender<bool>,
    pub(crate) queue: OutgoingQueue,
    /// Read half of the connection; taken by `consume`
    pub(crate) stream: Mutex<Option<FrameStream>>,
    registry: Arc<dyn SessionRegistry>,
}

impl Session {
    /// Wrap an upgraded connection. Nothing is read or written until `consume`.
    pub fn new<S>(
        identity: SessionIdentity,
        ws: WebSocketStream<S>,
        config: &SocketConfig,
        registry: Arc<dyn SessionRegistry>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        Self::from_parts(identity, Box::pin(sink), Box::pin(stream), config, registry)
    }

    pub(crate) fn from_parts(
        identity: SessionIdentity,
        sink: FrameSink,
        stream: FrameStream,
        config: &SocketConfig,
        registry: Arc<dyn SessionRegistry>,
    ) -> Arc<Self> {
        let now = Instant::now();
        let (closed_tx, _) = watch::channel(false);

        Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: identity.user_id,
            expiry: identity.expiry,
            client_addr: identity.client_addr,

            ping_period: config.ping_period(),
            pong_wait: config.pong_wait(),
            write_wait: config.write_wait(),
            received_message_decrement_count: config.received_message_decrement_count.max(1),
            max_message_size: config.max_message_size,

            state: Mutex::new(SessionState {
                status: SessionStatus::Open,
                username: identity.username,
                ping_at: Some(now + config.ping_period()),
                read_deadline: now + config.pong_wait(),
            }),
            sink: Mutex::new(Some(sink)),
            reset_gate: AtomicBool::new(false),
            closed_tx,
            queue: OutgoingQueue::new(config.outgoing_queue_size),
            stream: Mutex::new(Some(stream)),
            registry,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn username(&self) -> String {
        self.state.lock().await.username.clone()
    }

    pub async fn set_username(&self, username: impl Into<String>) {
        self.state.lock().await.username = username.into();
    }

    pub fn expiry(&self) -> i64 {
        self.expiry
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_addr.ip()
    }

    pub fn client_port(&self) -> u16 {
        self.client_addr.port()
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.lock().await.status
    }

    /// True once `close` has started
    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Encode an envelope and queue it for the client.
    ///
    /// See [`Session::send_bytes`] for the queueing rules.
    pub async fn send(&self, is_stream: bool, mode: u8, envelope: &Envelope) -> SessionResult<()> {
        let payload = envelope.to_json().map_err(|e| {
            error!(session_id = %self.id, error = %e, "Could not marshal envelope");
            SessionError::Encode(e)
        })?;
        self.enqueue(is_stream, mode, payload).await
    }

    /// Queue an already encoded payload for the client.
    ///
    /// A closed session accepts and discards the payload, so `Ok` is not a
    /// delivery receipt. Stream sends wait for room in the queue. Other sends
    /// never wait: if the queue is full the client is not keeping up, the
    /// session is closed and [`SessionError::OutgoingQueueFull`] is returned.
    pub async fn send_bytes(&self, is_stream: bool, mode: u8, payload: Vec<u8>) -> SessionResult<()> {
        let payload = String::from_utf8(payload)?;
        self.enqueue(is_stream, mode, payload).await
    }

    async fn enqueue(&self, is_stream: bool, mode: u8, payload: String) -> SessionResult<()> {
        if self.is_closed() || self.queue.is_closed() {
            return Ok(());
        }

        if is_stream {
            // Closed while waiting for room: same as sending to a closed session.
            if self.queue.push(payload).await.is_err() {
                debug!(session_id = %self.id, mode, "Dropped stream payload for closed session");
            }
            return Ok(());
        }

        match self.queue.try_push(payload) {
            Ok(()) | Err(QueueError::Closed) => Ok(()),
            Err(QueueError::Full) => {
                warn!(
                    session_id = %self.id,
                    mode,
                    queued = self.queue.len(),
                    "Could not write message, session outgoing queue full"
                );
                self.close().await;
                Err(SessionError::OutgoingQueueFull)
            }
        }
    }

    /// Shut the session down. Safe to call any number of times from any task;
    /// only the first call does the work and never waits past the write wait.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            if state.is_closed() {
                return;
            }
            state.status = SessionStatus::Closing;
            state.ping_at = None;
        }
        // Wakes the read loop and aborts any write stalled on the peer.
        self.closed_tx.send_replace(true);

        self.registry.remove(self.id);
        self.queue.close();

        let sink = self.sink.lock().await.take();

        if let Some(mut sink) = sink {
            match timeout(self.write_wait, sink.send(Message::Close(None))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(session_id = %self.id, error = %e, "Couldn't send close message to client")
                }
                Err(_) => debug!(session_id = %self.id, "Timed out sending close message to client"),
            }
            match timeout(self.write_wait, sink.close()).await {
                Ok(Ok(())) | Ok(Err(tungstenite::Error::ConnectionClosed)) => {}
                Ok(Err(e)) => {
                    warn!(session_id = %self.id, error = %e, "Couldn't close socket connection")
                }
                Err(_) => warn!(session_id = %self.id, "Timed out closing socket connection"),
            }
        }

        self.state.lock().await.status = SessionStatus::Closed;
        info!(session_id = %self.id, user_id = %self.user_id, "Session closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("client_addr", &self.client_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Write one frame, bounded by `within` and abandoned as soon as the session closes
pub(crate) async fn write_frame(
    sink: &mut FrameSink,
    message: Message,
    within: Duration,
    closed_rx: &mut watch::Receiver<bool>,
) -> Result<(), WriteError> {
    tokio::select! {
        result = timeout(within, sink.send(message)) => match result {
            Ok(result) => Ok(result?),
            Err(_) => Err(WriteError::DeadlineExceeded),
        },
        _ = closed_signal(closed_rx) => Err(WriteError::Closed),
    }
}

/// Resolves once the session has been marked closed
async fn closed_signal(closed_rx: &mut watch::Receiver<bool>) {
    loop {
        let closed = *closed_rx.borrow_and_update();
        if closed || closed_rx.changed().await.is_err() {
            return;
        }
    }
}
