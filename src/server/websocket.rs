//! WebSocket server implementation
//!
//! Accepts TCP connections, upgrades them to WebSocket and hands each one to
//! a [`Session`] registered in the [`SessionHolder`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::Dispatcher;
use crate::config::SocketConfig;
use crate::registry::{SessionHolder, SessionRegistry};
use crate::session::{Session, SessionIdentity};

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Settings applied to every session
    pub socket: SocketConfig,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: String, port: u16) -> Self {
        Self {
            bind,
            port,
            socket: SocketConfig::default(),
        }
    }

    /// Set the per-session socket settings
    pub fn with_socket(mut self, socket: SocketConfig) -> Self {
        self.socket = socket;
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// WebSocket server for game clients
pub struct WebSocketServer {
    config: ServerConfig,
    sessions: Arc<SessionHolder>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            sessions: Arc::new(SessionHolder::new()),
            shutdown_tx,
        }
    }

    /// Registry of the sessions this server is serving
    pub fn sessions(&self) -> &Arc<SessionHolder> {
        &self.sessions
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the WebSocket server
    ///
    /// Listens for incoming connections and serves each on its own task until
    /// a shutdown signal is received, then closes every live session.
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("WebSocket server listening on ws://{}/ws", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let sessions = Arc::clone(&self.sessions);
                            let socket_config = self.config.socket.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, sessions, socket_config).await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        self.sessions.close_all().await;
        Ok(())
    }
}

/// Upgrade and serve a single connection
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    sessions: Arc<SessionHolder>,
    socket_config: SocketConfig,
) -> anyhow::Result<()> {
    info!("New connection from {}", peer_addr);

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(socket_config.max_message_size);
    ws_config.max_frame_size = Some(socket_config.max_message_size);

    let mut query = None;
    let capture_query = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        query = request.uri().query().map(str::to_string);
        Ok(response)
    };
    let ws_stream = accept_hdr_async_with_config(stream, capture_query, Some(ws_config)).await?;

    let identity = identity_from_query(query.as_deref(), peer_addr);
    let registry: Arc<dyn SessionRegistry> = sessions.clone();
    let session = Session::new(identity, ws_stream, &socket_config, registry);
    sessions.add(Arc::clone(&session));

    info!(
        session_id = %session.id(),
        user_id = %session.user_id(),
        "Session started for {}",
        peer_addr
    );
    session.consume(Dispatcher::new()).await;

    info!("Connection from {} closed", peer_addr);
    Ok(())
}

/// Query parameters of the upgrade request
#[derive(Debug, Default, Deserialize)]
struct HandshakeQuery {
    user_id: Option<String>,
    username: Option<String>,
    expiry: Option<i64>,
}

/// Identity handed over by the upgrade request.
///
/// Token validation happens before the upgrade reaches this server, so the
/// query carries the already established `user_id`, `username` and `expiry`.
/// Missing values fall back to an anonymous identity.
fn identity_from_query(query: Option<&str>, peer_addr: SocketAddr) -> SessionIdentity {
    let query: HandshakeQuery = match serde_urlencoded::from_str(query.unwrap_or_default()) {
        Ok(query) => query,
        Err(e) => {
            warn!("Ignoring malformed handshake query from {}: {}", peer_addr, e);
            HandshakeQuery::default()
        }
    };

    let user_id = query
        .user_id
        .filter(|user_id| !user_id.is_empty())
        .unwrap_or_else(|| format!("anonymous-{}", Uuid::new_v4()));
    let username = query
        .username
        .filter(|username| !username.is_empty())
        .unwrap_or_else(|| user_id.clone());
    SessionIdentity::new(user_id, username, query.expiry.unwrap_or(0), peer_addr)
}
