//! Session error types

use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, protocol::frame::coding::CloseCode};

use crate::socketapi::CodecError;

/// Errors surfaced to callers of the send API
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Outgoing queue full")]
    OutgoingQueueFull,

    #[error("Could not encode envelope: {0}")]
    Encode(#[from] CodecError),

    #[error("Payload is not valid UTF-8 text")]
    InvalidPayload(#[from] std::string::FromUtf8Error),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Reasons the read loop stops reading
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Peer sent close frame (code: {0:?})")]
    PeerClosed(Option<CloseCode>),

    #[error("Connection closed by peer")]
    Eof,

    #[error("Session closed locally")]
    LocallyClosed,

    #[error("Read deadline exceeded")]
    DeadlineExceeded,

    #[error("Message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("WebSocket error: {0}")]
    Transport(#[from] tungstenite::Error),
}

impl ReadError {
    /// Whether this is an ordinary end of the connection rather than a fault
    pub fn is_normal_closure(&self) -> bool {
        match self {
            ReadError::PeerClosed(None) => true,
            ReadError::PeerClosed(Some(code)) => matches!(
                code,
                CloseCode::Normal | CloseCode::Away | CloseCode::Status
            ),
            ReadError::Eof | ReadError::LocallyClosed => true,
            ReadError::Transport(tungstenite::Error::ConnectionClosed)
            | ReadError::Transport(tungstenite::Error::AlreadyClosed) => true,
            ReadError::DeadlineExceeded
            | ReadError::MessageTooLarge { .. }
            | ReadError::Transport(_) => false,
        }
    }
}

/// Failures on the single write path
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Session closed")]
    Closed,

    #[error("Write deadline exceeded")]
    DeadlineExceeded,

    #[error("WebSocket error: {0}")]
    Transport(#[from] tungstenite::Error),
}
