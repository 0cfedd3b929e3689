//! The read loop

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::session::{FrameStream, SessionStatus};
use super::{MessageHandler, ReadError, Session};
use crate::socketapi::Envelope;

/// Closes the session if `consume` is dropped before it finishes
struct CloseOnDrop(Option<Arc<Session>>);

impl CloseOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(session) = self.0.take() {
            if let Ok(handle) = Handle::try_current() {
                handle.spawn(async move { session.close().await });
            }
        }
    }
}

impl Session {
    /// Serve the connection until it ends.
    ///
    /// Starts the writer/keep-alive task, then reads frames and passes each
    /// decoded envelope to `handler`. Frames that fail to decode are logged and
    /// skipped. Returns once the session is closed, whatever the cause.
    pub async fn consume<H: MessageHandler>(self: &Arc<Self>, handler: H) {
        let Some(mut stream) = self.stream.lock().await.take() else {
            warn!(session_id = %self.id, "Session is already being consumed");
            return;
        };

        let guard = CloseOnDrop(Some(Arc::clone(self)));
        {
            let mut state = self.state.lock().await;
            if state.is_closed() {
                guard.disarm();
                return;
            }
            state.status = SessionStatus::Live;
            state.read_deadline = Instant::now() + self.pong_wait;
        }

        tokio::spawn(Arc::clone(self).process_outgoing());

        let mut closed_rx = self.closed_tx.subscribe();
        let mut remaining = self.received_message_decrement_count;

        loop {
            let data = match self.read_frame(&mut stream, &mut closed_rx).await {
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Binary(data)) => data,
                Ok(Message::Pong(_)) => {
                    debug!(session_id = %self.id, "pong received");
                    self.reset_ping_timer().await;
                    continue;
                }
                // Pings are answered by the transport with the next write.
                Ok(Message::Ping(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    self.log_read_end(&ReadError::PeerClosed(frame.map(|f| f.code)));
                    break;
                }
                Err(e) => {
                    self.log_read_end(&e);
                    break;
                }
            };

            remaining -= 1;
            if remaining < 1 {
                remaining = self.received_message_decrement_count;
                if !self.reset_ping_timer().await {
                    debug!(session_id = %self.id, "Could not re-arm keep-alive, stopping read loop");
                    break;
                }
            }

            let envelope = match Envelope::from_slice(&data) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(session_id = %self.id, error = %e, "Read message error");
                    continue;
                }
            };

            if !handler.handle(Arc::clone(self), envelope).await {
                debug!(session_id = %self.id, "Handler ended the session");
                break;
            }
        }

        self.close().await;
        guard.disarm();
    }

    /// Read the next frame, failing once the read deadline passes or the
    /// session is closed from elsewhere.
    async fn read_frame(
        &self,
        stream: &mut FrameStream,
        closed_rx: &mut watch::Receiver<bool>,
    ) -> Result<Message, ReadError> {
        let mut deadline = self.state.lock().await.read_deadline;

        loop {
            let closed = *closed_rx.borrow_and_update();
            if closed {
                return Err(ReadError::LocallyClosed);
            }

            let next = tokio::select! {
                next = timeout_at(deadline, stream.next()) => next,
                _ = closed_rx.changed() => continue,
            };

            match next {
                Ok(Some(Ok(message))) => {
                    let size = match &message {
                        Message::Text(text) => text.len(),
                        Message::Binary(data) => data.len(),
                        _ => 0,
                    };
                    if size > self.max_message_size {
                        return Err(ReadError::MessageTooLarge {
                            size,
                            limit: self.max_message_size,
                        });
                    }
                    return Ok(message);
                }
                Ok(Some(Err(e))) => return Err(ReadError::Transport(e)),
                Ok(None) => return Err(ReadError::Eof),
                Err(_) => {
                    // The deadline may have been extended since this read began.
                    let current = self.state.lock().await.read_deadline;
                    if current <= Instant::now() {
                        return Err(ReadError::DeadlineExceeded);
                    }
                    deadline = current;
                }
            }
        }
    }

    fn log_read_end(&self, reason: &ReadError) {
        if reason.is_normal_closure() {
            info!(session_id = %self.id, reason = %reason, "Socket connection was closed");
        } else {
            warn!(
                session_id = %self.id,
                error = %reason,
                "Error occurred while reading message on socket connection"
            );
        }
    }
}
