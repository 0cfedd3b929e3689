//! Keep-alive timer and the writer task
//!
//! The keep-alive timer is a single instant in the session state: the writer
//! sleeps until it, sends a ping and pushes it one period forward. Evidence
//! that the peer is alive (a pong, or enough data messages) re-arms the timer
//! and extends the read deadline by the pong wait. A peer that goes quiet for
//! longer than the pong wait makes the next read fail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::session::{write_frame, Session, WRITE_DEADLINE};
use super::WriteError;

/// Releases the re-arm gate when dropped
struct GateGuard<'a>(&'a AtomicBool);

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Session {
    /// Re-arm the keep-alive timer and extend the read deadline.
    ///
    /// Returns `false` if the session is closing, in which case the read loop
    /// must stop. Losing the race for the gate counts as success: whoever holds
    /// it is re-arming right now.
    pub(crate) async fn reset_ping_timer(&self) -> bool {
        if self
            .reset_gate
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return true;
        }
        let _gate = GateGuard(&self.reset_gate);

        let mut state = self.state.lock().await;
        if state.is_closed() {
            return false;
        }

        // Overwriting the instant also discards a tick that fired but has not
        // been consumed by the writer yet.
        let now = Instant::now();
        state.ping_at = Some(now + self.ping_period);
        state.read_deadline = now + self.pong_wait;
        true
    }

    /// The writer/keep-alive task. Runs until the session closes or a write fails.
    pub(crate) async fn process_outgoing(self: Arc<Self>) {
        let mut closed_rx = self.closed_tx.subscribe();

        loop {
            let ping_at = self.state.lock().await.ping_at;

            let result = tokio::select! {
                _ = sleep_until_armed(ping_at) => self.ping_now(&mut closed_rx).await,
                payload = self.queue.pop() => match payload {
                    Some(payload) => self.write_payload(payload, &mut closed_rx).await,
                    None => Err(WriteError::Closed),
                },
            };

            match result {
                Ok(()) => {}
                Err(WriteError::Closed) => break,
                Err(e) => {
                    warn!(session_id = %self.id, error = %e, "Could not write message");
                    break;
                }
            }
        }

        // `pop` may have been abandoned mid-wait, so the drain is not guaranteed yet.
        self.queue.shutdown().await;
        self.close().await;
    }

    async fn ping_now(&self, closed_rx: &mut watch::Receiver<bool>) -> Result<(), WriteError> {
        {
            let mut state = self.state.lock().await;
            if state.is_closed() {
                return Err(WriteError::Closed);
            }

            let now = Instant::now();
            match state.ping_at {
                Some(at) if at <= now => {}
                // Re-armed while the writer was asleep
                _ => return Ok(()),
            }
            state.ping_at = Some(now + self.ping_period);
        }

        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(WriteError::Closed)?;
        write_frame(sink, Message::Ping(Vec::new()), WRITE_DEADLINE, closed_rx).await?;
        debug!(session_id = %self.id, "ping sent");
        Ok(())
    }

    async fn write_payload(
        &self,
        payload: String,
        closed_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), WriteError> {
        if self.is_closed() {
            return Err(WriteError::Closed);
        }

        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(WriteError::Closed)?;
        write_frame(sink, Message::Text(payload), WRITE_DEADLINE, closed_rx).await
    }
}

async fn sleep_until_armed(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
