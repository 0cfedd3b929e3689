//! Message handler seam
//!
//! The read loop hands every decoded envelope to a handler supplied by the
//! game layer. Returning `false` ends the session.

use std::future::Future;
use std::sync::Arc;

use super::Session;
use crate::socketapi::Envelope;

/// Consumer of inbound envelopes
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one envelope; `false` stops the read loop and closes the session
    fn handle(&self, session: Arc<Session>, envelope: Envelope) -> impl Future<Output = bool> + Send;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Arc<Session>, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send,
{
    fn handle(&self, session: Arc<Session>, envelope: Envelope) -> impl Future<Output = bool> + Send {
        self(session, envelope)
    }
}
