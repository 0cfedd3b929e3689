//! Default envelope dispatcher
//!
//! Game logic lives outside this server. Until a game layer is plugged in,
//! every request is acknowledged with an `error` envelope carrying its `cid`
//! so clients are never left waiting for a reply.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::session::{MessageHandler, Session};
use crate::socketapi::{error_code, Envelope, EnvelopeMessage, ErrorMessage};

/// Handles envelopes for sessions accepted by [`super::WebSocketServer`]
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new() -> Self {
        Self {}
    }

    /// Reply for an inbound envelope, if any
    fn reply_to(envelope: &Envelope) -> Option<Envelope> {
        match &envelope.message {
            // Never answer an error with another error.
            EnvelopeMessage::Error(_) => None,
            message => Some(Envelope::with_cid(
                envelope.cid.clone(),
                EnvelopeMessage::Error(ErrorMessage::new(
                    error_code::UNRECOGNIZED_PAYLOAD,
                    format!("{} is not handled by this server", message.kind()),
                )),
            )),
        }
    }
}

impl MessageHandler for Dispatcher {
    fn handle(&self, session: Arc<Session>, envelope: Envelope) -> impl Future<Output = bool> + Send {
        async move {
            debug!(
                session_id = %session.id(),
                kind = envelope.kind(),
                cid = %envelope.cid,
                "Received envelope"
            );

            let Some(reply) = Self::reply_to(&envelope) else {
                return true;
            };
            // A full queue already closed the session.
            session.send(false, 0, &reply).await.is_ok()
        }
    }
}
