//! In-memory session registry
//!
//! Maintains a thread-safe map of live sessions so any task can resolve a
//! session by id, and closes them all on shutdown.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::join_all;
use tracing::{debug, info};
use uuid::Uuid;

use super::SessionRegistry;
use crate::session::Session;

/// Registry of all live sessions on this node
#[derive(Debug, Default)]
pub struct SessionHolder {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session
    pub fn add(&self, session: Arc<Session>) {
        let session_id = session.id();
        self.sessions.insert(session_id, session);
        debug!(session_id = %session_id, "Session registered");
    }

    /// Look up a session by id
    pub fn get(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.sessions.get(&session_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Get the number of live sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Close every live session, e.g. on shutdown
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        if sessions.is_empty() {
            return;
        }

        info!("Closing {} active sessions...", sessions.len());
        join_all(sessions.iter().map(|session| session.close())).await;
    }
}

impl SessionRegistry for SessionHolder {
    fn remove(&self, session_id: Uuid) {
        if self.sessions.remove(&session_id).is_some() {
            debug!(session_id = %session_id, "Session unregistered");
        }
    }
}
