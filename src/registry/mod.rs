//! Session registry module
//!
//! Process-wide lookup of live sessions. Sessions only see the narrow
//! [`SessionRegistry`] capability, which they use to deregister on close.

mod holder;

pub use holder::*;

use uuid::Uuid;

/// Deregistration hook handed to every session
pub trait SessionRegistry: Send + Sync {
    /// Forget the session; called exactly once, from `Session::close`
    fn remove(&self, session_id: Uuid);
}
