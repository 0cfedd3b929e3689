//! Session module
//!
//! Connection lifecycle for a single client: the read loop, the writer and
//! keep-alive task, the bounded outgoing queue and the close sequence.

mod error;
mod handler;
mod keepalive;
mod queue;
mod reader;
#[allow(clippy::module_inception)]
mod session;

#[cfg(test)]
pub(crate) mod tests;

pub use error::*;
pub use handler::*;
pub use queue::QueueError;
pub use session::{Session, SessionIdentity, SessionStatus, WRITE_DEADLINE};
