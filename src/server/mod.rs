//! WebSocket server module
//!
//! Accepts connections from game clients and serves each through a session.

mod handler;
mod websocket;

pub use handler::*;
pub use websocket::*;
