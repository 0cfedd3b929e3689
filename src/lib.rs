//! Spaceship realtime connection core
//!
//! Owns the lifecycle of client WebSocket connections for the realtime game
//! backend: a read loop and a writer/keep-alive task per session, a bounded
//! outgoing queue that drops slow clients, and a session registry.

pub mod config;
pub mod registry;
pub mod server;
pub mod session;
pub mod socketapi;
