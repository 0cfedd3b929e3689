//! Socket API module
//!
//! The wire codec: envelopes exchanged with clients, JSON-encoded in text frames.

mod envelope;

pub use envelope::*;
