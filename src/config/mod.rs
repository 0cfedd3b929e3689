//! Configuration module
//!
//! Loads listener and per-session socket settings.

mod socket;

pub use socket::*;
