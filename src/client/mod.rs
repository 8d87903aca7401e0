//! The `client` module defines the broker-side state of a client session.
//!
//! It provides the `Session` struct, which owns the ordered delivery queue of
//! one client along with its connectivity flag and bridge start mode.

pub mod session;
pub use session::{BridgeStart, Session};

#[cfg(test)]
mod tests;
