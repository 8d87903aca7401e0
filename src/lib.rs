//! # mqdb
//!
//! `mqdb` is the delivery core of an MQTT broker: it stores every published
//! message once, tracks one delivery entry per recipient session, and drives
//! each entry through the QoS 0/1/2 handshake until it completes. It bounds
//! memory with per-session inflight and queue caps and survives disconnects,
//! slow consumers, duplicate acknowledgements and retransmission timers.
//!
//! ## Core Modules
//!
//! - `broker`: message store, handshake state machine, admission policy,
//!   drain/writer, `$SYS` statistics and the maintenance loop.
//! - `client`: broker-side session state and its delivery queue.
//! - `config`: settings loaded from file and environment.
//! - `persistence`: sled-backed snapshots of the whole database.
//! - `transport`: the boundary to the network layer.
//! - `utils`: error type, logging setup and the clock abstraction.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod transport;
pub mod utils;
