//! The `broker` module is the delivery core.
//!
//! - `store`: the ref-counted message store and its sweep
//! - `message`: delivery entries and the QoS handshake tables
//! - `admission`: inflight/queued caps and promotion
//! - `writer`: the per-session drain pass
//! - `engine`: `Database`, which owns all of the above plus the session
//!   registry and subscription table
//! - `handshake`: PUBLISH/PUBACK/PUBREC/PUBREL/PUBCOMP handling
//! - `sys`: `$SYS` statistics
//! - `maintenance`: the periodic timeout/drain/sweep loop

pub mod admission;
pub mod engine;
pub mod handshake;
pub mod maintenance;
pub mod message;
pub mod store;
pub mod sys;
pub mod topic;
pub mod writer;

pub use admission::{Admission, Limits};
pub use engine::{Database, DrainReport, PublishOutcome};
pub use handshake::InboundPublish;
pub use maintenance::{Maintenance, TickReport};
pub use message::{DeliveryEntry, Direction, MessageState, QoS};
pub use store::{MessageStore, StoreHandle, StoredMessage};
pub use sys::SysTree;
pub use writer::DrainSummary;
