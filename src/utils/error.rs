//! The `error` module defines the error types used within `mqdb`.
//!
//! Every failure here is scoped to one publish, one session or one drain
//! pass; none of them is fatal to the process. Admission rejection is not
//! an error: it is reported as `Admission::Rejected`.

use crate::broker::message::Direction;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The record, its topic copy or its payload copy could not be allocated.
    #[error("out of memory storing message for topic `{topic}` ({requested} bytes)")]
    OutOfMemory { topic: String, requested: usize },

    /// Rejected before any mutation took place.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("unknown session `{0}`")]
    UnknownSession(String),

    #[error("session `{0}` is not connected")]
    NotConnected(String),

    #[error("message id {mid} ({direction}) is already tracked for session `{session}`")]
    DuplicateEntry {
        session: String,
        mid: u16,
        direction: Direction,
    },

    #[error("store id {0} is already in use")]
    DuplicateStoreId(u64),

    #[error("no free message id left for session `{0}`")]
    MessageIdsExhausted(String),

    /// Drain stopped on this session; the failed entry was left untouched.
    #[error("transport failure for session `{session}`: {source}")]
    Transport {
        session: String,
        #[source]
        source: TransportError,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] sled::Error),

    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl DbError {
    pub fn transport(session: &str, source: TransportError) -> Self {
        Self::Transport {
            session: session.to_string(),
            source,
        }
    }
}
