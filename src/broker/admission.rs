//! Admission and promotion policy
//!
//! Decides at insertion time whether a new delivery entry starts its
//! handshake immediately, waits in `Queued`, or is turned away, and moves
//! queued entries forward once inflight capacity frees up.
//!
//! Both decisions are derived from the current contents of the session's
//! sequence rather than from counters kept on the side, so they cannot drift
//! from the handshake state.

use std::collections::VecDeque;

use crate::broker::message::{DeliveryEntry, Direction, MessageState, QoS};
use crate::utils::{DbError, Result};

/// Process-wide caps, fixed when the database is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Unacknowledged entries per connected session. 0 = unlimited.
    pub max_inflight: usize,
    /// Queued entries per session. 0 = unlimited.
    pub max_queued: usize,
    /// Total bytes held by the message store. 0 = unlimited.
    pub memory_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_inflight: 20,
            max_queued: 100,
            memory_limit: 0,
        }
    }
}

/// Result of offering an entry to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Entry created in its first delivery state.
    Delivering,
    /// Entry created in `Queued`; try later.
    Queued,
    /// Queue full. No entry, no reference taken.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Deliver(MessageState),
    Queue,
    Reject,
}

/// What the policy needs to know about the receiving session.
#[derive(Debug, Clone, Copy)]
pub struct SessionView {
    pub connected: bool,
    pub lazy_bridge: bool,
    /// Existing entries with QoS above 0, not counting the new one.
    pub countable: usize,
}

pub fn decide(
    limits: &Limits,
    session: &SessionView,
    direction: Direction,
    qos: QoS,
) -> Result<Decision> {
    if direction == Direction::Inbound && qos != QoS::ExactlyOnce {
        return Err(DbError::InvalidArgument(
            "only QoS 2 inbound messages are tracked",
        ));
    }

    if !session.connected {
        if qos == QoS::AtMostOnce && !session.lazy_bridge {
            return Ok(Decision::Reject);
        }
        if limits.max_queued != 0 && session.countable >= limits.max_queued {
            return Ok(Decision::Reject);
        }
        return Ok(Decision::Queue);
    }

    if qos == QoS::AtMostOnce
        || limits.max_inflight == 0
        || session.countable < limits.max_inflight
    {
        return Ok(Decision::Deliver(MessageState::initial(direction, qos)));
    }

    if limits.max_queued == 0 || session.countable - limits.max_inflight < limits.max_queued {
        Ok(Decision::Queue)
    } else {
        Ok(Decision::Reject)
    }
}

/// Promote queued entries from the head of the sequence until the inflight
/// cap is reached. Stops at the first entry that cannot be promoted so later
/// entries never overtake it. Returns the number promoted.
pub fn promote(entries: &mut VecDeque<DeliveryEntry>, limits: &Limits, now: i64) -> usize {
    let mut active = entries
        .iter()
        .filter(|e| e.qos.is_countable() && !e.state.is_queued())
        .count();
    let mut promoted = 0;

    for entry in entries.iter_mut().filter(|e| e.state.is_queued()) {
        if entry.qos.is_countable() {
            if limits.max_inflight != 0 && active >= limits.max_inflight {
                break;
            }
            active += 1;
        }
        entry.state = MessageState::initial(entry.direction, entry.qos);
        entry.timestamp = now;
        promoted += 1;
    }

    promoted
}
