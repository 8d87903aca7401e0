//! Session representation
//!
//! `Session` is the broker-side state of one client: its identity, whether
//! it currently has a live connection, and the ordered sequence of its
//! delivery entries. Sequence order is transmission priority.
//!
//! Only the owner of a session mutates its sequence; the database reaches
//! these methods through `&mut Session`.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info};
use uuid::Uuid;

use crate::broker::admission::{self, Admission, Decision, Limits, SessionView};
use crate::broker::message::{DeliveryEntry, Direction, MessageState, QoS};
use crate::broker::store::StoreHandle;
use crate::utils::{DbError, Result};

/// How a bridge session gets (re)connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStart {
    Automatic,
    /// Connect only once `threshold` messages are waiting.
    Lazy { threshold: usize },
}

#[derive(Debug)]
pub struct Session {
    /// Client identifier.
    pub id: String,
    connected: bool,
    bridge: Option<BridgeStart>,
    wake_requested: bool,
    last_mid: u16,
    /// Outbound mids currently held by `msgs`.
    outbound_mids: HashSet<u16>,
    pub(crate) msgs: VecDeque<DeliveryEntry>,
}

impl Session {
    /// A disconnected session with the given client id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connected: false,
            bridge: None,
            wake_requested: false,
            last_mid: 0,
            outbound_mids: HashSet::new(),
            msgs: VecDeque::new(),
        }
    }

    /// A session for a client that did not supply an id.
    pub fn anonymous() -> Self {
        Self::new(format!("auto-{}", Uuid::new_v4()))
    }

    pub fn bridge(id: impl Into<String>, start: BridgeStart) -> Self {
        Self {
            bridge: Some(start),
            ..Self::new(id)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        if connected {
            self.wake_requested = false;
        }
    }

    pub fn bridge_start(&self) -> Option<BridgeStart> {
        self.bridge
    }

    pub fn is_lazy_bridge(&self) -> bool {
        matches!(self.bridge, Some(BridgeStart::Lazy { .. }))
    }

    /// Set when a disconnected lazy bridge has enough messages waiting that
    /// it should be connected.
    pub fn wake_requested(&self) -> bool {
        self.wake_requested
    }

    pub fn messages(&self) -> impl Iterator<Item = &DeliveryEntry> {
        self.msgs.iter()
    }

    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    pub fn find(&self, mid: u16, direction: Direction) -> Option<&DeliveryEntry> {
        self.msgs.iter().find(|e| e.matches(mid, direction))
    }

    fn position(&self, mid: u16, direction: Direction) -> Option<usize> {
        self.msgs.iter().position(|e| e.matches(mid, direction))
    }

    fn contains(&self, mid: u16, direction: Direction) -> bool {
        match direction {
            Direction::Outbound => self.outbound_mids.contains(&mid),
            Direction::Inbound => self.position(mid, direction).is_some(),
        }
    }

    fn push(&mut self, entry: DeliveryEntry) {
        if entry.direction == Direction::Outbound {
            self.outbound_mids.insert(entry.mid);
        }
        self.msgs.push_back(entry);
    }

    /// Remove the entry at `idx`, giving back its store reference.
    pub(crate) fn remove_at(&mut self, idx: usize) -> Option<DeliveryEntry> {
        let entry = self.msgs.remove(idx)?;
        if entry.direction == Direction::Outbound {
            self.outbound_mids.remove(&entry.mid);
        }
        Some(entry)
    }

    /// Entries that count against the caps (QoS above 0).
    pub fn countable(&self) -> usize {
        self.msgs.iter().filter(|e| e.qos.is_countable()).count()
    }

    /// Countable entries currently in an active handshake.
    pub fn inflight(&self) -> usize {
        self.msgs
            .iter()
            .filter(|e| e.qos.is_countable() && !e.state.is_queued())
            .count()
    }

    pub fn queued(&self) -> usize {
        self.msgs.iter().filter(|e| e.state.is_queued()).count()
    }

    /// Next outbound message id not already in use. Never 0.
    pub(crate) fn next_mid(&mut self) -> Result<u16> {
        if self.outbound_mids.len() >= usize::from(u16::MAX) {
            return Err(DbError::MessageIdsExhausted(self.id.clone()));
        }
        for _ in 0..=u16::MAX {
            self.last_mid = self.last_mid.wrapping_add(1);
            if self.last_mid == 0 {
                continue;
            }
            if !self.outbound_mids.contains(&self.last_mid) {
                return Ok(self.last_mid);
            }
        }
        Err(DbError::MessageIdsExhausted(self.id.clone()))
    }

    /// Offer a new entry to the sequence. On acceptance the entry takes one
    /// counted reference on `stored`; on rejection nothing is attached.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert(
        &mut self,
        limits: &Limits,
        now: i64,
        mid: u16,
        direction: Direction,
        qos: QoS,
        retain: bool,
        stored: &StoreHandle,
    ) -> Result<Admission> {
        if self.contains(mid, direction) {
            return Err(DbError::DuplicateEntry {
                session: self.id.clone(),
                mid,
                direction,
            });
        }

        let view = SessionView {
            connected: self.connected,
            lazy_bridge: self.is_lazy_bridge(),
            countable: self.countable(),
        };
        let (state, admission) = match admission::decide(limits, &view, direction, qos)? {
            Decision::Deliver(state) => (state, Admission::Delivering),
            Decision::Queue => (MessageState::Queued, Admission::Queued),
            Decision::Reject => {
                debug!(
                    session = %self.id,
                    mid,
                    qos = %qos,
                    connected = self.connected,
                    "dropping message, queue full"
                );
                return Ok(Admission::Rejected);
            }
        };

        self.push(DeliveryEntry::new(
            mid, direction, qos, retain, now, state, stored,
        ));

        if let Some(BridgeStart::Lazy { threshold }) = self.bridge {
            if !self.connected && !self.wake_requested && self.msgs.len() >= threshold {
                info!(session = %self.id, waiting = self.msgs.len(), "lazy bridge threshold reached");
                self.wake_requested = true;
            }
        }

        Ok(admission)
    }

    /// Append an entry exactly as it was persisted, bypassing admission.
    pub(crate) fn restore(&mut self, entry: DeliveryEntry) -> Result<()> {
        if self.contains(entry.mid, entry.direction) {
            return Err(DbError::DuplicateEntry {
                session: self.id.clone(),
                mid: entry.mid,
                direction: entry.direction,
            });
        }
        self.push(entry);
        Ok(())
    }

    /// Remove the entry and promote queued entries into the freed slot.
    pub(crate) fn delete(
        &mut self,
        limits: &Limits,
        now: i64,
        mid: u16,
        direction: Direction,
    ) -> bool {
        let Some(idx) = self.position(mid, direction) else {
            return false;
        };
        self.remove_at(idx);
        self.promote(limits, now);
        true
    }

    pub(crate) fn update(
        &mut self,
        now: i64,
        mid: u16,
        direction: Direction,
        state: MessageState,
    ) -> bool {
        match self.msgs.iter_mut().find(|e| e.matches(mid, direction)) {
            Some(entry) => {
                debug!(session = %self.id, mid, from = ?entry.state, to = ?state, "state update");
                entry.state = state;
                entry.timestamp = now;
                true
            }
            None => false,
        }
    }

    /// Promote queued entries; only a connected session has inflight room.
    pub(crate) fn promote(&mut self, limits: &Limits, now: i64) -> usize {
        if !self.connected {
            return 0;
        }
        let promoted = admission::promote(&mut self.msgs, limits, now);
        if promoted > 0 {
            debug!(session = %self.id, promoted, "promoted queued messages");
        }
        promoted
    }

    /// Rewind every active entry older than `now - timeout`. Returns the
    /// number of entries changed.
    pub(crate) fn check_timeouts(&mut self, now: i64, timeout: u64) -> usize {
        let threshold = now.saturating_sub(i64::try_from(timeout).unwrap_or(i64::MAX));
        let mut changed = 0;
        for entry in self.msgs.iter_mut() {
            if entry.state.is_queued() || entry.timestamp >= threshold {
                continue;
            }
            if let Some(next) = entry.state.on_timeout(entry.direction) {
                debug!(session = %self.id, mid = entry.mid, from = ?entry.state, to = ?next, "handshake timed out");
                entry.state = next;
                entry.dup = true;
                entry.timestamp = now;
                changed += 1;
            }
        }
        changed
    }

    /// Drop every entry, giving back their store references.
    pub(crate) fn flush(&mut self) -> usize {
        let flushed = self.msgs.len();
        self.msgs.clear();
        self.outbound_mids.clear();
        flushed
    }
}
