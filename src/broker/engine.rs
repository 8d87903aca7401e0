//! Delivery database
//!
//! `Database` ties the message store, the session registry and the
//! subscription table together and is the single owner of all of them.
//! Every mutation goes through `&mut Database`, so reference counts and
//! sequences are only ever changed from one logical control thread.
//!
//! Concurrency and usage notes:
//! - The API is synchronous and meant to be held behind a lock (for example
//!   `Arc<Mutex<Database>>`) shared by the connection tasks and the
//!   maintenance loop. Transports must not block; a send that cannot
//!   complete reports failure instead.
//! - Publishing stores a message once and attaches one counted reference per
//!   recipient entry. Dropped references are reclaimed only by
//!   `garbage_collect`.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::broker::admission::{Admission, Limits};
use crate::broker::message::{DeliveryEntry, Direction, MessageState, QoS};
use crate::broker::store::{MessageStore, StoreHandle};
use crate::broker::topic::TopicTable;
use crate::broker::writer::{self, DrainSummary};
use crate::client::Session;
use crate::transport::Transport;
use crate::utils::{Clock, DbError, Result, SystemClock};

/// Per-recipient result of fanning out one stored message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub store_id: u64,
    pub delivering: usize,
    pub queued: usize,
    pub rejected: usize,
    /// Subscribers whose session could not take the message at all.
    pub failed: usize,
}

impl PublishOutcome {
    fn record(&mut self, admission: Admission) {
        match admission {
            Admission::Delivering => self.delivering += 1,
            Admission::Queued => self.queued += 1,
            Admission::Rejected => self.rejected += 1,
        }
    }

    pub fn recipients(&self) -> usize {
        self.delivering + self.queued
    }
}

/// Result of draining every connected session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sessions: usize,
    pub sent: usize,
    pub completed: usize,
    /// Sessions whose pass stopped on a transport failure.
    pub failed: Vec<String>,
}

#[derive(Debug)]
pub struct Database<C: Clock = SystemClock> {
    limits: Limits,
    store: MessageStore,
    sessions: HashMap<String, Session>,
    subs: TopicTable,
    clock: C,
}

impl Database<SystemClock> {
    pub fn new(limits: Limits) -> Self {
        Self::with_clock(limits, SystemClock)
    }
}

impl Default for Database<SystemClock> {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

impl<C: Clock> Database<C> {
    pub fn with_clock(limits: Limits, clock: C) -> Self {
        info!(
            max_inflight = limits.max_inflight,
            max_queued = limits.max_queued,
            memory_limit = limits.memory_limit,
            "opening message database"
        );
        Self {
            limits,
            store: MessageStore::new(limits.memory_limit),
            sessions: HashMap::new(),
            subs: TopicTable::new(),
            clock,
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    // ---- sessions -------------------------------------------------------

    /// Add a session to the registry. A session already registered under
    /// the same id is replaced and returned.
    pub fn register_session(&mut self, session: Session) -> Option<Session> {
        info!(session = %session.id, connected = session.is_connected(), "registering session");
        self.sessions.insert(session.id.clone(), session)
    }

    /// Remove a session, its subscriptions and every entry it owns.
    pub fn remove_session(&mut self, id: &str) -> bool {
        self.subs.remove_subscriber(id);
        match self.sessions.remove(id) {
            Some(mut session) => {
                let flushed = session.flush();
                info!(session = %id, flushed, "removed session");
                true
            }
            None => false,
        }
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    fn session_mut(&mut self, id: &str) -> Result<&mut Session> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| DbError::UnknownSession(id.to_string()))
    }

    /// Mark a session connected and promote its queued entries. Returns how
    /// many were promoted.
    pub fn session_connected(&mut self, id: &str) -> Result<usize> {
        let now = self.clock.now();
        let limits = self.limits;
        let session = self.session_mut(id)?;
        session.set_connected(true);
        let promoted = session.promote(&limits, now);
        info!(session = %id, promoted, "session connected");
        Ok(promoted)
    }

    /// Mark a session disconnected. Its entries stay, waiting for the next
    /// connection.
    pub fn session_disconnected(&mut self, id: &str) -> Result<()> {
        let session = self.session_mut(id)?;
        session.set_connected(false);
        info!(session = %id, pending = session.len(), "session disconnected");
        Ok(())
    }

    /// Drop every entry of a session, releasing their references.
    pub fn flush_session(&mut self, id: &str) -> Result<usize> {
        let flushed = self.session_mut(id)?.flush();
        debug!(session = %id, flushed, "flushed session");
        Ok(flushed)
    }

    /// `(total, inactive)` session counts.
    pub fn session_count(&self) -> (usize, usize) {
        let inactive = self.sessions.values().filter(|s| !s.is_connected()).count();
        (self.sessions.len(), inactive)
    }

    // ---- subscriptions --------------------------------------------------

    /// Subscribe a registered session to an exact topic name. When the topic
    /// holds a retained message it is queued for the session with the
    /// retain flag set, and the admission of that replay is returned.
    pub fn subscribe(&mut self, session_id: &str, topic: &str, qos: QoS) -> Result<Option<Admission>> {
        if topic.is_empty() {
            return Err(DbError::InvalidArgument("topic must not be empty"));
        }
        if !self.sessions.contains_key(session_id) {
            return Err(DbError::UnknownSession(session_id.to_string()));
        }
        debug!(session = %session_id, topic, qos = %qos, "subscribe");
        let Some(retained) = self.subs.subscribe(topic, session_id, qos) else {
            return Ok(None);
        };

        let qos = qos.min(retained.qos());
        let now = self.clock.now();
        let limits = self.limits;
        let session = self.session_mut(session_id)?;
        let mid = session.next_mid()?;
        let admission = session.insert(&limits, now, mid, Direction::Outbound, qos, true, &retained)?;
        Ok(Some(admission))
    }

    pub fn unsubscribe(&mut self, session_id: &str, topic: &str) {
        debug!(session = %session_id, topic, "unsubscribe");
        self.subs.unsubscribe(topic, session_id);
    }

    pub fn subscriptions(&self) -> &TopicTable {
        &self.subs
    }

    // ---- store ----------------------------------------------------------

    /// Store a message without queueing it anywhere. The record starts
    /// unreferenced.
    #[allow(clippy::too_many_arguments)]
    pub fn store_message(
        &mut self,
        source_id: &str,
        source_mid: u16,
        topic: &str,
        qos: QoS,
        payload: &[u8],
        retain: bool,
        store_id: u64,
    ) -> Result<StoreHandle> {
        self.store
            .store(source_id, source_mid, topic, qos, payload, retain, store_id)
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn store_count(&self) -> usize {
        self.store.len()
    }

    pub fn store_bytes(&self) -> usize {
        self.store.bytes()
    }

    // ---- delivery entries -----------------------------------------------

    /// Offer one delivery entry for `stored` to a session.
    pub fn insert_delivery(
        &mut self,
        session_id: &str,
        mid: u16,
        direction: Direction,
        qos: QoS,
        retain: bool,
        stored: &StoreHandle,
    ) -> Result<Admission> {
        let now = self.clock.now();
        let limits = self.limits;
        self.session_mut(session_id)?
            .insert(&limits, now, mid, direction, qos, retain, stored)
    }

    /// Remove an entry and promote queued entries behind it. Returns false
    /// when no such entry exists.
    pub fn message_delete(&mut self, session_id: &str, mid: u16, direction: Direction) -> Result<bool> {
        let now = self.clock.now();
        let limits = self.limits;
        Ok(self.session_mut(session_id)?.delete(&limits, now, mid, direction))
    }

    /// Move an entry to `state` and refresh its timestamp.
    pub fn message_update(
        &mut self,
        session_id: &str,
        mid: u16,
        direction: Direction,
        state: MessageState,
    ) -> Result<bool> {
        let now = self.clock.now();
        Ok(self.session_mut(session_id)?.update(now, mid, direction, state))
    }

    /// Release a held inbound message: fan it out to the subscribers of its
    /// topic, then remove the inbound entry. `None` when nothing is held
    /// under `mid`.
    pub fn message_release(
        &mut self,
        session_id: &str,
        mid: u16,
        direction: Direction,
    ) -> Result<Option<PublishOutcome>> {
        let held = self
            .session_mut(session_id)?
            .find(mid, direction)
            .map(|e| e.handle().clone());
        let Some(stored) = held else {
            debug!(session = %session_id, mid, %direction, "release for unknown message");
            return Ok(None);
        };

        let outcome = self.messages_queue(&stored)?;
        self.message_delete(session_id, mid, direction)?;
        Ok(Some(outcome))
    }

    /// Stored record of an inbound QoS 2 publish that has not been released
    /// yet.
    pub fn find_inbound(&self, session_id: &str, source_mid: u16) -> Option<&StoreHandle> {
        self.sessions
            .get(session_id)?
            .find(source_mid, Direction::Inbound)
            .map(DeliveryEntry::handle)
    }

    // ---- ingestion ------------------------------------------------------

    /// Store a published message once and queue it for every subscriber of
    /// its topic. `origin` is `None` for broker-generated messages.
    pub fn store_and_queue(
        &mut self,
        origin: Option<&str>,
        topic: &str,
        qos: QoS,
        payload: &[u8],
        retain: bool,
    ) -> Result<PublishOutcome> {
        self.ingest(origin.unwrap_or(""), 0, topic, qos, payload, retain)
    }

    pub(crate) fn ingest(
        &mut self,
        source_id: &str,
        source_mid: u16,
        topic: &str,
        qos: QoS,
        payload: &[u8],
        retain: bool,
    ) -> Result<PublishOutcome> {
        let stored = self
            .store
            .store(source_id, source_mid, topic, qos, payload, retain, 0)?;
        self.messages_queue(&stored)
    }

    /// Queue an already stored message for every subscriber of its topic and
    /// update the retained slot when the message carries the retain flag.
    pub fn messages_queue(&mut self, stored: &StoreHandle) -> Result<PublishOutcome> {
        let topic = stored.topic();
        if stored.retain() {
            self.subs.retain(topic, stored);
        }

        let mut outcome = PublishOutcome {
            store_id: stored.db_id(),
            ..PublishOutcome::default()
        };
        let now = self.clock.now();
        let limits = self.limits;

        for (subscriber, sub_qos) in self.subs.subscribers(topic) {
            let Some(session) = self.sessions.get_mut(&subscriber) else {
                warn!(session = %subscriber, topic, "subscriber has no session");
                continue;
            };
            let qos = stored.qos().min(sub_qos);
            let inserted = session.next_mid().and_then(|mid| {
                session.insert(&limits, now, mid, Direction::Outbound, qos, false, stored)
            });
            match inserted {
                Ok(admission) => outcome.record(admission),
                Err(e) => {
                    warn!(session = %subscriber, topic, error = %e, "could not queue message");
                    outcome.failed += 1;
                }
            }
        }

        debug!(
            db_id = outcome.store_id,
            topic,
            delivering = outcome.delivering,
            queued = outcome.queued,
            rejected = outcome.rejected,
            failed = outcome.failed,
            "queued message"
        );
        Ok(outcome)
    }

    // ---- maintenance ----------------------------------------------------

    /// Rewind every stalled handshake older than `timeout_secs`. A timeout
    /// of 0 does nothing.
    pub fn check_timeouts(&mut self, timeout_secs: u64) -> usize {
        if timeout_secs == 0 {
            return 0;
        }
        let now = self.clock.now();
        self.sessions
            .values_mut()
            .map(|s| s.check_timeouts(now, timeout_secs))
            .sum()
    }

    /// One drain pass for a connected session.
    pub fn drain<T: Transport + ?Sized>(&mut self, session_id: &str, transport: &mut T) -> Result<DrainSummary> {
        let now = self.clock.now();
        let limits = self.limits;
        let session = self.session_mut(session_id)?;
        writer::drain(session, &limits, now, transport)
    }

    /// Drain every connected session, in id order. A failing session is
    /// recorded and skipped; the others still run.
    pub fn drain_all<T: Transport + ?Sized>(&mut self, transport: &mut T) -> DrainReport {
        let now = self.clock.now();
        let limits = self.limits;
        let mut ids: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.is_connected())
            .map(|s| s.id.clone())
            .collect();
        ids.sort();

        let mut report = DrainReport::default();
        for id in ids {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            report.sessions += 1;
            match writer::drain(session, &limits, now, transport) {
                Ok(summary) => {
                    report.sent += summary.sent;
                    report.completed += summary.completed;
                }
                Err(e) => {
                    debug!(session = %id, error = %e, "drain pass failed");
                    report.failed.push(id);
                }
            }
        }
        report
    }

    /// Reclaim every stored message nobody references.
    pub fn garbage_collect(&mut self) -> usize {
        self.store.clean()
    }

    /// Drop retained slots and subscriptions, then sweep the store.
    pub fn close(&mut self) -> usize {
        let retained = self.subs.clear_retained();
        self.subs = TopicTable::new();
        let reclaimed = self.store.clean();
        info!(retained, reclaimed, remaining = self.store.len(), "closed message database");
        reclaimed
    }

    // ---- persistence hooks ----------------------------------------------

    pub fn retained(&self) -> impl Iterator<Item = (&str, &StoreHandle)> {
        self.subs.retained_iter()
    }

    /// Re-attach a persisted entry to its session, creating the session
    /// disconnected when it is not registered. Returns false when the store
    /// record it points at is missing.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore_entry(
        &mut self,
        session_id: &str,
        store_id: u64,
        mid: u16,
        direction: Direction,
        qos: QoS,
        retain: bool,
        dup: bool,
        timestamp: i64,
        state: MessageState,
    ) -> Result<bool> {
        let Some(stored) = self.store.get(store_id).cloned() else {
            warn!(session = %session_id, store_id, mid, "entry refers to missing message, skipped");
            return Ok(false);
        };
        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        let mut entry = DeliveryEntry::new(mid, direction, qos, retain, timestamp, state, &stored);
        entry.dup = dup;
        session.restore(entry)?;
        Ok(true)
    }

    pub(crate) fn restore_retained(&mut self, topic: &str, store_id: u64) -> bool {
        match self.store.get(store_id).cloned() {
            Some(stored) => {
                self.subs.retain(topic, &stored);
                true
            }
            None => {
                warn!(topic, store_id, "retained slot refers to missing message, skipped");
                false
            }
        }
    }

    pub(crate) fn reserve_ids_through(&mut self, db_id: u64) {
        self.store.reserve_ids_through(db_id);
    }
}
