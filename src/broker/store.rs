//! Message store
//!
//! Every payload that is still needed by a pending delivery or a retained
//! slot lives here exactly once. Records are shared through `StoreHandle`
//! and counted through `StoreRef`: one `StoreRef` per delivery entry or
//! retained slot. Dropping the last `StoreRef` never frees anything; the
//! record stays linked until `MessageStore::clean` sweeps it.
//!
//! Reference counts are atomic so handles can cross into the maintenance
//! task; mutation still happens from one logical control thread.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, error};

use crate::broker::message::QoS;
use crate::utils::{DbError, Result};

pub type StoreHandle = Arc<StoredMessage>;

#[derive(Debug)]
pub struct StoredMessage {
    db_id: u64,
    source_id: String,
    source_mid: u16,
    topic: String,
    qos: QoS,
    retain: bool,
    payload: Vec<u8>,
    ref_count: AtomicU32,
}

impl StoredMessage {
    pub fn db_id(&self) -> u64 {
        self.db_id
    }

    /// Originating session id; empty for broker-internal messages.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn source_mid(&self) -> u16 {
        self.source_mid
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    fn footprint(&self) -> usize {
        self.payload.len() + self.topic.len() + self.source_id.len()
    }

    fn acquire(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        let released = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if released.is_err() {
            error!(db_id = self.db_id, "reference count released below zero");
        }
    }
}

/// A counted reference to a stored message.
pub struct StoreRef(StoreHandle);

impl StoreRef {
    pub fn new(handle: &StoreHandle) -> Self {
        handle.acquire();
        Self(Arc::clone(handle))
    }

    pub fn handle(&self) -> &StoreHandle {
        &self.0
    }
}

impl Deref for StoreRef {
    type Target = StoredMessage;

    fn deref(&self) -> &StoredMessage {
        &self.0
    }
}

impl Drop for StoreRef {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl fmt::Debug for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRef")
            .field("db_id", &self.0.db_id)
            .field("ref_count", &self.0.ref_count())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct MessageStore {
    records: BTreeMap<u64, StoreHandle>,
    last_db_id: u64,
    bytes: usize,
    /// 0 = unlimited.
    memory_limit: usize,
}

impl MessageStore {
    pub fn new(memory_limit: usize) -> Self {
        Self {
            memory_limit,
            ..Self::default()
        }
    }

    /// Copy a published message into the store.
    ///
    /// `store_id` is 0 for fresh messages; persistence restore passes the id
    /// the record had before, and the sequence continues after it. The new
    /// record starts with a reference count of zero.
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &mut self,
        source_id: &str,
        source_mid: u16,
        topic: &str,
        qos: QoS,
        payload: &[u8],
        retain: bool,
        store_id: u64,
    ) -> Result<StoreHandle> {
        if topic.is_empty() {
            return Err(DbError::InvalidArgument("topic must not be empty"));
        }
        if store_id != 0 && self.records.contains_key(&store_id) {
            return Err(DbError::DuplicateStoreId(store_id));
        }

        let requested = payload.len() + topic.len() + source_id.len();
        let out_of_memory = || DbError::OutOfMemory {
            topic: topic.to_string(),
            requested,
        };
        if self.memory_limit != 0 && self.bytes + requested > self.memory_limit {
            return Err(out_of_memory());
        }

        // Partial copies are dropped on the error path; nothing is linked
        // until all three succeed.
        let source_id = copy_str(source_id).ok_or_else(out_of_memory)?;
        let topic_copy = copy_str(topic).ok_or_else(out_of_memory)?;
        let payload = copy_bytes(payload).ok_or_else(out_of_memory)?;

        let db_id = if store_id == 0 {
            self.last_db_id += 1;
            self.last_db_id
        } else {
            self.last_db_id = self.last_db_id.max(store_id);
            store_id
        };

        let record = Arc::new(StoredMessage {
            db_id,
            source_id,
            source_mid,
            topic: topic_copy,
            qos,
            retain,
            payload,
            ref_count: AtomicU32::new(0),
        });
        self.bytes += record.footprint();
        self.records.insert(db_id, Arc::clone(&record));
        debug!(db_id, topic, qos = %qos, "stored message");
        Ok(record)
    }

    /// Give back one counted reference.
    pub fn release(&self, reference: StoreRef) {
        drop(reference);
    }

    /// Unlink every record nobody references any more. Returns how many
    /// were reclaimed.
    pub fn clean(&mut self) -> usize {
        let before = self.records.len();
        let mut freed = 0;
        self.records.retain(|_, record| {
            if record.ref_count() == 0 {
                freed += record.footprint();
                false
            } else {
                true
            }
        });
        self.bytes -= freed;
        let reclaimed = before - self.records.len();
        if reclaimed > 0 {
            debug!(reclaimed, bytes = freed, "swept message store");
        }
        reclaimed
    }

    pub fn get(&self, db_id: u64) -> Option<&StoreHandle> {
        self.records.get(&db_id)
    }

    /// Records in store-id order.
    pub fn iter(&self) -> impl Iterator<Item = &StoreHandle> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn last_db_id(&self) -> u64 {
        self.last_db_id
    }

    /// Keep fresh ids clear of everything a snapshot ever handed out.
    pub(crate) fn reserve_ids_through(&mut self, db_id: u64) {
        self.last_db_id = self.last_db_id.max(db_id);
    }
}

fn copy_bytes(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    out.try_reserve_exact(bytes.len()).ok()?;
    out.extend_from_slice(bytes);
    Some(out)
}

fn copy_str(s: &str) -> Option<String> {
    let mut out = String::new();
    out.try_reserve_exact(s.len()).ok()?;
    out.push_str(s);
    Some(out)
}
