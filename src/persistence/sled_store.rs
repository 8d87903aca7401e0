use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Transactional, Tree};
use tracing::{info, warn};

use crate::broker::engine::Database;
use crate::broker::message::{Direction, MessageState, QoS};
use crate::client::Session;
use crate::utils::{Clock, DbError, Result};

const MESSAGES: &str = "msg_store";
const SESSIONS: &str = "sessions";
const RETAINED: &str = "retained";
const META: &str = "meta";
const LAST_DB_ID: &[u8] = b"last_db_id";

/// A stored message as written to disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub db_id: u64,
    pub source_id: String,
    pub source_mid: u16,
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub store_id: u64,
    pub mid: u16,
    pub direction: Direction,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub timestamp: i64,
    pub state: MessageState,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub entries: Vec<EntryRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub messages: usize,
    pub sessions: usize,
    pub entries: usize,
    pub retained: usize,
    /// Entries or retained slots dropped because their message was missing.
    pub skipped: usize,
}

/// Snapshot store for the delivery database.
///
/// A snapshot is the whole database: every stored message, every session
/// with its ordered entries, and every retained slot. Saving replaces the
/// previous snapshot.
#[derive(Clone)]
pub struct Persistence {
    db: Db,
}

impl Persistence {
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub(crate) fn tree(&self, name: &str) -> Result<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    /// Replace the previous snapshot with `database`. All trees are written
    /// in one transaction, so a failed save leaves the old snapshot intact.
    pub fn save<C: Clock>(&self, database: &Database<C>) -> Result<SnapshotSummary> {
        let messages = self.tree(MESSAGES)?;
        let sessions = self.tree(SESSIONS)?;
        let retained = self.tree(RETAINED)?;
        let meta = self.tree(META)?;

        let mut summary = SnapshotSummary::default();

        let mut message_rows = Vec::new();
        for stored in database.store().iter() {
            let record = StoredRecord {
                db_id: stored.db_id(),
                source_id: stored.source_id().to_string(),
                source_mid: stored.source_mid(),
                topic: stored.topic().to_string(),
                qos: stored.qos(),
                retain: stored.retain(),
                payload: stored.payload().to_vec(),
            };
            message_rows.push((record.db_id.to_be_bytes().to_vec(), serde_json::to_vec(&record)?));
            summary.messages += 1;
        }

        let mut session_rows = Vec::new();
        for session in database.sessions() {
            let entries: Vec<EntryRecord> = session
                .messages()
                .map(|e| EntryRecord {
                    store_id: e.stored().db_id(),
                    mid: e.mid,
                    direction: e.direction,
                    qos: e.qos,
                    retain: e.retain,
                    dup: e.dup,
                    timestamp: e.timestamp,
                    state: e.state,
                })
                .collect();
            summary.entries += entries.len();
            let record = SessionRecord {
                id: session.id.clone(),
                entries,
            };
            session_rows.push((record.id.clone().into_bytes(), serde_json::to_vec(&record)?));
            summary.sessions += 1;
        }

        let mut retained_rows = Vec::new();
        for (topic, stored) in database.retained() {
            retained_rows.push((topic.as_bytes().to_vec(), stored.db_id().to_be_bytes().to_vec()));
            summary.retained += 1;
        }

        let message_batch = replace_batch(&messages, message_rows)?;
        let session_batch = replace_batch(&sessions, session_rows)?;
        let retained_batch = replace_batch(&retained, retained_rows)?;
        let last_db_id = database.store().last_db_id().to_be_bytes().to_vec();

        (&messages, &sessions, &retained, &meta)
            .transaction(|(messages, sessions, retained, meta)| {
                messages.apply_batch(&message_batch)?;
                sessions.apply_batch(&session_batch)?;
                retained.apply_batch(&retained_batch)?;
                meta.insert(LAST_DB_ID, last_db_id.clone())?;
                Ok::<_, ConflictableTransactionError<sled::Error>>(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) | TransactionError::Storage(e) => DbError::Persistence(e),
            })?;
        self.db.flush()?;

        info!(
            messages = summary.messages,
            sessions = summary.sessions,
            entries = summary.entries,
            retained = summary.retained,
            "saved snapshot"
        );
        Ok(summary)
    }

    /// Load the snapshot into `database`. Stored messages keep their ids;
    /// sessions not yet registered are created disconnected. Messages that
    /// nothing refers to are swept afterwards.
    pub fn restore<C: Clock>(&self, database: &mut Database<C>) -> Result<SnapshotSummary> {
        let mut summary = SnapshotSummary::default();

        for record in self.load_records()? {
            database.store_message(
                &record.source_id,
                record.source_mid,
                &record.topic,
                record.qos,
                &record.payload,
                record.retain,
                record.db_id,
            )?;
            summary.messages += 1;
        }

        for record in self.load_sessions()? {
            if database.session(&record.id).is_none() {
                database.register_session(Session::new(record.id.clone()));
            }
            summary.sessions += 1;
            for e in record.entries {
                let restored = database.restore_entry(
                    &record.id,
                    e.store_id,
                    e.mid,
                    e.direction,
                    e.qos,
                    e.retain,
                    e.dup,
                    e.timestamp,
                    e.state,
                )?;
                if restored {
                    summary.entries += 1;
                } else {
                    summary.skipped += 1;
                }
            }
        }

        for item in self.tree(RETAINED)?.iter() {
            let (key, value) = item?;
            let (Ok(topic), Some(store_id)) = (std::str::from_utf8(&key), read_u64(&value)) else {
                warn!("malformed retained slot in snapshot, skipped");
                summary.skipped += 1;
                continue;
            };
            if database.restore_retained(topic, store_id) {
                summary.retained += 1;
            } else {
                summary.skipped += 1;
            }
        }

        if let Some(last) = self.last_db_id()? {
            database.reserve_ids_through(last);
        }
        let reclaimed = database.garbage_collect();

        info!(
            messages = summary.messages,
            sessions = summary.sessions,
            entries = summary.entries,
            retained = summary.retained,
            skipped = summary.skipped,
            reclaimed,
            "restored snapshot"
        );
        Ok(summary)
    }

    /// Stored messages in id order.
    pub fn load_records(&self) -> Result<Vec<StoredRecord>> {
        let mut out = Vec::new();
        for item in self.tree(MESSAGES)?.iter() {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn load_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut out = Vec::new();
        for item in self.tree(SESSIONS)?.iter() {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn last_db_id(&self) -> Result<Option<u64>> {
        Ok(self.tree(META)?.get(LAST_DB_ID)?.and_then(|v| read_u64(&v)))
    }
}

/// Batch that turns `tree` into exactly `rows`: new rows are written, keys
/// absent from `rows` are removed.
fn replace_batch(tree: &Tree, rows: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Batch> {
    let mut batch = Batch::default();
    let mut keep = HashSet::with_capacity(rows.len());
    for (key, value) in rows {
        keep.insert(key.clone());
        batch.insert(key, value);
    }
    for key in tree.iter().keys() {
        let key = key?;
        if !keep.contains(&key[..]) {
            batch.remove(key);
        }
    }
    Ok(batch)
}

fn read_u64(bytes: &[u8]) -> Option<u64> {
    bytes.try_into().ok().map(u64::from_be_bytes)
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("db", &"sled::Db")
            .finish()
    }
}
