use tempfile::tempdir;

use super::Persistence;
use crate::broker::admission::Limits;
use crate::broker::engine::Database;
use crate::broker::message::{Direction, MessageState, QoS};
use crate::client::Session;
use crate::utils::ManualClock;

fn open_temp() -> (tempfile::TempDir, Persistence) {
    let dir = tempdir().unwrap();
    let persistence = Persistence::open(dir.path().to_str().unwrap()).unwrap();
    (dir, persistence)
}

fn database() -> Database<ManualClock> {
    Database::with_clock(Limits::default(), ManualClock::new(1_000))
}

#[test]
fn test_empty_snapshot_restores_nothing() {
    let (_dir, persistence) = open_temp();
    let mut db = database();
    let summary = persistence.restore(&mut db).unwrap();
    assert_eq!(summary.messages, 0);
    assert_eq!(summary.sessions, 0);
    assert_eq!(persistence.last_db_id().unwrap(), None);
}

#[test]
fn test_save_and_restore_round_trip() {
    let (_dir, persistence) = open_temp();

    let mut db = database();
    db.register_session(Session::new("sub"));
    db.subscribe("sub", "sensors/1", QoS::ExactlyOnce).unwrap();
    db.store_and_queue(Some("pub"), "sensors/1", QoS::AtLeastOnce, b"21.5", true)
        .unwrap();
    db.store_and_queue(None, "sensors/1", QoS::ExactlyOnce, b"22.0", false)
        .unwrap();
    db.message_update("sub", 1, Direction::Outbound, MessageState::WaitPuback)
        .unwrap();

    let saved = persistence.save(&db).unwrap();
    assert_eq!(saved.messages, 2);
    assert_eq!(saved.sessions, 1);
    assert_eq!(saved.entries, 2);
    assert_eq!(saved.retained, 1);

    let mut restored = database();
    let summary = persistence.restore(&mut restored).unwrap();
    assert_eq!(summary, saved);

    let session = restored.session("sub").unwrap();
    assert!(!session.is_connected());
    let entries: Vec<_> = session.messages().collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].mid, 1);
    assert_eq!(entries[0].state, MessageState::WaitPuback);
    assert_eq!(entries[0].stored().payload(), b"21.5");
    assert_eq!(entries[0].stored().source_id(), "pub");
    assert_eq!(entries[1].qos, QoS::ExactlyOnce);

    // retained slot plus one entry
    assert_eq!(entries[0].stored().ref_count(), 2);
    assert_eq!(
        restored.subscriptions().retained("sensors/1").unwrap().db_id(),
        entries[0].stored().db_id()
    );
}

#[test]
fn test_restore_continues_id_sequence() {
    let (_dir, persistence) = open_temp();

    let mut db = database();
    db.register_session(Session::new("sub"));
    db.subscribe("sub", "t", QoS::AtLeastOnce).unwrap();
    for _ in 0..3 {
        db.store_and_queue(None, "t", QoS::AtLeastOnce, b"x", false)
            .unwrap();
    }
    // an unreferenced record still bumps the id sequence
    db.store_message("", 0, "t", QoS::AtMostOnce, b"orphan", false, 0)
        .unwrap();
    persistence.save(&db).unwrap();
    assert_eq!(persistence.last_db_id().unwrap(), Some(4));

    let mut restored = database();
    persistence.restore(&mut restored).unwrap();
    assert_eq!(restored.store_count(), 3);

    let outcome = restored
        .store_and_queue(None, "other", QoS::AtMostOnce, b"y", false)
        .unwrap();
    assert_eq!(outcome.store_id, 5);
}

#[test]
fn test_restore_skips_entries_for_missing_messages() {
    let (_dir, persistence) = open_temp();

    let mut db = database();
    db.register_session(Session::new("sub"));
    db.subscribe("sub", "t", QoS::AtLeastOnce).unwrap();
    db.store_and_queue(None, "t", QoS::AtLeastOnce, b"x", false)
        .unwrap();
    persistence.save(&db).unwrap();

    // drop the message record behind the snapshot's back
    persistence.tree("msg_store").unwrap().clear().unwrap();

    let mut restored = database();
    let summary = persistence.restore(&mut restored).unwrap();
    assert_eq!(summary.entries, 0);
    assert_eq!(summary.skipped, 1);
    assert!(restored.session("sub").unwrap().is_empty());
}

#[test]
fn test_second_save_replaces_first() {
    let (_dir, persistence) = open_temp();

    let mut db = database();
    for id in ["gone", "stays"] {
        db.register_session(Session::new(id));
        db.subscribe(id, "t", QoS::AtLeastOnce).unwrap();
    }
    db.store_and_queue(None, "t", QoS::AtLeastOnce, b"old", true).unwrap();
    persistence.save(&db).unwrap();
    assert_eq!(persistence.load_sessions().unwrap().len(), 2);

    assert!(db.remove_session("gone"));
    assert!(db.message_delete("stays", 1, Direction::Outbound).unwrap());
    db.store_and_queue(None, "t", QoS::AtLeastOnce, b"", true).unwrap();
    assert!(db.message_delete("stays", 2, Direction::Outbound).unwrap());
    db.store_and_queue(None, "t", QoS::AtLeastOnce, b"new", false).unwrap();
    db.garbage_collect();

    let saved = persistence.save(&db).unwrap();
    assert_eq!(saved.sessions, 1);
    assert_eq!(saved.retained, 0);

    let sessions = persistence.load_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, "stays");
    let payloads: Vec<Vec<u8>> = persistence
        .load_records()
        .unwrap()
        .into_iter()
        .map(|r| r.payload)
        .collect();
    assert_eq!(payloads, vec![b"new".to_vec()]);
    assert_eq!(persistence.tree("retained").unwrap().len(), 0);
    assert_eq!(persistence.last_db_id().unwrap(), Some(3));
}

#[test]
fn test_debug_hides_handle() {
    let (_dir, persistence) = open_temp();
    assert_eq!(format!("{persistence:?}"), "Persistence { db: \"sled::Db\" }");
}
