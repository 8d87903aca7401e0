use super::{BridgeStart, Session};
use crate::broker::admission::{Admission, Limits};
use crate::broker::message::{DeliveryEntry, Direction, MessageState, QoS};
use crate::broker::store::{MessageStore, StoreHandle};
use crate::utils::DbError;

fn stored(store: &mut MessageStore, qos: QoS) -> StoreHandle {
    store
        .store("pub", 0, "t", qos, b"payload", false, 0)
        .unwrap()
}

fn limits(max_inflight: usize, max_queued: usize) -> Limits {
    Limits {
        max_inflight,
        max_queued,
        memory_limit: 0,
    }
}

fn connected(id: &str) -> Session {
    let mut session = Session::new(id);
    session.set_connected(true);
    session
}

#[test]
fn test_session_new() {
    let session = Session::new("client1");
    assert_eq!(session.id, "client1");
    assert!(!session.is_connected());
    assert!(session.is_empty());
    assert_eq!(session.bridge_start(), None);
}

#[test]
fn test_anonymous_sessions_get_unique_ids() {
    let a = Session::anonymous();
    let b = Session::anonymous();
    assert!(a.id.starts_with("auto-"));
    assert_ne!(a.id, b.id);
}

#[test]
fn test_insert_takes_one_reference() {
    let mut store = MessageStore::new(0);
    let msg = stored(&mut store, QoS::AtLeastOnce);
    let mut session = connected("s");

    let admission = session
        .insert(&Limits::default(), 10, 1, Direction::Outbound, QoS::AtLeastOnce, false, &msg)
        .unwrap();
    assert_eq!(admission, Admission::Delivering);
    assert_eq!(msg.ref_count(), 1);

    let entry = session.find(1, Direction::Outbound).unwrap();
    assert_eq!(entry.state, MessageState::PublishPuback);
    assert_eq!(entry.timestamp, 10);
    assert!(!entry.dup);
}

#[test]
fn test_duplicate_mid_and_direction_is_refused() {
    let mut store = MessageStore::new(0);
    let msg = stored(&mut store, QoS::ExactlyOnce);
    let mut session = connected("s");
    let l = Limits::default();

    session
        .insert(&l, 0, 5, Direction::Outbound, QoS::ExactlyOnce, false, &msg)
        .unwrap();
    let err = session
        .insert(&l, 0, 5, Direction::Outbound, QoS::ExactlyOnce, false, &msg)
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateEntry { mid: 5, .. }));
    assert_eq!(msg.ref_count(), 1);

    // same id in the other direction is a different entry
    session
        .insert(&l, 0, 5, Direction::Inbound, QoS::ExactlyOnce, false, &msg)
        .unwrap();
    assert_eq!(session.len(), 2);
}

#[test]
fn test_rejection_takes_no_reference() {
    let mut store = MessageStore::new(0);
    let msg = stored(&mut store, QoS::AtMostOnce);
    let mut session = Session::new("offline");

    let admission = session
        .insert(&Limits::default(), 0, 1, Direction::Outbound, QoS::AtMostOnce, false, &msg)
        .unwrap();
    assert_eq!(admission, Admission::Rejected);
    assert!(session.is_empty());
    assert_eq!(msg.ref_count(), 0);
}

#[test]
fn test_next_mid_skips_ids_in_use() {
    let mut store = MessageStore::new(0);
    let msg = stored(&mut store, QoS::AtLeastOnce);
    let mut session = connected("s");
    let l = limits(0, 0);

    assert_eq!(session.next_mid().unwrap(), 1);
    session
        .insert(&l, 0, 2, Direction::Outbound, QoS::AtLeastOnce, false, &msg)
        .unwrap();
    assert_eq!(session.next_mid().unwrap(), 3);
}

#[test]
fn test_next_mid_exhausted_then_freed() {
    let mut store = MessageStore::new(0);
    let msg = stored(&mut store, QoS::AtLeastOnce);
    let mut session = connected("s");
    let l = limits(0, 0);

    for mid in 1..=u16::MAX {
        let entry = DeliveryEntry::new(
            mid,
            Direction::Outbound,
            QoS::AtLeastOnce,
            false,
            0,
            MessageState::WaitPuback,
            &msg,
        );
        session.restore(entry).unwrap();
    }
    let err = session.next_mid().unwrap_err();
    assert!(matches!(err, DbError::MessageIdsExhausted(_)));

    // inbound ids live in their own space
    session
        .insert(&l, 0, 7, Direction::Inbound, QoS::ExactlyOnce, false, &msg)
        .unwrap();

    assert!(session.delete(&l, 0, 40_000, Direction::Outbound));
    assert_eq!(session.next_mid().unwrap(), 40_000);

    assert_eq!(session.flush(), usize::from(u16::MAX));
    assert_eq!(session.next_mid().unwrap(), 40_001);
}

#[test]
fn test_delete_promotes_next_queued_entry() {
    let mut store = MessageStore::new(0);
    let msg = stored(&mut store, QoS::AtLeastOnce);
    let mut session = connected("s");
    let l = limits(1, 0);

    for mid in 1..=3 {
        session
            .insert(&l, 0, mid, Direction::Outbound, QoS::AtLeastOnce, false, &msg)
            .unwrap();
    }
    assert_eq!(session.inflight(), 1);
    assert_eq!(session.queued(), 2);

    assert!(session.delete(&l, 50, 1, Direction::Outbound));
    let second = session.find(2, Direction::Outbound).unwrap();
    assert_eq!(second.state, MessageState::PublishPuback);
    assert_eq!(second.timestamp, 50);
    assert!(session.find(3, Direction::Outbound).unwrap().state.is_queued());
    assert_eq!(msg.ref_count(), 2);

    assert!(!session.delete(&l, 50, 1, Direction::Outbound));
}

#[test]
fn test_disconnected_session_does_not_promote() {
    let mut store = MessageStore::new(0);
    let msg = stored(&mut store, QoS::AtLeastOnce);
    let mut session = Session::new("s");
    let l = limits(1, 0);

    session
        .insert(&l, 0, 1, Direction::Outbound, QoS::AtLeastOnce, false, &msg)
        .unwrap();
    assert_eq!(session.promote(&l, 1), 0);

    session.set_connected(true);
    assert_eq!(session.promote(&l, 1), 1);
}

#[test]
fn test_check_timeouts_rewinds_and_marks_duplicate() {
    let mut store = MessageStore::new(0);
    let msg = stored(&mut store, QoS::ExactlyOnce);
    let mut session = connected("s");
    let l = limits(0, 0);

    session
        .insert(&l, 100, 1, Direction::Outbound, QoS::ExactlyOnce, false, &msg)
        .unwrap();
    session.update(100, 1, Direction::Outbound, MessageState::WaitPubrec);

    // not yet stale
    assert_eq!(session.check_timeouts(110, 20), 0);

    assert_eq!(session.check_timeouts(121, 20), 1);
    let entry = session.find(1, Direction::Outbound).unwrap();
    assert_eq!(entry.state, MessageState::PublishPubrec);
    assert!(entry.dup);
    assert_eq!(entry.timestamp, 121);

    // publish states are never rewound
    assert_eq!(session.check_timeouts(500, 20), 0);
}

#[test]
fn test_check_timeouts_skips_queued() {
    let mut store = MessageStore::new(0);
    let msg = stored(&mut store, QoS::AtLeastOnce);
    let mut session = Session::new("s");

    session
        .insert(&Limits::default(), 0, 1, Direction::Outbound, QoS::AtLeastOnce, false, &msg)
        .unwrap();
    assert_eq!(session.check_timeouts(1_000, 1), 0);
    assert!(!session.find(1, Direction::Outbound).unwrap().dup);
}

#[test]
fn test_lazy_bridge_requests_wake_at_threshold() {
    let mut store = MessageStore::new(0);
    let msg = stored(&mut store, QoS::AtMostOnce);
    let mut bridge = Session::bridge("bridge-1", BridgeStart::Lazy { threshold: 2 });
    let l = Limits::default();

    // qos 0 is queued for a lazy bridge instead of dropped
    let first = bridge
        .insert(&l, 0, 1, Direction::Outbound, QoS::AtMostOnce, false, &msg)
        .unwrap();
    assert_eq!(first, Admission::Queued);
    assert!(!bridge.wake_requested());

    bridge
        .insert(&l, 0, 2, Direction::Outbound, QoS::AtMostOnce, false, &msg)
        .unwrap();
    assert!(bridge.wake_requested());

    bridge.set_connected(true);
    assert!(!bridge.wake_requested());
}

#[test]
fn test_flush_releases_every_reference() {
    let mut store = MessageStore::new(0);
    let msg = stored(&mut store, QoS::AtLeastOnce);
    let mut session = connected("s");
    let l = limits(0, 0);
    for mid in 1..=4 {
        session
            .insert(&l, 0, mid, Direction::Outbound, QoS::AtLeastOnce, false, &msg)
            .unwrap();
    }
    assert_eq!(msg.ref_count(), 4);
    assert_eq!(session.flush(), 4);
    assert_eq!(msg.ref_count(), 0);
    // still linked until the sweep
    assert_eq!(store.len(), 1);
    assert_eq!(store.clean(), 1);
}
