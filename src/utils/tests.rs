use super::clock::{Clock, ManualClock, SystemClock};
use super::error::DbError;
use super::logging;
use crate::broker::message::Direction;
use crate::transport::TransportError;
use std::error::Error;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn parse_level_falls_back_to_info() {
    assert_eq!(logging::parse_level("WARNING"), tracing::Level::WARN);
    assert_eq!(logging::parse_level("trace"), tracing::Level::TRACE);
    assert_eq!(logging::parse_level("bogus"), tracing::Level::INFO);
}

#[test]
fn manual_clock_clones_share_time() {
    let clock = ManualClock::new(100);
    let other = clock.clone();
    clock.advance(5);
    assert_eq!(other.now(), 105);
    other.set(7);
    assert_eq!(clock.now(), 7);
}

#[test]
fn system_clock_is_recent() {
    // 2020-01-01
    assert!(SystemClock.now() > 1_577_836_800);
}

#[test]
fn transport_error_is_the_source() {
    let err = DbError::transport("client-a", TransportError::Closed);
    assert!(err.to_string().contains("client-a"));
    assert!(err.source().is_some());
}

#[test]
fn duplicate_entry_message_names_direction() {
    let err = DbError::DuplicateEntry {
        session: "s".into(),
        mid: 7,
        direction: Direction::Inbound,
    };
    assert_eq!(
        err.to_string(),
        "message id 7 (inbound) is already tracked for session `s`"
    );
}
