//! Tests for utility modules

use petri_lifecycle::util::clock::{days_ago, now_ms, MS_PER_DAY};
use petri_lifecycle::util::serde::{Priority, ServiceKind};

#[test]
fn test_now_ms_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(b >= a);
}

#[test]
fn test_days_ago_offsets_by_whole_days() {
    let before = now_ms();
    let cutoff = days_ago(2);
    assert!(before - cutoff >= 2 * MS_PER_DAY - 1);
}

#[test]
fn test_priority_ordering_and_level() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::Low < Priority::Normal);
    assert_eq!(Priority::Critical.level(), 1);
    assert_eq!(Priority::Low.level(), 4);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_service_kind_wire_names() {
    assert_eq!(
        serde_json::to_string(&ServiceKind::NonBlocking).unwrap(),
        "\"non_blocking\""
    );
    let kind: ServiceKind = serde_json::from_str("\"blocking\"").unwrap();
    assert_eq!(kind, ServiceKind::Blocking);
}

#[test]
fn test_init_tracing_is_idempotent() {
    petri_lifecycle::util::telemetry::init_tracing();
    petri_lifecycle::util::telemetry::init_tracing_with("debug");
    tracing::info!("tracing installed");
}
