//! Tests for error types

use petri_lifecycle::core::{EngineError, EntityKind};

#[test]
fn test_not_found_error() {
    let err = EngineError::not_found(EntityKind::UnitResource, 7);
    assert_eq!(format!("{}", err), "unit resource 7 not found");
    assert_eq!(err.kind(), "resource_not_found");
}

#[test]
fn test_invalid_transition_error() {
    let err = EngineError::InvalidStateTransition {
        entity: EntityKind::Service,
        id: 3,
        from: "planned".into(),
        to: "completed".into(),
    };
    assert_eq!(
        format!("{}", err),
        "invalid service transition for 3: planned -> completed"
    );
}

#[test]
fn test_concurrency_conflict_error() {
    let err = EngineError::ConcurrencyConflict {
        entity: EntityKind::CompositeResource,
        id: 1,
        expected: 2,
        actual: 3,
    };
    assert_eq!(err.kind(), "concurrency_conflict");
    assert!(format!("{}", err).contains("expected version 2, found 3"));
}

#[test]
fn test_validation_error_joins_messages() {
    let err = EngineError::Validation(vec!["name too short".into(), "bad kind".into()]);
    assert_eq!(format!("{}", err), "validation failed: name too short; bad kind");
}

#[test]
fn test_backend_error_is_internal() {
    let err = EngineError::Backend("connection failed".to_string());
    assert_eq!(format!("{}", err), "backend error: connection failed");
    assert!(err.is_internal());
    assert!(!EngineError::BusinessLogic("x".into()).is_internal());
}
