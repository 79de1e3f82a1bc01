//! Tests for the per-entity state machines

use petri_lifecycle::core::{
    can_transition, transition, CompositeResourceState, EngineError, LifecycleState, Service,
    ServiceState, TransitionStatus, UnitResource, UnitResourceState,
};
use petri_lifecycle::util::serde::{Priority, ServiceKind};

#[test]
fn test_unit_resource_table() {
    use UnitResourceState::*;
    assert!(can_transition(Free, Assigned));
    assert!(can_transition(InUse, Zombie));
    assert!(!can_transition(Free, InUse));
    assert!(!can_transition(Zombie, Assigned));
}

#[test]
fn test_composite_resource_table() {
    use CompositeResourceState::*;
    assert!(can_transition(Empty, Reserving));
    assert!(can_transition(Reserving, Empty));
    assert!(!can_transition(Empty, Ready));
    assert!(!can_transition(Assigned, Ready));
}

#[test]
fn test_final_states_have_no_exits() {
    for state in ServiceState::ALL {
        let is_final = matches!(
            state,
            ServiceState::Completed | ServiceState::Stopped | ServiceState::Cancelled
        );
        assert_eq!(state.is_final(), is_final, "{state}");
    }
    assert!(TransitionStatus::Failed.is_final());
    assert!(!TransitionStatus::Pending.is_final());
}

#[test]
fn test_transition_rejects_and_leaves_state() {
    let mut svc = Service::new("svc", ServiceKind::Blocking, Priority::Normal);
    let err = transition(&mut svc, ServiceState::InProgress).unwrap_err();
    assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
    assert_eq!(svc.state, ServiceState::Planned);
}

#[test]
fn test_unit_free_clears_holder() {
    let mut unit = UnitResource::new("gpu");
    transition(&mut unit, UnitResourceState::Assigned).unwrap();
    unit.holder = Some(petri_lifecycle::core::Holder::Direct);
    transition(&mut unit, UnitResourceState::InUse).unwrap();
    assert!(unit.last_used_at_ms.is_some());
    transition(&mut unit, UnitResourceState::Free).unwrap();
    assert_eq!(unit.holder, None);
}

#[test]
fn test_service_start_time_survives_pause() {
    let mut svc = Service::new("svc", ServiceKind::Blocking, Priority::Normal);
    for target in [ServiceState::Published, ServiceState::Ready, ServiceState::InProgress] {
        transition(&mut svc, target).unwrap();
    }
    let started = svc.started_at_ms;
    transition(&mut svc, ServiceState::Paused).unwrap();
    transition(&mut svc, ServiceState::InProgress).unwrap();
    assert_eq!(svc.started_at_ms, started);
    transition(&mut svc, ServiceState::Completed).unwrap();
    assert!(svc.completed_at_ms.is_some());
}
