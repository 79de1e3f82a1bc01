//! Transition ledger: retention cleanup, long-running detection and the
//! trigger surface.

use std::sync::Arc;
use std::time::Duration;

use petri_lifecycle::builders::EngineBuilder;
use petri_lifecycle::config::EngineConfig;
use petri_lifecycle::core::{
    DelayedExecutor, Engine, InvolvedIds, Transition, TransitionKind, TransitionRequest,
    TransitionStatus,
};
use petri_lifecycle::runtime::api::{self, TriggerTransitionRequest};
use petri_lifecycle::util::clock::{days_ago, ms_ago, now_ms};

fn engine() -> Engine {
    let config = EngineConfig {
        simulated_work_ms: 0,
        ..EngineConfig::default()
    };
    EngineBuilder::new().config(config).build().expect("engine")
}

async fn finished_at(engine: &Engine, status: TransitionStatus, completed_at_ms: u128) {
    let mut t = Transition::new(TransitionKind::Normal, "aged");
    t.status = status;
    t.started_at_ms = Some(completed_at_ms);
    t.completed_at_ms = Some(completed_at_ms);
    engine.store().transitions().insert(t).await.unwrap();
}

#[tokio::test]
async fn test_cleanup_removes_only_old_finished_rows() {
    let engine = engine();
    finished_at(&engine, TransitionStatus::Completed, days_ago(10)).await;
    finished_at(&engine, TransitionStatus::Failed, days_ago(8)).await;
    finished_at(&engine, TransitionStatus::Completed, days_ago(1)).await;
    engine
        .ledger()
        .record(TransitionRequest::new(TransitionKind::Automatic))
        .await
        .unwrap();

    let removed = engine.ledger().cleanup(7).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(engine.ledger().find_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cleanup_count_matches_deleted_rows() {
    let engine = engine();
    for _ in 0..3 {
        engine
            .ledger()
            .trigger_synchronous(
                TransitionRequest::new(TransitionKind::Synchronous)
                    .involved(InvolvedIds::service(1)),
            )
            .await
            .unwrap();
    }
    engine
        .ledger()
        .record(TransitionRequest::new(TransitionKind::Normal))
        .await
        .unwrap();

    let removed = engine.ledger().cleanup_before(now_ms() + 1_000).await.unwrap();
    assert_eq!(removed, 3);
    let left = engine.ledger().find_all().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].status, TransitionStatus::Pending);
}

#[tokio::test]
async fn test_long_running_is_reported_not_cancelled() {
    let engine = engine();
    let mut stuck = Transition::new(TransitionKind::Automatic, "stuck");
    stuck.status = TransitionStatus::InProgress;
    stuck.started_at_ms = Some(ms_ago(Duration::from_secs(3600)));
    let stuck = engine.store().transitions().insert(stuck).await.unwrap();

    let mut fresh = Transition::new(TransitionKind::Automatic, "fresh");
    fresh.status = TransitionStatus::InProgress;
    fresh.started_at_ms = Some(now_ms());
    engine.store().transitions().insert(fresh).await.unwrap();

    let slow = engine
        .ledger()
        .find_long_running(Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(slow.len(), 1);
    assert_eq!(slow[0].id, stuck.id);
    assert_eq!(
        engine.ledger().find_by_id(stuck.id).await.unwrap().status,
        TransitionStatus::InProgress
    );
}

#[tokio::test]
async fn test_delayed_executor_stamps_duration() {
    let store = Arc::new(petri_lifecycle::infra::InMemoryStore::new());
    let engine = EngineBuilder::new()
        .store(store)
        .executor(Arc::new(DelayedExecutor::new(Duration::from_millis(20))))
        .build()
        .unwrap();

    let t = engine
        .ledger()
        .trigger_synchronous(TransitionRequest::new(TransitionKind::Synchronous).name("work"))
        .await
        .unwrap();
    assert_eq!(t.status, TransitionStatus::Completed);
    assert!(t.duration_ms().unwrap() >= 20);
}

#[tokio::test]
async fn test_api_trigger_validates_then_records() {
    let engine = engine();

    let rejected = api::trigger_transition(&engine, TriggerTransitionRequest::default()).await;
    assert!(!rejected.success);
    let error = rejected.error.unwrap();
    assert_eq!(error.code, "validation_error");
    assert_eq!(error.details, vec!["at least one service id is required"]);

    let accepted = api::trigger_transition(
        &engine,
        TriggerTransitionRequest {
            service_ids: vec![4, 5],
            ..TriggerTransitionRequest::default()
        },
    )
    .await;
    assert!(accepted.success);
    let t = accepted.data.unwrap();
    assert_eq!(t.kind, TransitionKind::Synchronous);
    assert_eq!(t.status, TransitionStatus::Completed);
    assert!(t.name.starts_with("SYNCHRONOUS_"));
    assert_eq!(t.involved.services, vec![4, 5]);
}
