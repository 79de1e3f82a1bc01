//! Concurrent starts racing on shared resources.
//!
//! Versioned writes must let at most one consumer hold a resource, and a
//! losing start must not leave anything claimed.

use petri_lifecycle::builders::EngineBuilder;
use petri_lifecycle::core::{
    ComponentSpec, CompositeDraft, CompositeResourceState, Engine, EngineResult, Holder,
    ServiceDraft, ServiceState, StartOutcome, UnitDraft,
};
use petri_lifecycle::util::serde::{CompositeResourceId, ServiceKind, UnitResourceId};
use rand::seq::SliceRandom;

const CONTENDERS: usize = 16;

fn engine() -> Engine {
    EngineBuilder::new().build().expect("engine")
}

async fn contenders(engine: &Engine, units: &[UnitResourceId]) -> Vec<u64> {
    let mut ids = Vec::with_capacity(CONTENDERS);
    for i in 0..CONTENDERS {
        let mut declared = units.to_vec();
        declared.shuffle(&mut rand::rng());
        let svc = engine
            .services()
            .create(ServiceDraft {
                unit_resource_ids: declared,
                ..ServiceDraft::new(format!("contender-{i}"), ServiceKind::Blocking)
            })
            .await
            .unwrap();
        engine.services().publish(svc.id).await.unwrap();
        engine.services().mark_ready(svc.id).await.unwrap();
        ids.push(svc.id);
    }
    ids
}

async fn unit(engine: &Engine, name: &str) -> UnitResourceId {
    engine
        .catalog()
        .create_unit(UnitDraft::named(name))
        .await
        .unwrap()
        .id
}

async fn composite(engine: &Engine, name: &str, units: &[UnitResourceId]) -> CompositeResourceId {
    let draft = CompositeDraft {
        name: name.into(),
        components: units
            .iter()
            .map(|&unit_resource_id| ComponentSpec {
                unit_resource_id,
                required: true,
            })
            .collect(),
        ..CompositeDraft::default()
    };
    engine.catalog().create_composite(draft).await.unwrap().id
}

async fn composite_contenders(engine: &Engine, composites: &[CompositeResourceId]) -> Vec<u64> {
    let mut ids = Vec::with_capacity(CONTENDERS);
    for i in 0..CONTENDERS {
        let svc = engine
            .services()
            .create(ServiceDraft {
                composite_resource_ids: vec![composites[i % composites.len()]],
                ..ServiceDraft::new(format!("rack-user-{i}"), ServiceKind::Blocking)
            })
            .await
            .unwrap();
        engine.services().publish(svc.id).await.unwrap();
        engine.services().mark_ready(svc.id).await.unwrap();
        ids.push(svc.id);
    }
    ids
}

fn started(results: &[(u64, EngineResult<StartOutcome>)]) -> Vec<u64> {
    results
        .iter()
        .filter(|(_, r)| r.as_ref().is_ok_and(StartOutcome::is_started))
        .map(|(id, _)| *id)
        .collect()
}

async fn assert_losers_settled(
    engine: &Engine,
    results: &[(u64, EngineResult<StartOutcome>)],
    winners: &[u64],
) {
    for (id, result) in results {
        if winners.contains(id) {
            continue;
        }
        let state = engine.services().find(*id).await.unwrap().state;
        match result {
            Ok(_) => assert_eq!(state, ServiceState::Blocked),
            Err(_) => assert_eq!(state, ServiceState::Ready),
        }
    }
}

async fn race(engine: &Engine, services: &[u64]) -> Vec<(u64, EngineResult<StartOutcome>)> {
    let handles: Vec<_> = services
        .iter()
        .map(|&id| {
            let engine = engine.clone();
            tokio::spawn(async move { (id, engine.services().start(id).await) })
        })
        .collect();
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.expect("task panicked"));
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_unit_has_exactly_one_winner() {
    let engine = engine();
    let gpu = engine
        .catalog()
        .create_unit(UnitDraft::named("gpu"))
        .await
        .unwrap()
        .id;
    let services = contenders(&engine, &[gpu]).await;

    let results = race(&engine, &services).await;
    let winners: Vec<u64> = results
        .iter()
        .filter(|(_, r)| r.as_ref().is_ok_and(StartOutcome::is_started))
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(winners.len(), 1, "results: {results:?}");

    let row = engine.catalog().find_unit(gpu).await.unwrap();
    assert_eq!(row.holder, Some(Holder::Service(winners[0])));
    let running = engine
        .services()
        .find_by_state(ServiceState::InProgress)
        .await
        .unwrap();
    assert_eq!(running.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_units_never_split_between_services() {
    let engine = engine();
    let mut units = Vec::new();
    for name in ["a", "b", "c", "d"] {
        units.push(
            engine
                .catalog()
                .create_unit(UnitDraft::named(name))
                .await
                .unwrap()
                .id,
        );
    }
    let services = contenders(&engine, &units).await;

    let results = race(&engine, &services).await;
    let winners: Vec<u64> = results
        .iter()
        .filter(|(_, r)| r.as_ref().is_ok_and(StartOutcome::is_started))
        .map(|(id, _)| *id)
        .collect();
    assert!(winners.len() <= 1, "results: {results:?}");

    for id in &units {
        let row = engine.catalog().find_unit(*id).await.unwrap();
        match winners.first() {
            // The winner holds every unit.
            Some(&winner) => assert_eq!(row.holder, Some(Holder::Service(winner))),
            // Every loser rolled back.
            None => assert_eq!(row.holder, None),
        }
    }

    // Losers are either blocked or still ready after a failed allocation.
    for (id, result) in &results {
        if winners.contains(id) {
            continue;
        }
        let state = engine.services().find(*id).await.unwrap().state;
        match result {
            Ok(_) => assert_eq!(state, ServiceState::Blocked),
            Err(_) => assert_eq!(state, ServiceState::Ready),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_composite_has_exactly_one_winner() {
    let engine = engine();
    let a = unit(&engine, "a").await;
    let b = unit(&engine, "b").await;
    let rack = composite(&engine, "rack", &[a, b]).await;
    let services = composite_contenders(&engine, &[rack]).await;

    let results = race(&engine, &services).await;
    let winners = started(&results);
    assert_eq!(winners.len(), 1, "results: {results:?}");

    let row = engine.catalog().find_composite(rack).await.unwrap();
    assert_eq!(row.state, CompositeResourceState::Ready);
    assert_eq!(row.holder, Some(Holder::Service(winners[0])));
    for component in engine.catalog().components(rack).await.unwrap() {
        assert_eq!(component.holder, Some(Holder::Composite(rack)));
    }
    assert_losers_settled(&engine, &results, &winners).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_composites_never_share_a_component() {
    let engine = engine();
    let shared = unit(&engine, "shared").await;
    let left_only = unit(&engine, "left").await;
    let right_only = unit(&engine, "right").await;
    let left = composite(&engine, "left-rack", &[left_only, shared]).await;
    let right = composite(&engine, "right-rack", &[right_only, shared]).await;
    let services = composite_contenders(&engine, &[left, right]).await;

    let results = race(&engine, &services).await;
    let winners = started(&results);
    assert_eq!(winners.len(), 1, "results: {results:?}");
    let winner = winners[0];

    let reserving = engine
        .catalog()
        .find_composites_by_state(CompositeResourceState::Reserving)
        .await
        .unwrap();
    assert!(reserving.is_empty(), "stranded: {reserving:?}");

    let (_, declared) = engine.services().declared_resources(winner).await.unwrap();
    let (won, lost, lost_only) = if declared == vec![left] {
        (left, right, right_only)
    } else {
        (right, left, left_only)
    };
    let won_row = engine.catalog().find_composite(won).await.unwrap();
    assert_eq!(won_row.state, CompositeResourceState::Ready);
    assert_eq!(won_row.holder, Some(Holder::Service(winner)));
    let lost_row = engine.catalog().find_composite(lost).await.unwrap();
    assert_eq!(lost_row.state, CompositeResourceState::Empty);
    assert_eq!(lost_row.holder, None);

    let shared_row = engine.catalog().find_unit(shared).await.unwrap();
    assert_eq!(shared_row.holder, Some(Holder::Composite(won)));
    assert_eq!(engine.catalog().find_unit(lost_only).await.unwrap().holder, None);
    assert_losers_settled(&engine, &results, &winners).await;
}
