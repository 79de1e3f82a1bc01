//! On-demand aggregation over the store. Nothing is cached between calls.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::EngineResult;
use crate::core::model::{CompositeResource, Service, Transition, UnitResource};
use crate::core::state::{
    CompositeResourceState, LifecycleState, TransitionStatus, UnitResourceState,
};
use crate::core::store::Store;
use crate::util::clock::{now_ms, MS_PER_DAY};
use crate::util::serde::ResourceKind;

const HOURS_PER_DAY: usize = 24;

/// Row counts keyed by state name. Every state of the entity is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    /// Number of rows.
    pub total: usize,
    /// Rows per state.
    pub by_state: BTreeMap<String, usize>,
}

impl StateCounts {
    fn tally<S: LifecycleState>(states: impl IntoIterator<Item = S>) -> Self {
        let mut by_state: BTreeMap<String, usize> =
            S::ALL.iter().map(|s| (s.to_string(), 0)).collect();
        let mut total = 0;
        for state in states {
            *by_state.entry(state.to_string()).or_default() += 1;
            total += 1;
        }
        Self { total, by_state }
    }

    /// Count for one state.
    pub fn get(&self, state: impl Display) -> usize {
        self.by_state.get(&state.to_string()).copied().unwrap_or(0)
    }
}

/// Point-in-time system metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Services by state.
    pub services: StateCounts,
    /// Unit resources by state.
    pub unit_resources: StateCounts,
    /// Composite resources by state.
    pub composite_resources: StateCounts,
    /// All ledger rows.
    pub transitions_total: usize,
    /// Pending or in-progress rows.
    pub transitions_active: usize,
    /// Failed rows.
    pub transitions_failed: usize,
    /// Mean duration of completed rows, in seconds.
    pub average_transition_secs: f64,
    /// Completed rows per hour over the last 24 hours.
    pub throughput_per_hour: f64,
    /// When the snapshot was taken (ms since epoch).
    pub generated_at_ms: u128,
}

/// Ledger statistics for a creation-time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceWindow {
    /// Window start (ms since epoch, inclusive).
    pub start_ms: u128,
    /// Window end (ms since epoch, exclusive).
    pub end_ms: u128,
    /// Rows created in the window.
    pub total: usize,
    /// Completed rows.
    pub successful: usize,
    /// Failed rows.
    pub failed: usize,
    /// Mean duration of finished rows, in seconds.
    pub average_duration_secs: f64,
}

/// Utilization of one resource family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    /// Family.
    pub kind: ResourceKind,
    /// Rows by state.
    pub counts: StateCounts,
    /// Share of rows held by a consumer, from 0 to 100.
    pub busy_percent: f64,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[allow(clippy::cast_precision_loss)]
fn average_secs(durations: &[u128]) -> f64 {
    if durations.is_empty() {
        return 0.0;
    }
    let sum: u128 = durations.iter().sum();
    sum as f64 / durations.len() as f64 / 1000.0
}

/// Read-only aggregation of store rows.
#[derive(Clone)]
pub struct EngineMetrics {
    store: Arc<dyn Store>,
}

impl EngineMetrics {
    /// Create the aggregator.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Counts, ledger health and throughput right now.
    pub async fn snapshot(&self) -> EngineResult<MetricsSnapshot> {
        let services: Vec<Service> = self.store.services().all().await?;
        let units: Vec<UnitResource> = self.store.unit_resources().all().await?;
        let composites: Vec<CompositeResource> = self.store.composite_resources().all().await?;
        let transitions: Vec<Transition> = self.store.transitions().all().await?;

        let now = now_ms();
        let day_ago = now.saturating_sub(MS_PER_DAY);
        let completed: Vec<&Transition> = transitions
            .iter()
            .filter(|t| t.status == TransitionStatus::Completed)
            .collect();
        let durations: Vec<u128> = completed.iter().filter_map(|t| t.duration_ms()).collect();
        let recent = completed
            .iter()
            .filter(|t| t.completed_at_ms.is_some_and(|at| at >= day_ago))
            .count();

        Ok(MetricsSnapshot {
            services: StateCounts::tally(services.iter().map(|s| s.state)),
            unit_resources: StateCounts::tally(units.iter().map(|u| u.state)),
            composite_resources: StateCounts::tally(composites.iter().map(|c| c.state)),
            transitions_total: transitions.len(),
            transitions_active: transitions.iter().filter(|t| t.status.is_active()).count(),
            transitions_failed: transitions
                .iter()
                .filter(|t| t.status == TransitionStatus::Failed)
                .count(),
            average_transition_secs: average_secs(&durations),
            throughput_per_hour: ratio(recent, HOURS_PER_DAY),
            generated_at_ms: now,
        })
    }

    /// Ledger statistics for rows created in `[start_ms, end_ms)`.
    pub async fn performance_window(
        &self,
        start_ms: u128,
        end_ms: u128,
    ) -> EngineResult<PerformanceWindow> {
        let rows = self
            .store
            .transitions()
            .scan(&move |t: &Transition| t.created_at_ms >= start_ms && t.created_at_ms < end_ms)
            .await?;
        let durations: Vec<u128> = rows.iter().filter_map(Transition::duration_ms).collect();
        Ok(PerformanceWindow {
            start_ms,
            end_ms,
            total: rows.len(),
            successful: rows
                .iter()
                .filter(|t| t.status == TransitionStatus::Completed)
                .count(),
            failed: rows
                .iter()
                .filter(|t| t.status == TransitionStatus::Failed)
                .count(),
            average_duration_secs: average_secs(&durations),
        })
    }

    /// Per-family state counts and busy share.
    pub async fn utilization(&self) -> EngineResult<Vec<ResourceUtilization>> {
        let units = self.store.unit_resources().all().await?;
        let composites = self.store.composite_resources().all().await?;

        let unit_counts = StateCounts::tally(units.iter().map(|u| u.state));
        let unit_busy =
            unit_counts.get(UnitResourceState::Assigned) + unit_counts.get(UnitResourceState::InUse);
        let composite_counts = StateCounts::tally(composites.iter().map(|c| c.state));
        let composite_busy = composite_counts.get(CompositeResourceState::Ready)
            + composite_counts.get(CompositeResourceState::Assigned);

        Ok(vec![
            ResourceUtilization {
                kind: ResourceKind::Unit,
                busy_percent: ratio(unit_busy, unit_counts.total) * 100.0,
                counts: unit_counts,
            },
            ResourceUtilization {
                kind: ResourceKind::Composite,
                busy_percent: ratio(composite_busy, composite_counts.total) * 100.0,
                counts: composite_counts,
            },
        ])
    }
}
