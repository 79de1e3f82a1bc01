//! Transition ledger and work executors.
//!
//! Every attempt to move the system forward is recorded as a [`Transition`]
//! row. The ledger is observational: a failed record never rolls back any
//! resource state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::{EngineError, EngineResult};
use crate::core::model::{InvolvedIds, Metadata, Transition};
use crate::core::state::{transition, TransitionKind, TransitionStatus};
use crate::core::store::{Store, Table};
use crate::util::clock::{days_ago, ms_ago};
use crate::util::serde::TransitionId;

/// Performs the unit of work attached to a transition.
///
/// Implementations decide success or failure; the ledger only records it.
#[async_trait]
pub trait TransitionExecutor: Send + Sync + 'static {
    /// Run the work for `transition`. An error marks the record `Failed`
    /// with the error text.
    async fn execute(&self, transition: &Transition) -> EngineResult<()>;
}

/// Completes every transition immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateExecutor;

#[async_trait]
impl TransitionExecutor for ImmediateExecutor {
    async fn execute(&self, _transition: &Transition) -> EngineResult<()> {
        Ok(())
    }
}

/// Simulates work by sleeping for a fixed duration.
#[cfg(feature = "tokio-runtime")]
#[derive(Debug, Clone, Copy)]
pub struct DelayedExecutor {
    delay: Duration,
}

#[cfg(feature = "tokio-runtime")]
impl DelayedExecutor {
    /// Sleep for `delay` before completing.
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[cfg(feature = "tokio-runtime")]
#[async_trait]
impl TransitionExecutor for DelayedExecutor {
    async fn execute(&self, _transition: &Transition) -> EngineResult<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Input for a new ledger record.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    /// How the record is driven.
    pub kind: TransitionKind,
    /// Explicit name; generated from the kind when absent.
    pub name: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Entities involved.
    pub involved: InvolvedIds,
    /// Free-form values.
    pub metadata: Metadata,
}

impl TransitionRequest {
    /// A request of the given kind with nothing else set.
    pub fn new(kind: TransitionKind) -> Self {
        Self {
            kind,
            name: None,
            description: None,
            involved: InvolvedIds::default(),
            metadata: Metadata::new(),
        }
    }

    /// Set the name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the involved entities.
    #[must_use]
    pub fn involved(mut self, involved: InvolvedIds) -> Self {
        self.involved = involved;
        self
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn into_transition(self) -> Transition {
        let name = self.name.unwrap_or_else(|| generate_name(self.kind));
        let mut t = Transition::new(self.kind, name);
        t.description = self.description;
        t.involved = self.involved;
        t.metadata = self.metadata;
        t
    }
}

/// `<KIND>_<uuid>` with the uuid in simple form.
pub fn generate_name(kind: TransitionKind) -> String {
    format!("{}_{}", kind.code(), uuid::Uuid::new_v4().simple())
}

/// Counts from one [`TransitionLedger::process_automatic`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Pending automatic records picked up.
    pub picked: usize,
    /// Records that completed.
    pub completed: usize,
    /// Records that failed.
    pub failed: usize,
    /// Records skipped because another writer got there first.
    pub skipped: usize,
}

/// Append-only record of transition attempts.
#[derive(Clone)]
pub struct TransitionLedger {
    store: Arc<dyn Store>,
    executor: Arc<dyn TransitionExecutor>,
}

impl TransitionLedger {
    /// Create a ledger over `store` whose work runs on `executor`.
    pub fn new(store: Arc<dyn Store>, executor: Arc<dyn TransitionExecutor>) -> Self {
        Self { store, executor }
    }

    fn table(&self) -> &dyn Table<Transition> {
        self.store.transitions()
    }

    /// Create a `Pending` record.
    pub async fn record(&self, request: TransitionRequest) -> EngineResult<Transition> {
        let saved = self.table().insert(request.into_transition()).await?;
        tracing::debug!(transition_id = saved.id, name = %saved.name, "transition recorded");
        Ok(saved)
    }

    /// Record an attempt that already ran: the row is written `Completed`,
    /// or `Failed` with `error` when one is given.
    pub async fn record_outcome(
        &self,
        request: TransitionRequest,
        error: Option<&EngineError>,
    ) -> EngineResult<Transition> {
        let mut t = request.into_transition();
        transition(&mut t, TransitionStatus::InProgress)?;
        match error {
            None => transition(&mut t, TransitionStatus::Completed)?,
            Some(err) => {
                t.error_message = Some(err.to_string());
                transition(&mut t, TransitionStatus::Failed)?;
            }
        }
        self.table().insert(t).await
    }

    /// Create a record, run its work on the executor and store the outcome.
    ///
    /// A failing work step is not an error for the caller: the returned
    /// record is `Failed` and carries the message.
    pub async fn trigger_synchronous(&self, request: TransitionRequest) -> EngineResult<Transition> {
        let pending = self.record(request).await?;
        let t = self.run(pending).await?;
        tracing::info!(
            transition_id = t.id,
            name = %t.name,
            status = %t.status,
            "synchronous transition finished"
        );
        Ok(t)
    }

    async fn run(&self, mut t: Transition) -> EngineResult<Transition> {
        transition(&mut t, TransitionStatus::InProgress)?;
        let mut t = self.table().update(&t).await?;
        match self.executor.execute(&t).await {
            Ok(()) => transition(&mut t, TransitionStatus::Completed)?,
            Err(err) => {
                tracing::warn!(transition_id = t.id, error = %err, "transition work failed");
                t.error_message = Some(err.to_string());
                transition(&mut t, TransitionStatus::Failed)?;
            }
        }
        self.table().update(&t).await
    }

    /// Drive every `Pending` automatic record through start and completion.
    pub async fn process_automatic(&self) -> EngineResult<ProcessReport> {
        let pending = self
            .table()
            .scan(&|t: &Transition| {
                t.kind == TransitionKind::Automatic && t.status == TransitionStatus::Pending
            })
            .await?;

        let mut report = ProcessReport {
            picked: pending.len(),
            ..ProcessReport::default()
        };
        for t in pending {
            let id = t.id;
            match self.run(t).await {
                Ok(done) if done.status == TransitionStatus::Completed => report.completed += 1,
                Ok(_) => report.failed += 1,
                Err(EngineError::ConcurrencyConflict { .. }) => {
                    tracing::debug!(transition_id = id, "automatic transition taken elsewhere");
                    report.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        if report.picked > 0 {
            tracing::info!(
                picked = report.picked,
                completed = report.completed,
                failed = report.failed,
                "automatic transitions processed"
            );
        }
        Ok(report)
    }

    /// Mark an `InProgress` record `Failed` with `cancelled: <reason>`.
    pub async fn cancel(&self, id: TransitionId, reason: &str) -> EngineResult<Transition> {
        let mut t = self.table().fetch(id).await?;
        if t.status != TransitionStatus::InProgress {
            return Err(EngineError::BusinessLogic(format!(
                "transition {id} is {}, only in-progress transitions can be cancelled",
                t.status
            )));
        }
        t.error_message = Some(format!("cancelled: {reason}"));
        transition(&mut t, TransitionStatus::Failed)?;
        let t = self.table().update(&t).await?;
        tracing::info!(transition_id = id, reason, "transition cancelled");
        Ok(t)
    }

    /// Delete finished records completed more than `days` ago.
    pub async fn cleanup(&self, days: u32) -> EngineResult<usize> {
        self.cleanup_before(days_ago(days)).await
    }

    /// Delete finished records completed before `cutoff_ms`.
    pub async fn cleanup_before(&self, cutoff_ms: u128) -> EngineResult<usize> {
        let removed = self
            .table()
            .delete_where(&move |t: &Transition| {
                !t.status.is_active() && t.completed_at_ms.is_some_and(|at| at < cutoff_ms)
            })
            .await?;
        tracing::info!(removed, "transition cleanup finished");
        Ok(removed)
    }

    /// Point lookup.
    pub async fn find_by_id(&self, id: TransitionId) -> EngineResult<Transition> {
        self.table().fetch(id).await
    }

    /// Every record.
    pub async fn find_all(&self) -> EngineResult<Vec<Transition>> {
        self.table().all().await
    }

    /// Records of one kind.
    pub async fn find_by_kind(&self, kind: TransitionKind) -> EngineResult<Vec<Transition>> {
        self.table().scan(&move |t: &Transition| t.kind == kind).await
    }

    /// Records in one status.
    pub async fn find_by_status(&self, status: TransitionStatus) -> EngineResult<Vec<Transition>> {
        self.table().scan(&move |t: &Transition| t.status == status).await
    }

    /// `Pending` and `InProgress` records.
    pub async fn find_active(&self) -> EngineResult<Vec<Transition>> {
        self.table().scan(&|t: &Transition| t.status.is_active()).await
    }

    /// `InProgress` records started more than `threshold` ago.
    pub async fn find_long_running(&self, threshold: Duration) -> EngineResult<Vec<Transition>> {
        let cutoff = ms_ago(threshold);
        self.table()
            .scan(&move |t: &Transition| {
                t.status == TransitionStatus::InProgress
                    && t.started_at_ms.is_some_and(|at| at < cutoff)
            })
            .await
    }
}
