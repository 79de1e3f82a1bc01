//! Service lifecycle controller.
//!
//! Combines the service state machine with resource side effects. Each
//! action is recorded in the ledger as an already-finished synchronous
//! transition, so the ledger holds one row per lifecycle attempt.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::allocation::{ResourceAllocator, ResourceClaim};
use crate::core::error::{EngineError, EngineResult, EntityKind};
use crate::core::ledger::{TransitionLedger, TransitionRequest};
use crate::core::model::{InvolvedIds, Service, ServiceCompositeLink, ServiceUnitLink};
use crate::core::state::{can_transition, transition, ServiceState, TransitionKind};
use crate::core::store::{first_duplicate, service_composite_links, service_unit_links, Store};
use crate::util::clock::{now_ms, MS_PER_MINUTE};
use crate::util::serde::{CompositeResourceId, Priority, ServiceId, ServiceKind, UnitResourceId};

/// Fields for a new service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDraft {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Resource policy.
    pub kind: ServiceKind,
    /// Scheduling priority.
    pub priority: Priority,
    /// Execution bound in minutes.
    pub max_execution_minutes: Option<u32>,
    /// Retry automatically when blocked.
    pub auto_retry: bool,
    /// Declared unit resources.
    pub unit_resource_ids: Vec<UnitResourceId>,
    /// Declared composite resources.
    pub composite_resource_ids: Vec<CompositeResourceId>,
}

impl ServiceDraft {
    /// A normal-priority draft with no resources.
    pub fn new(name: impl Into<String>, kind: ServiceKind) -> Self {
        Self {
            name: name.into(),
            description: None,
            kind,
            priority: Priority::Normal,
            max_execution_minutes: None,
            auto_retry: false,
            unit_resource_ids: Vec::new(),
            composite_resource_ids: Vec::new(),
        }
    }
}

/// Changes to an existing service. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicePatch {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New priority.
    pub priority: Option<Priority>,
    /// New execution bound.
    pub max_execution_minutes: Option<u32>,
    /// New retry flag.
    pub auto_retry: Option<bool>,
    /// Replacement unit resource list.
    pub unit_resource_ids: Option<Vec<UnitResourceId>>,
    /// Replacement composite resource list.
    pub composite_resource_ids: Option<Vec<CompositeResourceId>>,
}

/// Filter for [`ServiceLifecycle::search`]. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceQuery {
    /// Case-insensitive substring of the name.
    pub name: Option<String>,
    /// Exact state.
    pub state: Option<ServiceState>,
    /// Exact kind.
    pub kind: Option<ServiceKind>,
    /// Exact priority.
    pub priority: Option<Priority>,
}

impl ServiceQuery {
    fn matches(&self, service: &Service) -> bool {
        self.name.as_ref().is_none_or(|needle| {
            service
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase())
        }) && self.state.is_none_or(|s| service.state == s)
            && self.kind.is_none_or(|k| service.kind == k)
            && self.priority.is_none_or(|p| service.priority == p)
    }
}

/// Result of [`ServiceLifecycle::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Resources claimed, service `InProgress`.
    Started {
        /// The service after the transition.
        service: Service,
        /// What was claimed.
        claim: ResourceClaim,
    },
    /// Resources unavailable, service `Blocked`.
    Blocked(Service),
}

impl StartOutcome {
    /// The service after the start attempt.
    pub const fn service(&self) -> &Service {
        match self {
            Self::Started { service, .. } | Self::Blocked(service) => service,
        }
    }

    /// Whether the service reached `InProgress`.
    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Started { .. })
    }
}

/// Outcome of one auto-retry attempt.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// Retried service.
    pub service_id: ServiceId,
    /// What the start attempt returned.
    pub result: EngineResult<StartOutcome>,
}

/// Top-level orchestration of service actions.
#[derive(Clone)]
pub struct ServiceLifecycle {
    store: Arc<dyn Store>,
    allocator: ResourceAllocator,
    ledger: TransitionLedger,
}

impl ServiceLifecycle {
    /// Create the controller.
    pub fn new(store: Arc<dyn Store>, allocator: ResourceAllocator, ledger: TransitionLedger) -> Self {
        Self {
            store,
            allocator,
            ledger,
        }
    }

    // ─── CRUD ────────────────────────────────────────────────────────

    /// Create a `Planned` service and its resource associations. Every
    /// referenced resource must exist.
    pub async fn create(&self, draft: ServiceDraft) -> EngineResult<Service> {
        self.ensure_resources_exist(&draft.unit_resource_ids, &draft.composite_resource_ids)
            .await?;

        let mut service = Service::new(draft.name, draft.kind, draft.priority);
        service.description = draft.description;
        service.max_execution_minutes = draft.max_execution_minutes;
        service.auto_retry = draft.auto_retry;
        let service = self.store.services().insert(service).await?;

        self.link_resources(
            service.id,
            &draft.unit_resource_ids,
            &draft.composite_resource_ids,
        )
        .await?;
        tracing::info!(service_id = service.id, name = %service.name, "service created");
        Ok(service)
    }

    /// Apply `patch`. A replacement resource list replaces the old
    /// associations and is refused while the service holds resources.
    pub async fn update(&self, id: ServiceId, patch: ServicePatch) -> EngineResult<Service> {
        let mut service = self.find(id).await?;
        let relinks =
            patch.unit_resource_ids.is_some() || patch.composite_resource_ids.is_some();
        if relinks && matches!(service.state, ServiceState::InProgress | ServiceState::Paused) {
            return Err(EngineError::BusinessLogic(format!(
                "service {id} is {}, resources cannot change while held",
                service.state
            )));
        }

        if let Some(name) = patch.name {
            service.name = name;
        }
        if patch.description.is_some() {
            service.description = patch.description;
        }
        if let Some(priority) = patch.priority {
            service.priority = priority;
        }
        if patch.max_execution_minutes.is_some() {
            service.max_execution_minutes = patch.max_execution_minutes;
        }
        if let Some(auto_retry) = patch.auto_retry {
            service.auto_retry = auto_retry;
        }
        service.updated_at_ms = now_ms();

        if relinks {
            let store = self.store.as_ref();
            let units = match patch.unit_resource_ids {
                Some(ids) => ids,
                None => service_unit_links(store, id)
                    .await?
                    .into_iter()
                    .map(|l| l.unit_resource_id)
                    .collect(),
            };
            let composites = match patch.composite_resource_ids {
                Some(ids) => ids,
                None => service_composite_links(store, id)
                    .await?
                    .into_iter()
                    .map(|l| l.composite_resource_id)
                    .collect(),
            };
            self.ensure_resources_exist(&units, &composites).await?;
            self.unlink_resources(id).await?;
            self.link_resources(id, &units, &composites).await?;
        }

        let service = self.store.services().update(&service).await?;
        tracing::info!(service_id = id, "service updated");
        Ok(service)
    }

    /// Point lookup.
    pub async fn find(&self, id: ServiceId) -> EngineResult<Service> {
        self.store.services().fetch(id).await
    }

    /// Every service.
    pub async fn list(&self) -> EngineResult<Vec<Service>> {
        self.store.services().all().await
    }

    /// Services in one state.
    pub async fn find_by_state(&self, state: ServiceState) -> EngineResult<Vec<Service>> {
        self.store
            .services()
            .scan(&move |s: &Service| s.state == state)
            .await
    }

    /// Services matching `query`, highest priority first.
    pub async fn search(&self, query: &ServiceQuery) -> EngineResult<Vec<Service>> {
        let mut found = self.store.services().scan(&|s: &Service| query.matches(s)).await?;
        found.sort_by_key(|s| (s.priority.level(), s.id));
        Ok(found)
    }

    /// Declared unit and composite resource ids.
    pub async fn declared_resources(
        &self,
        id: ServiceId,
    ) -> EngineResult<(Vec<UnitResourceId>, Vec<CompositeResourceId>)> {
        let store = self.store.as_ref();
        let units = service_unit_links(store, id).await?;
        let composites = service_composite_links(store, id).await?;
        Ok((
            units.into_iter().map(|l| l.unit_resource_id).collect(),
            composites.into_iter().map(|l| l.composite_resource_id).collect(),
        ))
    }

    /// Remove the service and its associations. Refused while `InProgress`.
    pub async fn delete(&self, id: ServiceId) -> EngineResult<()> {
        let service = self.find(id).await?;
        if service.state == ServiceState::InProgress {
            return Err(EngineError::BusinessLogic(format!(
                "service {id} is in progress and cannot be deleted"
            )));
        }
        self.allocator.force_release(id).await;
        self.unlink_resources(id).await?;
        self.store.services().delete(id).await?;
        tracing::info!(service_id = id, "service deleted");
        Ok(())
    }

    // ─── State actions ───────────────────────────────────────────────

    /// `Planned -> Published`.
    pub async fn publish(&self, id: ServiceId) -> EngineResult<Service> {
        self.step(id, ServiceState::Published, "publish").await
    }

    /// `Published`, `Blocked` or `Delayed` to `Ready`.
    pub async fn mark_ready(&self, id: ServiceId) -> EngineResult<Service> {
        self.step(id, ServiceState::Ready, "ready").await
    }

    /// `Ready -> Delayed`.
    pub async fn delay(&self, id: ServiceId) -> EngineResult<Service> {
        self.step(id, ServiceState::Delayed, "delay").await
    }

    /// `InProgress -> Paused`. Resources stay claimed.
    pub async fn pause(&self, id: ServiceId) -> EngineResult<Service> {
        self.step(id, ServiceState::Paused, "pause").await
    }

    /// `Paused -> InProgress`. The first start time is kept.
    pub async fn resume(&self, id: ServiceId) -> EngineResult<Service> {
        self.step(id, ServiceState::InProgress, "resume").await
    }

    /// Start a `Ready` service.
    ///
    /// When resources are unavailable the service moves to `Blocked`; this
    /// is a normal outcome. An allocation failure is returned as an error
    /// and leaves the service `Ready`.
    pub async fn start(&self, id: ServiceId) -> EngineResult<StartOutcome> {
        let service = self.find(id).await?;
        if service.state != ServiceState::Ready {
            return Err(invalid(&service, ServiceState::InProgress));
        }

        if !self.allocator.check_availability(id).await? {
            let mut blocked = service;
            transition(&mut blocked, ServiceState::Blocked)?;
            let blocked = self.store.services().update(&blocked).await?;
            self.audit(id, "start", ServiceState::Ready, ServiceState::Blocked, None, None)
                .await;
            tracing::warn!(service_id = id, "service blocked: resources unavailable");
            return Ok(StartOutcome::Blocked(blocked));
        }

        let claim = match self.allocator.allocate(id).await {
            Ok(claim) => claim,
            Err(err) => {
                self.audit(id, "start", ServiceState::Ready, ServiceState::InProgress, None, Some(&err))
                    .await;
                return Err(err);
            }
        };

        let mut running = service;
        transition(&mut running, ServiceState::InProgress)?;
        let running = match self.store.services().update(&running).await {
            Ok(saved) => saved,
            Err(err) => {
                // Lost the race on the service row; give the resources back.
                self.allocator.force_release(id).await;
                return Err(err);
            }
        };
        self.audit(
            id,
            "start",
            ServiceState::Ready,
            ServiceState::InProgress,
            Some(&claim),
            None,
        )
        .await;
        tracing::info!(service_id = id, "service started");
        Ok(StartOutcome::Started {
            service: running,
            claim,
        })
    }

    /// `InProgress -> Completed`, releasing resources first.
    pub async fn complete(&self, id: ServiceId) -> EngineResult<Service> {
        self.finish(id, ServiceState::Completed, "complete").await
    }

    /// `InProgress -> Stopped`, releasing resources first.
    pub async fn stop(&self, id: ServiceId) -> EngineResult<Service> {
        self.finish(id, ServiceState::Stopped, "stop").await
    }

    /// Cancel a service that is not yet final, releasing resources first.
    pub async fn cancel(&self, id: ServiceId) -> EngineResult<Service> {
        let service = self.find(id).await?;
        if service.is_final() {
            return Err(EngineError::BusinessLogic(format!(
                "service {id} is already {}",
                service.state
            )));
        }
        self.finish(id, ServiceState::Cancelled, "cancel").await
    }

    /// Move auto-retry services out of `Blocked` and start them again.
    pub async fn retry_blocked(&self) -> EngineResult<Vec<RetryOutcome>> {
        let candidates = self
            .store
            .services()
            .scan(&|s: &Service| s.state == ServiceState::Blocked && s.auto_retry)
            .await?;
        let mut outcomes = Vec::with_capacity(candidates.len());
        for service in candidates {
            let result = match self.mark_ready(service.id).await {
                Ok(_) => self.start(service.id).await,
                Err(err) => Err(err),
            };
            if let Err(err) = &result {
                tracing::warn!(service_id = service.id, error = %err, "auto-retry failed");
            }
            outcomes.push(RetryOutcome {
                service_id: service.id,
                result,
            });
        }
        Ok(outcomes)
    }

    /// `InProgress` services running longer than their execution bound.
    pub async fn find_overrunning(&self) -> EngineResult<Vec<Service>> {
        let now = now_ms();
        self.store
            .services()
            .scan(&move |s: &Service| {
                s.state == ServiceState::InProgress
                    && matches!(
                        (s.started_at_ms, s.max_execution_minutes),
                        (Some(started), Some(max)) if now.saturating_sub(started) > u128::from(max) * MS_PER_MINUTE
                    )
            })
            .await
    }

    // ─── Internals ───────────────────────────────────────────────────

    async fn step(&self, id: ServiceId, target: ServiceState, action: &str) -> EngineResult<Service> {
        let mut service = self.find(id).await?;
        let from = service.state;
        transition(&mut service, target)?;
        let service = self.store.services().update(&service).await?;
        self.audit(id, action, from, target, None, None).await;
        tracing::info!(service_id = id, %from, to = %target, action, "service transitioned");
        Ok(service)
    }

    async fn finish(&self, id: ServiceId, target: ServiceState, action: &str) -> EngineResult<Service> {
        let service = self.find(id).await?;
        if !can_transition(service.state, target) {
            return Err(invalid(&service, target));
        }
        let from = service.state;
        let released = self.allocator.release(id).await?;

        // Re-read: the release does not touch the service row, but another
        // writer may have.
        let mut service = self.find(id).await?;
        transition(&mut service, target)?;
        let service = self.store.services().update(&service).await?;
        self.audit(id, action, from, target, Some(&released), None).await;
        tracing::info!(service_id = id, %from, to = %target, action, "service finished");
        Ok(service)
    }

    async fn audit(
        &self,
        id: ServiceId,
        action: &str,
        from: ServiceState,
        to: ServiceState,
        claim: Option<&ResourceClaim>,
        error: Option<&EngineError>,
    ) {
        let mut involved = InvolvedIds::service(id);
        if let Some(claim) = claim {
            involved = involved
                .with_unit_resources(claim.unit_resources.iter().copied())
                .with_composite_resources(claim.composite_resources.iter().copied());
        }
        let request = TransitionRequest::new(TransitionKind::Synchronous)
            .description(format!("service {id}: {action} ({from} -> {to})"))
            .involved(involved)
            .meta("action", action)
            .meta("from", from.to_string())
            .meta("to", to.to_string());
        if let Err(err) = self.ledger.record_outcome(request, error).await {
            tracing::error!(service_id = id, action, error = %err, "failed to record transition");
        }
    }

    async fn ensure_resources_exist(
        &self,
        units: &[UnitResourceId],
        composites: &[CompositeResourceId],
    ) -> EngineResult<()> {
        let mut duplicates = Vec::new();
        if let Some(uid) = first_duplicate(units) {
            duplicates.push(format!("unit resource {uid} is declared more than once"));
        }
        if let Some(cid) = first_duplicate(composites) {
            duplicates.push(format!("composite resource {cid} is declared more than once"));
        }
        if !duplicates.is_empty() {
            return Err(EngineError::Validation(duplicates));
        }
        for &uid in units {
            self.store.unit_resources().fetch(uid).await?;
        }
        for &cid in composites {
            self.store.composite_resources().fetch(cid).await?;
        }
        Ok(())
    }

    async fn link_resources(
        &self,
        id: ServiceId,
        units: &[UnitResourceId],
        composites: &[CompositeResourceId],
    ) -> EngineResult<()> {
        for &uid in units {
            self.store
                .service_units()
                .insert(ServiceUnitLink::new(id, uid))
                .await?;
        }
        for &cid in composites {
            self.store
                .service_composites()
                .insert(ServiceCompositeLink::new(id, cid))
                .await?;
        }
        Ok(())
    }

    async fn unlink_resources(&self, id: ServiceId) -> EngineResult<()> {
        self.store
            .service_units()
            .delete_where(&move |l: &ServiceUnitLink| l.service_id == id)
            .await?;
        self.store
            .service_composites()
            .delete_where(&move |l: &ServiceCompositeLink| l.service_id == id)
            .await?;
        Ok(())
    }
}

fn invalid(service: &Service, target: ServiceState) -> EngineError {
    EngineError::InvalidStateTransition {
        entity: EntityKind::Service,
        id: service.id,
        from: service.state.to_string(),
        to: target.to_string(),
    }
}
