//! Resource allocation coordinator.
//!
//! Availability policy per service kind:
//!
//! - `Blocking`: every required unit is `Free` and every required composite is
//!   reservable. A kind with no required resources is vacuously satisfied.
//! - `NonBlocking`: at least one required unit or composite is available.
//!
//! Links not flagged `required` never affect the policy. They are claimed
//! when free and skipped otherwise.
//!
//! The `NonBlocking` check is advisory. [`ResourceAllocator::allocate`] still
//! claims every required resource and fails as a whole if any single claim
//! fails, so a start may be refused even though the check passed. Claims are
//! dispatched concurrently and the outcome is decided once all have settled;
//! a failed call frees everything it claimed before returning.

use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, EngineResult};
use crate::core::model::{CompositeResource, Holder, UnitResource};
use crate::core::reservation::{claim_unit, free_unit, rollback_units, CompositeReservation};
use crate::core::store::{service_composite_links, service_unit_links, Store};
use crate::util::serde::{CompositeResourceId, ServiceId, ServiceKind, UnitResourceId};

/// Resources touched by an allocate or release call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClaim {
    /// Owning service.
    pub service_id: ServiceId,
    /// Unit resources claimed or released.
    pub unit_resources: Vec<UnitResourceId>,
    /// Composite resources reserved or released.
    pub composite_resources: Vec<CompositeResourceId>,
}

impl ResourceClaim {
    fn empty(service_id: ServiceId) -> Self {
        Self {
            service_id,
            ..Self::default()
        }
    }

    /// Nothing was touched.
    pub fn is_empty(&self) -> bool {
        self.unit_resources.is_empty() && self.composite_resources.is_empty()
    }
}

/// Decides whether a service's demand can be met and performs the claims.
#[derive(Clone)]
pub struct ResourceAllocator {
    store: Arc<dyn Store>,
    reservation: CompositeReservation,
}

impl ResourceAllocator {
    /// Create a coordinator over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        let reservation = CompositeReservation::new(store.clone());
        Self { store, reservation }
    }

    /// The reservation protocol used for composites.
    pub const fn reservation(&self) -> &CompositeReservation {
        &self.reservation
    }

    async fn declared(
        &self,
        service_id: ServiceId,
    ) -> EngineResult<(Vec<UnitResource>, Vec<CompositeResource>)> {
        let store = self.store.as_ref();
        let unit_links = service_unit_links(store, service_id).await?;
        let composite_links = service_composite_links(store, service_id).await?;
        let units = try_join_all(
            unit_links
                .iter()
                .filter(|link| link.required)
                .map(|link| store.unit_resources().fetch(link.unit_resource_id)),
        );
        let composites = try_join_all(
            composite_links
                .iter()
                .filter(|link| link.required)
                .map(|link| store.composite_resources().fetch(link.composite_resource_id)),
        );
        futures::try_join!(units, composites)
    }

    /// Whether the service's required resources currently satisfy its policy.
    pub async fn check_availability(&self, service_id: ServiceId) -> EngineResult<bool> {
        let service = self.store.services().fetch(service_id).await?;
        let (units, composites) = self.declared(service_id).await?;

        let composite_flags =
            try_join_all(composites.iter().map(|c| self.reservation.is_available(c))).await?;
        let unit_flags: Vec<bool> = units.iter().map(|u| u.state.is_available()).collect();

        let available = match service.kind {
            ServiceKind::Blocking => {
                unit_flags.iter().all(|&free| free) && composite_flags.iter().all(|&ok| ok)
            }
            ServiceKind::NonBlocking => {
                unit_flags.iter().any(|&free| free) || composite_flags.iter().any(|&ok| ok)
            }
        };
        tracing::debug!(
            service_id,
            kind = ?service.kind,
            units = units.len(),
            composites = composites.len(),
            available,
            "availability checked"
        );
        Ok(available)
    }

    /// Claim every required resource for the service, plus whichever
    /// optional ones are free.
    ///
    /// Units move `Free -> Assigned` and composites are reserved to `Ready`,
    /// all held by the service. Fails with
    /// [`EngineError::ResourceAllocation`] when the policy is not met or a
    /// resource is not in its expected state, and with
    /// [`EngineError::ConcurrencyConflict`] when a concurrent writer won a
    /// claim. On failure nothing stays claimed by this call.
    pub async fn allocate(&self, service_id: ServiceId) -> EngineResult<ResourceClaim> {
        if !self.check_availability(service_id).await? {
            return Err(EngineError::ResourceAllocation(format!(
                "insufficient resources for service {service_id}"
            )));
        }

        let store = self.store.as_ref();
        let holder = Holder::Service(service_id);
        let unit_links = service_unit_links(store, service_id).await?;
        let composite_links = service_composite_links(store, service_id).await?;

        let unit_claims = join_all(
            unit_links
                .iter()
                .map(|link| claim_unit(store, link.unit_resource_id, holder)),
        );
        let composite_claims = join_all(
            composite_links
                .iter()
                .map(|link| self.reservation.reserve(link.composite_resource_id, holder)),
        );
        let (unit_results, composite_results) =
            futures::future::join(unit_claims, composite_claims).await;

        let mut claim = ResourceClaim::empty(service_id);
        let mut failure = None;
        for (link, result) in unit_links.iter().zip(unit_results) {
            match result {
                Ok(unit) => claim.unit_resources.push(unit.id),
                Err(err) if link.required => {
                    failure.get_or_insert(err);
                }
                Err(err) => {
                    tracing::debug!(
                        service_id,
                        resource_id = link.unit_resource_id,
                        error = %err,
                        "optional unit resource skipped"
                    );
                }
            }
        }
        for (link, result) in composite_links.iter().zip(composite_results) {
            match result {
                Ok(composite) => claim.composite_resources.push(composite.id),
                Err(err) if link.required => {
                    failure.get_or_insert(err);
                }
                Err(err) => {
                    tracing::debug!(
                        service_id,
                        composite_id = link.composite_resource_id,
                        error = %err,
                        "optional composite resource skipped"
                    );
                }
            }
        }

        if let Some(err) = failure {
            tracing::warn!(
                service_id,
                error = %err,
                claimed_units = claim.unit_resources.len(),
                claimed_composites = claim.composite_resources.len(),
                "allocation failed, rolling back"
            );
            self.rollback(&claim).await;
            return Err(err);
        }

        tracing::info!(
            service_id,
            units = claim.unit_resources.len(),
            composites = claim.composite_resources.len(),
            "resources allocated"
        );
        Ok(claim)
    }

    async fn rollback(&self, claim: &ResourceClaim) {
        let holder = Holder::Service(claim.service_id);
        rollback_units(self.store.as_ref(), &claim.unit_resources, holder).await;
        let results = join_all(
            claim
                .composite_resources
                .iter()
                .map(|&id| self.reservation.release(id, holder)),
        )
        .await;
        for (id, result) in claim.composite_resources.iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(composite_id = id, error = %err, "rollback of composite failed");
            }
        }
    }

    /// Return the service's resources to their neutral state.
    ///
    /// Only resources held by the service and in a releasable state are
    /// touched; anything else is left as is. Every release is attempted and
    /// the first error, if any, is returned.
    pub async fn release(&self, service_id: ServiceId) -> EngineResult<ResourceClaim> {
        let store = self.store.as_ref();
        let holder = Holder::Service(service_id);
        let unit_links = service_unit_links(store, service_id).await?;
        let composite_links = service_composite_links(store, service_id).await?;

        let unit_releases = join_all(
            unit_links
                .iter()
                .map(|link| free_unit(store, link.unit_resource_id, holder)),
        );
        let composite_releases = join_all(composite_links.iter().map(|link| async move {
            let composite = store
                .composite_resources()
                .fetch(link.composite_resource_id)
                .await?;
            if !composite.is_held_by(holder) || !composite.state.is_releasable() {
                return Ok::<_, EngineError>(None);
            }
            self.reservation.release(composite.id, holder).await.map(Some)
        }));
        let (unit_results, composite_results) =
            futures::future::join(unit_releases, composite_releases).await;

        let mut released = ResourceClaim::empty(service_id);
        let mut first_error = None;
        for result in unit_results {
            match result {
                Ok(Some(unit)) => released.unit_resources.push(unit.id),
                Ok(None) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        for result in composite_results {
            match result {
                Ok(Some(composite)) => released.composite_resources.push(composite.id),
                Ok(None) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_error {
            tracing::error!(service_id, error = %err, "resource release incomplete");
            return Err(err);
        }
        tracing::info!(
            service_id,
            units = released.unit_resources.len(),
            composites = released.composite_resources.len(),
            "resources released"
        );
        Ok(released)
    }

    /// Best-effort [`release`](Self::release): failures are logged and
    /// swallowed.
    pub async fn force_release(&self, service_id: ServiceId) {
        if let Err(err) = self.release(service_id).await {
            tracing::warn!(service_id, error = %err, "forced release swallowed an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{CompositeUnitLink, Service, ServiceCompositeLink, ServiceUnitLink};
    use crate::core::state::{CompositeResourceState, UnitResourceState};
    use crate::infra::InMemoryStore;
    use crate::util::serde::Priority;

    struct Fixture {
        store: Arc<dyn Store>,
        allocator: ResourceAllocator,
    }

    impl Fixture {
        fn new() -> Self {
            let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
            let allocator = ResourceAllocator::new(store.clone());
            Self { store, allocator }
        }

        async fn unit(&self, state: UnitResourceState) -> u64 {
            let mut unit = UnitResource::new("unit");
            unit.state = state;
            self.store.unit_resources().insert(unit).await.unwrap().id
        }

        async fn service(&self, kind: ServiceKind, units: &[u64], composites: &[u64]) -> u64 {
            let service = Service::new("svc", kind, Priority::Normal);
            let id = self.store.services().insert(service).await.unwrap().id;
            for &u in units {
                self.store
                    .service_units()
                    .insert(ServiceUnitLink::new(id, u))
                    .await
                    .unwrap();
            }
            for &c in composites {
                self.store
                    .service_composites()
                    .insert(ServiceCompositeLink::new(id, c))
                    .await
                    .unwrap();
            }
            id
        }

        async fn unit_state(&self, id: u64) -> UnitResourceState {
            self.store.unit_resources().fetch(id).await.unwrap().state
        }
    }

    #[tokio::test]
    async fn test_blocking_requires_everything() {
        let fx = Fixture::new();
        let a = fx.unit(UnitResourceState::Free).await;
        let b = fx.unit(UnitResourceState::InUse).await;
        let svc = fx.service(ServiceKind::Blocking, &[a, b], &[]).await;
        assert!(!fx.allocator.check_availability(svc).await.unwrap());

        let err = fx.allocator.allocate(svc).await.unwrap_err();
        assert!(matches!(err, EngineError::ResourceAllocation(_)));
        assert_eq!(fx.unit_state(a).await, UnitResourceState::Free);
    }

    #[tokio::test]
    async fn test_blocking_with_no_resources_is_available() {
        let fx = Fixture::new();
        let svc = fx.service(ServiceKind::Blocking, &[], &[]).await;
        assert!(fx.allocator.check_availability(svc).await.unwrap());
        assert!(fx.allocator.allocate(svc).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_blocking_mismatch_rolls_back() {
        let fx = Fixture::new();
        let a = fx.unit(UnitResourceState::Free).await;
        let b = fx.unit(UnitResourceState::InUse).await;
        let svc = fx.service(ServiceKind::NonBlocking, &[a, b], &[]).await;

        assert!(fx.allocator.check_availability(svc).await.unwrap());
        let err = fx.allocator.allocate(svc).await.unwrap_err();
        assert!(
            matches!(err, EngineError::ResourceAllocation(ref m) if m.contains(&format!("unit resource {b}")))
        );
        assert_eq!(fx.unit_state(a).await, UnitResourceState::Free);
        assert_eq!(fx.unit_state(b).await, UnitResourceState::InUse);
    }

    #[tokio::test]
    async fn test_allocate_release_round_trip() {
        let fx = Fixture::new();
        let a = fx.unit(UnitResourceState::Free).await;
        let c1 = fx.unit(UnitResourceState::Free).await;
        let composite = fx
            .store
            .composite_resources()
            .insert(CompositeResource::new("pair"))
            .await
            .unwrap();
        fx.store
            .composite_units()
            .insert(CompositeUnitLink::new(composite.id, c1, true))
            .await
            .unwrap();
        let svc = fx.service(ServiceKind::Blocking, &[a], &[composite.id]).await;

        let claim = fx.allocator.allocate(svc).await.unwrap();
        assert_eq!(claim.unit_resources, vec![a]);
        assert_eq!(claim.composite_resources, vec![composite.id]);
        assert_eq!(fx.unit_state(a).await, UnitResourceState::Assigned);
        assert_eq!(fx.unit_state(c1).await, UnitResourceState::Assigned);

        let released = fx.allocator.release(svc).await.unwrap();
        assert_eq!(released, claim);
        assert_eq!(fx.unit_state(a).await, UnitResourceState::Free);
        assert_eq!(fx.unit_state(c1).await, UnitResourceState::Free);
        let composite = fx.store.composite_resources().fetch(composite.id).await.unwrap();
        assert_eq!(composite.state, CompositeResourceState::Empty);
    }

    #[tokio::test]
    async fn test_optional_links_do_not_gate_the_policy() {
        let fx = Fixture::new();
        let gpu = fx.unit(UnitResourceState::Free).await;
        let busy = fx.unit(UnitResourceState::InUse).await;
        let spare = fx.unit(UnitResourceState::Free).await;
        let svc = fx.service(ServiceKind::Blocking, &[gpu], &[]).await;
        for optional in [busy, spare] {
            fx.store
                .service_units()
                .insert(ServiceUnitLink::optional(svc, optional))
                .await
                .unwrap();
        }

        assert!(fx.allocator.check_availability(svc).await.unwrap());
        let claim = fx.allocator.allocate(svc).await.unwrap();
        assert_eq!(claim.unit_resources, vec![gpu, spare]);
        assert_eq!(fx.unit_state(busy).await, UnitResourceState::InUse);

        fx.allocator.release(svc).await.unwrap();
        assert_eq!(fx.unit_state(spare).await, UnitResourceState::Free);
    }

    #[tokio::test]
    async fn test_non_blocking_ignores_optional_links() {
        let fx = Fixture::new();
        let spare = fx.unit(UnitResourceState::Free).await;
        let svc = fx.service(ServiceKind::NonBlocking, &[], &[]).await;
        fx.store
            .service_units()
            .insert(ServiceUnitLink::optional(svc, spare))
            .await
            .unwrap();
        assert!(!fx.allocator.check_availability(svc).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_ignores_resources_held_elsewhere() {
        let fx = Fixture::new();
        let a = fx.unit(UnitResourceState::Free).await;
        let first = fx.service(ServiceKind::Blocking, &[a], &[]).await;
        let second = fx.service(ServiceKind::NonBlocking, &[a], &[]).await;

        fx.allocator.allocate(first).await.unwrap();
        let released = fx.allocator.release(second).await.unwrap();
        assert!(released.is_empty());
        assert_eq!(fx.unit_state(a).await, UnitResourceState::Assigned);
    }

    #[tokio::test]
    async fn test_check_availability_missing_service() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.allocator.check_availability(42).await,
            Err(EngineError::ResourceNotFound { .. })
        ));
        fx.allocator.force_release(42).await;
    }
}
