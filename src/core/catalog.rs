//! Unit and composite resource catalog.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, EngineResult, EntityKind};
use crate::core::model::{
    CompositeResource, CompositeUnitLink, Holder, ServiceCompositeLink, ServiceUnitLink,
    UnitResource,
};
use crate::core::reservation::{claim_unit, CompositeReservation};
use crate::core::state::{transition, CompositeResourceState, UnitResourceState};
use crate::core::store::{first_duplicate, Store};
use crate::util::clock::now_ms;
use crate::util::serde::{CompositeResourceId, UnitResourceId};

/// Fields for a new unit resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitDraft {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Declared capacity.
    pub capacity: Option<u32>,
    /// Location.
    pub location: Option<String>,
}

impl UnitDraft {
    /// A draft with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Changes to a unit resource. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitPatch {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New capacity.
    pub capacity: Option<u32>,
    /// New load.
    pub current_load: Option<u32>,
    /// New location.
    pub location: Option<String>,
}

/// One component of a new composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Component unit resource.
    pub unit_resource_id: UnitResourceId,
    /// Must be assigned for the composite to reach `Ready`.
    pub required: bool,
}

/// Fields for a new composite resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositeDraft {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Location.
    pub location: Option<String>,
    /// Aggregate capacity.
    pub total_capacity: Option<u32>,
    /// Minimum assigned components to reach `Ready`.
    pub min_required_components: Option<u32>,
    /// Components.
    pub components: Vec<ComponentSpec>,
}

/// Changes to a composite resource. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositePatch {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New location.
    pub location: Option<String>,
    /// New aggregate capacity.
    pub total_capacity: Option<u32>,
    /// New minimum.
    pub min_required_components: Option<u32>,
}

/// CRUD and direct operations on resources.
#[derive(Clone)]
pub struct ResourceCatalog {
    store: Arc<dyn Store>,
    reservation: CompositeReservation,
}

impl ResourceCatalog {
    /// Create the catalog.
    pub fn new(store: Arc<dyn Store>, reservation: CompositeReservation) -> Self {
        Self { store, reservation }
    }

    // ─── Unit resources ──────────────────────────────────────────────

    /// Create a `Free` unit resource.
    pub async fn create_unit(&self, draft: UnitDraft) -> EngineResult<UnitResource> {
        let mut unit = UnitResource::new(draft.name);
        unit.description = draft.description;
        unit.capacity = draft.capacity;
        unit.location = draft.location;
        let unit = self.store.unit_resources().insert(unit).await?;
        tracing::info!(resource_id = unit.id, name = %unit.name, "unit resource created");
        Ok(unit)
    }

    /// Apply `patch` to a unit resource.
    pub async fn update_unit(&self, id: UnitResourceId, patch: UnitPatch) -> EngineResult<UnitResource> {
        let mut unit = self.find_unit(id).await?;
        if let Some(name) = patch.name {
            unit.name = name;
        }
        if patch.description.is_some() {
            unit.description = patch.description;
        }
        if patch.capacity.is_some() {
            unit.capacity = patch.capacity;
        }
        if let Some(load) = patch.current_load {
            unit.current_load = load;
        }
        if patch.location.is_some() {
            unit.location = patch.location;
        }
        unit.updated_at_ms = now_ms();
        self.store.unit_resources().update(&unit).await
    }

    /// Point lookup.
    pub async fn find_unit(&self, id: UnitResourceId) -> EngineResult<UnitResource> {
        self.store.unit_resources().fetch(id).await
    }

    /// Every unit resource.
    pub async fn list_units(&self) -> EngineResult<Vec<UnitResource>> {
        self.store.unit_resources().all().await
    }

    /// Unit resources in one state.
    pub async fn find_units_by_state(&self, state: UnitResourceState) -> EngineResult<Vec<UnitResource>> {
        self.store
            .unit_resources()
            .scan(&move |u: &UnitResource| u.state == state)
            .await
    }

    /// `Free` unit resources.
    pub async fn find_available_units(&self) -> EngineResult<Vec<UnitResource>> {
        self.find_units_by_state(UnitResourceState::Free).await
    }

    /// Remove a unit resource and every association naming it. Refused
    /// while `InUse` or while a service or composite holds it.
    pub async fn delete_unit(&self, id: UnitResourceId) -> EngineResult<()> {
        let unit = self.find_unit(id).await?;
        if unit.state == UnitResourceState::InUse {
            return Err(EngineError::BusinessLogic(format!(
                "unit resource {id} is in use and cannot be deleted"
            )));
        }
        if let Some(holder @ (Holder::Service(_) | Holder::Composite(_))) = unit.holder {
            return Err(EngineError::BusinessLogic(format!(
                "unit resource {id} is held by {holder} and cannot be deleted"
            )));
        }
        self.store
            .service_units()
            .delete_where(&move |l: &ServiceUnitLink| l.unit_resource_id == id)
            .await?;
        self.store
            .composite_units()
            .delete_where(&move |l: &CompositeUnitLink| l.unit_resource_id == id)
            .await?;
        self.store.unit_resources().delete(id).await?;
        tracing::info!(resource_id = id, "unit resource deleted");
        Ok(())
    }

    /// Claim a unit directly: `Free -> Assigned`.
    pub async fn allocate_unit(&self, id: UnitResourceId) -> EngineResult<UnitResource> {
        let unit = claim_unit(self.store.as_ref(), id, Holder::Direct).await?;
        tracing::info!(resource_id = id, "unit resource allocated");
        Ok(unit)
    }

    /// `Assigned -> InUse` for a directly allocated unit.
    pub async fn use_unit(&self, id: UnitResourceId) -> EngineResult<UnitResource> {
        let mut unit = self.find_unit(id).await?;
        transition(&mut unit, UnitResourceState::InUse)?;
        held_directly(&unit)?;
        self.store.unit_resources().update(&unit).await
    }

    /// `Assigned` or `InUse` back to `Free` for a directly allocated unit.
    /// Units claimed by a service or a composite are released through
    /// their owner.
    pub async fn release_unit(&self, id: UnitResourceId) -> EngineResult<UnitResource> {
        let mut unit = self.find_unit(id).await?;
        if !unit.state.is_releasable() {
            return Err(EngineError::InvalidStateTransition {
                entity: EntityKind::UnitResource,
                id,
                from: unit.state.to_string(),
                to: UnitResourceState::Free.to_string(),
            });
        }
        held_directly(&unit)?;
        transition(&mut unit, UnitResourceState::Free)?;
        let unit = self.store.unit_resources().update(&unit).await?;
        tracing::info!(resource_id = id, "unit resource released");
        Ok(unit)
    }

    // ─── Composite resources ─────────────────────────────────────────

    /// Create an `Empty` composite and its component links. Every component
    /// must exist and appear once.
    pub async fn create_composite(&self, draft: CompositeDraft) -> EngineResult<CompositeResource> {
        let ids: Vec<_> = draft.components.iter().map(|c| c.unit_resource_id).collect();
        if let Some(uid) = first_duplicate(&ids) {
            return Err(EngineError::Validation(vec![format!(
                "unit resource {uid} is listed more than once as a component"
            )]));
        }
        for component in &draft.components {
            self.find_unit(component.unit_resource_id).await?;
        }
        let mut composite = CompositeResource::new(draft.name);
        composite.description = draft.description;
        composite.location = draft.location;
        composite.total_capacity = draft.total_capacity;
        composite.min_required_components = draft.min_required_components;
        let composite = self.store.composite_resources().insert(composite).await?;

        for component in &draft.components {
            self.store
                .composite_units()
                .insert(CompositeUnitLink::new(
                    composite.id,
                    component.unit_resource_id,
                    component.required,
                ))
                .await?;
        }
        tracing::info!(
            composite_id = composite.id,
            components = draft.components.len(),
            "composite resource created"
        );
        Ok(composite)
    }

    /// Apply `patch` to a composite.
    pub async fn update_composite(
        &self,
        id: CompositeResourceId,
        patch: CompositePatch,
    ) -> EngineResult<CompositeResource> {
        let mut composite = self.find_composite(id).await?;
        if let Some(name) = patch.name {
            composite.name = name;
        }
        if patch.description.is_some() {
            composite.description = patch.description;
        }
        if patch.location.is_some() {
            composite.location = patch.location;
        }
        if patch.total_capacity.is_some() {
            composite.total_capacity = patch.total_capacity;
        }
        if patch.min_required_components.is_some() {
            composite.min_required_components = patch.min_required_components;
        }
        composite.updated_at_ms = now_ms();
        self.store.composite_resources().update(&composite).await
    }

    /// Point lookup.
    pub async fn find_composite(&self, id: CompositeResourceId) -> EngineResult<CompositeResource> {
        self.store.composite_resources().fetch(id).await
    }

    /// Every composite.
    pub async fn list_composites(&self) -> EngineResult<Vec<CompositeResource>> {
        self.store.composite_resources().all().await
    }

    /// Composites in one state.
    pub async fn find_composites_by_state(
        &self,
        state: CompositeResourceState,
    ) -> EngineResult<Vec<CompositeResource>> {
        self.store
            .composite_resources()
            .scan(&move |c: &CompositeResource| c.state == state)
            .await
    }

    /// Composites that can be reserved right now.
    pub async fn find_available_composites(&self) -> EngineResult<Vec<CompositeResource>> {
        let empty = self.find_composites_by_state(CompositeResourceState::Empty).await?;
        let mut available = Vec::with_capacity(empty.len());
        for composite in empty {
            if self.reservation.is_available(&composite).await? {
                available.push(composite);
            }
        }
        Ok(available)
    }

    /// Component units of a composite.
    pub async fn components(&self, id: CompositeResourceId) -> EngineResult<Vec<UnitResource>> {
        self.find_composite(id).await?;
        self.reservation.components(id).await
    }

    /// Remove a composite and its associations. Refused while `Assigned` or
    /// `Reserving` and while a service holds it.
    pub async fn delete_composite(&self, id: CompositeResourceId) -> EngineResult<()> {
        let composite = self.find_composite(id).await?;
        if matches!(
            composite.state,
            CompositeResourceState::Assigned | CompositeResourceState::Reserving
        ) {
            return Err(EngineError::BusinessLogic(format!(
                "composite resource {id} is {} and cannot be deleted",
                composite.state
            )));
        }
        if let Some(holder @ Holder::Service(_)) = composite.holder {
            return Err(EngineError::BusinessLogic(format!(
                "composite resource {id} is held by {holder} and cannot be deleted"
            )));
        }
        if let (true, Some(holder)) = (composite.state.is_releasable(), composite.holder) {
            self.reservation.release(id, holder).await?;
        }
        self.store
            .composite_units()
            .delete_where(&move |l: &CompositeUnitLink| l.composite_resource_id == id)
            .await?;
        self.store
            .service_composites()
            .delete_where(&move |l: &ServiceCompositeLink| l.composite_resource_id == id)
            .await?;
        self.store.composite_resources().delete(id).await?;
        tracing::info!(composite_id = id, "composite resource deleted");
        Ok(())
    }

    /// Reserve a composite directly.
    pub async fn reserve(&self, id: CompositeResourceId) -> EngineResult<CompositeResource> {
        self.reservation.reserve(id, Holder::Direct).await
    }

    /// Put a directly reserved composite to use.
    pub async fn use_composite(&self, id: CompositeResourceId) -> EngineResult<CompositeResource> {
        self.reservation.use_composite(id, Holder::Direct).await
    }

    /// Release a directly reserved composite and its components.
    pub async fn release_composite(&self, id: CompositeResourceId) -> EngineResult<CompositeResource> {
        self.reservation.release(id, Holder::Direct).await
    }
}

fn held_directly(unit: &UnitResource) -> EngineResult<()> {
    match unit.holder {
        Some(Holder::Direct) => Ok(()),
        Some(holder) => Err(EngineError::BusinessLogic(format!(
            "unit resource {} is held by {holder}",
            unit.id
        ))),
        None => Err(EngineError::BusinessLogic(format!(
            "unit resource {} has no holder",
            unit.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::InMemoryStore;

    fn catalog() -> ResourceCatalog {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        ResourceCatalog::new(store.clone(), CompositeReservation::new(store))
    }

    fn unit(name: &str) -> UnitDraft {
        UnitDraft {
            name: name.into(),
            ..UnitDraft::default()
        }
    }

    #[tokio::test]
    async fn test_direct_unit_operations() {
        let catalog = catalog();
        let gpu = catalog.create_unit(unit("gpu")).await.unwrap();

        assert_eq!(catalog.allocate_unit(gpu.id).await.unwrap().holder, Some(Holder::Direct));
        assert!(matches!(
            catalog.allocate_unit(gpu.id).await,
            Err(EngineError::ResourceAllocation(_))
        ));
        catalog.use_unit(gpu.id).await.unwrap();
        assert!(matches!(
            catalog.delete_unit(gpu.id).await,
            Err(EngineError::BusinessLogic(_))
        ));
        let freed = catalog.release_unit(gpu.id).await.unwrap();
        assert_eq!(freed.state, UnitResourceState::Free);
        assert!(matches!(
            catalog.release_unit(gpu.id).await,
            Err(EngineError::InvalidStateTransition { .. })
        ));
        catalog.delete_unit(gpu.id).await.unwrap();
        assert!(catalog.list_units().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_composite_create_checks_components() {
        let catalog = catalog();
        let draft = CompositeDraft {
            name: "rack".into(),
            components: vec![ComponentSpec {
                unit_resource_id: 7,
                required: true,
            }],
            ..CompositeDraft::default()
        };
        assert!(matches!(
            catalog.create_composite(draft).await,
            Err(EngineError::ResourceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_composite_availability_and_delete() {
        let catalog = catalog();
        let a = catalog.create_unit(unit("a")).await.unwrap();
        let rack = catalog
            .create_composite(CompositeDraft {
                name: "rack".into(),
                components: vec![ComponentSpec {
                    unit_resource_id: a.id,
                    required: true,
                }],
                ..CompositeDraft::default()
            })
            .await
            .unwrap();
        assert_eq!(catalog.find_available_composites().await.unwrap().len(), 1);

        catalog.allocate_unit(a.id).await.unwrap();
        assert!(catalog.find_available_composites().await.unwrap().is_empty());
        catalog.release_unit(a.id).await.unwrap();

        catalog.reserve(rack.id).await.unwrap();
        catalog.use_composite(rack.id).await.unwrap();
        assert!(matches!(
            catalog.delete_composite(rack.id).await,
            Err(EngineError::BusinessLogic(_))
        ));
        catalog.release_composite(rack.id).await.unwrap();
        catalog.delete_composite(rack.id).await.unwrap();
        assert_eq!(catalog.find_unit(a.id).await.unwrap().state, UnitResourceState::Free);
    }
}
