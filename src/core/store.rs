//! Persistence boundary.
//!
//! The engine talks to an asynchronous keyed store made of one [`Table`] per
//! entity collection. Every row carries a version; [`Table::update`] is a
//! compare-and-swap on that version so two writers racing on the same row
//! cannot both win.

use async_trait::async_trait;

use crate::core::error::{EngineError, EngineResult, EntityKind};
use crate::core::model::{
    CompositeResource, CompositeUnitLink, Service, ServiceCompositeLink, ServiceUnitLink,
    Transition, UnitResource,
};

/// A row stored in a [`Table`].
pub trait Record: Clone + Send + Sync + 'static {
    /// Entity family, used in errors.
    const ENTITY: EntityKind;

    /// Row identifier.
    fn id(&self) -> u64;
    /// Set the identifier on insert.
    fn set_id(&mut self, id: u64);
    /// Row version.
    fn version(&self) -> u64;
    /// Set the version after a write.
    fn set_version(&mut self, version: u64);
}

/// Row filter used by scans and bulk deletes.
pub type Predicate<'a, R> = &'a (dyn Fn(&R) -> bool + Send + Sync);

/// One keyed collection.
#[async_trait]
pub trait Table<R: Record>: Send + Sync {
    /// Insert a row, assigning a fresh id and version 1.
    async fn insert(&self, record: R) -> EngineResult<R>;

    /// Point lookup.
    async fn get(&self, id: u64) -> EngineResult<Option<R>>;

    /// Versioned write.
    ///
    /// Succeeds only when the stored version equals `record.version()`; the
    /// stored copy is returned with its version bumped. Fails with
    /// [`EngineError::ConcurrencyConflict`] otherwise, and with
    /// [`EngineError::ResourceNotFound`] if the row is gone.
    async fn update(&self, record: &R) -> EngineResult<R>;

    /// Remove a row, returning whether it existed.
    async fn delete(&self, id: u64) -> EngineResult<bool>;

    /// Rows matching `predicate`, ordered by id.
    async fn scan(&self, predicate: Predicate<'_, R>) -> EngineResult<Vec<R>>;

    /// Number of rows matching `predicate`.
    async fn count(&self, predicate: Predicate<'_, R>) -> EngineResult<usize>;

    /// Remove rows matching `predicate`, returning how many were removed.
    async fn delete_where(&self, predicate: Predicate<'_, R>) -> EngineResult<usize>;

    /// Point lookup that turns a miss into [`EngineError::ResourceNotFound`].
    async fn fetch(&self, id: u64) -> EngineResult<R> {
        self.get(id)
            .await?
            .ok_or_else(|| EngineError::not_found(R::ENTITY, id))
    }

    /// Every row, ordered by id.
    async fn all(&self) -> EngineResult<Vec<R>> {
        self.scan(&|_| true).await
    }
}

/// The set of collections the engine needs.
pub trait Store: Send + Sync + 'static {
    /// Services.
    fn services(&self) -> &dyn Table<Service>;
    /// Unit resources.
    fn unit_resources(&self) -> &dyn Table<UnitResource>;
    /// Composite resources.
    fn composite_resources(&self) -> &dyn Table<CompositeResource>;
    /// Transition ledger rows.
    fn transitions(&self) -> &dyn Table<Transition>;
    /// Service to unit resource associations.
    fn service_units(&self) -> &dyn Table<ServiceUnitLink>;
    /// Service to composite resource associations.
    fn service_composites(&self) -> &dyn Table<ServiceCompositeLink>;
    /// Composite to unit resource associations.
    fn composite_units(&self) -> &dyn Table<CompositeUnitLink>;
}

/// First id that appears more than once in `ids`.
pub(crate) fn first_duplicate(ids: &[u64]) -> Option<u64> {
    let mut seen = std::collections::BTreeSet::new();
    ids.iter().copied().find(|id| !seen.insert(*id))
}

/// Unit resource links declared by a service.
pub async fn service_unit_links(
    store: &dyn Store,
    service_id: u64,
) -> EngineResult<Vec<ServiceUnitLink>> {
    store
        .service_units()
        .scan(&move |link: &ServiceUnitLink| link.service_id == service_id)
        .await
}

/// Composite resource links declared by a service.
pub async fn service_composite_links(
    store: &dyn Store,
    service_id: u64,
) -> EngineResult<Vec<ServiceCompositeLink>> {
    store
        .service_composites()
        .scan(&move |link: &ServiceCompositeLink| link.service_id == service_id)
        .await
}

/// Component links of a composite resource.
pub async fn composite_unit_links(
    store: &dyn Store,
    composite_id: u64,
) -> EngineResult<Vec<CompositeUnitLink>> {
    store
        .composite_units()
        .scan(&move |link: &CompositeUnitLink| link.composite_resource_id == composite_id)
        .await
}
