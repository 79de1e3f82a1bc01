//! In-memory store with versioned compare-and-swap writes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::error::{EngineError, EngineResult};
use crate::core::model::{
    CompositeResource, CompositeUnitLink, Service, ServiceCompositeLink, ServiceUnitLink,
    Transition, UnitResource,
};
use crate::core::store::{Predicate, Record, Store, Table};

/// One collection held in a `BTreeMap` behind a `parking_lot::RwLock`.
///
/// Locks are taken and released inside each call, never across an await.
pub struct InMemoryTable<R> {
    rows: RwLock<BTreeMap<u64, R>>,
    next_id: AtomicU64,
}

impl<R> InMemoryTable<R> {
    /// Create an empty table; ids start at 1.
    pub const fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// No stored rows.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl<R> Default for InMemoryTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Record> Table<R> for InMemoryTable<R> {
    async fn insert(&self, mut record: R) -> EngineResult<R> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        record.set_id(id);
        record.set_version(1);
        self.rows.write().insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: u64) -> EngineResult<Option<R>> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn update(&self, record: &R) -> EngineResult<R> {
        let mut rows = self.rows.write();
        let Some(stored) = rows.get_mut(&record.id()) else {
            return Err(EngineError::not_found(R::ENTITY, record.id()));
        };
        if stored.version() != record.version() {
            return Err(EngineError::ConcurrencyConflict {
                entity: R::ENTITY,
                id: record.id(),
                expected: record.version(),
                actual: stored.version(),
            });
        }
        let mut next = record.clone();
        next.set_version(record.version() + 1);
        *stored = next.clone();
        Ok(next)
    }

    async fn delete(&self, id: u64) -> EngineResult<bool> {
        Ok(self.rows.write().remove(&id).is_some())
    }

    async fn scan(&self, predicate: Predicate<'_, R>) -> EngineResult<Vec<R>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|row| predicate(row))
            .cloned()
            .collect())
    }

    async fn count(&self, predicate: Predicate<'_, R>) -> EngineResult<usize> {
        Ok(self.rows.read().values().filter(|row| predicate(row)).count())
    }

    async fn delete_where(&self, predicate: Predicate<'_, R>) -> EngineResult<usize> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|_, row| !predicate(row));
        Ok(before - rows.len())
    }
}

/// Store keeping every collection in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    services: InMemoryTable<Service>,
    unit_resources: InMemoryTable<UnitResource>,
    composite_resources: InMemoryTable<CompositeResource>,
    transitions: InMemoryTable<Transition>,
    service_units: InMemoryTable<ServiceUnitLink>,
    service_composites: InMemoryTable<ServiceCompositeLink>,
    composite_units: InMemoryTable<CompositeUnitLink>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    fn services(&self) -> &dyn Table<Service> {
        &self.services
    }

    fn unit_resources(&self) -> &dyn Table<UnitResource> {
        &self.unit_resources
    }

    fn composite_resources(&self) -> &dyn Table<CompositeResource> {
        &self.composite_resources
    }

    fn transitions(&self) -> &dyn Table<Transition> {
        &self.transitions
    }

    fn service_units(&self) -> &dyn Table<ServiceUnitLink> {
        &self.service_units
    }

    fn service_composites(&self) -> &dyn Table<ServiceCompositeLink> {
        &self.service_composites
    }

    fn composite_units(&self) -> &dyn Table<CompositeUnitLink> {
        &self.composite_units
    }
}
