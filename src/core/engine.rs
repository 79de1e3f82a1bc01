//! Engine facade bundling every component over one store.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::core::allocation::ResourceAllocator;
use crate::core::catalog::ResourceCatalog;
use crate::core::ledger::{TransitionExecutor, TransitionLedger};
use crate::core::lifecycle::ServiceLifecycle;
use crate::core::metrics::EngineMetrics;
use crate::core::store::Store;

/// The allocation and lifecycle engine.
///
/// Components share the same store and are cheap to clone.
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn Store>,
    allocator: ResourceAllocator,
    catalog: ResourceCatalog,
    ledger: TransitionLedger,
    services: ServiceLifecycle,
    metrics: EngineMetrics,
}

impl Engine {
    /// Wire every component over `store`. Prefer
    /// [`EngineBuilder`](crate::builders::EngineBuilder), which validates
    /// the configuration first.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn Store>,
        executor: Arc<dyn TransitionExecutor>,
    ) -> Self {
        let allocator = ResourceAllocator::new(store.clone());
        let catalog = ResourceCatalog::new(store.clone(), allocator.reservation().clone());
        let ledger = TransitionLedger::new(store.clone(), executor);
        let services = ServiceLifecycle::new(store.clone(), allocator.clone(), ledger.clone());
        let metrics = EngineMetrics::new(store.clone());
        Self {
            config,
            store,
            allocator,
            catalog,
            ledger,
            services,
            metrics,
        }
    }

    /// Active configuration.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Resource allocation coordinator.
    pub const fn allocator(&self) -> &ResourceAllocator {
        &self.allocator
    }

    /// Resource CRUD and direct operations.
    pub const fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    /// Transition ledger.
    pub const fn ledger(&self) -> &TransitionLedger {
        &self.ledger
    }

    /// Service lifecycle controller.
    pub const fn services(&self) -> &ServiceLifecycle {
        &self.services
    }

    /// Metrics aggregation.
    pub const fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }
}
