//! Allocation engine: state machines, reservation, allocation, ledger and
//! lifecycle orchestration.

pub mod allocation;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod model;
pub mod reservation;
pub mod state;
pub mod store;

pub use allocation::{ResourceAllocator, ResourceClaim};
pub use catalog::{
    ComponentSpec, CompositeDraft, CompositePatch, ResourceCatalog, UnitDraft, UnitPatch,
};
pub use engine::Engine;
pub use error::{AppResult, EngineError, EngineResult, EntityKind};
#[cfg(feature = "tokio-runtime")]
pub use ledger::DelayedExecutor;
pub use ledger::{
    generate_name, ImmediateExecutor, ProcessReport, TransitionExecutor, TransitionLedger,
    TransitionRequest,
};
pub use lifecycle::{
    RetryOutcome, ServiceDraft, ServiceLifecycle, ServicePatch, ServiceQuery, StartOutcome,
};
pub use metrics::{EngineMetrics, MetricsSnapshot, PerformanceWindow, ResourceUtilization, StateCounts};
pub use model::{
    CompositeResource, CompositeUnitLink, Holder, InvolvedIds, Metadata, Service,
    ServiceCompositeLink, ServiceUnitLink, Transition, UnitResource,
};
pub use reservation::CompositeReservation;
pub use state::{
    can_transition, transition, CompositeResourceState, LifecycleState, ServiceState, Stateful,
    TransitionKind, TransitionStatus, UnitResourceState,
};
pub use store::{Predicate, Record, Store, Table};
