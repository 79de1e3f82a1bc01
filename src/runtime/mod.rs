//! Runtime adapters and the API surface.

pub mod api;
#[cfg(feature = "tokio-runtime")]
pub mod scheduler;
pub mod tokio_spawner;

pub use api::{
    ApiError, ApiResponse, CreateCompositeResourceRequest, CreateServiceRequest,
    CreateUnitResourceRequest, SearchCriteria, TriggerTransitionRequest, UpdateServiceRequest,
};
#[cfg(feature = "tokio-runtime")]
pub use scheduler::{MaintenanceJob, MaintenanceScheduler};
pub use tokio_spawner::Spawn;
#[cfg(feature = "tokio-runtime")]
pub use tokio_spawner::TokioSpawner;
