//! API-facing request/response models and thin handlers over the engine.
//!
//! Requests are validated here; every failed check is collected into one
//! [`EngineError::Validation`]. Responses wrap engine results in an
//! [`ApiResponse`] envelope that hides internal failures.

use serde::{Deserialize, Serialize};

use crate::core::{
    ComponentSpec, CompositeDraft, CompositeResource, Engine, EngineError, EngineResult,
    InvolvedIds, Metadata, MetricsSnapshot, Service, ServiceDraft, ServicePatch, ServiceQuery,
    ServiceState, Transition, TransitionKind, TransitionRequest, UnitDraft, UnitResource,
};
use crate::core::store::first_duplicate;
use crate::util::clock::now_ms;
use crate::util::serde::{CompositeResourceId, Priority, ServiceId, ServiceKind, UnitResourceId};

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 500;
const TRANSITION_NAME_MAX: usize = 200;

#[derive(Default)]
struct Violations(Vec<String>);

impl Violations {
    fn name(&mut self, field: &str, value: &str) {
        let len = value.trim().chars().count();
        if !(NAME_MIN..=NAME_MAX).contains(&len) {
            self.0.push(format!(
                "{field} must be between {NAME_MIN} and {NAME_MAX} characters"
            ));
        }
    }

    fn max_len(&mut self, field: &str, value: Option<&str>, max: usize) {
        if value.is_some_and(|v| v.chars().count() > max) {
            self.0.push(format!("{field} must be at most {max} characters"));
        }
    }

    fn positive(&mut self, field: &str, value: Option<u32>) {
        if value == Some(0) {
            self.0.push(format!("{field} must be greater than 0"));
        }
    }

    fn unique(&mut self, field: &str, ids: &[u64]) {
        if let Some(id) = first_duplicate(ids) {
            self.0.push(format!("{field} lists id {id} more than once"));
        }
    }

    fn check(&mut self, ok: bool, message: &str) {
        if !ok {
            self.0.push(message.to_string());
        }
    }

    fn finish(self) -> EngineResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(self.0))
        }
    }
}

/// Create a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServiceRequest {
    /// Display name (2 to 100 characters).
    pub name: String,
    /// Description (at most 500 characters).
    pub description: Option<String>,
    /// Resource policy.
    pub kind: ServiceKind,
    /// Priority; `normal` when absent.
    #[serde(default)]
    pub priority: Priority,
    /// Execution bound in minutes.
    pub max_execution_minutes: Option<u32>,
    /// Retry automatically when blocked.
    #[serde(default)]
    pub auto_retry: bool,
    /// Declared unit resources.
    #[serde(default)]
    pub unit_resource_ids: Vec<UnitResourceId>,
    /// Declared composite resources.
    #[serde(default)]
    pub composite_resource_ids: Vec<CompositeResourceId>,
}

impl CreateServiceRequest {
    /// Check field constraints.
    pub fn validate(&self) -> EngineResult<()> {
        let mut v = Violations::default();
        v.name("name", &self.name);
        v.max_len("description", self.description.as_deref(), DESCRIPTION_MAX);
        v.positive("max_execution_minutes", self.max_execution_minutes);
        v.unique("unit_resource_ids", &self.unit_resource_ids);
        v.unique("composite_resource_ids", &self.composite_resource_ids);
        v.finish()
    }

    /// Validate and convert.
    pub fn into_draft(self) -> EngineResult<ServiceDraft> {
        self.validate()?;
        Ok(ServiceDraft {
            name: self.name.trim().to_string(),
            description: self.description,
            kind: self.kind,
            priority: self.priority,
            max_execution_minutes: self.max_execution_minutes,
            auto_retry: self.auto_retry,
            unit_resource_ids: self.unit_resource_ids,
            composite_resource_ids: self.composite_resource_ids,
        })
    }
}

/// Update a service. Absent fields stay unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateServiceRequest {
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

impl UpdateServiceRequest {
    /// Check field constraints.
    pub fn validate(&self) -> EngineResult<()> {
        let mut v = Violations::default();
        if let Some(name) = &self.name {
            v.name("name", name);
        }
        v.max_len("description", self.description.as_deref(), DESCRIPTION_MAX);
        v.positive("max_execution_minutes", self.max_execution_minutes);
        if let Some(ids) = &self.unit_resource_ids {
            v.unique("unit_resource_ids", ids);
        }
        if let Some(ids) = &self.composite_resource_ids {
            v.unique("composite_resource_ids", ids);
        }
        v.finish()
    }

    /// Validate and convert.
    pub fn into_patch(self) -> EngineResult<ServicePatch> {
        self.validate()?;
        Ok(ServicePatch {
            name: self.name.map(|n| n.trim().to_string()),
            description: self.description,
            priority: self.priority,
            max_execution_minutes: self.max_execution_minutes,
            auto_retry: self.auto_retry,
            unit_resource_ids: self.unit_resource_ids,
            composite_resource_ids: self.composite_resource_ids,
        })
    }
}

/// Create a unit resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUnitResourceRequest {
    /// Display name (2 to 100 characters).
    pub name: String,
    /// Description (at most 500 characters).
    pub description: Option<String>,
    /// Declared capacity.
    pub capacity: Option<u32>,
    /// Location.
    pub location: Option<String>,
}

impl CreateUnitResourceRequest {
    /// Check field constraints.
    pub fn validate(&self) -> EngineResult<()> {
        let mut v = Violations::default();
        v.name("name", &self.name);
        v.max_len("description", self.description.as_deref(), DESCRIPTION_MAX);
        v.max_len("location", self.location.as_deref(), NAME_MAX);
        v.finish()
    }

    /// Validate and convert.
    pub fn into_draft(self) -> EngineResult<UnitDraft> {
        self.validate()?;
        Ok(UnitDraft {
            name: self.name.trim().to_string(),
            description: self.description,
            capacity: self.capacity,
            location: self.location,
        })
    }
}

/// Create a composite resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCompositeResourceRequest {
    /// Display name (2 to 100 characters).
    pub name: String,
    /// Description (at most 500 characters).
    pub description: Option<String>,
    /// Location.
    pub location: Option<String>,
    /// Aggregate capacity.
    pub total_capacity: Option<u32>,
    /// Minimum assigned components to reach `Ready`.
    pub min_required_components: Option<u32>,
    /// Components.
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
}

impl CreateCompositeResourceRequest {
    /// Check field constraints.
    pub fn validate(&self) -> EngineResult<()> {
        let mut v = Violations::default();
        v.name("name", &self.name);
        v.max_len("description", self.description.as_deref(), DESCRIPTION_MAX);
        v.max_len("location", self.location.as_deref(), NAME_MAX);
        let too_many = self
            .min_required_components
            .is_some_and(|min| min as usize > self.components.len());
        v.check(
            !too_many,
            "min_required_components cannot exceed the number of components",
        );
        let component_ids: Vec<_> = self.components.iter().map(|c| c.unit_resource_id).collect();
        v.unique("components", &component_ids);
        v.finish()
    }

    /// Validate and convert.
    pub fn into_draft(self) -> EngineResult<CompositeDraft> {
        self.validate()?;
        Ok(CompositeDraft {
            name: self.name.trim().to_string(),
            description: self.description,
            location: self.location,
            total_capacity: self.total_capacity,
            min_required_components: self.min_required_components,
            components: self.components,
        })
    }
}

/// Trigger a synchronous transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerTransitionRequest {
    /// Name (at most 200 characters); generated when absent.
    pub name: Option<String>,
    /// Description (at most 500 characters).
    pub description: Option<String>,
    /// Involved services; at least one.
    pub service_ids: Vec<ServiceId>,
    /// Involved unit resources.
    #[serde(default)]
    pub unit_resource_ids: Vec<UnitResourceId>,
    /// Involved composite resources.
    #[serde(default)]
    pub composite_resource_ids: Vec<CompositeResourceId>,
    /// Free-form values.
    #[serde(default)]
    pub metadata: Metadata,
}

impl TriggerTransitionRequest {
    /// Check field constraints.
    pub fn validate(&self) -> EngineResult<()> {
        let mut v = Violations::default();
        v.max_len("name", self.name.as_deref(), TRANSITION_NAME_MAX);
        v.max_len("description", self.description.as_deref(), DESCRIPTION_MAX);
        v.check(
            !self.service_ids.is_empty(),
            "at least one service id is required",
        );
        v.finish()
    }

    /// Validate and convert.
    pub fn into_request(self) -> EngineResult<TransitionRequest> {
        self.validate()?;
        let involved = InvolvedIds {
            services: self.service_ids,
            unit_resources: self.unit_resource_ids,
            composite_resources: self.composite_resource_ids,
        };
        let mut request = TransitionRequest::new(TransitionKind::Synchronous).involved(involved);
        request.name = self.name;
        request.description = self.description;
        request.metadata = self.metadata;
        Ok(request)
    }
}

/// Service search filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Name substring.
    pub name: Option<String>,
    /// State.
    pub state: Option<ServiceState>,
    /// Kind.
    pub kind: Option<ServiceKind>,
    /// Priority.
    pub priority: Option<Priority>,
}

impl SearchCriteria {
    /// Check field constraints.
    pub fn validate(&self) -> EngineResult<()> {
        let mut v = Violations::default();
        v.max_len("name", self.name.as_deref(), NAME_MAX);
        v.finish()
    }

    /// Validate and convert.
    pub fn into_query(self) -> EngineResult<ServiceQuery> {
        self.validate()?;
        Ok(ServiceQuery {
            name: self.name,
            state: self.state,
            kind: self.kind,
            priority: self.priority,
        })
    }
}

/// Error body of an [`ApiResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Individual validation failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the call succeeded.
    pub success: bool,
    /// Payload on success.
    pub data: Option<T>,
    /// Error on failure.
    pub error: Option<ApiError>,
    /// Response time (ms since epoch).
    pub timestamp_ms: u128,
}

impl<T> ApiResponse<T> {
    /// Successful response.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp_ms: now_ms(),
        }
    }

    /// Failed response. Internal errors are logged in full and replaced by
    /// a generic message.
    pub fn failure(err: &EngineError) -> Self {
        let (message, details) = if err.is_internal() {
            tracing::error!(error = %err, code = err.kind(), "internal error");
            ("internal error".to_string(), Vec::new())
        } else if let EngineError::Validation(errors) = err {
            (err.to_string(), errors.clone())
        } else {
            (err.to_string(), Vec::new())
        };
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: err.kind().to_string(),
                message,
                details,
            }),
            timestamp_ms: now_ms(),
        }
    }

    /// Wrap an engine result.
    pub fn from_result(result: EngineResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::failure(&err),
        }
    }
}

/// Health payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Return a health payload.
pub const fn health() -> Health {
    Health { ok: true }
}

/// Validate and create a service.
pub async fn create_service(engine: &Engine, req: CreateServiceRequest) -> ApiResponse<Service> {
    let result = match req.into_draft() {
        Ok(draft) => engine.services().create(draft).await,
        Err(err) => Err(err),
    };
    ApiResponse::from_result(result)
}

/// Validate and update a service.
pub async fn update_service(
    engine: &Engine,
    id: ServiceId,
    req: UpdateServiceRequest,
) -> ApiResponse<Service> {
    let result = match req.into_patch() {
        Ok(patch) => engine.services().update(id, patch).await,
        Err(err) => Err(err),
    };
    ApiResponse::from_result(result)
}

/// Validate and run a service search.
pub async fn search_services(engine: &Engine, criteria: SearchCriteria) -> ApiResponse<Vec<Service>> {
    let result = match criteria.into_query() {
        Ok(query) => engine.services().search(&query).await,
        Err(err) => Err(err),
    };
    ApiResponse::from_result(result)
}

/// Validate and create a unit resource.
pub async fn create_unit_resource(
    engine: &Engine,
    req: CreateUnitResourceRequest,
) -> ApiResponse<UnitResource> {
    let result = match req.into_draft() {
        Ok(draft) => engine.catalog().create_unit(draft).await,
        Err(err) => Err(err),
    };
    ApiResponse::from_result(result)
}

/// Validate and create a composite resource.
pub async fn create_composite_resource(
    engine: &Engine,
    req: CreateCompositeResourceRequest,
) -> ApiResponse<CompositeResource> {
    let result = match req.into_draft() {
        Ok(draft) => engine.catalog().create_composite(draft).await,
        Err(err) => Err(err),
    };
    ApiResponse::from_result(result)
}

/// Validate and trigger a synchronous transition.
pub async fn trigger_transition(
    engine: &Engine,
    req: TriggerTransitionRequest,
) -> ApiResponse<Transition> {
    let result = match req.into_request() {
        Ok(request) => engine.ledger().trigger_synchronous(request).await,
        Err(err) => Err(err),
    };
    ApiResponse::from_result(result)
}

/// Current metrics snapshot.
pub async fn metrics(engine: &Engine) -> ApiResponse<MetricsSnapshot> {
    ApiResponse::from_result(engine.metrics().snapshot().await)
}
