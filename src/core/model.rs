//! Entity rows and association rows.
//!
//! Services and resources never embed each other. Many-to-many relations are
//! independent link rows carrying the two foreign keys and a required flag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::EntityKind;
use crate::core::state::{
    CompositeResourceState, LifecycleState, ServiceState, Stateful, TransitionKind,
    TransitionStatus, UnitResourceState,
};
use crate::core::store::Record;
use crate::util::clock::now_ms;
use crate::util::serde::{
    CompositeResourceId, LinkId, Priority, ServiceId, ServiceKind, TransitionId, UnitResourceId,
};

/// Consuming context currently holding a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Holder {
    /// Claimed on behalf of a service.
    Service(ServiceId),
    /// Claimed as a component of a composite resource.
    Composite(CompositeResourceId),
    /// Claimed through a direct resource operation.
    Direct,
}

impl std::fmt::Display for Holder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Service(id) => write!(f, "service {id}"),
            Self::Composite(id) => write!(f, "composite resource {id}"),
            Self::Direct => f.write_str("direct"),
        }
    }
}

/// An indivisible allocatable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitResource {
    /// Identifier, assigned by the store.
    pub id: UnitResourceId,
    /// Optimistic concurrency version.
    pub version: u64,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Lifecycle state.
    pub state: UnitResourceState,
    /// Declared capacity.
    pub capacity: Option<u32>,
    /// Current load.
    pub current_load: u32,
    /// Physical or logical location.
    pub location: Option<String>,
    /// Context holding the resource while assigned or in use.
    pub holder: Option<Holder>,
    /// Creation time (ms since epoch).
    pub created_at_ms: u128,
    /// Last mutation time (ms since epoch).
    pub updated_at_ms: u128,
    /// Last time the resource entered `InUse`.
    pub last_used_at_ms: Option<u128>,
}

impl UnitResource {
    /// A new `Free` resource.
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            version: 0,
            name: name.into(),
            description: None,
            state: UnitResourceState::Free,
            capacity: None,
            current_load: 0,
            location: None,
            holder: None,
            created_at_ms: now,
            updated_at_ms: now,
            last_used_at_ms: None,
        }
    }

    /// Whether `holder` currently holds this resource.
    pub fn is_held_by(&self, holder: Holder) -> bool {
        self.holder == Some(holder)
    }
}

impl Stateful for UnitResource {
    type State = UnitResourceState;

    fn entity_id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> Self::State {
        self.state
    }

    fn enter(&mut self, target: Self::State, now_ms: u128) {
        self.state = target;
        self.updated_at_ms = now_ms;
        match target {
            UnitResourceState::InUse => self.last_used_at_ms = Some(now_ms),
            UnitResourceState::Free => self.holder = None,
            _ => {}
        }
    }
}

/// A resource made of several unit resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeResource {
    /// Identifier, assigned by the store.
    pub id: CompositeResourceId,
    /// Optimistic concurrency version.
    pub version: u64,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Lifecycle state.
    pub state: CompositeResourceState,
    /// Physical or logical location.
    pub location: Option<String>,
    /// Aggregate capacity.
    pub total_capacity: Option<u32>,
    /// Minimum number of components that must be assigned to reach `Ready`.
    pub min_required_components: Option<u32>,
    /// Context holding the composite while ready or assigned.
    pub holder: Option<Holder>,
    /// Creation time (ms since epoch).
    pub created_at_ms: u128,
    /// Last mutation time (ms since epoch).
    pub updated_at_ms: u128,
    /// Last time the composite entered `Assigned`.
    pub last_used_at_ms: Option<u128>,
}

impl CompositeResource {
    /// A new `Empty` composite.
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            version: 0,
            name: name.into(),
            description: None,
            state: CompositeResourceState::Empty,
            location: None,
            total_capacity: None,
            min_required_components: None,
            holder: None,
            created_at_ms: now,
            updated_at_ms: now,
            last_used_at_ms: None,
        }
    }

    /// Whether `holder` currently holds this composite.
    pub fn is_held_by(&self, holder: Holder) -> bool {
        self.holder == Some(holder)
    }
}

impl Stateful for CompositeResource {
    type State = CompositeResourceState;

    fn entity_id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> Self::State {
        self.state
    }

    fn enter(&mut self, target: Self::State, now_ms: u128) {
        self.state = target;
        self.updated_at_ms = now_ms;
        match target {
            CompositeResourceState::Assigned => self.last_used_at_ms = Some(now_ms),
            CompositeResourceState::Empty => self.holder = None,
            _ => {}
        }
    }
}

/// A consumer progressing through a lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Identifier, assigned by the store.
    pub id: ServiceId,
    /// Optimistic concurrency version.
    pub version: u64,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Lifecycle state.
    pub state: ServiceState,
    /// Resource policy.
    pub kind: ServiceKind,
    /// Scheduling priority.
    pub priority: Priority,
    /// Execution bound used for overrun reporting.
    pub max_execution_minutes: Option<u32>,
    /// Retry automatically when blocked.
    pub auto_retry: bool,
    /// Creation time (ms since epoch).
    pub created_at_ms: u128,
    /// Last mutation time (ms since epoch).
    pub updated_at_ms: u128,
    /// First entry into `InProgress`.
    pub started_at_ms: Option<u128>,
    /// Entry into a final state.
    pub completed_at_ms: Option<u128>,
}

impl Service {
    /// A new `Planned` service.
    pub fn new(name: impl Into<String>, kind: ServiceKind, priority: Priority) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            version: 0,
            name: name.into(),
            description: None,
            state: ServiceState::Planned,
            kind,
            priority,
            max_execution_minutes: None,
            auto_retry: false,
            created_at_ms: now,
            updated_at_ms: now,
            started_at_ms: None,
            completed_at_ms: None,
        }
    }

    /// In a final state.
    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }
}

impl Stateful for Service {
    type State = ServiceState;

    fn entity_id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> Self::State {
        self.state
    }

    fn enter(&mut self, target: Self::State, now_ms: u128) {
        let previous = self.state;
        self.state = target;
        self.updated_at_ms = now_ms;
        if target == ServiceState::InProgress && previous != ServiceState::Paused {
            self.started_at_ms = Some(now_ms);
        } else if target.is_final() {
            self.completed_at_ms = Some(now_ms);
        }
    }
}

/// Entities involved in a transition record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvolvedIds {
    /// Services.
    pub services: Vec<ServiceId>,
    /// Unit resources.
    pub unit_resources: Vec<UnitResourceId>,
    /// Composite resources.
    pub composite_resources: Vec<CompositeResourceId>,
}

impl InvolvedIds {
    /// Only the given service.
    pub fn service(id: ServiceId) -> Self {
        Self {
            services: vec![id],
            ..Self::default()
        }
    }

    /// Add unit resources.
    #[must_use]
    pub fn with_unit_resources(mut self, ids: impl IntoIterator<Item = UnitResourceId>) -> Self {
        self.unit_resources.extend(ids);
        self
    }

    /// Add composite resources.
    #[must_use]
    pub fn with_composite_resources(
        mut self,
        ids: impl IntoIterator<Item = CompositeResourceId>,
    ) -> Self {
        self.composite_resources.extend(ids);
        self
    }

    /// No entity referenced.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
            && self.unit_resources.is_empty()
            && self.composite_resources.is_empty()
    }
}

/// Free-form transition metadata.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A ledger record of a transition attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Identifier, assigned by the store.
    pub id: TransitionId,
    /// Optimistic concurrency version.
    pub version: u64,
    /// How the record is driven.
    pub kind: TransitionKind,
    /// Record status.
    pub status: TransitionStatus,
    /// Short name.
    pub name: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// Entities the attempt touched.
    pub involved: InvolvedIds,
    /// Arbitrary string-keyed values.
    pub metadata: Metadata,
    /// Failure reason once `Failed`.
    pub error_message: Option<String>,
    /// Creation time (ms since epoch).
    pub created_at_ms: u128,
    /// Entry into `InProgress`.
    pub started_at_ms: Option<u128>,
    /// Entry into `Completed` or `Failed`.
    pub completed_at_ms: Option<u128>,
}

impl Transition {
    /// A new `Pending` record.
    pub fn new(kind: TransitionKind, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            version: 0,
            kind,
            status: TransitionStatus::Pending,
            name: name.into(),
            description: None,
            involved: InvolvedIds::default(),
            metadata: Metadata::new(),
            error_message: None,
            created_at_ms: now_ms(),
            started_at_ms: None,
            completed_at_ms: None,
        }
    }

    /// Time spent between start and completion, if both are stamped.
    pub fn duration_ms(&self) -> Option<u128> {
        match (self.started_at_ms, self.completed_at_ms) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

impl Stateful for Transition {
    type State = TransitionStatus;

    fn entity_id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> Self::State {
        self.status
    }

    fn enter(&mut self, target: Self::State, now_ms: u128) {
        self.status = target;
        match target {
            TransitionStatus::InProgress => self.started_at_ms = Some(now_ms),
            TransitionStatus::Completed | TransitionStatus::Failed => {
                self.completed_at_ms = Some(now_ms);
            }
            TransitionStatus::Pending => {}
        }
    }
}

/// Service requires a unit resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUnitLink {
    /// Identifier, assigned by the store.
    pub id: LinkId,
    /// Optimistic concurrency version.
    pub version: u64,
    /// Requiring service.
    pub service_id: ServiceId,
    /// Required resource.
    pub unit_resource_id: UnitResourceId,
    /// The availability policy waits for this resource.
    pub required: bool,
}

/// Service requires a composite resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCompositeLink {
    /// Identifier, assigned by the store.
    pub id: LinkId,
    /// Optimistic concurrency version.
    pub version: u64,
    /// Requiring service.
    pub service_id: ServiceId,
    /// Required composite.
    pub composite_resource_id: CompositeResourceId,
    /// The availability policy waits for this resource.
    pub required: bool,
}

/// Composite resource is made of a unit resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeUnitLink {
    /// Identifier, assigned by the store.
    pub id: LinkId,
    /// Optimistic concurrency version.
    pub version: u64,
    /// Owning composite.
    pub composite_resource_id: CompositeResourceId,
    /// Component resource.
    pub unit_resource_id: UnitResourceId,
    /// Component must be assigned for the composite to reach `Ready`.
    pub required: bool,
}

impl ServiceUnitLink {
    /// A new required link.
    pub const fn new(service_id: ServiceId, unit_resource_id: UnitResourceId) -> Self {
        Self {
            id: 0,
            version: 0,
            service_id,
            unit_resource_id,
            required: true,
        }
    }

    /// A link the service uses when free but does not wait for.
    pub const fn optional(service_id: ServiceId, unit_resource_id: UnitResourceId) -> Self {
        Self {
            required: false,
            ..Self::new(service_id, unit_resource_id)
        }
    }
}

impl ServiceCompositeLink {
    /// A new required link.
    pub const fn new(service_id: ServiceId, composite_resource_id: CompositeResourceId) -> Self {
        Self {
            id: 0,
            version: 0,
            service_id,
            composite_resource_id,
            required: true,
        }
    }

    /// A link the service uses when free but does not wait for.
    pub const fn optional(service_id: ServiceId, composite_resource_id: CompositeResourceId) -> Self {
        Self {
            required: false,
            ..Self::new(service_id, composite_resource_id)
        }
    }
}

impl CompositeUnitLink {
    /// A new link with the given required flag.
    pub const fn new(
        composite_resource_id: CompositeResourceId,
        unit_resource_id: UnitResourceId,
        required: bool,
    ) -> Self {
        Self {
            id: 0,
            version: 0,
            composite_resource_id,
            unit_resource_id,
            required,
        }
    }
}

macro_rules! impl_record {
    ($ty:ty, $entity:expr) => {
        impl Record for $ty {
            const ENTITY: EntityKind = $entity;

            fn id(&self) -> u64 {
                self.id
            }

            fn set_id(&mut self, id: u64) {
                self.id = id;
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn set_version(&mut self, version: u64) {
                self.version = version;
            }
        }
    };
}

impl_record!(UnitResource, EntityKind::UnitResource);
impl_record!(CompositeResource, EntityKind::CompositeResource);
impl_record!(Service, EntityKind::Service);
impl_record!(Transition, EntityKind::Transition);
impl_record!(ServiceUnitLink, EntityKind::ServiceUnitLink);
impl_record!(ServiceCompositeLink, EntityKind::ServiceCompositeLink);
impl_record!(CompositeUnitLink, EntityKind::CompositeUnitLink);
