//! Error types for engine operations.

use std::fmt;

use thiserror::Error;

/// Entity family named in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A consuming service.
    Service,
    /// An indivisible resource.
    UnitResource,
    /// A group of unit resources.
    CompositeResource,
    /// A ledger record.
    Transition,
    /// A service to unit resource association.
    ServiceUnitLink,
    /// A service to composite resource association.
    ServiceCompositeLink,
    /// A composite to unit resource association.
    CompositeUnitLink,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Service => "service",
            Self::UnitResource => "unit resource",
            Self::CompositeResource => "composite resource",
            Self::Transition => "transition",
            Self::ServiceUnitLink => "service/unit link",
            Self::ServiceCompositeLink => "service/composite link",
            Self::CompositeUnitLink => "composite/unit link",
        };
        f.write_str(s)
    }
}

/// Errors produced by the allocation and lifecycle engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Lookup miss.
    #[error("{entity} {id} not found")]
    ResourceNotFound {
        /// Entity family.
        entity: EntityKind,
        /// Missing identifier.
        id: u64,
    },
    /// An edge outside the entity's transition table was attempted.
    #[error("invalid {entity} transition for {id}: {from} -> {to}")]
    InvalidStateTransition {
        /// Entity family.
        entity: EntityKind,
        /// Entity identifier.
        id: u64,
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
    /// Availability check or an allocation step failed.
    #[error("resource allocation failed: {0}")]
    ResourceAllocation(String),
    /// A business rule forbids the operation.
    #[error("business rule violated: {0}")]
    BusinessLogic(String),
    /// A versioned write lost a race.
    #[error("concurrent modification of {entity} {id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// Entity family.
        entity: EntityKind,
        /// Entity identifier.
        id: u64,
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },
    /// Startup or environment misconfiguration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Malformed input; carries every failed check.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    /// An operation exceeded its bound.
    #[error("timed out: {0}")]
    Timeout(String),
    /// Store failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl EngineError {
    /// Shorthand for a lookup miss.
    pub const fn not_found(entity: EntityKind, id: u64) -> Self {
        Self::ResourceNotFound { entity, id }
    }

    /// Stable snake_case code for the error kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ResourceNotFound { .. } => "resource_not_found",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::ResourceAllocation(_) => "resource_allocation_failure",
            Self::BusinessLogic(_) => "business_logic_violation",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::Configuration(_) => "configuration_error",
            Self::Validation(_) => "validation_error",
            Self::Timeout(_) => "timeout",
            Self::Backend(_) => "internal_error",
        }
    }

    /// Unexpected failures that callers only see as a generic internal error.
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Fatal to the request path.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
