//! Shared identifiers and serializable value types.

use serde::{Deserialize, Serialize};

/// Identifier of a [`Service`](crate::core::Service).
pub type ServiceId = u64;
/// Identifier of a [`UnitResource`](crate::core::UnitResource).
pub type UnitResourceId = u64;
/// Identifier of a [`CompositeResource`](crate::core::CompositeResource).
pub type CompositeResourceId = u64;
/// Identifier of a [`Transition`](crate::core::Transition).
pub type TransitionId = u64;
/// Identifier of an association row.
pub type LinkId = u64;

/// Service priority. Ordering is ascending, so `Critical` compares greatest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Lowest priority.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Elevated priority.
    High,
    /// Highest priority.
    Critical,
}

impl Priority {
    /// Numeric level where 1 is the most urgent.
    pub const fn level(self) -> u8 {
        match self {
            Self::Critical => 1,
            Self::High => 2,
            Self::Normal => 3,
            Self::Low => 4,
        }
    }
}

/// Service resource policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Every declared resource must be available.
    Blocking,
    /// At least one declared resource must be available.
    NonBlocking,
}

/// Resource family, used for diagnostics and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// An indivisible resource.
    Unit,
    /// A group of unit resources.
    Composite,
}
