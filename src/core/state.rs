//! Per-entity state machines.
//!
//! Each lifecycle is a plain enum plus an adjacency table mapping a state to
//! the set of states it may move to. Validation is a lookup in that table;
//! nothing outside it ever succeeds.
//!
//! ```text
//! UnitResource        Free ─▶ Assigned ─▶ InUse ─▶ Free
//!                       │        │          ├──▶ Blocked ─▶ Free | Unavailable
//!                       │        └─▶ Blocked└──▶ Zombie ──▶ Free
//!                       └─▶ Unavailable ─▶ Free
//!
//! CompositeResource   Empty ─▶ Reserving ─▶ Ready ─▶ Assigned ─▶ Empty
//!
//! Service             Planned ─▶ Published ─▶ Ready ─▶ InProgress ─▶ Completed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, EngineResult, EntityKind};
use crate::util::clock::now_ms;

/// A lifecycle state with an explicit adjacency table.
pub trait LifecycleState:
    Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Entity family the state belongs to.
    const ENTITY: EntityKind;
    /// Every state, in declaration order.
    const ALL: &'static [Self];

    /// States reachable from `self` in one step.
    fn allowed_targets(self) -> &'static [Self];

    /// Whether `self -> target` is an edge of the table.
    fn can_transition(self, target: Self) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// A state with no outgoing edge.
    fn is_final(self) -> bool {
        self.allowed_targets().is_empty()
    }
}

/// An entity driven by a [`LifecycleState`].
pub trait Stateful {
    /// The entity's state enum.
    type State: LifecycleState;

    /// Entity identifier.
    fn entity_id(&self) -> u64;

    /// Current state.
    fn state(&self) -> Self::State;

    /// Set the new state and stamp timestamps. Only called after the edge was
    /// validated.
    fn enter(&mut self, target: Self::State, now_ms: u128);
}

/// Whether `current -> target` is allowed for the state's entity kind.
pub fn can_transition<S: LifecycleState>(current: S, target: S) -> bool {
    current.can_transition(target)
}

/// Validate and apply a transition.
///
/// The entity is mutated only on success. A rejected edge yields
/// [`EngineError::InvalidStateTransition`] with both states for diagnostics.
pub fn transition<E: Stateful>(entity: &mut E, target: E::State) -> EngineResult<()> {
    let from = entity.state();
    if !from.can_transition(target) {
        return Err(EngineError::InvalidStateTransition {
            entity: E::State::ENTITY,
            id: entity.entity_id(),
            from: from.to_string(),
            to: target.to_string(),
        });
    }
    entity.enter(target, now_ms());
    tracing::debug!(
        entity = %E::State::ENTITY,
        id = entity.entity_id(),
        %from,
        to = %target,
        "state transition applied"
    );
    Ok(())
}

// ─── Unit resource ───────────────────────────────────────────────────

/// Lifecycle state of a unit resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitResourceState {
    /// Available for allocation.
    Free,
    /// Claimed but not yet used.
    Assigned,
    /// Actively used.
    InUse,
    /// Temporarily blocked.
    Blocked,
    /// Out of service.
    Unavailable,
    /// Lost track of its consumer.
    Zombie,
}

impl UnitResourceState {
    /// Free for allocation.
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Free)
    }

    /// Held by a consumer and may be returned to `Free`.
    pub const fn is_releasable(self) -> bool {
        matches!(self, Self::Assigned | Self::InUse)
    }

    /// Blocked, unavailable or zombie.
    pub const fn is_problematic(self) -> bool {
        matches!(self, Self::Blocked | Self::Unavailable | Self::Zombie)
    }
}

impl LifecycleState for UnitResourceState {
    const ENTITY: EntityKind = EntityKind::UnitResource;
    const ALL: &'static [Self] = &[
        Self::Free,
        Self::Assigned,
        Self::InUse,
        Self::Blocked,
        Self::Unavailable,
        Self::Zombie,
    ];

    fn allowed_targets(self) -> &'static [Self] {
        match self {
            Self::Free => &[Self::Assigned, Self::Unavailable],
            Self::Assigned => &[Self::InUse, Self::Free, Self::Blocked],
            Self::InUse => &[Self::Free, Self::Blocked, Self::Zombie],
            Self::Blocked => &[Self::Free, Self::Unavailable],
            Self::Unavailable | Self::Zombie => &[Self::Free],
        }
    }
}

impl fmt::Display for UnitResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Free => "free",
            Self::Assigned => "assigned",
            Self::InUse => "in_use",
            Self::Blocked => "blocked",
            Self::Unavailable => "unavailable",
            Self::Zombie => "zombie",
        };
        f.write_str(s)
    }
}

// ─── Composite resource ──────────────────────────────────────────────

/// Lifecycle state of a composite resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeResourceState {
    /// No component claimed.
    Empty,
    /// Components are being claimed.
    Reserving,
    /// Every required component is assigned.
    Ready,
    /// In use by its holder.
    Assigned,
    /// Out of service.
    Unavailable,
    /// Lost track of its consumer.
    Zombie,
}

impl CompositeResourceState {
    /// May start a reservation.
    pub const fn is_available_for_reservation(self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Holds its components and may be returned to `Empty`.
    pub const fn is_releasable(self) -> bool {
        matches!(self, Self::Ready | Self::Assigned)
    }

    /// Unavailable or zombie.
    pub const fn is_problematic(self) -> bool {
        matches!(self, Self::Unavailable | Self::Zombie)
    }
}

impl LifecycleState for CompositeResourceState {
    const ENTITY: EntityKind = EntityKind::CompositeResource;
    const ALL: &'static [Self] = &[
        Self::Empty,
        Self::Reserving,
        Self::Ready,
        Self::Assigned,
        Self::Unavailable,
        Self::Zombie,
    ];

    fn allowed_targets(self) -> &'static [Self] {
        match self {
            Self::Empty => &[Self::Reserving, Self::Unavailable],
            Self::Reserving => &[Self::Ready, Self::Empty],
            Self::Ready => &[Self::Assigned, Self::Empty, Self::Unavailable],
            Self::Assigned => &[Self::Empty, Self::Zombie],
            Self::Unavailable | Self::Zombie => &[Self::Empty],
        }
    }
}

impl fmt::Display for CompositeResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Empty => "empty",
            Self::Reserving => "reserving",
            Self::Ready => "ready",
            Self::Assigned => "assigned",
            Self::Unavailable => "unavailable",
            Self::Zombie => "zombie",
        };
        f.write_str(s)
    }
}

// ─── Service ─────────────────────────────────────────────────────────

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Declared, not yet visible.
    Planned,
    /// Visible, not yet startable.
    Published,
    /// May be started.
    Ready,
    /// Waiting for resources.
    Blocked,
    /// Postponed.
    Delayed,
    /// Suspended while holding its resources.
    Paused,
    /// Executing.
    InProgress,
    /// Halted before completion (final).
    Stopped,
    /// Abandoned (final).
    Cancelled,
    /// Finished successfully (final).
    Completed,
}

impl ServiceState {
    /// May run or is running.
    pub const fn is_executable(self) -> bool {
        matches!(self, Self::Ready | Self::InProgress)
    }

    /// Signals a problem.
    pub const fn is_error(self) -> bool {
        matches!(self, Self::Blocked | Self::Stopped | Self::Cancelled)
    }
}

impl LifecycleState for ServiceState {
    const ENTITY: EntityKind = EntityKind::Service;
    const ALL: &'static [Self] = &[
        Self::Planned,
        Self::Published,
        Self::Ready,
        Self::Blocked,
        Self::Delayed,
        Self::Paused,
        Self::InProgress,
        Self::Stopped,
        Self::Cancelled,
        Self::Completed,
    ];

    fn allowed_targets(self) -> &'static [Self] {
        match self {
            Self::Planned => &[Self::Published, Self::Cancelled],
            Self::Published => &[Self::Ready, Self::Cancelled],
            Self::Ready => &[Self::InProgress, Self::Blocked, Self::Delayed, Self::Cancelled],
            Self::Blocked | Self::Delayed => &[Self::Ready, Self::Cancelled],
            Self::Paused => &[Self::InProgress, Self::Cancelled],
            Self::InProgress => &[Self::Completed, Self::Stopped, Self::Paused, Self::Blocked],
            Self::Stopped | Self::Cancelled | Self::Completed => &[],
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planned => "planned",
            Self::Published => "published",
            Self::Ready => "ready",
            Self::Blocked => "blocked",
            Self::Delayed => "delayed",
            Self::Paused => "paused",
            Self::InProgress => "in_progress",
            Self::Stopped => "stopped",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

// ─── Transition record ───────────────────────────────────────────────

/// Status of a ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStatus {
    /// Recorded, not started.
    Pending,
    /// Work running.
    InProgress,
    /// Work finished (final).
    Completed,
    /// Work failed or was cancelled (final).
    Failed,
}

impl TransitionStatus {
    /// Pending or in progress.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl LifecycleState for TransitionStatus {
    const ENTITY: EntityKind = EntityKind::Transition;
    const ALL: &'static [Self] = &[Self::Pending, Self::InProgress, Self::Completed, Self::Failed];

    fn allowed_targets(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::InProgress, Self::Failed],
            Self::InProgress => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }
}

impl fmt::Display for TransitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a transition record is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Recorded by a caller.
    Normal,
    /// Executed inline by the caller.
    Synchronous,
    /// Picked up by the periodic processor.
    Automatic,
}

impl TransitionKind {
    /// Upper-case code used in generated names.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Synchronous => "SYNCHRONOUS",
            Self::Automatic => "AUTOMATIC",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn edges<S: LifecycleState + std::hash::Hash>() -> HashSet<(S, S)> {
        S::ALL
            .iter()
            .flat_map(|&from| S::ALL.iter().map(move |&to| (from, to)))
            .filter(|&(from, to)| can_transition(from, to))
            .collect()
    }

    #[test]
    fn test_unit_resource_table_is_exact() {
        use UnitResourceState::*;
        let expected: HashSet<_> = [
            (Free, Assigned),
            (Free, Unavailable),
            (Assigned, InUse),
            (Assigned, Free),
            (Assigned, Blocked),
            (InUse, Free),
            (InUse, Blocked),
            (InUse, Zombie),
            (Blocked, Free),
            (Blocked, Unavailable),
            (Unavailable, Free),
            (Zombie, Free),
        ]
        .into_iter()
        .collect();
        assert_eq!(edges::<UnitResourceState>(), expected);
    }

    #[test]
    fn test_composite_resource_table_is_exact() {
        use CompositeResourceState::*;
        let expected: HashSet<_> = [
            (Empty, Reserving),
            (Empty, Unavailable),
            (Reserving, Ready),
            (Reserving, Empty),
            (Ready, Assigned),
            (Ready, Empty),
            (Ready, Unavailable),
            (Assigned, Empty),
            (Assigned, Zombie),
            (Unavailable, Empty),
            (Zombie, Empty),
        ]
        .into_iter()
        .collect();
        assert_eq!(edges::<CompositeResourceState>(), expected);
    }

    #[test]
    fn test_service_table_is_exact() {
        use ServiceState::*;
        let expected: HashSet<_> = [
            (Planned, Published),
            (Planned, Cancelled),
            (Published, Ready),
            (Published, Cancelled),
            (Ready, InProgress),
            (Ready, Blocked),
            (Ready, Delayed),
            (Ready, Cancelled),
            (Blocked, Ready),
            (Blocked, Cancelled),
            (Delayed, Ready),
            (Delayed, Cancelled),
            (Paused, InProgress),
            (Paused, Cancelled),
            (InProgress, Completed),
            (InProgress, Stopped),
            (InProgress, Paused),
            (InProgress, Blocked),
        ]
        .into_iter()
        .collect();
        assert_eq!(edges::<ServiceState>(), expected);
    }

    #[test]
    fn test_final_states() {
        let finals: Vec<_> = ServiceState::ALL.iter().copied().filter(|s| s.is_final()).collect();
        assert_eq!(
            finals,
            vec![ServiceState::Stopped, ServiceState::Cancelled, ServiceState::Completed]
        );
        assert!(UnitResourceState::ALL.iter().all(|s| !s.is_final()));
        assert!(CompositeResourceState::ALL.iter().all(|s| !s.is_final()));
    }

    #[test]
    fn test_no_self_loops() {
        assert!(UnitResourceState::ALL.iter().all(|&s| !s.can_transition(s)));
        assert!(CompositeResourceState::ALL.iter().all(|&s| !s.can_transition(s)));
        assert!(ServiceState::ALL.iter().all(|&s| !s.can_transition(s)));
    }

    #[test]
    fn test_transition_status_table() {
        assert!(TransitionStatus::Pending.can_transition(TransitionStatus::InProgress));
        assert!(TransitionStatus::InProgress.can_transition(TransitionStatus::Completed));
        assert!(!TransitionStatus::Pending.can_transition(TransitionStatus::Completed));
        assert!(TransitionStatus::Failed.is_final());
    }
}
