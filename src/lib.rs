//! # Petri Lifecycle
//!
//! A resource allocation and state-transition engine for services that
//! consume unit and composite resources.
//!
//! Services, unit resources and composite resources each move through a
//! small state machine. Starting a service claims every resource it declares
//! all-or-nothing, and a failed claim rolls back whatever was taken. Every
//! lifecycle action is recorded in a transition ledger, and a maintenance
//! scheduler drives automatic transitions, ledger cleanup, metrics logging
//! and blocked-service retries.
//!
//! ## Core Problem Solved
//!
//! Work that needs several shared resources at once must not start with only
//! some of them:
//!
//! - **Blocking services** need every declared resource to be available
//! - **Non-blocking services** start when at least one is available
//! - **Composite resources** are reserved as a group of unit resources, with
//!   optional components and a minimum count
//! - **Concurrent starts** race on versioned rows, so exactly one wins
//!
//! ## Key Features
//!
//! - **Explicit state machines** with a transition table per entity
//! - **Holder tracking**: a resource records which service or composite owns it
//! - **Rollback** of partial allocations
//! - **Transition ledger** with synchronous and automatic records
//! - **Metrics**: state counts, throughput, utilization
//! - **Maintenance jobs** on configurable intervals
//!
//! ## Example
//!
//! ```rust,ignore
//! use petri_lifecycle::builders::EngineBuilder;
//! use petri_lifecycle::core::{ServiceDraft, UnitDraft};
//! use petri_lifecycle::util::serde::{Priority, ServiceKind};
//!
//! let engine = EngineBuilder::new().build()?;
//! let gpu = engine.catalog().create_unit(UnitDraft::named("gpu-0")).await?;
//! let svc = engine
//!     .services()
//!     .create(ServiceDraft {
//!         unit_resource_ids: vec![gpu.id],
//!         ..ServiceDraft::new("train", ServiceKind::Blocking)
//!     })
//!     .await?;
//!
//! engine.services().publish(svc.id).await?;
//! engine.services().mark_ready(svc.id).await?;
//! let outcome = engine.services().start(svc.id).await?;
//! assert!(outcome.is_started());
//! engine.services().complete(svc.id).await?;
//! ```
//!
//! For complete examples, see:
//! - `tests/allocation_test.rs` - All-or-nothing allocation scenarios
//! - `tests/lifecycle_test.rs` - Service lifecycle end to end

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// State machines, allocation, the transition ledger and lifecycle control.
pub mod core;
/// Engine configuration.
pub mod config;
/// Builders to construct the engine from configuration.
pub mod builders;
/// Storage backends.
pub mod infra;
/// Runtime adapters, the maintenance scheduler and the API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
