//! Infrastructure adapters for the engine's storage boundary.

pub mod store;

pub use store::InMemoryStore;
