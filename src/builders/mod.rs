//! Builders to construct the engine from configuration.

pub mod engine_builder;

pub use engine_builder::EngineBuilder;
