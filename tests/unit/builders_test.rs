//! Tests for builder modules

use petri_lifecycle::builders::EngineBuilder;
use petri_lifecycle::config::EngineConfig;
use petri_lifecycle::core::{EngineError, ImmediateExecutor};
use std::sync::Arc;

#[test]
fn test_engine_builder_defaults() {
    let engine = EngineBuilder::new().build().unwrap();
    assert_eq!(engine.config(), &EngineConfig::default());
}

#[test]
fn test_engine_builder_rejects_invalid_config() {
    let config = EngineConfig {
        cleanup_interval_secs: 0,
        ..EngineConfig::default()
    };
    let Err(err) = EngineBuilder::new().config(config).build() else {
        panic!("expected configuration error");
    };
    assert!(matches!(err, EngineError::Configuration(_)));
    assert!(err.to_string().contains("cleanup_interval_secs"));
}

#[tokio::test]
async fn test_engine_builder_with_explicit_executor() {
    let engine = EngineBuilder::new()
        .executor(Arc::new(ImmediateExecutor))
        .build()
        .unwrap();
    let snapshot = engine.metrics().snapshot().await.unwrap();
    assert_eq!(snapshot.services.total, 0);
}
