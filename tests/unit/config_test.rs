//! Tests for configuration models

use petri_lifecycle::config::EngineConfig;
use std::time::Duration;

#[test]
fn test_engine_config_defaults() {
    let config = EngineConfig::default();
    assert_eq!(config.automatic_interval_secs, 60);
    assert_eq!(config.cleanup_retention_days, 7);
    assert_eq!(config.simulated_work(), Duration::from_millis(100));
    assert_eq!(config.long_running_threshold(), Duration::from_secs(600));
}

#[test]
fn test_engine_config_from_json_fills_defaults() {
    let config = EngineConfig::from_json_str(r#"{"cleanup_retention_days": 14}"#).unwrap();
    assert_eq!(config.cleanup_retention_days, 14);
    assert_eq!(config.metrics_interval_secs, 300);
}

#[test]
fn test_engine_config_rejects_zero_intervals() {
    let config = EngineConfig {
        automatic_interval_secs: 0,
        cleanup_retention_days: 0,
        ..EngineConfig::default()
    };
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("automatic_interval_secs"));

    let err = EngineConfig::from_json_str(r#"{"metrics_interval_secs": 0}"#).unwrap_err();
    assert!(err.contains("metrics_interval_secs"));
}

#[test]
fn test_engine_config_rejects_malformed_json() {
    let err = EngineConfig::from_json_str("{not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_engine_config_serde_roundtrip() {
    let config = EngineConfig {
        simulated_work_ms: 0,
        ..EngineConfig::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    let back: EngineConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}
