//! Engine configuration.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Prefix of the environment variables read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "PETRI_";

/// Intervals and thresholds driving the engine and its maintenance jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the automatic transition processor, in seconds.
    pub automatic_interval_secs: u64,
    /// Period of the ledger cleanup job, in seconds.
    pub cleanup_interval_secs: u64,
    /// Finished transitions older than this many days are deleted.
    pub cleanup_retention_days: u32,
    /// Period of the metrics log job, in seconds.
    pub metrics_interval_secs: u64,
    /// Period of the blocked-service retry job, in seconds.
    pub auto_retry_interval_secs: u64,
    /// In-progress transitions older than this are reported as long-running.
    pub long_running_threshold_secs: u64,
    /// Simulated duration of transition work, in milliseconds. Zero
    /// completes immediately.
    pub simulated_work_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            automatic_interval_secs: 60,
            cleanup_interval_secs: 3600,
            cleanup_retention_days: 7,
            metrics_interval_secs: 300,
            auto_retry_interval_secs: 120,
            long_running_threshold_secs: 600,
            simulated_work_ms: 100,
        }
    }
}

impl EngineConfig {
    /// Validate configuration values, collecting every problem.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let intervals = [
            ("automatic_interval_secs", self.automatic_interval_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
            ("metrics_interval_secs", self.metrics_interval_secs),
            ("auto_retry_interval_secs", self.auto_retry_interval_secs),
            ("long_running_threshold_secs", self.long_running_threshold_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                errors.push(format!("{name} must be greater than 0"));
            }
        }
        if self.cleanup_retention_days == 0 {
            errors.push("cleanup_retention_days must be greater than 0".into());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate().map_err(|errors| errors.join("; "))?;
        Ok(cfg)
    }

    /// Load a `.env` file if present, then override defaults from
    /// `PETRI_*` variables (e.g. `PETRI_CLEANUP_RETENTION_DAYS`).
    pub fn from_env() -> AppResult<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                return Err(err).context("failed to load .env file");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, applying the `PETRI_` names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let mut cfg = Self::default();
        read_var(&lookup, "AUTOMATIC_INTERVAL_SECS", &mut cfg.automatic_interval_secs)?;
        read_var(&lookup, "CLEANUP_INTERVAL_SECS", &mut cfg.cleanup_interval_secs)?;
        read_var(&lookup, "CLEANUP_RETENTION_DAYS", &mut cfg.cleanup_retention_days)?;
        read_var(&lookup, "METRICS_INTERVAL_SECS", &mut cfg.metrics_interval_secs)?;
        read_var(&lookup, "AUTO_RETRY_INTERVAL_SECS", &mut cfg.auto_retry_interval_secs)?;
        read_var(
            &lookup,
            "LONG_RUNNING_THRESHOLD_SECS",
            &mut cfg.long_running_threshold_secs,
        )?;
        read_var(&lookup, "SIMULATED_WORK_MS", &mut cfg.simulated_work_ms)?;
        cfg.validate()
            .map_err(|errors| anyhow::anyhow!(errors.join("; ")))
            .context("invalid engine configuration from environment")?;
        Ok(cfg)
    }

    /// Automatic processor period.
    pub const fn automatic_interval(&self) -> Duration {
        Duration::from_secs(self.automatic_interval_secs)
    }

    /// Cleanup period.
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Metrics log period.
    pub const fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    /// Auto-retry period.
    pub const fn auto_retry_interval(&self) -> Duration {
        Duration::from_secs(self.auto_retry_interval_secs)
    }

    /// Long-running threshold.
    pub const fn long_running_threshold(&self) -> Duration {
        Duration::from_secs(self.long_running_threshold_secs)
    }

    /// Simulated work duration.
    pub const fn simulated_work(&self) -> Duration {
        Duration::from_millis(self.simulated_work_ms)
    }
}

fn read_var<T>(lookup: &impl Fn(&str) -> Option<String>, suffix: &str, slot: &mut T) -> AppResult<()>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    if let Some(raw) = lookup(&key) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has invalid value `{raw}`"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_lookup_overrides_and_rejects_garbage() {
        let vars: HashMap<&str, &str> = [
            ("PETRI_CLEANUP_RETENTION_DAYS", "30"),
            ("PETRI_SIMULATED_WORK_MS", "0"),
        ]
        .into_iter()
        .collect();
        let cfg = EngineConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(cfg.cleanup_retention_days, 30);
        assert_eq!(cfg.simulated_work_ms, 0);
        assert_eq!(cfg.automatic_interval_secs, 60);

        let err = EngineConfig::from_lookup(|k| {
            (k == "PETRI_METRICS_INTERVAL_SECS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("PETRI_METRICS_INTERVAL_SECS"));
    }
}
