//! Builder wiring an [`Engine`] from configuration, a store and an executor.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::core::{Engine, EngineError, EngineResult, ImmediateExecutor, Store, TransitionExecutor};
use crate::infra::InMemoryStore;

/// Assembles an [`Engine`].
///
/// Unset parts fall back to an [`InMemoryStore`] and, for the executor, a
/// sleeping executor of `simulated_work_ms` (or an immediate one when that
/// is zero or the tokio runtime is disabled).
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    store: Option<Arc<dyn Store>>,
    executor: Option<Arc<dyn TransitionExecutor>>,
}

impl EngineBuilder {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `store`.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run transition work on `executor`.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn TransitionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> EngineResult<Engine> {
        let config = self.config.unwrap_or_default();
        config.validate().map_err(|errors| {
            EngineError::Configuration(format!("config invalid: {}", errors.join("; ")))
        })?;

        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let executor = self.executor.unwrap_or_else(|| default_executor(&config));

        tracing::info!(
            automatic_interval_secs = config.automatic_interval_secs,
            cleanup_retention_days = config.cleanup_retention_days,
            "engine built"
        );
        Ok(Engine::new(config, store, executor))
    }
}

#[cfg(feature = "tokio-runtime")]
fn default_executor(config: &EngineConfig) -> Arc<dyn TransitionExecutor> {
    if config.simulated_work_ms == 0 {
        Arc::new(ImmediateExecutor)
    } else {
        Arc::new(crate::core::DelayedExecutor::new(config.simulated_work()))
    }
}

#[cfg(not(feature = "tokio-runtime"))]
fn default_executor(_config: &EngineConfig) -> Arc<dyn TransitionExecutor> {
    Arc::new(ImmediateExecutor)
}
