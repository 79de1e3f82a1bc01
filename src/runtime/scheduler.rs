//! Periodic maintenance driver.
//!
//! Four jobs run on their own intervals: the automatic transition
//! processor, ledger cleanup, metrics logging and the blocked-service retry.
//! A job logs its result and swallows its error so one bad pass never stops
//! the loop.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::EngineConfig;
use crate::core::Engine;
use crate::runtime::tokio_spawner::Spawn;

/// One periodic maintenance job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaintenanceJob {
    /// Drive pending automatic transitions.
    ProcessAutomatic,
    /// Delete old finished transitions.
    Cleanup,
    /// Log a metrics snapshot and long-running work.
    LogMetrics,
    /// Restart blocked services flagged for auto-retry.
    RetryBlocked,
}

impl MaintenanceJob {
    /// Every job.
    pub const ALL: [Self; 4] = [
        Self::ProcessAutomatic,
        Self::Cleanup,
        Self::LogMetrics,
        Self::RetryBlocked,
    ];

    /// Name used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ProcessAutomatic => "process_automatic",
            Self::Cleanup => "cleanup",
            Self::LogMetrics => "log_metrics",
            Self::RetryBlocked => "retry_blocked",
        }
    }

    /// Interval of the job under `config`.
    pub const fn period(self, config: &EngineConfig) -> Duration {
        match self {
            Self::ProcessAutomatic => config.automatic_interval(),
            Self::Cleanup => config.cleanup_interval(),
            Self::LogMetrics => config.metrics_interval(),
            Self::RetryBlocked => config.auto_retry_interval(),
        }
    }

    /// Run one pass. Errors are logged, never returned.
    pub async fn run(self, engine: &Engine) {
        match self {
            Self::ProcessAutomatic => match engine.ledger().process_automatic().await {
                Ok(report) => tracing::debug!(picked = report.picked, "automatic pass done"),
                Err(err) => tracing::error!(job = self.name(), error = %err, "job failed"),
            },
            Self::Cleanup => {
                let days = engine.config().cleanup_retention_days;
                match engine.ledger().cleanup(days).await {
                    Ok(removed) => tracing::info!(removed, days, "ledger cleanup done"),
                    Err(err) => tracing::error!(job = self.name(), error = %err, "job failed"),
                }
            }
            Self::LogMetrics => Self::log_metrics(engine).await,
            Self::RetryBlocked => match engine.services().retry_blocked().await {
                Ok(outcomes) => {
                    let started = outcomes
                        .iter()
                        .filter(|o| o.result.as_ref().is_ok_and(|s| s.is_started()))
                        .count();
                    if !outcomes.is_empty() {
                        tracing::info!(retried = outcomes.len(), started, "blocked services retried");
                    }
                }
                Err(err) => tracing::error!(job = self.name(), error = %err, "job failed"),
            },
        }
    }

    async fn log_metrics(engine: &Engine) {
        match engine.metrics().snapshot().await {
            Ok(snap) => tracing::info!(
                services = snap.services.total,
                unit_resources = snap.unit_resources.total,
                composite_resources = snap.composite_resources.total,
                transitions_active = snap.transitions_active,
                transitions_failed = snap.transitions_failed,
                throughput_per_hour = snap.throughput_per_hour,
                "metrics snapshot"
            ),
            Err(err) => tracing::error!(job = "log_metrics", error = %err, "job failed"),
        }

        let threshold = engine.config().long_running_threshold();
        match engine.ledger().find_long_running(threshold).await {
            Ok(slow) if !slow.is_empty() => {
                tracing::warn!(count = slow.len(), "long-running transitions detected");
            }
            Ok(_) => {}
            Err(err) => tracing::error!(job = "log_metrics", error = %err, "job failed"),
        }

        match engine.services().find_overrunning().await {
            Ok(late) if !late.is_empty() => {
                let ids: Vec<_> = late.iter().map(|s| s.id).collect();
                tracing::warn!(?ids, "services past their execution bound");
            }
            Ok(_) => {}
            Err(err) => tracing::error!(job = "log_metrics", error = %err, "job failed"),
        }
    }
}

/// Handle to the running maintenance jobs.
pub struct MaintenanceScheduler {
    shutdown: watch::Sender<bool>,
    finished: mpsc::Receiver<()>,
}

impl MaintenanceScheduler {
    /// Spawn every job on `spawner`. The first pass of each job runs one
    /// period after start.
    pub fn start<S: Spawn>(engine: &Engine, spawner: &S) -> Self {
        let (shutdown, stop_rx) = watch::channel(false);
        let (done_tx, finished) = mpsc::channel(1);
        for job in MaintenanceJob::ALL {
            let engine = engine.clone();
            let stop_rx = stop_rx.clone();
            let done_tx = done_tx.clone();
            spawner.spawn(job_loop(job, engine, stop_rx, done_tx));
        }
        tracing::info!(jobs = MaintenanceJob::ALL.len(), "maintenance scheduler started");
        Self { shutdown, finished }
    }

    /// Signal every job to stop and wait until all have exited.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        // Each job holds a sender; recv yields None once all are dropped.
        while self.finished.recv().await.is_some() {}
        tracing::info!("maintenance scheduler stopped");
    }
}

async fn job_loop(
    job: MaintenanceJob,
    engine: Engine,
    mut stop: watch::Receiver<bool>,
    _done: mpsc::Sender<()>,
) {
    let period = job.period(engine.config());
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => job.run(&engine).await,
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!(job = job.name(), "maintenance job exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_periods_follow_config() {
        let config = EngineConfig::default();
        assert_eq!(
            MaintenanceJob::Cleanup.period(&config),
            Duration::from_secs(3600)
        );
        assert_eq!(
            MaintenanceJob::RetryBlocked.period(&config),
            Duration::from_secs(120)
        );
        assert_eq!(MaintenanceJob::ALL.len(), 4);
    }
}
