//! Reclaim background worker.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::engine::{AllocationEngine, ReclaimReport};

#[derive(Debug, Clone)]
pub struct ReclaimWorkerConfig {
    pub interval: Duration,
}

impl Default for ReclaimWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
        }
    }
}

/// Worker that sweeps overdue assignments on a fixed cadence.
pub struct ReclaimWorker {
    engine: AllocationEngine,
    config: ReclaimWorkerConfig,
}

impl ReclaimWorker {
    pub fn new(engine: AllocationEngine, config: ReclaimWorkerConfig) -> Self {
        Self { engine, config }
    }

    /// Run the reclaim worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            overdue_threshold_secs = self.engine.config().overdue_threshold.num_seconds(),
            "Starting reclaim worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reclaim worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single sweep at the engine's current time.
    pub async fn run_once(&self) -> ReclaimReport {
        let now = self.engine.now();
        let report = self.engine.reclaim_overdue(now).await;

        if report.scan_failed {
            error!("Reclaim sweep could not scan for overdue assignments");
        } else if report.failed > 0 {
            warn!(
                overdue = report.overdue,
                reclaimed = report.reclaimed,
                already_resolved = report.already_resolved,
                failed = report.failed,
                "Reclaim sweep finished with failures"
            );
        } else if report.overdue > 0 {
            info!(
                overdue = report.overdue,
                reclaimed = report.reclaimed,
                already_resolved = report.already_resolved,
                "Reclaim sweep complete"
            );
        } else {
            debug!("Reclaim sweep found nothing overdue");
        }

        report
    }

    /// Spawn the worker onto the runtime with its own shutdown channel.
    pub fn start(self) -> ReclaimHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });
        ReclaimHandle { shutdown_tx, join }
    }
}

/// Owner of a running reclaim worker.
pub struct ReclaimHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReclaimHandle {
    /// Signal shutdown and wait up to `timeout` for the in-flight sweep to end.
    pub async fn stop(self, timeout: Duration) {
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(timeout, self.join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Reclaim worker task panicked"),
            Err(_) => warn!("Reclaim worker did not shut down in time"),
        }
    }
}
