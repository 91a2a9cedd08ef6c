//! Fixed-interval driver for the reconciliation job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use counter_store::CounterStore;
use intent_ledger::IntentLedger;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::job::ReconciliationJob;

/// Default time between reconciliation runs.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Runs a [`ReconciliationJob`] on a fixed interval.
///
/// Runs never overlap: the next tick waits for the previous run, and a late
/// tick is delayed rather than bunched up.
pub struct ReconciliationScheduler<C: CounterStore, L: IntentLedger> {
    job: Arc<ReconciliationJob<C, L>>,
    interval: Duration,
    retention: Option<Duration>,
}

impl<C, L> ReconciliationScheduler<C, L>
where
    C: CounterStore + 'static,
    L: IntentLedger + 'static,
{
    pub fn new(job: Arc<ReconciliationJob<C, L>>) -> Self {
        Self {
            job,
            interval: DEFAULT_INTERVAL,
            retention: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Purge executed intents older than `retention` after each run.
    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    /// Starts the loop on the current runtime.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "reconciliation scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("reconciliation scheduler stopped");
    }

    async fn tick(&self) {
        if let Err(e) = self.job.run_once().await {
            tracing::error!(error = %e, "reconciliation run failed");
        }

        let Some(retention) = self.retention else {
            return;
        };
        let cutoff = Utc::now() - chrono::Duration::seconds(retention.as_secs() as i64);
        match self.job.ledger().purge_executed_before(cutoff).await {
            Ok(0) => {}
            Ok(purged) => {
                metrics::counter!("reconciliation_purged_total").increment(purged);
                tracing::info!(purged, "purged executed intents");
            }
            Err(e) => tracing::warn!(error = %e, "intent purge failed"),
        }
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop to stop and waits for an in-flight run to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "reconciliation scheduler task failed");
        }
    }
}
