//! Replays stock intents whose outcome was never confirmed.

use std::sync::Arc;

use common::{RequestKey, StockChange};
use counter_store::{CounterStore, CounterStoreError, MutationError, StockMutationEngine};
use intent_ledger::{IntentLedger, IntentLedgerExt, IntentReason, StockIntentRecord};
use tokio::sync::Mutex;

use crate::{ReconcileError, Result};

/// What to do with an intent whose replay failed for an unexpected reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnexpectedFailurePolicy {
    /// Flag it executed so it never blocks later runs.
    #[default]
    MarkExecuted,
    /// Keep it pending for an operator to look at.
    ///
    /// A replay rejected part way through may still have written its marker,
    /// in which case the next run retires the intent as already landed.
    LeavePending,
}

impl UnexpectedFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnexpectedFailurePolicy::MarkExecuted => "mark_executed",
            UnexpectedFailurePolicy::LeavePending => "leave_pending",
        }
    }
}

impl std::fmt::Display for UnexpectedFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UnexpectedFailurePolicy {
    type Err = ReconcileError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mark_executed" => Ok(UnexpectedFailurePolicy::MarkExecuted),
            "leave_pending" => Ok(UnexpectedFailurePolicy::LeavePending),
            other => Err(ReconcileError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Fate of a single intent within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOutcome {
    /// A previous attempt had reached the store; flagged without replaying.
    AlreadyLanded,
    /// Replayed successfully.
    Replayed,
    /// Replay ran out of stock and was undone.
    Compensated,
    /// The store was unreachable or slow; retried on the next run.
    Deferred,
    /// Unexpected failure, flagged executed by policy.
    Dropped,
    /// Unexpected failure, kept pending by policy.
    Held,
}

impl IntentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentOutcome::AlreadyLanded => "already_landed",
            IntentOutcome::Replayed => "replayed",
            IntentOutcome::Compensated => "compensated",
            IntentOutcome::Deferred => "deferred",
            IntentOutcome::Dropped => "dropped",
            IntentOutcome::Held => "held",
        }
    }
}

/// Counts from one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub scanned: usize,
    pub already_landed: usize,
    pub replayed: usize,
    pub compensated: usize,
    pub deferred: usize,
    pub dropped: usize,
    pub held: usize,
}

impl TickReport {
    fn record(&mut self, outcome: IntentOutcome) {
        self.scanned += 1;
        match outcome {
            IntentOutcome::AlreadyLanded => self.already_landed += 1,
            IntentOutcome::Replayed => self.replayed += 1,
            IntentOutcome::Compensated => self.compensated += 1,
            IntentOutcome::Deferred => self.deferred += 1,
            IntentOutcome::Dropped => self.dropped += 1,
            IntentOutcome::Held => self.held += 1,
        }
    }

    /// Number of intents flagged executed during the run.
    pub fn executed(&self) -> usize {
        self.already_landed + self.replayed + self.compensated + self.dropped
    }
}

/// Drains overdue intents from the ledger and replays them.
///
/// Only one run executes at a time; a run requested while another is in
/// flight is vetoed. Intents are handled one by one and a failure on one
/// never stops the others.
pub struct ReconciliationJob<C: CounterStore, L: IntentLedger> {
    engine: Arc<StockMutationEngine<C>>,
    ledger: Arc<L>,
    policy: UnexpectedFailurePolicy,
    running: Mutex<()>,
}

impl<C: CounterStore, L: IntentLedger> ReconciliationJob<C, L> {
    pub fn new(engine: Arc<StockMutationEngine<C>>, ledger: Arc<L>) -> Self {
        Self {
            engine,
            ledger,
            policy: UnexpectedFailurePolicy::default(),
            running: Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: UnexpectedFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> UnexpectedFailurePolicy {
        self.policy
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Performs one reconciliation pass.
    #[tracing::instrument(skip(self), fields(policy = %self.policy))]
    pub async fn run_once(&self) -> Result<TickReport> {
        let Ok(_running) = self.running.try_lock() else {
            metrics::counter!("reconciliation_vetoed_total").increment(1);
            tracing::info!("reconciliation already running, skipping");
            return Err(ReconcileError::AlreadyRunning);
        };
        metrics::counter!("reconciliation_runs_total").increment(1);

        let intents = self
            .ledger
            .find_overdue_unexecuted(IntentReason::StockChange)
            .await?;

        let mut report = TickReport::default();
        for intent in &intents {
            let outcome = self.reconcile(intent).await;
            metrics::counter!("reconciliation_intents_total", "outcome" => outcome.as_str())
                .increment(1);
            report.record(outcome);
        }

        if report.scanned > 0 {
            tracing::info!(?report, "reconciliation run finished");
        }
        Ok(report)
    }

    #[tracing::instrument(skip(self, intent), fields(request_key = %intent.request_key))]
    async fn reconcile(&self, intent: &StockIntentRecord) -> IntentOutcome {
        match self.has_landed(intent).await {
            Ok(true) => {
                tracing::info!("earlier attempt already landed");
                return self.finish(intent, IntentOutcome::AlreadyLanded).await;
            }
            Ok(false) => {}
            Err(e) => return self.on_failure(intent, e).await,
        }

        let replay_key = RequestKey::generate();
        if let Err(e) = self
            .ledger
            .record_replay_key(&intent.request_key, &replay_key)
            .await
        {
            tracing::warn!(error = %e, "could not record replay key, deferring");
            return IntentOutcome::Deferred;
        }

        match self.engine.apply_batch(&replay_key, &intent.content).await {
            Ok(()) => {
                tracing::info!(%replay_key, "intent replayed");
                self.finish(intent, IntentOutcome::Replayed).await
            }
            Err(MutationError::OutOfStock { products, .. }) => {
                tracing::warn!(%replay_key, ?products, "replay ran out of stock, compensating");
                self.compensate(intent).await
            }
            Err(e) => self.on_failure(intent, e).await,
        }
    }

    async fn has_landed(&self, intent: &StockIntentRecord) -> std::result::Result<bool, MutationError> {
        for key in intent.attempt_keys() {
            if self.engine.has_request_key(key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn compensate(&self, intent: &StockIntentRecord) -> IntentOutcome {
        let inverse: Vec<StockChange> = intent.content.iter().map(StockChange::negated).collect();
        let compensation_key = RequestKey::generate();

        match self.engine.apply_batch(&compensation_key, &inverse).await {
            Ok(()) => self.finish(intent, IntentOutcome::Compensated).await,
            Err(MutationError::Store(
                e @ (CounterStoreError::Unavailable(_) | CounterStoreError::Uncertain(_)),
            )) => {
                // The compensation becomes an intent of its own.
                tracing::warn!(%compensation_key, error = %e, "compensation not confirmed, recording intent");
                if self
                    .ledger
                    .save_intent_or_log(&compensation_key, IntentReason::StockChange, &inverse)
                    .await
                {
                    self.finish(intent, IntentOutcome::Compensated).await
                } else {
                    IntentOutcome::Deferred
                }
            }
            Err(e) => self.on_failure(intent, e).await,
        }
    }

    async fn on_failure(&self, intent: &StockIntentRecord, error: MutationError) -> IntentOutcome {
        if let MutationError::Store(
            CounterStoreError::Unavailable(_) | CounterStoreError::Uncertain(_),
        ) = error
        {
            tracing::warn!(error = %error, "counter store not reachable, retrying next run");
            return IntentOutcome::Deferred;
        }

        match self.policy {
            UnexpectedFailurePolicy::MarkExecuted => {
                tracing::error!(
                    error = %error,
                    content = ?intent.content,
                    "unexpected failure, marking intent executed without applying it"
                );
                self.finish(intent, IntentOutcome::Dropped).await
            }
            UnexpectedFailurePolicy::LeavePending => {
                tracing::error!(
                    error = %error,
                    content = ?intent.content,
                    "unexpected failure, leaving intent pending"
                );
                IntentOutcome::Held
            }
        }
    }

    /// Flags the intent executed. If that fails the intent stays pending and
    /// the next run finds the landed marker.
    async fn finish(&self, intent: &StockIntentRecord, outcome: IntentOutcome) -> IntentOutcome {
        match self.ledger.mark_executed(&intent.request_key).await {
            Ok(_) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, outcome = outcome.as_str(), "could not mark intent executed");
                IntentOutcome::Deferred
            }
        }
    }
}
