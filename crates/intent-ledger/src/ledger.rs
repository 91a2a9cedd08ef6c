use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{RequestKey, StockChange};

use crate::{IntentReason, Result, StockIntentRecord};

/// Age a record must reach before reconciliation may touch it.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(60);

/// Core trait for intent ledger implementations.
///
/// The ledger is a safety net for mutations whose outcome is unknown. Rows are
/// only ever inserted, flagged executed or, once executed and old enough,
/// purged. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait IntentLedger: Send + Sync {
    /// Records an intent. Fails with `DuplicateRequestKey` if the key exists.
    async fn save_intent(
        &self,
        request_key: &RequestKey,
        reason: IntentReason,
        content: &[StockChange],
    ) -> Result<()>;

    /// Returns unexecuted intents older than the grace window, oldest first.
    async fn find_overdue_unexecuted(&self, reason: IntentReason)
    -> Result<Vec<StockIntentRecord>>;

    /// Flags an intent executed. Returns false if no row matched.
    ///
    /// Calling this for a missing or already executed key is not an error.
    async fn mark_executed(&self, request_key: &RequestKey) -> Result<bool>;

    /// Stores the key of a replay attempt on the intent before it is sent.
    async fn record_replay_key(
        &self,
        request_key: &RequestKey,
        replay_key: &RequestKey,
    ) -> Result<bool>;

    /// Looks up a single intent.
    async fn find(&self, request_key: &RequestKey) -> Result<Option<StockIntentRecord>>;

    /// Counts intents still waiting for reconciliation, regardless of age.
    async fn count_unexecuted(&self, reason: IntentReason) -> Result<u64>;

    /// Deletes executed intents created before `cutoff`. Returns the number removed.
    async fn purge_executed_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Extension trait providing convenience methods for ledgers.
#[async_trait]
pub trait IntentLedgerExt: IntentLedger {
    /// Records an intent, logging instead of returning any failure.
    ///
    /// Returns true if the intent was stored.
    async fn save_intent_or_log(
        &self,
        request_key: &RequestKey,
        reason: IntentReason,
        content: &[StockChange],
    ) -> bool {
        match self.save_intent(request_key, reason, content).await {
            Ok(()) => {
                metrics::counter!("stock_intents_saved_total").increment(1);
                tracing::info!(%request_key, %reason, "intent recorded");
                true
            }
            Err(e) => {
                metrics::counter!("stock_intents_save_failed_total").increment(1);
                tracing::error!(
                    %request_key,
                    %reason,
                    content = ?content,
                    error = %e,
                    "failed to record intent"
                );
                false
            }
        }
    }
}

impl<T: IntentLedger + ?Sized> IntentLedgerExt for T {}
