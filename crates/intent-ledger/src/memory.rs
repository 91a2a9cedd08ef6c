use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{RequestKey, StockChange};
use tokio::sync::RwLock;

use crate::{
    DEFAULT_GRACE_WINDOW, IntentReason, LedgerError, Result, StockIntentRecord,
    ledger::IntentLedger,
};

/// In-memory intent ledger implementation for testing.
///
/// Records are kept in insertion order. Writes can be made to fail to
/// exercise callers that must survive an unavailable ledger.
#[derive(Clone)]
pub struct InMemoryIntentLedger {
    records: Arc<RwLock<Vec<StockIntentRecord>>>,
    grace_window: Duration,
    fail_writes: Arc<AtomicBool>,
}

impl Default for InMemoryIntentLedger {
    fn default() -> Self {
        Self {
            records: Arc::default(),
            grace_window: DEFAULT_GRACE_WINDOW,
            fail_writes: Arc::default(),
        }
    }
}

impl InMemoryIntentLedger {
    /// Creates a new empty in-memory ledger with the default grace window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the age a record must reach before it is reported as overdue.
    pub fn with_grace_window(mut self, grace_window: Duration) -> Self {
        self.grace_window = grace_window;
        self
    }

    /// Makes every subsequent insert fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Moves a record's creation time into the past.
    pub async fn backdate(&self, request_key: &RequestKey, by: Duration) {
        let by = chrono::Duration::milliseconds(by.as_millis() as i64);
        let mut records = self.records.write().await;
        if let Some(record) = records.iter_mut().find(|r| &r.request_key == request_key) {
            record.created_at -= by;
        }
    }

    /// Returns a copy of every record, executed or not.
    pub async fn records(&self) -> Vec<StockIntentRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl IntentLedger for InMemoryIntentLedger {
    async fn save_intent(
        &self,
        request_key: &RequestKey,
        reason: IntentReason,
        content: &[StockChange],
    ) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("writes disabled".to_string()));
        }

        let mut records = self.records.write().await;
        if records.iter().any(|r| &r.request_key == request_key) {
            return Err(LedgerError::DuplicateRequestKey(request_key.clone()));
        }
        records.push(StockIntentRecord::new(
            request_key.clone(),
            reason,
            content.to_vec(),
        ));
        Ok(())
    }

    async fn find_overdue_unexecuted(
        &self,
        reason: IntentReason,
    ) -> Result<Vec<StockIntentRecord>> {
        let cutoff =
            Utc::now() - chrono::Duration::milliseconds(self.grace_window.as_millis() as i64);

        let records = self.records.read().await;
        let mut overdue: Vec<_> = records
            .iter()
            .filter(|r| r.reason == reason && !r.is_executed && r.created_at <= cutoff)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        overdue.sort_by_key(|r| r.created_at);
        Ok(overdue)
    }

    async fn mark_executed(&self, request_key: &RequestKey) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| &r.request_key == request_key) {
            Some(record) => {
                record.is_executed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_replay_key(
        &self,
        request_key: &RequestKey,
        replay_key: &RequestKey,
    ) -> Result<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("writes disabled".to_string()));
        }

        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| &r.request_key == request_key) {
            Some(record) => {
                record.replay_key = Some(replay_key.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find(&self, request_key: &RequestKey) -> Result<Option<StockIntentRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| &r.request_key == request_key).cloned())
    }

    async fn count_unexecuted(&self, reason: IntentReason) -> Result<u64> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.reason == reason && !r.is_executed)
            .count() as u64)
    }

    async fn purge_executed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| !(r.is_executed && r.created_at < cutoff));
        Ok((before - records.len()) as u64)
    }
}
