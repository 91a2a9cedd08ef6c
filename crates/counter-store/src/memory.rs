use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;

use crate::{
    CounterStoreError, Result,
    store::{CounterBatch, CounterStore},
};

/// Failure behaviour injected into the in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultMode {
    /// Commands run normally.
    #[default]
    Healthy,
    /// Every command fails as unreachable and nothing is applied.
    Unavailable,
    /// Every command fails as timed out and nothing is applied.
    Uncertain,
    /// Batches are applied but the reply is lost.
    UncertainAfterApply,
    /// Every command fails with a command error and nothing is applied.
    Rejecting,
}

/// Number of executed batches kept for inspection.
const HISTORY_LIMIT: usize = 1024;

#[derive(Debug, Default)]
struct InMemoryCounterState {
    counters: HashMap<String, i64>,
    markers: HashMap<String, Instant>,
    executed: Vec<CounterBatch>,
    fault: FaultMode,
}

/// In-memory counter store for testing.
///
/// Batches are evaluated under a single lock, so concurrent batches never
/// interleave. Faults can be injected to exercise every failure class.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCounterStore {
    state: Arc<Mutex<InMemoryCounterState>>,
}

impl InMemoryCounterStore {
    /// Creates a new empty in-memory counter store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure behaviour for subsequent commands.
    pub fn set_fault(&self, fault: FaultMode) {
        self.lock().fault = fault;
    }

    /// Overwrites a counter, bypassing faults.
    pub fn set_counter(&self, key: &str, value: i64) {
        self.lock().counters.insert(key.to_string(), value);
    }

    /// Reads a counter, bypassing faults.
    pub fn counter(&self, key: &str) -> Option<i64> {
        self.lock().counters.get(key).copied()
    }

    /// Returns the most recent batches that reached the store (applied or not), in arrival order.
    pub fn executed_batches(&self) -> Vec<CounterBatch> {
        self.lock().executed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryCounterState> {
        // A poisoned lock only means a test panicked mid-command; the map is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_fault(fault: FaultMode) -> Result<()> {
        match fault {
            FaultMode::Healthy | FaultMode::UncertainAfterApply => Ok(()),
            FaultMode::Unavailable => Err(CounterStoreError::Unavailable(
                "connection refused".to_string(),
            )),
            FaultMode::Uncertain => Err(CounterStoreError::Uncertain(
                "response timed out".to_string(),
            )),
            FaultMode::Rejecting => Err(CounterStoreError::Command(
                "command rejected".to_string(),
            )),
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn execute(&self, batch: &CounterBatch) -> Result<Vec<i64>> {
        let mut state = self.lock();
        let fault = state.fault;

        // An unreachable store never sees the batch.
        if fault != FaultMode::Unavailable {
            if state.executed.len() == HISTORY_LIMIT {
                state.executed.remove(0);
            }
            state.executed.push(batch.clone());
        }
        Self::check_fault(fault)?;

        state
            .markers
            .insert(batch.marker_key.clone(), Instant::now() + batch.marker_ttl);

        let mut results = Vec::with_capacity(batch.increments.len());
        for increment in &batch.increments {
            let value = state.counters.entry(increment.key.clone()).or_insert(0);
            *value += increment.delta;
            results.push(*value);
        }

        if fault == FaultMode::UncertainAfterApply {
            return Err(CounterStoreError::Uncertain(
                "response lost after apply".to_string(),
            ));
        }
        Ok(results)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let state = self.lock();
        Self::check_fault(state.fault)?;

        if state.counters.contains_key(key) {
            return Ok(true);
        }
        Ok(state
            .markers
            .get(key)
            .is_some_and(|expires| *expires > Instant::now()))
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool> {
        let mut state = self.lock();
        Self::check_fault(state.fault)?;

        if state.counters.contains_key(key) {
            return Ok(false);
        }
        state.counters.insert(key.to_string(), value);
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let state = self.lock();
        Self::check_fault(state.fault)?;
        Ok(state.counters.get(key).copied())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::CounterIncrement;

    fn batch(marker: &str, increments: &[(&str, i64)]) -> CounterBatch {
        CounterBatch {
            marker_key: marker.to_string(),
            marker_ttl: Duration::from_secs(60),
            increments: increments
                .iter()
                .map(|(k, d)| CounterIncrement {
                    key: k.to_string(),
                    delta: *d,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_execute_returns_resulting_values() {
        let store = InMemoryCounterStore::new();
        store.set_counter("a", 10);

        let values = store
            .execute(&batch("request:1", &[("a", -3), ("b", 5)]))
            .await
            .unwrap();

        assert_eq!(values, vec![7, 5]);
        assert!(store.exists("request:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_applies_nothing() {
        let store = InMemoryCounterStore::new();
        store.set_counter("a", 10);
        store.set_fault(FaultMode::Unavailable);

        let result = store.execute(&batch("request:1", &[("a", -3)])).await;

        assert!(matches!(result, Err(CounterStoreError::Unavailable(_))));
        assert_eq!(store.counter("a"), Some(10));
        assert!(store.executed_batches().is_empty());
    }

    #[tokio::test]
    async fn test_uncertain_after_apply_keeps_effects() {
        let store = InMemoryCounterStore::new();
        store.set_counter("a", 10);
        store.set_fault(FaultMode::UncertainAfterApply);

        let result = store.execute(&batch("request:1", &[("a", -3)])).await;

        assert!(matches!(result, Err(CounterStoreError::Uncertain(_))));
        assert_eq!(store.counter("a"), Some(7));

        store.set_fault(FaultMode::Healthy);
        assert!(store.exists("request:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_marker_does_not_exist() {
        let store = InMemoryCounterStore::new();
        let mut b = batch("request:1", &[("a", 1)]);
        b.marker_ttl = Duration::ZERO;
        store.execute(&b).await.unwrap();

        assert!(!store.exists("request:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_if_absent_keeps_existing_value() {
        let store = InMemoryCounterStore::new();

        assert!(store.set_if_absent("a", 100).await.unwrap());
        assert!(!store.set_if_absent("a", 5).await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), Some(100));
    }
}
