use std::time::Duration;

use async_trait::async_trait;
use common::{ProductId, RequestKey};

use crate::Result;

/// Returns the counter key holding a product's available stock.
pub fn stock_key(product_id: ProductId) -> String {
    format!("product_stock:{product_id}")
}

/// Returns the key of the marker written alongside a batch.
pub fn request_marker_key(request_key: &RequestKey) -> String {
    format!("request:{request_key}")
}

/// A single increment inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterIncrement {
    pub key: String,
    pub delta: i64,
}

/// A batch sent to the counter store in one round trip.
///
/// The marker is written first, then each increment in the order given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterBatch {
    pub marker_key: String,
    pub marker_ttl: Duration,
    pub increments: Vec<CounterIncrement>,
}

impl CounterBatch {
    /// Returns the counter keys in the order they will be visited.
    pub fn keys(&self) -> Vec<&str> {
        self.increments.iter().map(|i| i.key.as_str()).collect()
    }
}

/// Core trait for fast counter stores.
///
/// Implementations must not retry on their own: a retried batch whose first
/// attempt landed would apply its deltas twice.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Executes a batch in a single round trip.
    ///
    /// Returns the resulting value of every increment, in batch order. The
    /// marker's own reply is not included.
    async fn execute(&self, batch: &CounterBatch) -> Result<Vec<i64>>;

    /// Returns true if the key exists (and, for markers, has not expired).
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Sets the key only if it does not exist yet. Returns true if it was set.
    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool>;

    /// Reads a counter value.
    async fn get(&self, key: &str) -> Result<Option<i64>>;
}
