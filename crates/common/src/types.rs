use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Primary key of a product row.
///
/// Both stores address stock by this id: the relational table by primary key and
/// the counter store by `product_stock:<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

impl ProductId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ProductId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A signed stock delta for a single product.
///
/// Positive quantities increase stock, negative quantities decrease it.
/// Serialized as `{"productId": .., "quantity": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChange {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl StockChange {
    pub fn new(product_id: impl Into<ProductId>, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }

    /// Returns the same change with the sign flipped.
    pub fn negated(&self) -> Self {
        Self {
            product_id: self.product_id,
            quantity: -self.quantity,
        }
    }
}

/// Returns the changes sorted by ascending product id.
///
/// Every multi-product operation visits keys in this order so that concurrent
/// batches and row locks share one global ordering. The sort is stable: repeated
/// product ids keep their relative order.
pub fn canonical_order(changes: &[StockChange]) -> Vec<StockChange> {
    let mut sorted = changes.to_vec();
    sorted.sort_by_key(|c| c.product_id);
    sorted
}

/// Unique token for one logical stock mutation attempt.
///
/// Doubles as the ledger idempotency key and as the marker written into the
/// counter store alongside the batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKey(String);

impl RequestKey {
    /// Mints a new random request key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for RequestKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}
