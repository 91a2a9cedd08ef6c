use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{ProductId, StockChange, canonical_order};
use tokio::sync::RwLock;

use crate::Result;
use crate::products::ProductStockRepository;

/// In-memory product stock table for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductStockRepository {
    stocks: Arc<RwLock<BTreeMap<ProductId, i64>>>,
}

impl InMemoryProductStockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a product row.
    pub async fn set_stock(&self, product_id: impl Into<ProductId>, stock: i64) {
        self.stocks.write().await.insert(product_id.into(), stock);
    }
}

#[async_trait]
impl ProductStockRepository for InMemoryProductStockRepository {
    async fn apply_deltas(&self, changes: &[StockChange]) -> Result<Vec<ProductId>> {
        let mut stocks = self.stocks.write().await;
        let mut skipped = Vec::new();

        for change in canonical_order(changes) {
            match stocks.get_mut(&change.product_id) {
                Some(stock) if *stock + change.quantity >= 0 => *stock += change.quantity,
                _ => skipped.push(change.product_id),
            }
        }
        Ok(skipped)
    }

    async fn stock_of(&self, product_id: ProductId) -> Result<Option<i64>> {
        Ok(self.stocks.read().await.get(&product_id).copied())
    }

    async fn all_stocks(&self) -> Result<Vec<(ProductId, i64)>> {
        Ok(self
            .stocks
            .read()
            .await
            .iter()
            .map(|(id, stock)| (*id, *stock))
            .collect())
    }
}
