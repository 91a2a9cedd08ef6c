use std::sync::Arc;

use counter_store::{CounterStore, StockMutationEngine};

use crate::error::{Result, StockError};
use crate::products::ProductStockRepository;

/// Counts from one warm-up pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub seeded: usize,
    pub already_present: usize,
}

/// Seeds the counter store from the product table.
///
/// Existing counters are never overwritten: they may hold reservations the
/// table does not know about yet.
pub struct StockWarmup<C: CounterStore, P: ProductStockRepository> {
    engine: Arc<StockMutationEngine<C>>,
    products: P,
}

impl<C: CounterStore, P: ProductStockRepository> StockWarmup<C, P> {
    pub fn new(engine: Arc<StockMutationEngine<C>>, products: P) -> Self {
        Self { engine, products }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<WarmupReport> {
        let stocks = self.products.all_stocks().await?;
        let mut report = WarmupReport::default();

        for (product_id, stock) in stocks {
            if self
                .engine
                .seed_stock(product_id, stock)
                .await
                .map_err(StockError::from)?
            {
                report.seeded += 1;
            } else {
                report.already_present += 1;
            }
        }

        tracing::info!(
            seeded = report.seeded,
            already_present = report.already_present,
            "stock counters warmed up"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use counter_store::{EngineOptions, FaultMode, InMemoryCounterStore};

    use super::*;
    use crate::products::InMemoryProductStockRepository;

    #[tokio::test]
    async fn test_warmup_seeds_missing_counters_only() {
        let store = InMemoryCounterStore::new();
        let products = InMemoryProductStockRepository::new();
        products.set_stock(1, 50).await;
        products.set_stock(2, 80).await;
        store.set_counter("product_stock:2", 12);

        let warmup = StockWarmup::new(
            Arc::new(StockMutationEngine::new(store.clone(), EngineOptions::default())),
            products,
        );
        let report = warmup.run().await.unwrap();

        assert_eq!(report, WarmupReport { seeded: 1, already_present: 1 });
        assert_eq!(store.counter("product_stock:1"), Some(50));
        assert_eq!(store.counter("product_stock:2"), Some(12));
    }

    #[tokio::test]
    async fn test_warmup_fails_when_store_unreachable() {
        let store = InMemoryCounterStore::new();
        store.set_fault(FaultMode::Unavailable);
        let products = InMemoryProductStockRepository::new();
        products.set_stock(1, 50).await;

        let warmup = StockWarmup::new(
            Arc::new(StockMutationEngine::new(store, EngineOptions::default())),
            products,
        );

        assert!(matches!(
            warmup.run().await,
            Err(StockError::InfraUnavailable(_))
        ));
    }
}
