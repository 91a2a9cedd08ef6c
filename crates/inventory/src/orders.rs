//! Purchase-facing stock operations.

use std::sync::Arc;

use common::StockChange;
use counter_store::CounterStore;
use intent_ledger::IntentLedger;

use crate::error::{Result, StockError};
use crate::products::ProductStockRepository;
use crate::service::StockConsistencyService;

/// Entry point used by the order flow.
///
/// Quantities are given as positive amounts. A reservation that runs out of
/// stock is compensated here before the error is returned.
pub struct ProductOrderService<C, L, P>
where
    C: CounterStore + 'static,
    L: IntentLedger + 'static,
    P: ProductStockRepository,
{
    stock: Arc<StockConsistencyService<C, L, P>>,
}

impl<C, L, P> ProductOrderService<C, L, P>
where
    C: CounterStore + 'static,
    L: IntentLedger + 'static,
    P: ProductStockRepository,
{
    pub fn new(stock: Arc<StockConsistencyService<C, L, P>>) -> Self {
        Self { stock }
    }

    /// Reserves every product or none of them.
    #[tracing::instrument(skip(self, changes), fields(product_count = changes.len()))]
    pub async fn reserve_products(&self, changes: &[StockChange]) -> Result<()> {
        match self.stock.reserve(changes).await {
            Err(StockError::OutOfStock { products }) => {
                if let Err(e) = self.stock.cancel_reservation(changes).await {
                    metrics::counter!("stock_compensations_failed_total").increment(1);
                    tracing::error!(error = %e, "compensation after out of stock failed");
                }
                Err(StockError::OutOfStock { products })
            }
            other => other,
        }
    }

    pub async fn cancel_reservation_products(&self, changes: &[StockChange]) -> Result<()> {
        self.stock.cancel_reservation(changes).await
    }

    pub async fn order_products(&self, changes: &[StockChange]) -> Result<()> {
        self.stock.decrease(changes).await
    }

    pub async fn cancel_order_products(&self, changes: &[StockChange]) -> Result<()> {
        self.stock.increase(changes).await
    }
}
