//! Stock consistency service.
//!
//! Purchases reserve and release stock on the counter store only. Settlement
//! (`decrease`/`increase`) writes the product table first and then mirrors the
//! change into the counter store in the background. Whenever a counter-store
//! call may have landed without a reply, the attempt is recorded in the
//! intent ledger so the reconciliation job can finish it later.

use std::sync::Arc;

use common::{RequestKey, StockChange};
use counter_store::{CounterStore, StockMutationEngine};
use intent_ledger::{IntentLedger, IntentLedgerExt, IntentReason};

use crate::error::{Result, StockError};
use crate::products::ProductStockRepository;
use crate::tasks::BackgroundTasks;

/// How the settlement path mirrors into the counter store.
#[derive(Debug, Clone)]
pub struct SettlementOptions {
    /// Mirror `decrease` into the counter store as well as `increase`.
    ///
    /// Turn off when purchases already took the stock out of the counters
    /// through `reserve`, otherwise the counter is decremented twice.
    pub mirror_decrease: bool,
}

impl Default for SettlementOptions {
    fn default() -> Self {
        Self {
            mirror_decrease: true,
        }
    }
}

/// Orchestrates stock changes across the counter store, the product table and
/// the intent ledger.
pub struct StockConsistencyService<C, L, P>
where
    C: CounterStore + 'static,
    L: IntentLedger + 'static,
    P: ProductStockRepository,
{
    engine: Arc<StockMutationEngine<C>>,
    ledger: Arc<L>,
    products: P,
    tasks: BackgroundTasks,
    settlement: SettlementOptions,
}

impl<C, L, P> StockConsistencyService<C, L, P>
where
    C: CounterStore + 'static,
    L: IntentLedger + 'static,
    P: ProductStockRepository,
{
    /// Creates a new service. Ledger writes and mirrors run on `tasks`.
    pub fn new(
        engine: Arc<StockMutationEngine<C>>,
        ledger: Arc<L>,
        products: P,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            engine,
            ledger,
            products,
            tasks,
            settlement: SettlementOptions::default(),
        }
    }

    pub fn with_settlement_options(mut self, settlement: SettlementOptions) -> Self {
        self.settlement = settlement;
        self
    }

    pub fn engine(&self) -> &Arc<StockMutationEngine<C>> {
        &self.engine
    }

    pub fn products(&self) -> &P {
        &self.products
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Takes `changes` out of the live counters.
    ///
    /// On `OutOfStock` the decrement has already been applied; the caller must
    /// pass the same changes to [`cancel_reservation`](Self::cancel_reservation).
    #[tracing::instrument(skip(self, changes), fields(product_count = changes.len()))]
    pub async fn reserve(&self, changes: &[StockChange]) -> Result<()> {
        let deltas: Vec<StockChange> = changes.iter().map(StockChange::negated).collect();
        self.apply_to_counters("reserve", deltas).await
    }

    /// Returns `changes` to the live counters.
    #[tracing::instrument(skip(self, changes), fields(product_count = changes.len()))]
    pub async fn cancel_reservation(&self, changes: &[StockChange]) -> Result<()> {
        self.apply_to_counters("cancel_reservation", changes.to_vec())
            .await
    }

    /// Settles a purchase against the product table.
    ///
    /// Products whose stock would drop below zero are skipped and logged. The
    /// applied part is mirrored into the counters in the background when
    /// [`SettlementOptions::mirror_decrease`] is set.
    #[tracing::instrument(skip(self, changes), fields(product_count = changes.len()))]
    pub async fn decrease(&self, changes: &[StockChange]) -> Result<()> {
        let deltas: Vec<StockChange> = changes.iter().map(StockChange::negated).collect();
        self.settle("decrease", deltas, self.settlement.mirror_decrease)
            .await
    }

    /// Returns stock to the product table and mirrors it into the counters.
    #[tracing::instrument(skip(self, changes), fields(product_count = changes.len()))]
    pub async fn increase(&self, changes: &[StockChange]) -> Result<()> {
        self.settle("increase", changes.to_vec(), true).await
    }

    async fn apply_to_counters(&self, op: &'static str, deltas: Vec<StockChange>) -> Result<()> {
        let request_key = RequestKey::generate();
        let result = self
            .engine
            .apply_batch(&request_key, &deltas)
            .await
            .map_err(StockError::from);

        match &result {
            Ok(()) => {}
            Err(StockError::InfraUncertain(reason)) => {
                tracing::error!(%request_key, %reason, "stock change outcome unknown, recording intent");
                self.record_intent(request_key, deltas);
            }
            Err(StockError::InfraUnavailable(reason)) => {
                tracing::error!(%request_key, %reason, "counter store unreachable");
            }
            Err(StockError::OutOfStock { products }) => {
                tracing::info!(%request_key, ?products, "out of stock");
            }
            Err(e) => {
                tracing::error!(%request_key, error = %e, "stock change failed");
            }
        }

        let outcome = result.as_ref().err().map_or("ok", StockError::kind);
        metrics::counter!("stock_mutations_total", "op" => op, "outcome" => outcome).increment(1);
        result
    }

    async fn settle(&self, op: &'static str, deltas: Vec<StockChange>, mirror: bool) -> Result<()> {
        let max = self.engine.options().max_batch_size;
        if deltas.is_empty() || deltas.len() > max {
            return Err(StockError::InvalidBatch {
                size: deltas.len(),
                max,
            });
        }

        let skipped = match self.products.apply_deltas(&deltas).await {
            Ok(skipped) => skipped,
            Err(e) => {
                metrics::counter!("stock_mutations_total", "op" => op, "outcome" => e.kind())
                    .increment(1);
                tracing::error!(error = %e, "product stock update failed");
                return Err(e);
            }
        };

        if !skipped.is_empty() {
            metrics::counter!("stock_settlement_skipped_total", "op" => op)
                .increment(skipped.len() as u64);
            tracing::warn!(products = ?skipped, "product stock guard refused changes");
        }
        metrics::counter!("stock_mutations_total", "op" => op, "outcome" => "ok").increment(1);

        let applied: Vec<StockChange> = deltas
            .into_iter()
            .filter(|c| !skipped.contains(&c.product_id))
            .collect();

        if mirror && !applied.is_empty() {
            let engine = self.engine.clone();
            let ledger = self.ledger.clone();
            self.tasks.spawn("stock_mirror", async move {
                mirror_to_counters(&engine, &*ledger, applied).await;
            });
        }
        Ok(())
    }

    fn record_intent(&self, request_key: RequestKey, deltas: Vec<StockChange>) {
        let ledger = self.ledger.clone();
        self.tasks.spawn("intent_record", async move {
            ledger
                .save_intent_or_log(&request_key, IntentReason::StockChange, &deltas)
                .await;
        });
    }
}

/// Applies an already-settled change to the counters.
///
/// The product table is authoritative here, so a mirror that certainly did not
/// land is queued for replay as well as one whose outcome is unknown.
async fn mirror_to_counters<C, L>(
    engine: &StockMutationEngine<C>,
    ledger: &L,
    deltas: Vec<StockChange>,
) where
    C: CounterStore,
    L: IntentLedger + ?Sized,
{
    let request_key = RequestKey::generate();
    match engine.apply_batch(&request_key, &deltas).await.map_err(StockError::from) {
        Ok(()) => {
            metrics::counter!("stock_mirrors_total", "outcome" => "ok").increment(1);
        }
        Err(e @ (StockError::InfraUnavailable(_) | StockError::InfraUncertain(_))) => {
            metrics::counter!("stock_mirrors_total", "outcome" => e.kind()).increment(1);
            tracing::error!(%request_key, error = %e, "stock mirror failed, recording intent");
            ledger
                .save_intent_or_log(&request_key, IntentReason::StockChange, &deltas)
                .await;
        }
        Err(StockError::OutOfStock { products }) => {
            metrics::counter!("stock_mirrors_total", "outcome" => "out_of_stock").increment(1);
            tracing::warn!(%request_key, ?products, "stock mirror left counters below zero");
        }
        Err(e) => {
            metrics::counter!("stock_mirrors_total", "outcome" => e.kind()).increment(1);
            tracing::error!(%request_key, error = %e, "stock mirror failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::ProductId;
    use counter_store::{EngineOptions, FaultMode, InMemoryCounterStore};
    use intent_ledger::InMemoryIntentLedger;

    use super::*;
    use crate::products::InMemoryProductStockRepository;

    struct Harness {
        service: StockConsistencyService<
            InMemoryCounterStore,
            InMemoryIntentLedger,
            InMemoryProductStockRepository,
        >,
        store: InMemoryCounterStore,
        ledger: InMemoryIntentLedger,
        products: InMemoryProductStockRepository,
        tasks: BackgroundTasks,
    }

    fn harness() -> Harness {
        let store = InMemoryCounterStore::new();
        let ledger = InMemoryIntentLedger::new();
        let products = InMemoryProductStockRepository::new();
        let tasks = BackgroundTasks::new();
        let engine = Arc::new(StockMutationEngine::new(
            store.clone(),
            EngineOptions::default(),
        ));
        let service = StockConsistencyService::new(
            engine,
            Arc::new(ledger.clone()),
            products.clone(),
            tasks.clone(),
        );
        Harness {
            service,
            store,
            ledger,
            products,
            tasks,
        }
    }

    async fn settle_background(tasks: &BackgroundTasks) {
        tasks.drain(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_reserve_decrements_counter() {
        let h = harness();
        h.store.set_counter("product_stock:1", 100);

        h.service.reserve(&[StockChange::new(1, 10)]).await.unwrap();

        assert_eq!(h.store.counter("product_stock:1"), Some(90));
        settle_background(&h.tasks).await;
        assert!(h.ledger.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_reserve_out_of_stock_is_not_recorded() {
        let h = harness();
        h.store.set_counter("product_stock:1", 3);

        let result = h.service.reserve(&[StockChange::new(1, 5)]).await;

        assert!(matches!(result, Err(StockError::OutOfStock { ref products }) if products == &[ProductId::new(1)]));
        settle_background(&h.tasks).await;
        assert!(h.ledger.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_onto_negative_counter_succeeds() {
        let h = harness();
        h.store.set_counter("product_stock:1", -5);

        h.service
            .cancel_reservation(&[StockChange::new(1, 3)])
            .await
            .unwrap();

        assert_eq!(h.store.counter("product_stock:1"), Some(-2));
    }

    #[tokio::test]
    async fn test_unavailable_store_writes_no_intent() {
        let h = harness();
        h.store.set_fault(FaultMode::Unavailable);

        let result = h.service.reserve(&[StockChange::new(1, 1)]).await;

        assert!(matches!(result, Err(StockError::InfraUnavailable(_))));
        settle_background(&h.tasks).await;
        assert!(h.ledger.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_uncertain_reserve_records_negated_deltas() {
        let h = harness();
        h.store.set_fault(FaultMode::Uncertain);

        let result = h.service.reserve(&[StockChange::new(1, 4)]).await;

        assert!(matches!(result, Err(StockError::InfraUncertain(_))));
        settle_background(&h.tasks).await;
        let records = h.ledger.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, vec![StockChange::new(1, -4)]);
        assert_eq!(records[0].reason, IntentReason::StockChange);
    }

    #[tokio::test]
    async fn test_ledger_failure_does_not_change_caller_error() {
        let h = harness();
        h.store.set_fault(FaultMode::Uncertain);
        h.ledger.set_fail_writes(true);

        let result = h.service.cancel_reservation(&[StockChange::new(1, 4)]).await;

        assert!(matches!(result, Err(StockError::InfraUncertain(_))));
        let report = h.tasks.drain(Duration::from_secs(5)).await;
        assert_eq!(report.failed, 0);
        assert!(h.ledger.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_command_error_surfaces_as_store_error() {
        let h = harness();
        h.store.set_fault(FaultMode::Rejecting);

        let result = h.service.reserve(&[StockChange::new(1, 1)]).await;

        assert!(matches!(result, Err(StockError::Store(_))));
        settle_background(&h.tasks).await;
        assert!(h.ledger.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_increase_updates_table_then_mirrors() {
        let h = harness();
        h.products.set_stock(1, 10).await;
        h.store.set_counter("product_stock:1", 10);

        h.service.increase(&[StockChange::new(1, 5)]).await.unwrap();
        settle_background(&h.tasks).await;

        assert_eq!(h.products.stock_of(ProductId::new(1)).await.unwrap(), Some(15));
        assert_eq!(h.store.counter("product_stock:1"), Some(15));
    }

    #[tokio::test]
    async fn test_decrease_skips_guarded_products_in_mirror() {
        let h = harness();
        h.products.set_stock(1, 10).await;
        h.products.set_stock(2, 1).await;
        h.store.set_counter("product_stock:1", 10);
        h.store.set_counter("product_stock:2", 1);

        h.service
            .decrease(&[StockChange::new(1, 4), StockChange::new(2, 2)])
            .await
            .unwrap();
        settle_background(&h.tasks).await;

        assert_eq!(h.products.stock_of(ProductId::new(1)).await.unwrap(), Some(6));
        assert_eq!(h.products.stock_of(ProductId::new(2)).await.unwrap(), Some(1));
        assert_eq!(h.store.counter("product_stock:1"), Some(6));
        assert_eq!(h.store.counter("product_stock:2"), Some(1));
    }

    #[tokio::test]
    async fn test_decrease_without_mirror_leaves_counters() {
        let h = harness();
        let service = h.service.with_settlement_options(SettlementOptions {
            mirror_decrease: false,
        });
        h.products.set_stock(1, 10).await;
        h.store.set_counter("product_stock:1", 7);

        service.decrease(&[StockChange::new(1, 3)]).await.unwrap();
        settle_background(&h.tasks).await;

        assert_eq!(h.products.stock_of(ProductId::new(1)).await.unwrap(), Some(7));
        assert_eq!(h.store.counter("product_stock:1"), Some(7));
        assert!(h.store.executed_batches().is_empty());
    }

    #[tokio::test]
    async fn test_failed_mirror_is_recorded_even_when_unreachable() {
        let h = harness();
        h.products.set_stock(1, 10).await;
        h.store.set_fault(FaultMode::Unavailable);

        h.service.increase(&[StockChange::new(1, 5)]).await.unwrap();
        settle_background(&h.tasks).await;

        let records = h.ledger.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, vec![StockChange::new(1, 5)]);
        assert_eq!(h.products.stock_of(ProductId::new(1)).await.unwrap(), Some(15));
    }

    #[tokio::test]
    async fn test_empty_settlement_is_rejected() {
        let h = harness();

        let result = h.service.increase(&[]).await;

        assert!(matches!(result, Err(StockError::InvalidBatch { size: 0, .. })));
    }
}
