//! Batched stock mutation against the counter store.

use std::time::Duration;

use common::{ProductId, RequestKey, StockChange, canonical_order};

use crate::error::{CounterStoreError, MutationError};
use crate::store::{CounterBatch, CounterIncrement, CounterStore, request_marker_key, stock_key};

/// Limits applied by the mutation engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Largest number of changes accepted in one batch.
    pub max_batch_size: usize,
    /// Lifetime of the request marker written with every batch.
    pub marker_ttl: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            marker_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Applies signed stock deltas to the counter store in one round trip.
///
/// Each batch writes its request marker first and then visits product keys in
/// ascending id order. Out-of-stock is detected after the batch has been
/// applied, from the resulting counter values; the engine never compensates on
/// its own.
pub struct StockMutationEngine<C: CounterStore> {
    store: C,
    options: EngineOptions,
}

impl<C: CounterStore> StockMutationEngine<C> {
    pub fn new(store: C, options: EngineOptions) -> Self {
        Self { store, options }
    }

    /// Returns a reference to the underlying counter store.
    pub fn store(&self) -> &C {
        &self.store
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Applies the changes as a single batch tagged with `request_key`.
    ///
    /// Returns `OutOfStock` if a decremented counter is negative afterwards.
    /// The deltas have been applied at that point and the caller must issue the
    /// inverse batch. Increments never report `OutOfStock`: a counter may sit
    /// below zero while another caller's failed reservation is being undone.
    ///
    /// A `Command` failure may leave the batch partly applied with its marker
    /// set.
    #[tracing::instrument(skip(self, changes), fields(%request_key, product_count = changes.len()))]
    pub async fn apply_batch(
        &self,
        request_key: &RequestKey,
        changes: &[StockChange],
    ) -> Result<(), MutationError> {
        let ordered = self.validated_order(changes)?;
        let batch = self.build_batch(request_key, &ordered);

        let started = std::time::Instant::now();
        let result = self.store.execute(&batch).await;
        metrics::histogram!("stock_batch_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let values = match result {
            Ok(values) => values,
            Err(e @ CounterStoreError::Command(_)) => {
                // The batch is not a transaction: the marker and earlier increments
                // may have landed before the failing command.
                metrics::counter!("stock_batches_total", "outcome" => "command_error").increment(1);
                tracing::error!(
                    error = %e,
                    changes = ?ordered,
                    "stock batch rejected, marker and part of the batch may have been applied"
                );
                return Err(e.into());
            }
            Err(e) => {
                metrics::counter!("stock_batches_total", "outcome" => "store_error").increment(1);
                tracing::warn!(error = %e, "stock batch failed");
                return Err(e.into());
            }
        };

        if values.len() != ordered.len() {
            return Err(CounterStoreError::Command(format!(
                "expected {} results, got {}",
                ordered.len(),
                values.len()
            ))
            .into());
        }

        let short: Vec<ProductId> = ordered
            .iter()
            .zip(&values)
            .filter(|(change, value)| change.quantity < 0 && **value < 0)
            .map(|(change, _)| change.product_id)
            .collect();

        if !short.is_empty() {
            metrics::counter!("stock_batches_total", "outcome" => "out_of_stock").increment(1);
            tracing::info!(products = ?short, "batch drove stock below zero");
            return Err(MutationError::OutOfStock {
                request_key: request_key.clone(),
                products: short,
            });
        }

        metrics::counter!("stock_batches_total", "outcome" => "applied").increment(1);
        Ok(())
    }

    /// Returns true if a batch tagged with `request_key` reached the store.
    pub async fn has_request_key(&self, request_key: &RequestKey) -> Result<bool, MutationError> {
        Ok(self.store.exists(&request_marker_key(request_key)).await?)
    }

    /// Initialises a product counter unless it already exists.
    pub async fn seed_stock(
        &self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<bool, MutationError> {
        Ok(self
            .store
            .set_if_absent(&stock_key(product_id), quantity)
            .await?)
    }

    /// Reads the live counter for a product.
    pub async fn current_stock(&self, product_id: ProductId) -> Result<Option<i64>, MutationError> {
        Ok(self.store.get(&stock_key(product_id)).await?)
    }

    fn validated_order(&self, changes: &[StockChange]) -> Result<Vec<StockChange>, MutationError> {
        let max = self.options.max_batch_size;
        if changes.is_empty() || changes.len() > max {
            return Err(MutationError::InvalidBatch {
                size: changes.len(),
                max,
            });
        }
        Ok(canonical_order(changes))
    }

    fn build_batch(&self, request_key: &RequestKey, ordered: &[StockChange]) -> CounterBatch {
        CounterBatch {
            marker_key: request_marker_key(request_key),
            marker_ttl: self.options.marker_ttl,
            increments: ordered
                .iter()
                .map(|change| CounterIncrement {
                    key: stock_key(change.product_id),
                    delta: change.quantity,
                })
                .collect(),
        }
    }
}
