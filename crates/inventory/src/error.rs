//! Stock operation error types.

use common::ProductId;
use counter_store::{CounterStoreError, MutationError};
use thiserror::Error;

/// Errors surfaced by stock operations.
///
/// Callers match on the variant to decide what to tell the buyer; none of
/// them carry a client-library error type.
#[derive(Debug, Error)]
pub enum StockError {
    /// The batch drove at least one counter below zero.
    #[error("Out of stock: {products:?}")]
    OutOfStock { products: Vec<ProductId> },

    /// The counter store was unreachable. Nothing was applied.
    #[error("Stock store unavailable: {0}")]
    InfraUnavailable(String),

    /// The counter store did not answer in time. The change may have landed
    /// and has been queued for reconciliation.
    #[error("Stock change outcome unknown: {0}")]
    InfraUncertain(String),

    /// The request carried no changes or too many.
    #[error("Invalid batch size {size}: expected between 1 and {max}")]
    InvalidBatch { size: usize, max: usize },

    /// The counter store rejected the command.
    #[error("Stock store error: {0}")]
    Store(String),

    /// The product table could not be updated.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StockError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StockError::OutOfStock { .. } => "out_of_stock",
            StockError::InfraUnavailable(_) => "unavailable",
            StockError::InfraUncertain(_) => "uncertain",
            StockError::InvalidBatch { .. } => "invalid_batch",
            StockError::Store(_) => "store_error",
            StockError::Database(_) => "database_error",
        }
    }
}

impl From<MutationError> for StockError {
    fn from(e: MutationError) -> Self {
        match e {
            MutationError::OutOfStock { products, .. } => StockError::OutOfStock { products },
            MutationError::InvalidBatch { size, max } => StockError::InvalidBatch { size, max },
            MutationError::Store(CounterStoreError::Unavailable(msg)) => {
                StockError::InfraUnavailable(msg)
            }
            MutationError::Store(CounterStoreError::Uncertain(msg)) => {
                StockError::InfraUncertain(msg)
            }
            MutationError::Store(CounterStoreError::Command(msg)) => StockError::Store(msg),
        }
    }
}

/// Convenience type alias for stock results.
pub type Result<T> = std::result::Result<T, StockError>;
