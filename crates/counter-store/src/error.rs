use common::{ProductId, RequestKey};
use thiserror::Error;

/// Errors reported by a counter store backend.
///
/// The variants separate failures by what they say about the command's fate,
/// not by which client library raised them.
#[derive(Debug, Error)]
pub enum CounterStoreError {
    /// The store could not be reached. The command was not applied.
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    /// The command was sent but no response arrived. It may or may not have been applied.
    #[error("Counter store outcome unknown: {0}")]
    Uncertain(String),

    /// The store answered with an error.
    #[error("Counter store command failed: {0}")]
    Command(String),
}

/// Result type for counter store operations.
pub type Result<T> = std::result::Result<T, CounterStoreError>;

/// Errors returned by the stock mutation engine.
#[derive(Debug, Error)]
pub enum MutationError {
    /// At least one counter ended below zero after the batch was applied.
    ///
    /// The batch has already taken effect; the caller owns compensation.
    #[error("Out of stock for request {request_key}: {products:?}")]
    OutOfStock {
        request_key: RequestKey,
        products: Vec<ProductId>,
    },

    /// The batch was empty or exceeded the configured maximum.
    #[error("Invalid batch size {size}: expected between 1 and {max}")]
    InvalidBatch { size: usize, max: usize },

    /// The counter store failed.
    #[error(transparent)]
    Store(#[from] CounterStoreError),
}
