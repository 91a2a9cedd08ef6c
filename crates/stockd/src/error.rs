//! Start-up error types.

use counter_store::CounterStoreError;
use intent_ledger::LedgerError;
use inventory::StockError;
use thiserror::Error;

/// Errors that stop the daemon from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The database pool could not be created.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migrations or ledger set-up failed.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The counter store could not be reached.
    #[error("Counter store error: {0}")]
    CounterStore(#[from] CounterStoreError),

    /// Counter warm-up failed.
    #[error("Stock warm-up failed: {0}")]
    Warmup(#[from] StockError),

    /// Binding or serving the HTTP listener failed.
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}
