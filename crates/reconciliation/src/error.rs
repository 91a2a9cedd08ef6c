//! Reconciliation error types.

use intent_ledger::LedgerError;
use thiserror::Error;

/// Errors that can occur while reconciling intents.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Another run was still in flight; this one did nothing.
    #[error("Reconciliation run vetoed: another run is in progress")]
    AlreadyRunning,

    /// The ledger could not be read.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A configured policy name was not recognised.
    #[error("Unknown unexpected-failure policy: {0}")]
    UnknownPolicy(String),
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
