use common::RequestKey;
use thiserror::Error;

/// Errors that can occur when interacting with the intent ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An intent with this request key is already recorded.
    #[error("Intent already recorded for request {0}")]
    DuplicateRequestKey(RequestKey),

    /// A stored reason does not name a known intent reason.
    #[error("Unknown intent reason: {0}")]
    UnknownReason(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The ledger refused the write (used by the in-memory ledger to simulate outages).
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
