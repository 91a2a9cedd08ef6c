use chrono::{DateTime, Utc};
use common::{RequestKey, StockChange};
use serde::{Deserialize, Serialize};

use crate::LedgerError;

/// Why an intent was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentReason {
    /// A stock batch against the counter store with an unknown outcome.
    StockChange,
}

impl IntentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentReason::StockChange => "STOCK_CHANGE",
        }
    }
}

impl std::fmt::Display for IntentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IntentReason {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOCK_CHANGE" => Ok(IntentReason::StockChange),
            other => Err(LedgerError::UnknownReason(other.to_string())),
        }
    }
}

/// A ledger row: a stock mutation attempt whose fate is not known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockIntentRecord {
    pub request_key: RequestKey,
    /// The signed deltas exactly as they were sent.
    pub content: Vec<StockChange>,
    pub reason: IntentReason,
    pub created_at: DateTime<Utc>,
    pub is_executed: bool,
    /// Key of the most recent replay attempt, if any.
    pub replay_key: Option<RequestKey>,
}

impl StockIntentRecord {
    /// Creates a new, unexecuted record stamped with the current time.
    pub fn new(request_key: RequestKey, reason: IntentReason, content: Vec<StockChange>) -> Self {
        Self {
            request_key,
            content,
            reason,
            created_at: Utc::now(),
            is_executed: false,
            replay_key: None,
        }
    }

    /// Returns every request key under which this intent may have landed.
    pub fn attempt_keys(&self) -> Vec<&RequestKey> {
        std::iter::once(&self.request_key)
            .chain(self.replay_key.as_ref())
            .collect()
    }
}
