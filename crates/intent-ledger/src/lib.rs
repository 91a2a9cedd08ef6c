pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod record;

pub use common::{RequestKey, StockChange};
pub use error::{LedgerError, Result};
pub use ledger::{DEFAULT_GRACE_WINDOW, IntentLedger, IntentLedgerExt};
pub use memory::InMemoryIntentLedger;
pub use postgres::PostgresIntentLedger;
pub use record::{IntentReason, StockIntentRecord};
