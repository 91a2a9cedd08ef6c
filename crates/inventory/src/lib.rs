//! Stock consistency between the counter store and the product table.
//!
//! Reservations run against the fast counter store. Settlement writes the
//! authoritative product table and mirrors into the counters. Outcomes that
//! cannot be known are queued in the intent ledger for reconciliation.

pub mod error;
pub mod orders;
pub mod products;
pub mod service;
pub mod tasks;
pub mod warmup;

pub use common::{ProductId, StockChange};
pub use error::{Result, StockError};
pub use orders::ProductOrderService;
pub use products::{
    InMemoryProductStockRepository, PgProductStockRepository, ProductStockRepository,
};
pub use service::{SettlementOptions, StockConsistencyService};
pub use tasks::{BackgroundTasks, DrainReport};
pub use warmup::{StockWarmup, WarmupReport};
