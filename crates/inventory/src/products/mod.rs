//! Authoritative product stock in the relational store.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use common::{ProductId, StockChange};

use crate::Result;

pub use memory::InMemoryProductStockRepository;
pub use postgres::PgProductStockRepository;

/// Trait for the relational product stock table.
#[async_trait]
pub trait ProductStockRepository: Send + Sync {
    /// Applies signed deltas, each guarded so stock never drops below zero.
    ///
    /// Rows are locked in ascending product id order before any update.
    /// Returns the products whose change was refused by the guard or that do
    /// not exist. Refused changes are skipped, not reported as errors.
    async fn apply_deltas(&self, changes: &[StockChange]) -> Result<Vec<ProductId>>;

    /// Reads a single product's stock.
    async fn stock_of(&self, product_id: ProductId) -> Result<Option<i64>>;

    /// Reads every product's stock, ordered by id.
    async fn all_stocks(&self) -> Result<Vec<(ProductId, i64)>>;
}
