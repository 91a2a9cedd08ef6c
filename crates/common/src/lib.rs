pub mod types;

pub use types::{ProductId, RequestKey, StockChange, canonical_order};
