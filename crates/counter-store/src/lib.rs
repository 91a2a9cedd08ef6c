pub mod engine;
pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use common::{ProductId, RequestKey, StockChange};
pub use engine::{EngineOptions, StockMutationEngine};
pub use error::{CounterStoreError, MutationError, Result};
pub use memory::{FaultMode, InMemoryCounterStore};
pub use redis_store::RedisCounterStore;
pub use store::{CounterBatch, CounterIncrement, CounterStore, request_marker_key, stock_key};
