//! Persistence adapters (spec.md §6): SQLite for the long-tail candle
//! history and audit log, Redis for the signal queue and position store.

pub mod database;
pub mod history_store;
pub mod order_repository;
pub mod position_stop_repository;
pub mod redis_store;

pub use database::Database;
pub use history_store::SqliteHistoryStore;
pub use order_repository::SqliteOrderRepository;
pub use position_stop_repository::SqlitePositionStopRepository;
pub use redis_store::{RedisPositionStore, RedisSortedSetStore};
