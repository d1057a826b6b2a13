//! Persistence backends.

pub mod memory;
pub mod rocksdb;

pub use memory::MemoryPersistence;
pub use rocksdb::{RocksDbConfig, RocksDbPersistence};
