//! # Transaction Manager Persistence
//!
//! The abstract persistence contract consumed by the manager and the
//! transaction handler, plus two adapters:
//!
//! - [`adapters::rocksdb::RocksDbPersistence`]: the production key-value
//!   backend, with index keys maintained atomically alongside each record.
//! - [`adapters::memory::MemoryPersistence`]: an in-memory implementation of
//!   the same contract, backing tests and throwaway deployments.
//!
//! The contract requires linearizable per-key reads/writes and ordered
//! scans; both adapters provide them.

pub mod adapters;
pub mod ports;

pub use ports::{Persistence, PersistenceError, SortDirection};
