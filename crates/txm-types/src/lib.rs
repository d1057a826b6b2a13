//! # Transaction Manager Shared Types
//!
//! Defines the entities shared by every crate in the workspace: the managed
//! transaction record and its lifecycle vocabulary, receipts and block
//! summaries, the event-stream records consumed by the persistence contract,
//! and the identifier types.
//!
//! ## Clusters
//!
//! - **Transactions**: `ManagedTransaction`, `TransactionHeaders`, `TxStatus`
//! - **History**: `TxSubStatus`, `TxAction`, `HistoryEntry`, `HistorySummaryEntry`
//! - **Chain observations**: `ReceiptRecord`, `BlockInfo`
//! - **Event streams**: `EventStream`, `Listener`, `EventStreamCheckpoint`
//! - **Identifiers**: namespaced transaction ids, `SequenceId`

pub mod entities;
pub mod ids;

pub use entities::*;
pub use ids::{new_transaction_id, SequenceId};

// Re-export U256 from primitive-types for use across all crates
pub use primitive_types::U256;
