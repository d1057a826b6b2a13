//! The persistence contract.
//!
//! Grouped the way the consumers use it: event-stream checkpoints, stream and
//! listener specifications, and managed transactions. A backend implements
//! the whole of [`Persistence`].

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use txm_types::{
    EventStream, EventStreamCheckpoint, Listener, ManagedTransaction, SequenceId, U256,
};

/// Scan direction for the list operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Errors surfaced by a persistence backend.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    /// The addressed record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// An insert collided with an existing id.
    #[error("record already exists: {0}")]
    Conflict(String),

    /// Stored data could not be decoded.
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Underlying store failure.
    #[error("persistence I/O error: {0}")]
    Io(String),
}

/// All operations a persistence backend must implement.
///
/// List operations take an exclusive `after` cursor and a `limit`
/// (`0` = unlimited), and honor the requested [`SortDirection`].
#[async_trait]
pub trait Persistence: Send + Sync {
    // -- event stream checkpoints ----------------------------------------

    async fn write_checkpoint(
        &self,
        checkpoint: &EventStreamCheckpoint,
    ) -> Result<(), PersistenceError>;
    async fn get_checkpoint(
        &self,
        stream_id: &Uuid,
    ) -> Result<Option<EventStreamCheckpoint>, PersistenceError>;
    async fn delete_checkpoint(&self, stream_id: &Uuid) -> Result<(), PersistenceError>;

    // -- event stream definitions ----------------------------------------

    async fn list_streams(
        &self,
        after: Option<Uuid>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<EventStream>, PersistenceError>;
    async fn get_stream(&self, stream_id: &Uuid) -> Result<Option<EventStream>, PersistenceError>;
    async fn write_stream(&self, spec: &EventStream) -> Result<(), PersistenceError>;
    async fn delete_stream(&self, stream_id: &Uuid) -> Result<(), PersistenceError>;

    // -- listeners --------------------------------------------------------

    async fn list_listeners(
        &self,
        after: Option<Uuid>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<Listener>, PersistenceError>;
    async fn list_stream_listeners(
        &self,
        after: Option<Uuid>,
        limit: usize,
        dir: SortDirection,
        stream_id: &Uuid,
    ) -> Result<Vec<Listener>, PersistenceError>;
    async fn get_listener(&self, listener_id: &Uuid)
        -> Result<Option<Listener>, PersistenceError>;
    async fn write_listener(&self, spec: &Listener) -> Result<(), PersistenceError>;
    async fn delete_listener(&self, listener_id: &Uuid) -> Result<(), PersistenceError>;

    // -- managed transactions ---------------------------------------------

    /// Lists transactions ordered by creation time (descending by default in
    /// API usage; the direction is explicit here).
    async fn list_transactions_by_create_time(
        &self,
        after: Option<&ManagedTransaction>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<ManagedTransaction>, PersistenceError>;

    /// Lists a signer's transactions ordered by nonce.
    async fn list_transactions_by_nonce(
        &self,
        signer: &str,
        after: Option<U256>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<ManagedTransaction>, PersistenceError>;

    /// Lists only Pending transactions, ordered by sequence id.
    async fn list_transactions_pending(
        &self,
        after_sequence_id: Option<&SequenceId>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<ManagedTransaction>, PersistenceError>;

    async fn get_transaction_by_id(
        &self,
        tx_id: &str,
    ) -> Result<Option<ManagedTransaction>, PersistenceError>;

    async fn get_transaction_by_nonce(
        &self,
        signer: &str,
        nonce: U256,
    ) -> Result<Option<ManagedTransaction>, PersistenceError>;

    /// Writes a transaction record. When `is_new` is set the write must be
    /// rejected with [`PersistenceError::Conflict`] if the id already exists.
    async fn write_transaction(
        &self,
        tx: &ManagedTransaction,
        is_new: bool,
    ) -> Result<(), PersistenceError>;

    /// Deletes a transaction record. Deleting an absent id is a no-op.
    async fn delete_transaction(&self, tx_id: &str) -> Result<(), PersistenceError>;

    /// Flushes and releases the backend.
    async fn close(&self);
}
