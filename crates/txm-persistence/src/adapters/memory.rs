//! In-memory persistence.
//!
//! Implements the full contract over `parking_lot`-guarded maps. Used by the
//! handler tests and available as `persistence.type = "memory"` for
//! throwaway deployments; nothing survives a restart.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use txm_types::{
    EventStream, EventStreamCheckpoint, Listener, ManagedTransaction, SequenceId, TxStatus, U256,
};

use crate::ports::{Persistence, PersistenceError, SortDirection};

#[derive(Default)]
struct Inner {
    transactions: HashMap<String, ManagedTransaction>,
    streams: BTreeMap<Uuid, EventStream>,
    listeners: BTreeMap<Uuid, Listener>,
    checkpoints: HashMap<Uuid, EventStreamCheckpoint>,
}

/// In-memory [`Persistence`] backend.
#[derive(Default)]
pub struct MemoryPersistence {
    inner: RwLock<Inner>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transaction records currently held.
    pub fn transaction_count(&self) -> usize {
        self.inner.read().transactions.len()
    }
}

/// Applies the `(after, limit, dir)` window to rows sorted ascending by key.
fn window<T, K: Ord>(
    mut rows: Vec<(K, T)>,
    after: Option<K>,
    limit: usize,
    dir: SortDirection,
) -> Vec<T> {
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    if dir == SortDirection::Descending {
        rows.reverse();
    }
    let filtered = rows.into_iter().filter(|(k, _)| match &after {
        None => true,
        Some(cursor) => match dir {
            SortDirection::Ascending => k > cursor,
            SortDirection::Descending => k < cursor,
        },
    });
    let out: Vec<T> = match limit {
        0 => filtered.map(|(_, v)| v).collect(),
        n => filtered.take(n).map(|(_, v)| v).collect(),
    };
    out
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn write_checkpoint(
        &self,
        checkpoint: &EventStreamCheckpoint,
    ) -> Result<(), PersistenceError> {
        self.inner
            .write()
            .checkpoints
            .insert(checkpoint.stream_id, checkpoint.clone());
        Ok(())
    }

    async fn get_checkpoint(
        &self,
        stream_id: &Uuid,
    ) -> Result<Option<EventStreamCheckpoint>, PersistenceError> {
        Ok(self.inner.read().checkpoints.get(stream_id).cloned())
    }

    async fn delete_checkpoint(&self, stream_id: &Uuid) -> Result<(), PersistenceError> {
        self.inner.write().checkpoints.remove(stream_id);
        Ok(())
    }

    async fn list_streams(
        &self,
        after: Option<Uuid>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<EventStream>, PersistenceError> {
        let rows = self
            .inner
            .read()
            .streams
            .values()
            .map(|s| (s.id, s.clone()))
            .collect();
        Ok(window(rows, after, limit, dir))
    }

    async fn get_stream(&self, stream_id: &Uuid) -> Result<Option<EventStream>, PersistenceError> {
        Ok(self.inner.read().streams.get(stream_id).cloned())
    }

    async fn write_stream(&self, spec: &EventStream) -> Result<(), PersistenceError> {
        self.inner.write().streams.insert(spec.id, spec.clone());
        Ok(())
    }

    async fn delete_stream(&self, stream_id: &Uuid) -> Result<(), PersistenceError> {
        self.inner.write().streams.remove(stream_id);
        Ok(())
    }

    async fn list_listeners(
        &self,
        after: Option<Uuid>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<Listener>, PersistenceError> {
        let rows = self
            .inner
            .read()
            .listeners
            .values()
            .map(|l| (l.id, l.clone()))
            .collect();
        Ok(window(rows, after, limit, dir))
    }

    async fn list_stream_listeners(
        &self,
        after: Option<Uuid>,
        limit: usize,
        dir: SortDirection,
        stream_id: &Uuid,
    ) -> Result<Vec<Listener>, PersistenceError> {
        let rows = self
            .inner
            .read()
            .listeners
            .values()
            .filter(|l| l.stream_id == *stream_id)
            .map(|l| (l.id, l.clone()))
            .collect();
        Ok(window(rows, after, limit, dir))
    }

    async fn get_listener(
        &self,
        listener_id: &Uuid,
    ) -> Result<Option<Listener>, PersistenceError> {
        Ok(self.inner.read().listeners.get(listener_id).cloned())
    }

    async fn write_listener(&self, spec: &Listener) -> Result<(), PersistenceError> {
        self.inner.write().listeners.insert(spec.id, spec.clone());
        Ok(())
    }

    async fn delete_listener(&self, listener_id: &Uuid) -> Result<(), PersistenceError> {
        self.inner.write().listeners.remove(listener_id);
        Ok(())
    }

    async fn list_transactions_by_create_time(
        &self,
        after: Option<&ManagedTransaction>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<ManagedTransaction>, PersistenceError> {
        let rows = self
            .inner
            .read()
            .transactions
            .values()
            .map(|tx| ((tx.created, tx.id.clone()), tx.clone()))
            .collect();
        let cursor = after.map(|tx| (tx.created, tx.id.clone()));
        Ok(window(rows, cursor, limit, dir))
    }

    async fn list_transactions_by_nonce(
        &self,
        signer: &str,
        after: Option<U256>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<ManagedTransaction>, PersistenceError> {
        let rows = self
            .inner
            .read()
            .transactions
            .values()
            .filter(|tx| tx.signer() == signer)
            .map(|tx| (tx.nonce, tx.clone()))
            .collect();
        Ok(window(rows, after, limit, dir))
    }

    async fn list_transactions_pending(
        &self,
        after_sequence_id: Option<&SequenceId>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<ManagedTransaction>, PersistenceError> {
        let rows = self
            .inner
            .read()
            .transactions
            .values()
            .filter(|tx| tx.status == TxStatus::Pending)
            .map(|tx| (tx.sequence_id.clone(), tx.clone()))
            .collect();
        Ok(window(rows, after_sequence_id.cloned(), limit, dir))
    }

    async fn get_transaction_by_id(
        &self,
        tx_id: &str,
    ) -> Result<Option<ManagedTransaction>, PersistenceError> {
        Ok(self.inner.read().transactions.get(tx_id).cloned())
    }

    async fn get_transaction_by_nonce(
        &self,
        signer: &str,
        nonce: U256,
    ) -> Result<Option<ManagedTransaction>, PersistenceError> {
        Ok(self
            .inner
            .read()
            .transactions
            .values()
            .find(|tx| tx.signer() == signer && tx.nonce == nonce)
            .cloned())
    }

    async fn write_transaction(
        &self,
        tx: &ManagedTransaction,
        is_new: bool,
    ) -> Result<(), PersistenceError> {
        let mut inner = self.inner.write();
        if is_new && inner.transactions.contains_key(&tx.id) {
            return Err(PersistenceError::Conflict(tx.id.clone()));
        }
        inner.transactions.insert(tx.id.clone(), tx.clone());
        Ok(())
    }

    async fn delete_transaction(&self, tx_id: &str) -> Result<(), PersistenceError> {
        self.inner.write().transactions.remove(tx_id);
        Ok(())
    }

    async fn close(&self) {}
}
