//! RocksDB persistence.
//!
//! Records are stored as JSON values under namespaced keys, with index keys
//! maintained atomically (one `WriteBatch` per mutation) so the ordered list
//! operations are plain prefix scans:
//!
//! | Key | Value |
//! |-----|-------|
//! | `tx/<id>` | `ManagedTransaction` JSON |
//! | `seq/<sequenceID>` | transaction id (creation order) |
//! | `pending/<sequenceID>` | transaction id, present only while Pending |
//! | `nonce/<signer>/<nonce, 64-hex>` | transaction id |
//! | `stream/<uuid>` | `EventStream` JSON |
//! | `listener/<uuid>` | `Listener` JSON |
//! | `cp/<stream uuid>` | `EventStreamCheckpoint` JSON |

use async_trait::async_trait;
use parking_lot::RwLock;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use txm_types::{
    EventStream, EventStreamCheckpoint, Listener, ManagedTransaction, SequenceId, TxStatus, U256,
};

use crate::ports::{Persistence, PersistenceError, SortDirection};

/// RocksDB tuning knobs.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory.
    pub path: String,
    /// Block cache size in bytes.
    pub block_cache_size: usize,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    /// fsync after each write.
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "./data/txm".to_string(),
            block_cache_size: 64 * 1024 * 1024,
            write_buffer_size: 16 * 1024 * 1024,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Smaller buffers, no fsync.
    pub fn for_testing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            write_buffer_size: 2 * 1024 * 1024,
            sync_writes: false,
        }
    }
}

/// RocksDB-backed [`Persistence`].
pub struct RocksDbPersistence {
    db: RwLock<DB>,
    config: RocksDbConfig,
}

fn tx_key(id: &str) -> Vec<u8> {
    format!("tx/{id}").into_bytes()
}

fn seq_key(seq: &SequenceId) -> Vec<u8> {
    format!("seq/{seq}").into_bytes()
}

fn pending_key(seq: &SequenceId) -> Vec<u8> {
    format!("pending/{seq}").into_bytes()
}

fn nonce_key(signer: &str, nonce: U256) -> Vec<u8> {
    // U256's LowerHex ignores width/fill flags, so hex-format the big-endian
    // bytes instead: every key is exactly 64 hex chars and lexicographic
    // order equals numeric nonce order.
    let mut bytes = [0u8; 32];
    nonce.to_big_endian(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("nonce/{signer}/{hex}").into_bytes()
}

impl RocksDbPersistence {
    /// Opens or creates the database.
    pub fn open(config: RocksDbConfig) -> Result<Self, PersistenceError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, &config.path)
            .map_err(|e| PersistenceError::Io(format!("failed to open RocksDB: {e}")))?;
        debug!(path = %config.path, "opened transaction store");

        Ok(Self {
            db: RwLock::new(db),
            config,
        })
    }

    fn write_opts(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }

    fn get_json<T: DeserializeOwned>(db: &DB, key: &[u8]) -> Result<Option<T>, PersistenceError> {
        match db.get(key).map_err(|e| PersistenceError::Io(e.to_string()))? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PersistenceError::Corruption(e.to_string())),
        }
    }

    fn put_json<T: Serialize>(
        &self,
        key: Vec<u8>,
        value: &T,
    ) -> Result<(), PersistenceError> {
        let db = self.db.write();
        let bytes = serde_json::to_vec(value).map_err(|e| PersistenceError::Io(e.to_string()))?;
        db.put_opt(key, bytes, &self.write_opts())
            .map_err(|e| PersistenceError::Io(e.to_string()))
    }

    fn delete_key(&self, key: Vec<u8>) -> Result<(), PersistenceError> {
        let db = self.db.write();
        db.delete_opt(key, &self.write_opts())
            .map_err(|e| PersistenceError::Io(e.to_string()))
    }

    /// Scans every `(key, value)` under a prefix in the requested direction,
    /// skipping keys at or beyond/before the exclusive `after` cursor.
    fn scan_prefix(
        db: &DB,
        prefix: &[u8],
        after: Option<Vec<u8>>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<Vec<u8>>, PersistenceError> {
        // One byte above any ASCII key under this prefix, for reverse scans
        let upper = upper_bound(prefix);
        let mode = match dir {
            SortDirection::Ascending => IteratorMode::From(prefix, Direction::Forward),
            SortDirection::Descending => IteratorMode::From(&upper, Direction::Reverse),
        };

        let mut values = Vec::new();
        for item in db.iterator(mode) {
            let (key, value) = item.map_err(|e| PersistenceError::Io(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(cursor) = &after {
                let keep = match dir {
                    SortDirection::Ascending => key.as_ref() > cursor.as_slice(),
                    SortDirection::Descending => key.as_ref() < cursor.as_slice(),
                };
                if !keep {
                    continue;
                }
            }
            values.push(value.to_vec());
            if limit > 0 && values.len() >= limit {
                break;
            }
        }
        Ok(values)
    }

    /// Resolves a list of transaction ids (index values) to records.
    fn load_transactions(db: &DB, ids: Vec<Vec<u8>>) -> Result<Vec<ManagedTransaction>, PersistenceError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let id = String::from_utf8(id)
                .map_err(|e| PersistenceError::Corruption(e.to_string()))?;
            if let Some(tx) = Self::get_json::<ManagedTransaction>(db, &tx_key(&id))? {
                out.push(tx);
            }
        }
        Ok(out)
    }
}

fn upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut upper = prefix.to_vec();
    upper.push(0xff);
    upper
}

#[async_trait]
impl Persistence for RocksDbPersistence {
    async fn write_checkpoint(
        &self,
        checkpoint: &EventStreamCheckpoint,
    ) -> Result<(), PersistenceError> {
        self.put_json(
            format!("cp/{}", checkpoint.stream_id).into_bytes(),
            checkpoint,
        )
    }

    async fn get_checkpoint(
        &self,
        stream_id: &Uuid,
    ) -> Result<Option<EventStreamCheckpoint>, PersistenceError> {
        let db = self.db.read();
        Self::get_json(&db, format!("cp/{stream_id}").as_bytes())
    }

    async fn delete_checkpoint(&self, stream_id: &Uuid) -> Result<(), PersistenceError> {
        self.delete_key(format!("cp/{stream_id}").into_bytes())
    }

    async fn list_streams(
        &self,
        after: Option<Uuid>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<EventStream>, PersistenceError> {
        let db = self.db.read();
        let cursor = after.map(|id| format!("stream/{id}").into_bytes());
        let rows = Self::scan_prefix(&db, b"stream/", cursor, limit, dir)?;
        rows.iter()
            .map(|bytes| {
                serde_json::from_slice(bytes).map_err(|e| PersistenceError::Corruption(e.to_string()))
            })
            .collect()
    }

    async fn get_stream(&self, stream_id: &Uuid) -> Result<Option<EventStream>, PersistenceError> {
        let db = self.db.read();
        Self::get_json(&db, format!("stream/{stream_id}").as_bytes())
    }

    async fn write_stream(&self, spec: &EventStream) -> Result<(), PersistenceError> {
        self.put_json(format!("stream/{}", spec.id).into_bytes(), spec)
    }

    async fn delete_stream(&self, stream_id: &Uuid) -> Result<(), PersistenceError> {
        self.delete_key(format!("stream/{stream_id}").into_bytes())
    }

    async fn list_listeners(
        &self,
        after: Option<Uuid>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<Listener>, PersistenceError> {
        let db = self.db.read();
        let cursor = after.map(|id| format!("listener/{id}").into_bytes());
        let rows = Self::scan_prefix(&db, b"listener/", cursor, limit, dir)?;
        rows.iter()
            .map(|bytes| {
                serde_json::from_slice(bytes).map_err(|e| PersistenceError::Corruption(e.to_string()))
            })
            .collect()
    }

    async fn list_stream_listeners(
        &self,
        after: Option<Uuid>,
        limit: usize,
        dir: SortDirection,
        stream_id: &Uuid,
    ) -> Result<Vec<Listener>, PersistenceError> {
        // Listener counts are small; filter the full scan rather than keeping
        // a per-stream index.
        let all = self.list_listeners(after, 0, dir).await?;
        let mut out: Vec<Listener> = all
            .into_iter()
            .filter(|l| l.stream_id == *stream_id)
            .collect();
        if limit > 0 {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn get_listener(
        &self,
        listener_id: &Uuid,
    ) -> Result<Option<Listener>, PersistenceError> {
        let db = self.db.read();
        Self::get_json(&db, format!("listener/{listener_id}").as_bytes())
    }

    async fn write_listener(&self, spec: &Listener) -> Result<(), PersistenceError> {
        self.put_json(format!("listener/{}", spec.id).into_bytes(), spec)
    }

    async fn delete_listener(&self, listener_id: &Uuid) -> Result<(), PersistenceError> {
        self.delete_key(format!("listener/{listener_id}").into_bytes())
    }

    async fn list_transactions_by_create_time(
        &self,
        after: Option<&ManagedTransaction>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<ManagedTransaction>, PersistenceError> {
        let db = self.db.read();
        // Sequence ids are allocation-ordered, so the seq index is the
        // creation ordering.
        let cursor = after.map(|tx| seq_key(&tx.sequence_id));
        let ids = Self::scan_prefix(&db, b"seq/", cursor, limit, dir)?;
        Self::load_transactions(&db, ids)
    }

    async fn list_transactions_by_nonce(
        &self,
        signer: &str,
        after: Option<U256>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<ManagedTransaction>, PersistenceError> {
        let db = self.db.read();
        let prefix = format!("nonce/{signer}/").into_bytes();
        let cursor = after.map(|n| nonce_key(signer, n));
        let ids = Self::scan_prefix(&db, &prefix, cursor, limit, dir)?;
        Self::load_transactions(&db, ids)
    }

    async fn list_transactions_pending(
        &self,
        after_sequence_id: Option<&SequenceId>,
        limit: usize,
        dir: SortDirection,
    ) -> Result<Vec<ManagedTransaction>, PersistenceError> {
        let db = self.db.read();
        let cursor = after_sequence_id.map(pending_key);
        let ids = Self::scan_prefix(&db, b"pending/", cursor, limit, dir)?;
        Self::load_transactions(&db, ids)
    }

    async fn get_transaction_by_id(
        &self,
        tx_id: &str,
    ) -> Result<Option<ManagedTransaction>, PersistenceError> {
        let db = self.db.read();
        Self::get_json(&db, &tx_key(tx_id))
    }

    async fn get_transaction_by_nonce(
        &self,
        signer: &str,
        nonce: U256,
    ) -> Result<Option<ManagedTransaction>, PersistenceError> {
        let db = self.db.read();
        match db
            .get(nonce_key(signer, nonce))
            .map_err(|e| PersistenceError::Io(e.to_string()))?
        {
            None => Ok(None),
            Some(id) => {
                let id = String::from_utf8(id)
                    .map_err(|e| PersistenceError::Corruption(e.to_string()))?;
                Self::get_json(&db, &tx_key(&id))
            }
        }
    }

    async fn write_transaction(
        &self,
        tx: &ManagedTransaction,
        is_new: bool,
    ) -> Result<(), PersistenceError> {
        let db = self.db.write();
        let existing: Option<ManagedTransaction> = Self::get_json(&db, &tx_key(&tx.id))?;
        if is_new && existing.is_some() {
            return Err(PersistenceError::Conflict(tx.id.clone()));
        }

        let bytes = serde_json::to_vec(tx).map_err(|e| PersistenceError::Io(e.to_string()))?;
        let mut batch = WriteBatch::default();
        batch.put(tx_key(&tx.id), bytes);
        batch.put(seq_key(&tx.sequence_id), tx.id.as_bytes());
        batch.put(nonce_key(tx.signer(), tx.nonce), tx.id.as_bytes());
        if tx.status == TxStatus::Pending {
            batch.put(pending_key(&tx.sequence_id), tx.id.as_bytes());
        } else {
            batch.delete(pending_key(&tx.sequence_id));
        }

        db.write_opt(batch, &self.write_opts())
            .map_err(|e| PersistenceError::Io(e.to_string()))
    }

    async fn delete_transaction(&self, tx_id: &str) -> Result<(), PersistenceError> {
        let db = self.db.write();
        let existing: Option<ManagedTransaction> = Self::get_json(&db, &tx_key(tx_id))?;
        let Some(tx) = existing else {
            return Ok(());
        };

        let mut batch = WriteBatch::default();
        batch.delete(tx_key(tx_id));
        batch.delete(seq_key(&tx.sequence_id));
        batch.delete(pending_key(&tx.sequence_id));
        batch.delete(nonce_key(tx.signer(), tx.nonce));
        db.write_opt(batch, &self.write_opts())
            .map_err(|e| PersistenceError::Io(e.to_string()))
    }

    async fn close(&self) {
        let db = self.db.write();
        if let Err(e) = db.flush() {
            debug!("flush on close failed: {e}");
        }
    }
}
