//! The manager: owns the handler, persistence and lifecycle.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use txm_connector::BlockchainConnector;
use txm_handler::adapters::EventDispatchAdapter;
use txm_handler::adapters::TransactionUpdateSubscriber;
use txm_handler::ports::inbound::TransactionHandler;
use txm_handler::ports::outbound::ConfirmationsManager;
use txm_persistence::adapters::{MemoryPersistence, RocksDbPersistence};
use txm_persistence::Persistence;

use crate::config::{Config, PersistenceConfig};
use crate::errors::ManagerError;
use crate::registry::HandlerRegistry;

/// Opens the configured persistence backend.
pub fn build_persistence(
    config: &PersistenceConfig,
) -> Result<Arc<dyn Persistence>, ManagerError> {
    match config.backend.as_str() {
        // `leveldb` is accepted as an alias for the key-value backend
        "rocksdb" | "leveldb" => {
            let backend = RocksDbPersistence::open(config.rocksdb.to_backend_config())
                .map_err(|e| ManagerError::PersistenceInitFailed(e.to_string()))?;
            Ok(Arc::new(backend))
        }
        "memory" => Ok(Arc::new(MemoryPersistence::new())),
        other => Err(ManagerError::UnsupportedPersistenceType(other.to_string())),
    }
}

/// Wires a transaction handler to persistence, the connector and the
/// confirmations manager, and drives its lifecycle.
pub struct Manager {
    config: Config,
    persistence: Arc<dyn Persistence>,
    connector: Arc<dyn BlockchainConnector>,
    handler: Arc<dyn TransactionHandler>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Manager {
    /// Builds a manager with the default handler registry.
    pub fn new(
        config: Config,
        connector: Arc<dyn BlockchainConnector>,
        confirmations: Arc<dyn ConfirmationsManager>,
        subscriber: Option<Arc<dyn TransactionUpdateSubscriber>>,
    ) -> Result<Self, ManagerError> {
        Self::with_registry(
            config,
            connector,
            confirmations,
            subscriber,
            &HandlerRegistry::default(),
        )
    }

    /// Builds a manager using a caller-supplied handler registry.
    pub fn with_registry(
        config: Config,
        connector: Arc<dyn BlockchainConnector>,
        confirmations: Arc<dyn ConfirmationsManager>,
        subscriber: Option<Arc<dyn TransactionUpdateSubscriber>>,
        registry: &HandlerRegistry,
    ) -> Result<Self, ManagerError> {
        let persistence = build_persistence(&config.persistence)?;
        let handler = registry.new_handler(&config, persistence.clone(), connector.clone())?;

        // Confirmation callbacks reach the policy loop through the handler's
        // own inbox; the adapter is the only thing holding both ends.
        let adapter = EventDispatchAdapter::new(confirmations, subscriber, handler.update_inbox());
        handler.init(Arc::new(adapter));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config,
            persistence,
            connector,
            handler,
            shutdown_tx,
            shutdown_rx,
            loop_handle: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn handler(&self) -> Arc<dyn TransactionHandler> {
        self.handler.clone()
    }

    pub fn persistence(&self) -> Arc<dyn Persistence> {
        self.persistence.clone()
    }

    /// Starts block listening and the policy loop.
    pub async fn start(&self) -> Result<(), ManagerError> {
        self.connector.new_block_listener().await?;
        let handle = self
            .handler
            .clone()
            .start(self.shutdown_rx.clone())
            .await?;
        *self.loop_handle.lock() = Some(handle);
        info!("transaction manager started");
        Ok(())
    }

    /// Signals shutdown, waits for the policy loop to flush and exit, then
    /// closes persistence.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("policy loop task failed: {e}");
            }
        }
        self.persistence.close().await;
        info!("transaction manager stopped");
    }
}
