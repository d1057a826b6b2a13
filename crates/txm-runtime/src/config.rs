//! Manager configuration.
//!
//! The configuration tree mirrors the key structure consumed by deployments:
//! `transactions.*`, `confirmations.*`, `persistence.*`. Deprecated keys are
//! applied as an overlay on the raw JSON before deserialization: each one
//! produces its replacement's value and a warning, and never overrides an
//! explicitly-set new key.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use txm_handler::config::{humantime_serde, SimpleHandlerConfig};

use crate::errors::ManagerError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub transactions: TransactionsConfig,
    pub confirmations: ConfirmationsConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransactionsConfig {
    /// Historical status updates to retain per transaction.
    pub max_history_count: usize,
    pub handler: HandlerSelection,
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self {
            max_history_count: 50,
            handler: HandlerSelection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HandlerSelection {
    /// Registered name of the transaction handler to run.
    pub name: String,
    /// Configuration of the built-in simple handler.
    pub simple: SimpleHandlerConfig,
}

impl Default for HandlerSelection {
    fn default() -> Self {
        Self {
            name: "simple".to_string(),
            simple: SimpleHandlerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfirmationsConfig {
    /// Block depth required to consider a transaction final.
    pub required: usize,
    /// Force a receipt re-check after this long without progress.
    #[serde(with = "humantime_serde")]
    pub stale_receipt_timeout: Duration,
    /// Queue length for block notifications into the confirmations manager.
    pub block_queue_length: usize,
    /// Queue length for transaction/event notifications.
    pub notification_queue_length: usize,
}

impl Default for ConfirmationsConfig {
    fn default() -> Self {
        Self {
            required: 20,
            stale_receipt_timeout: Duration::from_secs(60),
            block_queue_length: 50,
            notification_queue_length: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistenceConfig {
    /// Backend selection: `rocksdb` (also accepted as `leveldb`) or `memory`.
    #[serde(rename = "type")]
    pub backend: String,
    pub rocksdb: RocksDbSection,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: "rocksdb".to_string(),
            rocksdb: RocksDbSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RocksDbSection {
    pub path: String,
    pub block_cache_size: usize,
    pub write_buffer_size: usize,
    pub sync_writes: bool,
}

impl Default for RocksDbSection {
    fn default() -> Self {
        let defaults = txm_persistence::adapters::RocksDbConfig::default();
        Self {
            path: defaults.path,
            block_cache_size: defaults.block_cache_size,
            write_buffer_size: defaults.write_buffer_size,
            sync_writes: defaults.sync_writes,
        }
    }
}

impl RocksDbSection {
    pub fn to_backend_config(&self) -> txm_persistence::adapters::RocksDbConfig {
        txm_persistence::adapters::RocksDbConfig {
            path: self.path.clone(),
            block_cache_size: self.block_cache_size,
            write_buffer_size: self.write_buffer_size,
            sync_writes: self.sync_writes,
        }
    }
}

/// Deprecated key → replacement. Applied in order.
const DEPRECATED_ALIASES: &[(&str, &str)] = &[
    ("transactions.maxInFlight", "transactions.handler.simple.maxInFlight"),
    ("transactions.nonceStateTimeout", "transactions.handler.simple.nonceStateTimeout"),
    ("policyloop.interval", "transactions.handler.simple.interval"),
    ("policyloop.retry.initialDelay", "transactions.handler.simple.retry.initialDelay"),
    ("policyloop.retry.maxDelay", "transactions.handler.simple.retry.maxDelay"),
    ("policyloop.retry.factor", "transactions.handler.simple.retry.factor"),
    ("policyengine.name", "transactions.handler.name"),
    ("policyengine.simple.fixedGasPrice", "transactions.handler.simple.fixedGasPrice"),
    ("policyengine.simple.resubmitInterval", "transactions.handler.simple.resubmitInterval"),
    ("policyengine.simple.gasOracle.mode", "transactions.handler.simple.gasOracle.mode"),
    ("policyengine.simple.gasOracle.url", "transactions.handler.simple.gasOracle.url"),
    ("policyengine.simple.gasOracle.method", "transactions.handler.simple.gasOracle.method"),
    ("policyengine.simple.gasOracle.template", "transactions.handler.simple.gasOracle.template"),
    ("policyengine.simple.gasOracle.queryInterval", "transactions.handler.simple.gasOracle.queryInterval"),
];

fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn set_path(root: &mut Value, path: &str, value: Value) {
    let mut current = root;
    let segments: Vec<&str> = path.split('.').collect();
    for segment in &segments[..segments.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        current = current
            .as_object_mut()
            .expect("just ensured object")
            .entry(segment.to_string())
            .or_insert(Value::Null);
    }
    if !current.is_object() {
        *current = Value::Object(Default::default());
    }
    current
        .as_object_mut()
        .expect("just ensured object")
        .insert(segments[segments.len() - 1].to_string(), value);
}

fn remove_path(root: &mut Value, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        match current.as_object_mut().and_then(|o| o.get_mut(*segment)) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(obj) = current.as_object_mut() {
        obj.remove(segments[segments.len() - 1]);
    }
}

/// Rewrites every deprecated key onto its replacement, warning for each one
/// found. An explicitly-set replacement key always wins.
pub fn apply_deprecated_aliases(root: &mut Value) {
    for (old, new) in DEPRECATED_ALIASES {
        let Some(value) = get_path(root, old).cloned() else {
            continue;
        };
        if get_path(root, new).is_none() {
            warn!("config key '{old}' is deprecated, please use '{new}' instead");
            set_path(root, new, value);
        } else {
            warn!("config key '{old}' is deprecated and ignored ('{new}' is set)");
        }
        remove_path(root, old);
    }
}

impl Config {
    /// Parses a configuration document, applying deprecated-key aliases.
    pub fn from_value(mut raw: Value) -> Result<Self, ManagerError> {
        apply_deprecated_aliases(&mut raw);
        serde_json::from_value(raw).map_err(|e| ManagerError::BadConfig(e.to_string()))
    }

    /// Loads configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManagerError> {
        let bytes = std::fs::read(path.as_ref())
            .map_err(|e| ManagerError::BadConfig(format!("{}: {e}", path.as_ref().display())))?;
        let raw: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ManagerError::BadConfig(e.to_string()))?;
        Self::from_value(raw)
    }
}
