//! Outbound (driven) ports: the collaborators the policy loop drives.
//!
//! The loop never mutates in-flight state from a callback. The confirmations
//! manager invokes [`TransactionStatusSink`] methods on its own thread; the
//! sink implementation posts an [`InflightUpdate`] onto a bounded inbox the
//! loop drains at the start of each cycle.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use txm_types::{BlockInfo, ManagedTransaction, ReceiptRecord};

/// Non-fatal failure delivering a notification; logged and retried or
/// dropped by the caller.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// Per-transaction state change forwarded into the policy loop.
#[derive(Debug, Clone)]
pub enum InflightUpdate {
    Receipt {
        tx_id: String,
        receipt: ReceiptRecord,
    },
    Confirmed {
        tx_id: String,
        confirmations: Vec<BlockInfo>,
    },
}

/// Callbacks the confirmations manager invokes as a tracked hash advances.
pub trait TransactionStatusSink: Send + Sync {
    fn receipt(&self, receipt: ReceiptRecord);
    fn confirmed(&self, confirmations: Vec<BlockInfo>);
}

/// A hash registration passed to the confirmations manager.
#[derive(Clone)]
pub struct TrackedTransaction {
    pub tx_id: String,
    pub transaction_hash: String,
    pub sink: Arc<dyn TransactionStatusSink>,
}

/// Kinds of notification the confirmations manager accepts. The transaction
/// handler only emits the first two; the event-stream kinds belong to
/// collaborators outside this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationType {
    NewTransaction,
    RemovedTransaction,
    NewEventLog,
    RemovedEventLog,
    StartedListener,
    StoppedListener,
}

/// A notification to the confirmations manager.
pub struct Notification {
    pub notification_type: NotificationType,
    pub transaction: Option<TrackedTransaction>,
}

impl Notification {
    pub fn new_transaction(tracked: TrackedTransaction) -> Self {
        Notification {
            notification_type: NotificationType::NewTransaction,
            transaction: Some(tracked),
        }
    }

    pub fn removed_transaction(tracked: TrackedTransaction) -> Self {
        Notification {
            notification_type: NotificationType::RemovedTransaction,
            transaction: Some(tracked),
        }
    }
}

/// The external confirmations manager.
pub trait ConfirmationsManager: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// What the policy loop calls when a transaction's tracked state changes.
///
/// Implemented by the event dispatch adapter; all three calls are
/// informational for the loop: errors are logged, never fatal.
#[async_trait]
pub trait ManagedTxEventHandler: Send + Sync {
    /// Registers a submission hash for receipt/confirmation tracking.
    async fn new_transaction(
        &self,
        mtx: &ManagedTransaction,
        hash: &str,
    ) -> Result<(), NotifyError>;

    /// Deregisters a hash that is no longer current.
    async fn removed_transaction(
        &self,
        mtx: &ManagedTransaction,
        hash: &str,
    ) -> Result<(), NotifyError>;

    /// Delivers a completion/progress event to subscribers.
    async fn transaction_update(&self, mtx: &ManagedTransaction) -> Result<(), NotifyError>;
}

/// Event handler that drops everything. For wiring stages where no
/// confirmations manager is attached, and for tests that do not care.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventHandler;

#[async_trait]
impl ManagedTxEventHandler for NoopEventHandler {
    async fn new_transaction(
        &self,
        _mtx: &ManagedTransaction,
        _hash: &str,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn removed_transaction(
        &self,
        _mtx: &ManagedTransaction,
        _hash: &str,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn transaction_update(&self, _mtx: &ManagedTransaction) -> Result<(), NotifyError> {
        Ok(())
    }
}
