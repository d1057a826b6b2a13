//! Event dispatch adapter.
//!
//! Turns policy loop state transitions into notifications for the
//! confirmations manager and delivery attempts to subscribers. The
//! confirmations manager calls back on its own thread; the callbacks only
//! ever forward a small update onto the loop-owned inbox, they never touch
//! loop state.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use txm_types::{BlockInfo, ManagedTransaction, ReceiptRecord};

use crate::ports::outbound::{
    ConfirmationsManager, InflightUpdate, ManagedTxEventHandler, Notification, NotifyError,
    TrackedTransaction, TransactionStatusSink,
};

/// Downstream delivery of transaction update events (event streams,
/// websockets). Failures are informational.
pub trait TransactionUpdateSubscriber: Send + Sync {
    fn send_update(&self, mtx: &ManagedTransaction) -> Result<(), NotifyError>;
}

/// Bridges the loop to the confirmations manager and subscribers.
pub struct EventDispatchAdapter {
    confirmations: Arc<dyn ConfirmationsManager>,
    subscriber: Option<Arc<dyn TransactionUpdateSubscriber>>,
    inbox: mpsc::Sender<InflightUpdate>,
}

/// Sink handed to the confirmations manager for one tracked hash.
struct InboxSink {
    tx_id: String,
    inbox: mpsc::Sender<InflightUpdate>,
}

impl TransactionStatusSink for InboxSink {
    fn receipt(&self, receipt: ReceiptRecord) {
        let update = InflightUpdate::Receipt {
            tx_id: self.tx_id.clone(),
            receipt,
        };
        if self.inbox.try_send(update).is_err() {
            // The loop re-checks stale receipts itself, so a full inbox only
            // delays the update.
            warn!(tx = %self.tx_id, "update inbox full, dropping receipt notification");
        }
    }

    fn confirmed(&self, confirmations: Vec<BlockInfo>) {
        let update = InflightUpdate::Confirmed {
            tx_id: self.tx_id.clone(),
            confirmations,
        };
        if self.inbox.try_send(update).is_err() {
            warn!(tx = %self.tx_id, "update inbox full, dropping confirmation notification");
        }
    }
}

impl EventDispatchAdapter {
    pub fn new(
        confirmations: Arc<dyn ConfirmationsManager>,
        subscriber: Option<Arc<dyn TransactionUpdateSubscriber>>,
        inbox: mpsc::Sender<InflightUpdate>,
    ) -> Self {
        Self {
            confirmations,
            subscriber,
            inbox,
        }
    }

    fn tracked(&self, mtx: &ManagedTransaction, hash: &str) -> TrackedTransaction {
        TrackedTransaction {
            tx_id: mtx.id.clone(),
            transaction_hash: hash.to_string(),
            sink: Arc::new(InboxSink {
                tx_id: mtx.id.clone(),
                inbox: self.inbox.clone(),
            }),
        }
    }
}

#[async_trait]
impl ManagedTxEventHandler for EventDispatchAdapter {
    async fn new_transaction(
        &self,
        mtx: &ManagedTransaction,
        hash: &str,
    ) -> Result<(), NotifyError> {
        debug!(tx = %mtx.id, hash, "registering hash with confirmations manager");
        self.confirmations
            .notify(Notification::new_transaction(self.tracked(mtx, hash)))
    }

    async fn removed_transaction(
        &self,
        mtx: &ManagedTransaction,
        hash: &str,
    ) -> Result<(), NotifyError> {
        debug!(tx = %mtx.id, hash, "deregistering hash with confirmations manager");
        self.confirmations
            .notify(Notification::removed_transaction(self.tracked(mtx, hash)))
    }

    async fn transaction_update(&self, mtx: &ManagedTransaction) -> Result<(), NotifyError> {
        if let Some(subscriber) = &self.subscriber {
            subscriber.send_update(mtx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use txm_types::{new_transaction_id, TransactionHeaders, U256};

    struct RecordingConfirmations {
        notifications: Mutex<Vec<(crate::ports::outbound::NotificationType, String)>>,
    }

    impl ConfirmationsManager for RecordingConfirmations {
        fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
            let hash = notification
                .transaction
                .as_ref()
                .map(|t| t.transaction_hash.clone())
                .unwrap_or_default();
            self.notifications
                .lock()
                .push((notification.notification_type, hash));
            // Fire the receipt callback the way the real manager would
            if let Some(tracked) = notification.transaction {
                tracked.sink.confirmed(vec![]);
            }
            Ok(())
        }
    }

    fn create_test_tx() -> ManagedTransaction {
        ManagedTransaction::new_pending(
            new_transaction_id("ns1"),
            TransactionHeaders {
                from: "0xaaaaa".to_string(),
                ..Default::default()
            },
            U256::zero(),
            None,
            String::new(),
        )
    }

    #[tokio::test]
    async fn test_callbacks_land_on_the_inbox() {
        let (inbox_tx, mut inbox_rx) = mpsc::channel(10);
        let confirmations = Arc::new(RecordingConfirmations {
            notifications: Mutex::new(Vec::new()),
        });
        let adapter = EventDispatchAdapter::new(confirmations.clone(), None, inbox_tx);

        let mtx = create_test_tx();
        adapter.new_transaction(&mtx, "0xhash1").await.unwrap();

        let update = inbox_rx.try_recv().unwrap();
        match update {
            InflightUpdate::Confirmed { tx_id, .. } => assert_eq!(tx_id, mtx.id),
            other => panic!("unexpected update {other:?}"),
        }
        assert_eq!(confirmations.notifications.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_full_inbox_drops_instead_of_blocking() {
        let (inbox_tx, _inbox_rx) = mpsc::channel(1);
        let sink = InboxSink {
            tx_id: "ns1/tx".to_string(),
            inbox: inbox_tx,
        };
        // Second send hits a full inbox; must return, not block
        sink.confirmed(vec![]);
        sink.confirmed(vec![]);
    }

    #[tokio::test]
    async fn test_update_without_subscriber_is_ok() {
        let (inbox_tx, _rx) = mpsc::channel(1);
        let confirmations = Arc::new(RecordingConfirmations {
            notifications: Mutex::new(Vec::new()),
        });
        let adapter = EventDispatchAdapter::new(confirmations, None, inbox_tx);
        adapter.transaction_update(&create_test_tx()).await.unwrap();
    }
}
