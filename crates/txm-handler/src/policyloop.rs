//! The policy loop.
//!
//! One long-lived task owns the in-flight set and reconciles it against
//! persistence, the connector and the confirmations manager. A cycle is:
//! drain the confirmation-update inbox, refill the set from the pending scan
//! (when stale), drain the API request channel, step every record through
//! the state machine, then flush dirty and terminal records back to
//! persistence. Between cycles the loop sleeps until the interval timer, a
//! stale/update nudge, or shutdown.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use txm_persistence::SortDirection;
use txm_types::{ManagedTransaction, TxAction, TxStatus};

use crate::domain::errors::HandlerError;
use crate::domain::inflight::InflightSet;
use crate::handler::{ApiRequest, LoopChannels, SimpleTransactionHandler};
use crate::ports::inbound::ApiRequestType;
use crate::ports::outbound::InflightUpdate;

/// Single-writer reconciliation task over the in-flight set.
pub struct PolicyLoop {
    th: Arc<SimpleTransactionHandler>,
    inflight: InflightSet,
    channels: LoopChannels,
}

impl PolicyLoop {
    pub(crate) fn new(th: Arc<SimpleTransactionHandler>, channels: LoopChannels) -> Self {
        let max_in_flight = th.config().max_in_flight;
        Self {
            th,
            inflight: InflightSet::new(max_in_flight),
            channels,
        }
    }

    /// The in-flight set, for inspection in tests.
    pub fn inflight(&self) -> &InflightSet {
        &self.inflight
    }

    pub fn inflight_mut(&mut self) -> &mut InflightSet {
        &mut self.inflight
    }

    /// Runs until `shutdown` fires, then flushes, answers every queued API
    /// request with a cancellation error, and exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("policy loop started");
        // Recover whatever was pending before this process started
        if !*shutdown.borrow() {
            self.cycle(true).await;
        }
        loop {
            if *shutdown.borrow() {
                break;
            }
            let interval = self.th.config().interval;
            tokio::select! {
                _ = tokio::time::sleep(interval) => self.cycle(true).await,
                Some(_) = self.channels.stale_rx.recv() => self.cycle(true).await,
                Some(_) = self.channels.update_rx.recv() => self.cycle(false).await,
                Some(update) = self.channels.inbox_rx.recv() => {
                    self.apply_update(update);
                    self.cycle(false).await;
                }
                _ = shutdown.changed() => break,
            }
        }
        self.flush().await;
        for request in self.th.drain_api_requests() {
            let _ = request.response.send(Err(HandlerError::ApiRequestCancelled));
        }
        info!("policy loop exited");
    }

    /// One reconciliation pass. `stale` forces a refill from persistence.
    pub async fn cycle(&mut self, stale: bool) {
        self.drain_updates();
        if stale {
            self.update_inflight_set().await;
        }
        self.process_api_requests().await;

        for index in 0..self.inflight.len() {
            let th = self.th.clone();
            if let Some(record) = self.inflight.get_mut(index) {
                th.exec_policy(record, false).await;
            }
        }

        self.flush().await;
    }

    fn apply_update(&mut self, update: InflightUpdate) {
        let tx_id = match &update {
            InflightUpdate::Receipt { tx_id, .. } => tx_id.clone(),
            InflightUpdate::Confirmed { tx_id, .. } => tx_id.clone(),
        };
        match self.inflight.find_mut(&tx_id) {
            Some(record) => self.th.apply_inflight_update(record, update),
            // The record can already be gone (deleted, or retired); the
            // update is informational
            None => debug!(tx = %tx_id, "dropping update for transaction not in flight"),
        }
    }

    fn drain_updates(&mut self) {
        while let Ok(update) = self.channels.inbox_rx.try_recv() {
            self.apply_update(update);
        }
    }

    /// Retires completed records and tops the set up from the pending scan.
    async fn update_inflight_set(&mut self) {
        self.inflight.drop_retired();
        let space = self.inflight.free_space();
        if space == 0 {
            return;
        }
        let after = self.inflight.highest_sequence_id().cloned();
        match self
            .th
            .persistence()
            .list_transactions_pending(after.as_ref(), space, SortDirection::Ascending)
            .await
        {
            Ok(loaded) => {
                if !loaded.is_empty() {
                    debug!(count = loaded.len(), "loaded pending transactions");
                }
                self.inflight.join(loaded);
            }
            // Stays stale; the next timer tick retries the scan
            Err(e) => warn!("failed to refill in-flight set: {e}"),
        }
    }

    /// Drains the API request channel, executing every request on the loop.
    pub async fn process_api_requests(&mut self) {
        for request in self.th.drain_api_requests() {
            let ApiRequest {
                request_type,
                tx_id,
                response,
            } = request;
            let result = match request_type {
                ApiRequestType::DELETE => self.process_delete(&tx_id).await,
                ApiRequestType::SUSPEND => self.process_suspend_resume(&tx_id, true).await,
                ApiRequestType::RESUME => self.process_suspend_resume(&tx_id, false).await,
                other => Err(HandlerError::UnknownRequestType(other.0)),
            };
            // A caller that gave up is fine
            let _ = response.send(result);
        }
    }

    /// Delete: flag an in-flight record for removal (actioned next cycle),
    /// or delete directly from persistence when not in flight.
    async fn process_delete(&mut self, tx_id: &str) -> Result<ManagedTransaction, HandlerError> {
        if let Some(record) = self.inflight.find_mut(tx_id) {
            record.remove = true;
            record.mtx.delete_requested = Some(Utc::now());
            self.th.history().add_sub_status_action(
                &mut record.mtx,
                TxAction::Cancel,
                None,
                None,
            );
            record.dirty = true;
            return Ok(record.mtx.clone());
        }

        let tx = self
            .th
            .persistence()
            .get_transaction_by_id(tx_id)
            .await?
            .ok_or_else(|| HandlerError::TransactionNotFound(tx_id.to_string()))?;
        self.th.persistence().delete_transaction(tx_id).await?;
        info!(tx = %tx_id, "deleted transaction");
        Ok(tx)
    }

    /// Suspend / resume: mutate status, write through, respond.
    async fn process_suspend_resume(
        &mut self,
        tx_id: &str,
        suspend: bool,
    ) -> Result<ManagedTransaction, HandlerError> {
        let target = if suspend {
            TxStatus::Suspended
        } else {
            TxStatus::Pending
        };

        if let Some(record) = self.inflight.find_mut(tx_id) {
            if record.mtx.status == TxStatus::Pending && suspend {
                record.mtx.status = TxStatus::Suspended;
            } else if record.mtx.status == TxStatus::Suspended && !suspend {
                record.mtx.status = TxStatus::Pending;
            }
            record.mtx.updated = Utc::now();
            self.th
                .persistence()
                .write_transaction(&record.mtx, false)
                .await?;
            record.dirty = false;
            return Ok(record.mtx.clone());
        }

        let mut tx = self
            .th
            .persistence()
            .get_transaction_by_id(tx_id)
            .await?
            .ok_or_else(|| HandlerError::TransactionNotFound(tx_id.to_string()))?;
        if (tx.status == TxStatus::Pending && suspend)
            || (tx.status == TxStatus::Suspended && !suspend)
        {
            tx.status = target;
            tx.updated = Utc::now();
            self.th.persistence().write_transaction(&tx, false).await?;
            if !suspend {
                // Back in the pending scan; pick it up promptly
                self.th.mark_inflight_stale();
            }
        }
        Ok(tx)
    }

    /// Writes back every dirty record, and every record that reached a
    /// terminal (or suspended) state. Terminal records emit a transaction
    /// update event and are retired on the next refill pass.
    async fn flush(&mut self) {
        let mut any_retired = false;
        let th = self.th.clone();
        for record in self.inflight.iter_mut() {
            if record.deleted {
                any_retired = true;
                continue;
            }
            let done = record.mtx.status.is_terminal() || record.mtx.status == TxStatus::Suspended;
            if !record.dirty && !(done && !record.complete) {
                continue;
            }
            record.mtx.updated = Utc::now();
            match th
                .persistence()
                .write_transaction(&record.mtx, false)
                .await
            {
                Ok(()) => {
                    record.dirty = false;
                    if done && !record.complete {
                        record.complete = true;
                        any_retired = true;
                        if record.mtx.status.is_terminal() {
                            let event_handler = th.event_handler();
                            if let Err(e) = event_handler.transaction_update(&record.mtx).await {
                                // Subscriber delivery is informational
                                warn!(tx = %record.mtx.id, "transaction update delivery failed: {e}");
                            }
                        }
                    }
                }
                // Record stays dirty; retried next cycle, nothing is lost
                Err(e) => warn!(tx = %record.mtx.id, "failed to flush transaction: {e}"),
            }
        }
        if any_retired {
            self.th.mark_inflight_stale();
        }
    }
}
