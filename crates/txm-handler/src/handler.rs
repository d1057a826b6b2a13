//! The simple transaction handler.
//!
//! Owns the nonce allocator, history tracker, gas oracle and the channels
//! that feed the policy loop. Client-facing operations either complete
//! synchronously against persistence (new transactions) or travel over the
//! API request channel to be executed on the loop (delete, suspend, resume).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use txm_connector::{BlockchainConnector, DeployContractPrepareRequest, TransactionPrepareRequest,
    TransactionReceiptRequest, TransactionSendRequest};
use txm_persistence::Persistence;
use txm_types::{
    new_transaction_id, ManagedTransaction, TransactionHeaders, TxAction, TxStatus, TxSubStatus,
    U256,
};

use crate::config::SimpleHandlerConfig;
use crate::domain::errors::HandlerError;
use crate::domain::history::{error_value, TxHistoryManager};
use crate::domain::inflight::PendingState;
use crate::domain::nonces::NonceAllocator;
use crate::gasoracle::GasOracle;
use crate::policyloop::PolicyLoop;
use crate::ports::inbound::{
    ApiRequestType, ContractDeployRequest, TransactionHandler, TransactionRequest,
};
use crate::ports::outbound::{InflightUpdate, ManagedTxEventHandler, NoopEventHandler};

/// Namespace for generated transaction ids.
const DEFAULT_NAMESPACE: &str = "txm";

/// Capacity of the inbox carrying confirmation callbacks into the loop.
const UPDATE_INBOX_CAPACITY: usize = 50;

/// One queued request on the API channel.
pub struct ApiRequest {
    pub request_type: ApiRequestType,
    pub tx_id: String,
    pub response: oneshot::Sender<Result<ManagedTransaction, HandlerError>>,
}

/// Channels owned by the policy loop, handed over exactly once.
pub(crate) struct LoopChannels {
    pub stale_rx: mpsc::Receiver<()>,
    pub update_rx: mpsc::Receiver<()>,
    pub inbox_rx: mpsc::Receiver<InflightUpdate>,
}

/// The simple transaction handler.
pub struct SimpleTransactionHandler {
    config: SimpleHandlerConfig,
    stale_receipt_timeout: Duration,
    persistence: Arc<dyn Persistence>,
    connector: Arc<dyn BlockchainConnector>,
    event_handler: RwLock<Arc<dyn ManagedTxEventHandler>>,
    history: TxHistoryManager,
    nonces: NonceAllocator,
    gas_oracle: GasOracle,

    api_requests: Mutex<Vec<ApiRequest>>,
    inflight_stale_tx: mpsc::Sender<()>,
    inflight_update_tx: mpsc::Sender<()>,
    update_inbox_tx: mpsc::Sender<InflightUpdate>,
    loop_channels: Mutex<Option<LoopChannels>>,
}

impl SimpleTransactionHandler {
    pub fn new(
        config: SimpleHandlerConfig,
        max_history_count: usize,
        stale_receipt_timeout: Duration,
        persistence: Arc<dyn Persistence>,
        connector: Arc<dyn BlockchainConnector>,
    ) -> Self {
        let (inflight_stale_tx, stale_rx) = mpsc::channel(1);
        let (inflight_update_tx, update_rx) = mpsc::channel(1);
        let (update_inbox_tx, inbox_rx) = mpsc::channel(UPDATE_INBOX_CAPACITY);

        let nonces = NonceAllocator::new(config.nonce_state_timeout);
        let gas_oracle = GasOracle::new(&config.gas_oracle, config.fixed_gas_price.clone());

        Self {
            config,
            stale_receipt_timeout,
            persistence,
            connector,
            event_handler: RwLock::new(Arc::new(NoopEventHandler)),
            history: TxHistoryManager::new(max_history_count),
            nonces,
            gas_oracle,
            api_requests: Mutex::new(Vec::new()),
            inflight_stale_tx,
            inflight_update_tx,
            update_inbox_tx,
            loop_channels: Mutex::new(Some(LoopChannels {
                stale_rx,
                update_rx,
                inbox_rx,
            })),
        }
    }

    pub fn config(&self) -> &SimpleHandlerConfig {
        &self.config
    }

    pub(crate) fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    pub(crate) fn history(&self) -> &TxHistoryManager {
        &self.history
    }

    /// Sender for the loop-owned update inbox; the event dispatch adapter
    /// posts confirmation callbacks through this.
    pub fn update_inbox(&self) -> mpsc::Sender<InflightUpdate> {
        self.update_inbox_tx.clone()
    }

    /// Attaches the event handler once the confirmations manager is wired.
    pub fn set_event_handler(&self, event_handler: Arc<dyn ManagedTxEventHandler>) {
        *self.event_handler.write() = event_handler;
    }

    pub(crate) fn event_handler(&self) -> Arc<dyn ManagedTxEventHandler> {
        self.event_handler.read().clone()
    }

    /// Nudges the loop to re-scan persistence. Non-blocking; concurrent
    /// signals coalesce on the capacity-one channel.
    pub fn mark_inflight_stale(&self) {
        let _ = self.inflight_stale_tx.try_send(());
    }

    /// Nudges the loop to re-evaluate the current set without a re-scan.
    pub fn mark_inflight_update(&self) {
        let _ = self.inflight_update_tx.try_send(());
    }

    /// Builds the policy loop for this handler. Callable once.
    pub fn policy_loop(self: &Arc<Self>) -> Result<PolicyLoop, HandlerError> {
        let channels = self
            .loop_channels
            .lock()
            .take()
            .ok_or(HandlerError::AlreadyStarted)?;
        Ok(PolicyLoop::new(self.clone(), channels))
    }

    pub(crate) fn drain_api_requests(&self) -> Vec<ApiRequest> {
        std::mem::take(&mut *self.api_requests.lock())
    }

    /// Appends a request to the API channel and nudges the loop.
    pub fn enqueue_api_request(&self, request: ApiRequest) {
        self.api_requests.lock().push(request);
        self.mark_inflight_update();
    }

    /// Enqueues a request for the loop and waits for its response.
    async fn api_request(
        &self,
        request_type: ApiRequestType,
        tx_id: &str,
    ) -> Result<ManagedTransaction, HandlerError> {
        let (response, rx) = oneshot::channel();
        self.enqueue_api_request(ApiRequest {
            request_type,
            tx_id: tx_id.to_string(),
            response,
        });
        match rx.await {
            Ok(result) => result,
            // Loop gone without draining: same as a cancelled context
            Err(_) => Err(HandlerError::ApiRequestCancelled),
        }
    }

    /// Allocates a nonce, builds and persists a new pending transaction.
    async fn create_managed_tx(
        &self,
        id: Option<String>,
        headers: TransactionHeaders,
        gas: Option<U256>,
        transaction_data: String,
    ) -> Result<ManagedTransaction, HandlerError> {
        let signer = headers.from.clone();
        let mut locked_nonce = self
            .nonces
            .assign_and_lock_nonce(&signer, self.persistence.as_ref(), self.connector.as_ref())
            .await?;

        let id = id.unwrap_or_else(|| new_transaction_id(DEFAULT_NAMESPACE));
        let mut mtx =
            ManagedTransaction::new_pending(id, headers, locked_nonce.nonce, gas, transaction_data);
        self.history.set_sub_status(&mut mtx, TxSubStatus::Received);
        self.history.add_sub_status_action(
            &mut mtx,
            TxAction::AssignNonce,
            Some(json!({ "nonce": mtx.nonce.to_string() })),
            None,
        );

        // The nonce is only spent once the record is durable; any error here
        // returns it unspent and unlocks the signer.
        match self.persistence.write_transaction(&mtx, true).await {
            Ok(()) => {
                locked_nonce.spend();
                locked_nonce.complete();
                info!(tx = %mtx.id, signer = %signer, nonce = %mtx.nonce, "accepted transaction");
                self.mark_inflight_stale();
                Ok(mtx)
            }
            Err(e) => {
                locked_nonce.complete();
                Err(e.into())
            }
        }
    }

    /// One state-machine step for an in-flight record.
    ///
    /// Never fails: every error is absorbed into history actions and the
    /// record's `error_message`, and retried on a later cycle.
    pub async fn exec_policy(&self, record: &mut PendingState, sync_deletion_request: bool) {
        if record.deleted {
            return;
        }
        if record.remove || sync_deletion_request {
            self.process_deletion(record).await;
            return;
        }
        match record.mtx.status {
            TxStatus::Suspended => return, // flushed and retired by the loop
            status if status.is_terminal() => return,
            _ => {}
        }

        if record.confirmed {
            self.finalize_confirmed(record);
            return;
        }

        match (record.mtx.first_submit.is_some(), record.mtx.receipt.is_some()) {
            // Unsent
            (false, _) => self.attempt_submit(record).await,
            // Submitted, awaiting receipt
            (true, false) => {
                self.ensure_tracking(record).await;
                let now = Utc::now();
                // While the backoff gate is armed, the stale transition is
                // deferred too, so the Timeout action counts resubmission
                // attempts rather than loop cycles
                let backed_off = record.next_submit_at.is_some_and(|next| now < next);
                let overdue = !backed_off
                    && record.mtx.last_submit.is_some_and(|last| {
                        now.signed_duration_since(last)
                            .to_std()
                            .unwrap_or_default()
                            > self.config.resubmit_interval
                    });
                if overdue {
                    warn!(tx = %record.mtx.id, "no receipt within resubmit interval, re-sending");
                    self.history
                        .set_sub_status(&mut record.mtx, TxSubStatus::Stale);
                    self.history.add_sub_status_action(
                        &mut record.mtx,
                        TxAction::Timeout,
                        None,
                        None,
                    );
                    record.dirty = true;
                    self.attempt_submit(record).await;
                }
            }
            // Receipt observed, waiting for the confirmations manager
            (true, true) => {
                self.ensure_tracking(record).await;
                self.recheck_stale_receipt(record).await;
            }
        }
    }

    /// Applies a receipt/confirmation callback forwarded through the inbox.
    pub(crate) fn apply_inflight_update(&self, record: &mut PendingState, update: InflightUpdate) {
        match update {
            InflightUpdate::Receipt { receipt, .. } => {
                info!(
                    tx = %record.mtx.id,
                    block = %receipt.block_number,
                    success = receipt.success,
                    "receipt received"
                );
                self.history.add_sub_status_action(
                    &mut record.mtx,
                    TxAction::ReceiveReceipt,
                    Some(json!({ "protocolId": receipt.protocol_id })),
                    None,
                );
                record.mtx.receipt = Some(receipt);
                record.dirty = true;
            }
            InflightUpdate::Confirmed { confirmations, .. } => {
                debug!(tx = %record.mtx.id, "transaction confirmed");
                record.mtx.confirmations = confirmations;
                record.confirmed = true;
                record.dirty = true;
            }
        }
    }

    /// Moves a confirmed record to its terminal status.
    fn finalize_confirmed(&self, record: &mut PendingState) {
        let success = record
            .mtx
            .receipt
            .as_ref()
            .map(|r| r.success)
            .unwrap_or(false);
        record.mtx.status = if success {
            TxStatus::Succeeded
        } else {
            TxStatus::Failed
        };
        if !success && record.mtx.error_message.is_none() {
            record.mtx.error_message = Some("transaction reverted on chain".to_string());
        }
        self.history
            .set_sub_status(&mut record.mtx, TxSubStatus::Confirmed);
        self.history.add_sub_status_action(
            &mut record.mtx,
            TxAction::Confirm,
            Some(json!({ "confirmations": record.mtx.confirmations.len() })),
            None,
        );
        record.dirty = true;
        info!(tx = %record.mtx.id, status = ?record.mtx.status, "transaction reached terminal status");
    }

    /// Obtains a gas price and (re-)sends the transaction, honoring the
    /// per-record backoff gate.
    async fn attempt_submit(&self, record: &mut PendingState) {
        let now = Utc::now();
        if let Some(next) = record.next_submit_at {
            if now < next {
                return;
            }
        }

        let gas_price = match self.gas_oracle.gas_price(self.connector.as_ref()).await {
            Ok(gas_price) => gas_price,
            Err(e) => {
                warn!(tx = %record.mtx.id, "gas price retrieval failed: {e}");
                self.history.add_sub_status_action(
                    &mut record.mtx,
                    TxAction::RetrieveGasPrice,
                    None,
                    Some(error_value(&e)),
                );
                record.mtx.error_message = Some(e.to_string());
                record.dirty = true;
                return;
            }
        };
        if let Some(gas_price) = &gas_price {
            self.history.add_sub_status_action(
                &mut record.mtx,
                TxAction::RetrieveGasPrice,
                Some(json!({ "gasPrice": gas_price })),
                None,
            );
            record.mtx.gas_price = Some(gas_price.clone());
            record.mtx.policy_info = Some(json!({
                "lastGasPrice": gas_price,
                "retrieved": now.to_rfc3339(),
            }));
        }

        let request = TransactionSendRequest {
            headers: record.mtx.headers.clone(),
            nonce: record.mtx.nonce,
            gas_price: record.mtx.gas_price.clone(),
            transaction_data: record.mtx.transaction_data.clone(),
        };
        match self.connector.transaction_send(request).await {
            Ok(res) => {
                let hash = res.transaction_hash;
                info!(tx = %record.mtx.id, %hash, nonce = %record.mtx.nonce, "transaction sent");
                record.mtx.transaction_hash = Some(hash.clone());
                if record.mtx.first_submit.is_none() {
                    record.mtx.first_submit = Some(now);
                }
                record.mtx.last_submit = Some(now);
                self.history.add_sub_status_action(
                    &mut record.mtx,
                    TxAction::SubmitTransaction,
                    Some(json!({ "txHash": hash })),
                    None,
                );
                record.submit_attempts = 0;
                record.next_submit_at = None;
                record.dirty = true;
                self.ensure_tracking(record).await;
            }
            Err(err) if err.reason.means_already_known() && record.mtx.transaction_hash.is_some() => {
                // The node already holds this transaction; nothing to change
                debug!(tx = %record.mtx.id, reason = ?err.reason, "submission already known to node");
                self.history.add_sub_status_action(
                    &mut record.mtx,
                    TxAction::SubmitTransaction,
                    Some(json!({ "reason": err.reason })),
                    None,
                );
                record.mtx.last_submit = Some(now);
                record.dirty = true;
            }
            Err(err) if err.reason.is_retryable() => {
                record.submit_attempts += 1;
                let delay = self.config.retry.delay_for_attempt(record.submit_attempts);
                record.next_submit_at = Some(
                    now + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::zero()),
                );
                warn!(
                    tx = %record.mtx.id,
                    attempts = record.submit_attempts,
                    "retryable submission failure: {err}"
                );
                self.history.add_sub_status_action(
                    &mut record.mtx,
                    TxAction::SubmitTransaction,
                    None,
                    Some(error_value(&err)),
                );
                record.mtx.error_message = Some(err.to_string());
                record.dirty = true;
            }
            Err(err) => {
                error!(tx = %record.mtx.id, "fatal submission failure: {err}");
                self.history.add_sub_status_action(
                    &mut record.mtx,
                    TxAction::SubmitTransaction,
                    None,
                    Some(error_value(&err)),
                );
                record.mtx.error_message = Some(err.to_string());
                record.mtx.status = TxStatus::Failed;
                self.history
                    .set_sub_status(&mut record.mtx, TxSubStatus::Failed);
                record.dirty = true;
            }
        }
    }

    /// Aligns the confirmations manager registration with the current
    /// submission hash: the old hash is always removed before the new one is
    /// announced. Notification errors are logged and retried next cycle.
    async fn ensure_tracking(&self, record: &mut PendingState) {
        let Some(hash) = record.mtx.transaction_hash.clone() else {
            return;
        };
        if record.tracking_transaction_hash.as_deref() == Some(hash.as_str()) {
            return;
        }
        let event_handler = self.event_handler();
        if let Some(old_hash) = record.tracking_transaction_hash.clone() {
            if let Err(e) = event_handler
                .removed_transaction(&record.mtx, &old_hash)
                .await
            {
                warn!(tx = %record.mtx.id, hash = %old_hash, "failed to deregister old hash: {e}");
            }
        }
        match event_handler.new_transaction(&record.mtx, &hash).await {
            Ok(()) => {
                record.tracking_transaction_hash = Some(hash);
                self.history
                    .set_sub_status(&mut record.mtx, TxSubStatus::Tracking);
                record.dirty = true;
            }
            Err(e) => {
                warn!(tx = %record.mtx.id, %hash, "failed to register hash, retrying next cycle: {e}");
            }
        }
    }

    /// Forces a receipt re-check when the last observed receipt has gone
    /// stale (e.g. dropped by a reorg the confirmations manager missed).
    async fn recheck_stale_receipt(&self, record: &mut PendingState) {
        let stale = record.mtx.receipt.as_ref().is_some_and(|r| {
            Utc::now()
                .signed_duration_since(r.received)
                .to_std()
                .unwrap_or_default()
                > self.stale_receipt_timeout
        });
        if !stale {
            return;
        }
        let Some(hash) = record.mtx.transaction_hash.clone() else {
            return;
        };
        debug!(tx = %record.mtx.id, "receipt stale, re-checking");
        match self
            .connector
            .transaction_receipt(TransactionReceiptRequest {
                transaction_hash: hash,
            })
            .await
        {
            Ok(Some(receipt)) => {
                self.history.add_sub_status_action(
                    &mut record.mtx,
                    TxAction::ReceiveReceipt,
                    Some(json!({ "protocolId": receipt.protocol_id })),
                    None,
                );
                record.mtx.receipt = Some(receipt);
                record.dirty = true;
            }
            Ok(None) => {
                // Mined block may have been reorged away; refresh the clock
                // so the next check is one timeout away, and let the
                // resubmit path take over if it stays unmined.
                if let Some(receipt) = &mut record.mtx.receipt {
                    receipt.received = Utc::now();
                }
                record.dirty = true;
            }
            Err(e) => {
                warn!(tx = %record.mtx.id, "receipt re-check failed: {e}");
                self.history.add_sub_status_action(
                    &mut record.mtx,
                    TxAction::ReceiveReceipt,
                    None,
                    Some(error_value(&e)),
                );
            }
        }
    }

    /// Deletes a removed record from persistence and deregisters its hash.
    async fn process_deletion(&self, record: &mut PendingState) {
        if let Err(e) = self.persistence.delete_transaction(&record.mtx.id).await {
            warn!(tx = %record.mtx.id, "failed to delete transaction, will retry: {e}");
            return;
        }
        if let Some(hash) = record
            .tracking_transaction_hash
            .take()
            .or_else(|| record.mtx.transaction_hash.clone())
        {
            let event_handler = self.event_handler();
            if let Err(e) = event_handler.removed_transaction(&record.mtx, &hash).await {
                warn!(tx = %record.mtx.id, %hash, "failed to deregister deleted transaction: {e}");
            }
        }
        info!(tx = %record.mtx.id, "transaction deleted");
        record.deleted = true;
    }
}

#[async_trait]
impl TransactionHandler for SimpleTransactionHandler {
    fn init(&self, event_handler: Arc<dyn ManagedTxEventHandler>) {
        self.set_event_handler(event_handler);
    }

    fn update_inbox(&self) -> mpsc::Sender<InflightUpdate> {
        self.update_inbox_tx.clone()
    }

    async fn handle_new_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<ManagedTransaction, HandlerError> {
        let prepared = self
            .connector
            .transaction_prepare(TransactionPrepareRequest {
                headers: request.headers.clone(),
                data: request.data,
            })
            .await?;
        self.create_managed_tx(
            request.id,
            request.headers,
            Some(prepared.gas),
            prepared.transaction_data,
        )
        .await
    }

    async fn handle_new_contract_deployment(
        &self,
        request: ContractDeployRequest,
    ) -> Result<ManagedTransaction, HandlerError> {
        let prepared = self
            .connector
            .deploy_contract_prepare(DeployContractPrepareRequest {
                headers: request.headers.clone(),
                contract: request.contract,
            })
            .await?;
        self.create_managed_tx(
            request.id,
            request.headers,
            Some(prepared.gas),
            prepared.transaction_data,
        )
        .await
    }

    async fn handle_cancel_transaction(
        &self,
        tx_id: &str,
    ) -> Result<ManagedTransaction, HandlerError> {
        self.api_request(ApiRequestType::DELETE, tx_id).await
    }

    async fn handle_suspend_transaction(
        &self,
        tx_id: &str,
    ) -> Result<ManagedTransaction, HandlerError> {
        self.api_request(ApiRequestType::SUSPEND, tx_id).await
    }

    async fn handle_resume_transaction(
        &self,
        tx_id: &str,
    ) -> Result<ManagedTransaction, HandlerError> {
        self.api_request(ApiRequestType::RESUME, tx_id).await
    }

    async fn handle_transaction_status(
        &self,
        tx_id: &str,
    ) -> Result<ManagedTransaction, HandlerError> {
        self.persistence
            .get_transaction_by_id(tx_id)
            .await?
            .ok_or_else(|| HandlerError::TransactionNotFound(tx_id.to_string()))
    }

    async fn start(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<tokio::task::JoinHandle<()>, HandlerError> {
        let policy_loop = self.policy_loop()?;
        Ok(tokio::spawn(policy_loop.run(shutdown)))
    }
}
