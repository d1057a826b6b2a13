//! Inbound (driving) port: the operations clients invoke on a transaction
//! handler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use txm_types::{ManagedTransaction, TransactionHeaders};

use crate::domain::errors::HandlerError;

/// A request to submit a blockchain transaction.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    /// Caller-assigned id (`<ns>/<uuid>`); generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub headers: TransactionHeaders,
    /// Encoded call data, if the caller prepared it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A request to deploy a contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDeployRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub headers: TransactionHeaders,
    /// Compiled contract artifact.
    pub contract: Value,
}

/// Type discriminator for requests on the API channel.
///
/// An integer rather than a closed enum so that handler implementations can
/// extend the request set; the loop answers FF21073 for values it does not
/// implement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApiRequestType(pub u32);

impl ApiRequestType {
    pub const DELETE: ApiRequestType = ApiRequestType(1);
    pub const SUSPEND: ApiRequestType = ApiRequestType(2);
    pub const RESUME: ApiRequestType = ApiRequestType(3);
}

/// The operations a transaction handler offers to the manager.
#[async_trait]
pub trait TransactionHandler: Send + Sync {
    /// Wires the event handler in once the confirmations manager exists.
    /// Called before `start`.
    fn init(&self, event_handler: std::sync::Arc<dyn crate::ports::outbound::ManagedTxEventHandler>);

    /// Sender for the loop-owned inbox that confirmation callbacks post to.
    fn update_inbox(&self) -> tokio::sync::mpsc::Sender<crate::ports::outbound::InflightUpdate>;

    /// Accepts, prepares and persists a new transaction. Returns once the
    /// record is durable; submission happens asynchronously on the policy
    /// loop.
    async fn handle_new_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<ManagedTransaction, HandlerError>;

    /// Accepts, prepares and persists a new contract deployment.
    async fn handle_new_contract_deployment(
        &self,
        request: ContractDeployRequest,
    ) -> Result<ManagedTransaction, HandlerError>;

    /// Requests deletion of a transaction. Idempotent: repeating the call
    /// for a transaction already marked for removal succeeds again.
    async fn handle_cancel_transaction(
        &self,
        tx_id: &str,
    ) -> Result<ManagedTransaction, HandlerError>;

    /// Parks a pending transaction.
    async fn handle_suspend_transaction(
        &self,
        tx_id: &str,
    ) -> Result<ManagedTransaction, HandlerError>;

    /// Returns a suspended transaction to pending.
    async fn handle_resume_transaction(
        &self,
        tx_id: &str,
    ) -> Result<ManagedTransaction, HandlerError>;

    /// Snapshot of a transaction's current persisted state.
    async fn handle_transaction_status(
        &self,
        tx_id: &str,
    ) -> Result<ManagedTransaction, HandlerError>;

    /// Spawns the policy loop. The returned handle completes when the loop
    /// has flushed and exited after `shutdown` fires.
    async fn start(
        self: std::sync::Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<tokio::task::JoinHandle<()>, HandlerError>;
}
