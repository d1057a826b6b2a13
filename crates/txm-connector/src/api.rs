//! Request/response types and the connector trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use txm_types::{ReceiptRecord, TransactionHeaders, U256};

/// Classification of a connector failure, used to pick a retry policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// The nonce has already been used on chain.
    NonceTooLow,
    /// The exact transaction is already in the node's pool.
    KnownTransaction,
    /// The gas price is below the node's acceptance threshold.
    Underpriced,
    /// The signer cannot cover value + gas.
    InsufficientFunds,
    /// Execution reverted during estimation/preparation.
    TransactionReverted,
    /// The request itself is malformed.
    InvalidInputs,
    /// The queried item does not exist.
    NotFound,
    /// Unclassified failure (network, node outage, ...).
    Unknown,
}

impl ErrorReason {
    /// True when the failure may clear on its own and the operation should be
    /// retried on a later cycle.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorReason::InvalidInputs
                | ErrorReason::InsufficientFunds
                | ErrorReason::TransactionReverted
        )
    }

    /// True when a send failure actually means the node already holds this
    /// transaction, so the submission can be treated as a success no-op.
    pub fn means_already_known(&self) -> bool {
        matches!(self, ErrorReason::KnownTransaction | ErrorReason::NonceTooLow)
    }
}

/// Error returned by every connector operation.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct ConnectorError {
    pub reason: ErrorReason,
    pub message: String,
}

impl ConnectorError {
    pub fn new(reason: ErrorReason, message: impl Into<String>) -> Self {
        ConnectorError {
            reason,
            message: message.into(),
        }
    }

    /// Unclassified failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorReason::Unknown, message)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NextNonceRequest {
    pub signer: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NextNonceResponse {
    pub nonce: U256,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPrepareRequest {
    #[serde(flatten)]
    pub headers: TransactionHeaders,
    /// Encoded call data supplied by the requester, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployContractPrepareRequest {
    #[serde(flatten)]
    pub headers: TransactionHeaders,
    /// Compiled contract bytecode / artifact.
    pub contract: Value,
}

/// Shared response shape of both prepare operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPrepareResponse {
    pub gas: U256,
    pub transaction_data: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSendRequest {
    #[serde(flatten)]
    pub headers: TransactionHeaders,
    pub nonce: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<Value>,
    pub transaction_data: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSendResponse {
    pub transaction_hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPriceEstimateResponse {
    pub gas_price: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceiptRequest {
    pub transaction_hash: String,
}

/// The operations a blockchain connector must offer.
///
/// Implementations are expected to be cheap to clone behind an `Arc` and safe
/// to call concurrently.
#[async_trait]
pub trait BlockchainConnector: Send + Sync {
    /// Queries the node for the next nonce of a signing address.
    async fn next_nonce_for_signer(
        &self,
        req: NextNonceRequest,
    ) -> Result<NextNonceResponse, ConnectorError>;

    /// Validates and encodes an invocation, estimating gas if unset.
    async fn transaction_prepare(
        &self,
        req: TransactionPrepareRequest,
    ) -> Result<TransactionPrepareResponse, ConnectorError>;

    /// Validates and encodes a contract deployment.
    async fn deploy_contract_prepare(
        &self,
        req: DeployContractPrepareRequest,
    ) -> Result<TransactionPrepareResponse, ConnectorError>;

    /// Signs (via the connector's signer) and submits a transaction.
    async fn transaction_send(
        &self,
        req: TransactionSendRequest,
    ) -> Result<TransactionSendResponse, ConnectorError>;

    /// Asks the node for a current gas price suggestion.
    async fn gas_price_estimate(&self) -> Result<GasPriceEstimateResponse, ConnectorError>;

    /// Fetches the receipt for a transaction hash, if mined.
    async fn transaction_receipt(
        &self,
        req: TransactionReceiptRequest,
    ) -> Result<Option<ReceiptRecord>, ConnectorError>;

    /// Registers interest in new blocks. The block stream itself is consumed
    /// by the confirmations manager, not by this crate.
    async fn new_block_listener(&self) -> Result<(), ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ErrorReason::Unknown.is_retryable());
        assert!(ErrorReason::Underpriced.is_retryable());
        assert!(ErrorReason::NotFound.is_retryable());
        assert!(!ErrorReason::InvalidInputs.is_retryable());
        assert!(!ErrorReason::InsufficientFunds.is_retryable());
        assert!(!ErrorReason::TransactionReverted.is_retryable());
    }

    #[test]
    fn test_already_known_classification() {
        assert!(ErrorReason::KnownTransaction.means_already_known());
        assert!(ErrorReason::NonceTooLow.means_already_known());
        assert!(!ErrorReason::Underpriced.means_already_known());
    }

    #[test]
    fn test_error_reason_wire_form() {
        let v = serde_json::to_value(ErrorReason::KnownTransaction).unwrap();
        assert_eq!(v, "known_transaction");
        let v = serde_json::to_value(ErrorReason::NonceTooLow).unwrap();
        assert_eq!(v, "nonce_too_low");
    }

    #[test]
    fn test_connector_error_display() {
        let err = ConnectorError::new(ErrorReason::Underpriced, "gas price below floor");
        assert_eq!(err.to_string(), "gas price below floor");
        assert_eq!(err.reason, ErrorReason::Underpriced);
    }
}
