//! Core domain entities for the transaction manager.
//!
//! The central record is [`ManagedTransaction`]: the durable state of one
//! user request as it moves through nonce assignment, submission,
//! resubmission, receipt and confirmation. Everything here serializes to
//! camelCase JSON, which is the shape written to persistence and returned to
//! API callers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ids::SequenceId;
use crate::U256;

/// Top-level status of a managed transaction.
///
/// `Pending` may move to any of the other three; `Suspended` may return to
/// `Pending`; `Succeeded` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TxStatus {
    /// Under active management by the policy loop.
    #[default]
    Pending,
    /// Confirmed on chain with a successful receipt.
    Succeeded,
    /// Confirmed on chain with a reverted receipt, or failed fatally before
    /// submission.
    Failed,
    /// Parked by an operator; not processed until resumed.
    Suspended,
}

impl TxStatus {
    /// Returns true once the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Succeeded | TxStatus::Failed)
    }
}

/// Finer-grained lifecycle label recorded in the transaction history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxSubStatus {
    /// Accepted and persisted, not yet submitted.
    Received,
    /// Submitted and being tracked for a receipt / confirmations.
    Tracking,
    /// No receipt within the resubmit interval; being re-sent.
    Stale,
    /// The confirmations manager reported the required block depth.
    Confirmed,
    /// A fatal error ended processing.
    Failed,
}

/// An action the policy loop performed (or attempted) on a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxAction {
    /// A nonce was allocated for the signing address.
    AssignNonce,
    /// A gas price was retrieved from the configured oracle.
    RetrieveGasPrice,
    /// The transaction was sent (or re-sent) to the connector.
    SubmitTransaction,
    /// A receipt was received for the tracked transaction hash.
    ReceiveReceipt,
    /// The transaction went stale waiting for a receipt.
    Timeout,
    /// The required number of confirmations was reached.
    Confirm,
    /// Deletion was requested by an API caller.
    Cancel,
}

/// One action row within a history entry.
///
/// Repeats of the same action within the same sub-status entry increment
/// `count` rather than appending a new row.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryAction {
    pub action: TxAction,
    pub count: u32,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_info: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<DateTime<Utc>>,
}

/// One sub-status period in the bounded history list.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub status: TxSubStatus,
    pub time: DateTime<Utc>,
    pub actions: Vec<HistoryAction>,
}

/// Cumulative counter in the unbounded history summary.
///
/// Each entry records either a unique sub-status, or a unique
/// `(status, action)` pair, with first/last occurrence and a total count.
/// Unlike `history`, the summary is never evicted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummaryEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TxSubStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<TxAction>,
    pub count: u32,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
}

/// Blockchain header fields supplied by the requester.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHeaders {
    /// Signing address.
    pub from: String,
    /// Target address; `None` for contract deployment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
}

/// Receipt observed for a submitted transaction hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRecord {
    pub block_number: U256,
    pub transaction_index: U256,
    pub block_hash: String,
    /// Protocol-specific id, e.g. `000000012345/000010`.
    pub protocol_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_location: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<Value>,
    /// When this receipt was observed by the manager. Drives the
    /// stale-receipt recheck.
    pub received: DateTime<Utc>,
}

/// Summary of one confirming block.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub block_number: u64,
    pub block_hash: String,
    pub parent_hash: String,
}

/// The durable record of a user's transaction request and its lifecycle.
///
/// Owned exclusively by the policy loop while in flight; all other readers
/// obtain a snapshot via the API request channel or read from persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedTransaction {
    /// Globally unique id, namespaced: `<ns>/<uuid>`.
    pub id: String,
    /// Time-ordered identifier used for pagination of the pending scan.
    #[serde(rename = "sequenceID")]
    pub sequence_id: SequenceId,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub status: TxStatus,
    #[serde(flatten)]
    pub headers: TransactionHeaders,
    /// Nonce, unique and contiguous within the signing address.
    pub nonce: U256,
    /// Opaque gas price block passed through to the connector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<Value>,
    /// Encoded call/deployment data from the prepare step.
    pub transaction_data: String,
    /// Hash of the most recent submission; changes across resubmissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_submit: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_submit: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<ReceiptRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confirmations: Vec<BlockInfo>,
    /// Set when an API caller requested deletion, so the request survives a
    /// restart while the record is in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_requested: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history_summary: Vec<HistorySummaryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Opaque JSON owned by the policy implementation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_info: Option<Value>,
}

impl ManagedTransaction {
    /// Creates a fresh pending record for a prepared request.
    pub fn new_pending(
        id: String,
        headers: TransactionHeaders,
        nonce: U256,
        gas: Option<U256>,
        transaction_data: String,
    ) -> Self {
        let now = Utc::now();
        let mut headers = headers;
        if headers.gas.is_none() {
            headers.gas = gas;
        }
        ManagedTransaction {
            id,
            sequence_id: SequenceId::new(),
            created: now,
            updated: now,
            status: TxStatus::Pending,
            headers,
            nonce,
            gas_price: None,
            transaction_data,
            transaction_hash: None,
            first_submit: None,
            last_submit: None,
            receipt: None,
            confirmations: Vec::new(),
            delete_requested: None,
            history: Vec::new(),
            history_summary: Vec::new(),
            error_message: None,
            policy_info: None,
        }
    }

    /// The signing address for this transaction.
    pub fn signer(&self) -> &str {
        &self.headers.from
    }
}

/// Specification of an event stream (persistence contract only).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStream {
    pub id: Uuid,
    pub name: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub suspended: bool,
}

/// Specification of a listener attached to an event stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub id: Uuid,
    #[serde(rename = "streamID")]
    pub stream_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_block: Option<String>,
}

/// Checkpoint of delivery progress for one event stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStreamCheckpoint {
    #[serde(rename = "streamID")]
    pub stream_id: Uuid,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub listeners: HashMap<Uuid, Value>,
}
