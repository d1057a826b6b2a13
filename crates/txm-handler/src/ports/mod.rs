//! Inbound (driving) and outbound (driven) ports of the handler.

pub mod inbound;
pub mod outbound;

pub use inbound::{
    ApiRequestType, ContractDeployRequest, TransactionHandler, TransactionRequest,
};
pub use outbound::{
    ConfirmationsManager, InflightUpdate, ManagedTxEventHandler, Notification, NotificationType,
    NotifyError, TrackedTransaction, TransactionStatusSink,
};
