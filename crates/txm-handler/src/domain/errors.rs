//! Handler error types.
//!
//! The stable `FF21xxx` codes are part of the error message so callers can
//! match on them across releases.

use thiserror::Error;

use txm_connector::ConnectorError;
use txm_persistence::PersistenceError;

/// Errors surfaced by the transaction handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The addressed transaction does not exist.
    #[error("FF21067: Transaction {0} not found")]
    TransactionNotFound(String),

    /// The caller's context ended before the policy loop answered.
    #[error("FF21072: API request cancelled or timed out")]
    ApiRequestCancelled,

    /// The API request carried a type this handler does not implement.
    #[error("FF21073: Unknown API request type {0}")]
    UnknownRequestType(u32),

    /// The policy loop for this handler was already taken.
    #[error("policy loop already started")]
    AlreadyStarted,

    /// Persistence failure.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Connector failure (preparation, nonce query, submission).
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_codes_in_messages() {
        assert!(HandlerError::TransactionNotFound("ns1/abc".to_string())
            .to_string()
            .starts_with("FF21067"));
        assert!(HandlerError::ApiRequestCancelled
            .to_string()
            .starts_with("FF21072"));
        assert!(HandlerError::UnknownRequestType(999)
            .to_string()
            .starts_with("FF21073"));
    }
}
