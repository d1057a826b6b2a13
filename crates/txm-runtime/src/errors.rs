//! Manager error types, carrying the stable startup error codes.

use thiserror::Error;

/// Errors surfaced by manager initialization and lifecycle.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// `persistence.type` names a backend this build does not support.
    #[error("FF21043: Unsupported persistence type '{0}'")]
    UnsupportedPersistenceType(String),

    /// The persistence backend failed to initialize (bad path, locked
    /// database, ...).
    #[error("FF21049: Failed to initialize persistence: {0}")]
    PersistenceInitFailed(String),

    /// `transactions.handler.name` is not registered.
    #[error("FF21070: Unknown transaction handler name '{0}'")]
    UnknownHandlerName(String),

    /// Configuration could not be read or parsed.
    #[error("invalid configuration: {0}")]
    BadConfig(String),

    #[error(transparent)]
    Handler(#[from] txm_handler::HandlerError),

    #[error(transparent)]
    Connector(#[from] txm_connector::ConnectorError),
}
