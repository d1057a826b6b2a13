//! Handler domain logic.

pub mod errors;
pub mod history;
pub mod inflight;
pub mod nonces;

pub use errors::HandlerError;
pub use history::TxHistoryManager;
pub use inflight::{InflightSet, PendingState};
pub use nonces::{LockedNonce, NonceAllocator};
