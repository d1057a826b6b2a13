//! Adapter implementations bridging the handler to its collaborators.

pub mod event_dispatch;

pub use event_dispatch::{EventDispatchAdapter, TransactionUpdateSubscriber};
