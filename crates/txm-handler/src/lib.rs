//! # Simple Transaction Handler
//!
//! The reconciliation core of the transaction manager. Accepts new
//! transaction requests, assigns per-signer monotonic nonces, and drives each
//! managed transaction through submission, resubmission, receipt tracking and
//! confirmation on a single-writer policy loop.
//!
//! ## Components
//!
//! - `domain/nonces.rs` - per-signer mutual exclusion and nonce issuance
//! - `domain/history.rs` - bounded sub-status / action timeline
//! - `domain/inflight.rs` - bounded working set under reconciliation
//! - `policyloop.rs` - the prepare → submit → track → confirm → flush engine
//! - `gasoracle.rs` - pluggable gas price sources
//! - `adapters/event_dispatch.rs` - confirmations manager / subscriber bridge
//!
//! ## Ownership model
//!
//! The in-flight set is owned by the policy loop task and never shared.
//! External mutation goes through the API request channel drained by the
//! loop; confirmation callbacks post updates onto a loop-owned inbox.
//! Wake-ups (`mark_inflight_stale` / `mark_inflight_update`) are capacity-one
//! channels with non-blocking sends, so concurrent signals coalesce.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod gasoracle;
pub mod handler;
pub mod policyloop;
pub mod ports;

pub use config::SimpleHandlerConfig;
pub use domain::errors::HandlerError;
pub use handler::SimpleTransactionHandler;
pub use policyloop::PolicyLoop;
