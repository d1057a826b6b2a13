//! # Transaction Manager Runtime
//!
//! Wires a transaction handler to its collaborators and owns the process
//! lifecycle. A connector-specific distribution embeds this crate: it
//! supplies the [`txm_connector::BlockchainConnector`] implementation and a
//! confirmations manager, and this crate does the rest: configuration (with
//! deprecated-key aliasing), persistence selection, handler registry, event
//! dispatch wiring, startup and graceful shutdown.
//!
//! ```text
//! connector + confirmations ──► Manager::new(config, ...) ──► start()
//!                                      │
//!                                      ├── persistence factory (rocksdb | memory)
//!                                      ├── handler registry ("simple")
//!                                      └── event dispatch adapter
//! ```

pub mod config;
pub mod errors;
pub mod manager;
pub mod registry;

pub use config::Config;
pub use errors::ManagerError;
pub use manager::Manager;
pub use registry::{HandlerRegistry, SimpleHandlerFactory, TransactionHandlerFactory};

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs the process-wide log subscriber. Call once, early.
pub fn init_logging(level: Level) -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
