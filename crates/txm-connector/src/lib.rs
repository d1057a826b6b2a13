//! # Blockchain Connector Contract
//!
//! The transaction manager never talks to a chain directly; it drives a
//! connector through the [`BlockchainConnector`] trait defined here. Every
//! operation can fail with a [`ConnectorError`] carrying an [`ErrorReason`]
//! that classifies the failure for the retry policy of the policy loop.
//!
//! A programmable [`mock::MockConnector`] lives in this crate so that the
//! handler and runtime crates can drive their tests through the same port.

pub mod api;
pub mod mock;

pub use api::*;
