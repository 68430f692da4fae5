//! Core engine — turns remote trade actions into exchange transactions.
//!
//! The orchestrator breaks an action into limit orders (with deposit-asset
//! conversion legs where requested); the executor drives each resulting
//! transaction to a terminal state, persisting every observation.

pub mod executor;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod mock;

pub use executor::{ExecutorConfig, TransactionExecutor};
pub use orchestrator::{ActionOrchestrator, OrchestratorConfig};
