//! Process-level wiring: subscriptions, the bounded handler pool, the
//! deadline sweeper and graceful shutdown.

mod supervisor;

pub use supervisor::{OrchestratorRuntime, OrchestratorRuntimeBuilder};
