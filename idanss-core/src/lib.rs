//! Core library for the IDANSS scan orchestrator.
//!
//! The orchestrator sits between the API that accepts scan requests and the
//! scanner backends that execute them:
//!
//! - [`bus`] wraps the pub/sub transport (Redis channels or an in-process
//!   broadcast bus).
//! - [`progress`] persists the per-scan progress record pollers read.
//! - [`orchestration`] holds the scan registry, the request dispatcher, the
//!   status collector and the runtime that wires them to the bus.

pub mod bus;
pub mod error;
pub mod orchestration;
pub mod progress;

pub use error::{OrchestratorError, Result};

pub use bus::{BusMessage, Delivery, InProcMessageBus, MessageBus, Subscription};
#[cfg(feature = "redis")]
pub use bus::redis::RedisMessageBus;
pub use orchestration::{
    collector::StatusCollector,
    config::{DuplicateScanPolicy, OrchestratorConfig},
    deadline::DeadlineSweeper,
    dispatcher::{DispatchOutcome, ScanDispatcher},
    lanes::ScanLanes,
    registry::{ActiveScanEntry, Registration, ScanRegistry, StatusTransition},
    reporter::ErrorReporter,
    runtime::{OrchestratorRuntime, OrchestratorRuntimeBuilder},
};
pub use progress::{InMemoryProgressStore, ProgressStore, ProgressTracker};
#[cfg(feature = "redis")]
pub use progress::redis::RedisProgressStore;
