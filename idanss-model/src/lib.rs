//! Data model definitions shared across IDANSS crates.
//!
//! Everything that crosses the message bus or lands in the progress store is
//! described here: inbound scan requests, backend status updates, the
//! persisted progress record and the channel/key naming scheme.
#![allow(missing_docs)]

pub mod error;
pub mod keys;
pub mod progress;
pub mod scan;

pub use error::{ModelError, Result};
pub use keys::ScanKeys;
pub use progress::{LogLevel, ProgressLogEntry, ProgressRecord, ScanUpdate};
pub use scan::{
    ScanRequest, ScanRequestMessage, ScanStatus, ScanStatusUpdate,
    ScanSubmission, ScanType,
};
