//! Durable per-scan progress records and the serialized writer in front of
//! them.

mod in_memory;
mod locks;
#[cfg(feature = "redis")]
pub mod redis;
mod tracker;

pub use in_memory::InMemoryProgressStore;
pub use locks::{KeyedGuard, KeyedLocks};
pub use tracker::ProgressTracker;

use std::fmt;

use async_trait::async_trait;
use idanss_model::ProgressRecord;

use crate::error::Result;

/// Whole-record key/value storage for [`ProgressRecord`]s.
///
/// Implementations offer no partial or atomic merge; callers read, modify
/// and write the full document.
#[async_trait]
pub trait ProgressStore: Send + Sync + fmt::Debug {
    async fn get(&self, scan_id: &str) -> Result<Option<ProgressRecord>>;

    async fn set(&self, scan_id: &str, record: &ProgressRecord) -> Result<()>;
}
