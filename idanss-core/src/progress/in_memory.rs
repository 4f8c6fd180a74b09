use async_trait::async_trait;
use dashmap::DashMap;
use idanss_model::ProgressRecord;

use super::ProgressStore;
use crate::error::Result;

/// Process-local store for tests and single-node runs without Redis.
#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    records: DashMap<String, ProgressRecord>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn get(&self, scan_id: &str) -> Result<Option<ProgressRecord>> {
        Ok(self.records.get(scan_id).map(|record| record.clone()))
    }

    async fn set(&self, scan_id: &str, record: &ProgressRecord) -> Result<()> {
        self.records.insert(scan_id.to_string(), record.clone());
        Ok(())
    }
}
