use std::{fmt, sync::Arc};

use idanss_model::{ProgressRecord, ScanStatus, ScanUpdate};
use tracing::{debug, error, warn};

use super::{KeyedLocks, ProgressStore};
use crate::bus::{MessageBus, publish_json};

struct UpdateNotifier {
    bus: Arc<dyn MessageBus>,
    topic: String,
}

/// Serialized read-modify-write front end for a [`ProgressStore`].
///
/// Updates for the same scan run one at a time, so concurrent handlers
/// never drop each other's log lines. Store failures are logged and
/// swallowed; nothing upstream can act on them.
#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
    notifier: Option<Arc<UpdateNotifier>>,
    locks: Arc<KeyedLocks>,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("store", &self.store)
            .field(
                "updates_topic",
                &self.notifier.as_ref().map(|n| n.topic.as_str()),
            )
            .finish()
    }
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self {
            store,
            notifier: None,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Announce every successful write on `topic`.
    pub fn with_notifications(
        mut self,
        bus: Arc<dyn MessageBus>,
        topic: impl Into<String>,
    ) -> Self {
        self.notifier = Some(Arc::new(UpdateNotifier {
            bus,
            topic: topic.into(),
        }));
        self
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    /// Current record for `scan_id`, `None` if absent or unreadable.
    pub async fn get(&self, scan_id: &str) -> Option<ProgressRecord> {
        match self.store.get(scan_id).await {
            Ok(record) => record,
            Err(err) => {
                error!(target: "scan::progress", %scan_id, error = %err, "failed to read progress record");
                None
            }
        }
    }

    /// Appends `message` to the scan's log and applies the optional status
    /// and progress overrides, creating the record on first use.
    ///
    /// Returns the record as written, or `None` when the store failed.
    pub async fn update_scan_progress(
        &self,
        scan_id: &str,
        status: Option<ScanStatus>,
        message: &str,
        progress: Option<u8>,
    ) -> Option<ProgressRecord> {
        let _guard = self.locks.lock(scan_id).await;

        let mut record = match self.store.get(scan_id).await {
            Ok(Some(record)) => record,
            Ok(None) => ProgressRecord::new(scan_id),
            Err(err) => {
                // Overwriting an unreadable record would lose its history.
                error!(
                    target: "scan::progress",
                    %scan_id,
                    error = %err,
                    "failed to read progress record, update dropped"
                );
                return None;
            }
        };

        record.apply(status, message, progress);

        if let Err(err) = self.store.set(scan_id, &record).await {
            error!(target: "scan::progress", %scan_id, error = %err, "failed to write progress record");
            return None;
        }

        debug!(
            target: "scan::progress",
            %scan_id,
            status = %record.status,
            progress = record.overall_progress,
            "progress updated"
        );

        if let Some(notifier) = &self.notifier {
            let update = ScanUpdate::progress(&record);
            if let Err(err) = publish_json(notifier.bus.as_ref(), &notifier.topic, &update).await {
                warn!(
                    target: "scan::progress",
                    %scan_id,
                    error = %err,
                    "failed to publish progress notification"
                );
            }
        }

        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        bus::InProcMessageBus,
        error::{OrchestratorError, Result},
        progress::InMemoryProgressStore,
    };

    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait]
    impl ProgressStore for BrokenStore {
        async fn get(&self, _scan_id: &str) -> Result<Option<ProgressRecord>> {
            Err(OrchestratorError::Store("unavailable".into()))
        }

        async fn set(&self, _scan_id: &str, _record: &ProgressRecord) -> Result<()> {
            Err(OrchestratorError::Store("unavailable".into()))
        }
    }

    #[tokio::test]
    async fn first_update_creates_running_record() {
        let tracker = ProgressTracker::new(Arc::new(InMemoryProgressStore::new()));
        let record = tracker
            .update_scan_progress("s1", None, "hello", None)
            .await
            .unwrap();

        assert_eq!(record.status, ScanStatus::Running);
        assert_eq!(record.overall_progress, 0);
        assert_eq!(record.logs.len(), 1);
        assert_eq!(tracker.get("s1").await, Some(record));
    }

    #[tokio::test]
    async fn concurrent_updates_keep_every_log_line() {
        let tracker = ProgressTracker::new(Arc::new(InMemoryProgressStore::new()));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    tracker
                        .update_scan_progress("s1", None, &format!("line {i}"), None)
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(tracker.get("s1").await.unwrap().logs.len(), 32);
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let tracker = ProgressTracker::new(Arc::new(BrokenStore));
        let written = tracker
            .update_scan_progress("s1", Some(ScanStatus::Queued), "x", Some(10))
            .await;
        assert!(written.is_none());
        assert!(tracker.get("s1").await.is_none());
    }

    #[tokio::test]
    async fn writes_are_announced_when_enabled() {
        let bus = Arc::new(InProcMessageBus::default());
        bus.connect().await.unwrap();
        let tracker = ProgressTracker::new(Arc::new(InMemoryProgressStore::new()))
            .with_notifications(bus.clone(), "scan:updates");

        tracker
            .update_scan_progress("s1", Some(ScanStatus::Queued), "queued", Some(10))
            .await
            .unwrap();

        let published = bus.published("scan:updates").await;
        assert_eq!(published.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&published[0]).unwrap();
        assert_eq!(value["type"], "progress_update");
        assert_eq!(value["data"]["status"], "queued");
        assert_eq!(value["data"]["overallProgress"], 10);
    }
}
