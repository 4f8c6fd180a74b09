use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use idanss_model::{ScanStatus, ScanSubmission};
use serde_json::Value;
use tokio::sync::Mutex;

use super::config::DuplicateScanPolicy;

/// In-memory record of a scan this process is currently tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveScanEntry {
    pub scan_id: String,
    /// Normalized (uppercase) type as requested, even if unsupported.
    pub scan_type: String,
    pub target: String,
    pub parameters: Option<Value>,
    pub start_time: DateTime<Utc>,
    pub status: ScanStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActiveScanEntry {
    /// Entry for a freshly accepted request, in `initializing`.
    pub fn from_submission(submission: &ScanSubmission, now: DateTime<Utc>) -> Self {
        Self {
            scan_id: submission.scan_id.clone(),
            scan_type: submission.scan_type.clone(),
            target: submission.target.clone(),
            parameters: submission.parameters.clone(),
            start_time: now,
            status: ScanStatus::Initializing,
            completed_at: None,
        }
    }

    /// Whether the entry has been active for longer than `timeout` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return false;
        };
        now.signed_duration_since(self.start_time) >= timeout
    }
}

/// Result of [`ScanRegistry::register`].
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Registered,
    /// An entry already existed and was overwritten; holds the old one.
    Replaced(ActiveScanEntry),
    /// An entry already existed and was kept; holds the existing one.
    AlreadyActive(ActiveScanEntry),
}

/// Result of [`ScanRegistry::apply_status`].
#[derive(Debug, Clone, PartialEq)]
pub enum StatusTransition {
    /// No entry for this id in this process.
    Untracked,
    /// Entry exists but the update carried no status.
    Unchanged,
    Updated(ActiveScanEntry),
    /// Terminal status reached; the entry was removed and is returned with
    /// `completed_at` set.
    Finished(ActiveScanEntry),
}

/// Set of scans that have been accepted and not yet finished.
///
/// Cheap to clone; clones share the same map.
#[derive(Clone, Default, Debug)]
pub struct ScanRegistry {
    inner: Arc<Mutex<HashMap<String, ActiveScanEntry>>>,
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        entry: ActiveScanEntry,
        policy: DuplicateScanPolicy,
    ) -> Registration {
        let mut guard = self.inner.lock().await;
        if policy == DuplicateScanPolicy::Ignore
            && let Some(existing) = guard.get(&entry.scan_id)
        {
            return Registration::AlreadyActive(existing.clone());
        }

        match guard.insert(entry.scan_id.clone(), entry) {
            Some(previous) => Registration::Replaced(previous),
            None => Registration::Registered,
        }
    }

    pub async fn get(&self, scan_id: &str) -> Option<ActiveScanEntry> {
        let guard = self.inner.lock().await;
        guard.get(scan_id).cloned()
    }

    /// Sets the status of a tracked scan. Unknown ids are ignored.
    pub async fn update_status(
        &self,
        scan_id: &str,
        status: ScanStatus,
        completed_at: Option<DateTime<Utc>>,
    ) {
        let mut guard = self.inner.lock().await;
        if let Some(entry) = guard.get_mut(scan_id) {
            entry.status = status;
            if completed_at.is_some() {
                entry.completed_at = completed_at;
            }
        }
    }

    /// Applies a backend-reported status and drops the entry once it is
    /// terminal, all under one lock acquisition.
    pub async fn apply_status(
        &self,
        scan_id: &str,
        status: Option<ScanStatus>,
        now: DateTime<Utc>,
    ) -> StatusTransition {
        let mut guard = self.inner.lock().await;
        let Some(entry) = guard.get_mut(scan_id) else {
            return StatusTransition::Untracked;
        };
        let Some(status) = status else {
            return StatusTransition::Unchanged;
        };

        entry.status = status;
        if !status.is_terminal() {
            return StatusTransition::Updated(entry.clone());
        }

        entry.completed_at = Some(now);
        guard
            .remove(scan_id)
            .map_or(StatusTransition::Untracked, StatusTransition::Finished)
    }

    pub async fn remove(&self, scan_id: &str) -> Option<ActiveScanEntry> {
        let mut guard = self.inner.lock().await;
        guard.remove(scan_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<ActiveScanEntry> {
        let guard = self.inner.lock().await;
        guard.values().cloned().collect()
    }

    /// Removes `scan_id` only if it is still the run that started at
    /// `start_time`. A scan that finished or was re-registered since is left
    /// alone and `None` is returned.
    pub async fn remove_if_started(
        &self,
        scan_id: &str,
        start_time: DateTime<Utc>,
    ) -> Option<ActiveScanEntry> {
        let mut guard = self.inner.lock().await;
        if guard.get(scan_id)?.start_time != start_time {
            return None;
        }
        guard.remove(scan_id)
    }

    /// Scans started more than `timeout` before `now`.
    pub async fn expired(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<ActiveScanEntry> {
        let guard = self.inner.lock().await;
        guard
            .values()
            .filter(|entry| entry.is_expired(now, timeout))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use idanss_model::ScanRequest;

    use super::*;

    fn entry(id: &str, started: DateTime<Utc>) -> ActiveScanEntry {
        let submission = ScanRequest::new(id, "dast", "https://example.com")
            .into_submission()
            .unwrap();
        ActiveScanEntry::from_submission(&submission, started)
    }

    #[tokio::test]
    async fn duplicate_policy_controls_registration() {
        let registry = ScanRegistry::new();
        let now = Utc::now();

        assert_eq!(
            registry.register(entry("s1", now), DuplicateScanPolicy::Ignore).await,
            Registration::Registered
        );
        registry.update_status("s1", ScanStatus::Queued, None).await;

        let outcome = registry
            .register(entry("s1", now), DuplicateScanPolicy::Ignore)
            .await;
        assert!(matches!(outcome, Registration::AlreadyActive(e) if e.status == ScanStatus::Queued));

        let outcome = registry
            .register(entry("s1", now), DuplicateScanPolicy::Replace)
            .await;
        assert!(matches!(outcome, Registration::Replaced(e) if e.status == ScanStatus::Queued));
        assert_eq!(
            registry.get("s1").await.map(|e| e.status),
            Some(ScanStatus::Initializing)
        );
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn terminal_status_removes_entry() {
        let registry = ScanRegistry::new();
        let now = Utc::now();
        registry.register(entry("s1", now), DuplicateScanPolicy::Ignore).await;

        let running = registry.apply_status("s1", Some(ScanStatus::Running), now).await;
        assert!(matches!(running, StatusTransition::Updated(_)));

        let unchanged = registry.apply_status("s1", None, now).await;
        assert_eq!(unchanged, StatusTransition::Unchanged);

        let StatusTransition::Finished(done) =
            registry.apply_status("s1", Some(ScanStatus::Completed), now).await
        else {
            panic!("expected finished transition");
        };
        assert_eq!(done.completed_at, Some(now));
        assert!(registry.is_empty().await);

        let again = registry.apply_status("s1", Some(ScanStatus::Completed), now).await;
        assert_eq!(again, StatusTransition::Untracked);
    }

    #[tokio::test]
    async fn update_status_on_unknown_id_is_noop() {
        let registry = ScanRegistry::new();
        registry
            .update_status("ghost", ScanStatus::Running, Some(Utc::now()))
            .await;
        assert!(registry.get("ghost").await.is_none());
    }

    #[tokio::test]
    async fn expired_lists_only_old_entries() {
        let registry = ScanRegistry::new();
        let now = Utc::now();
        registry
            .register(entry("old", now - chrono::Duration::hours(3)), DuplicateScanPolicy::Ignore)
            .await;
        registry.register(entry("fresh", now), DuplicateScanPolicy::Ignore).await;

        let expired = registry.expired(now, Duration::from_secs(7_200)).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].scan_id, "old");
        assert_eq!(registry.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn remove_if_started_skips_finished_and_replaced_runs() {
        let registry = ScanRegistry::new();
        let started = Utc::now() - chrono::Duration::hours(3);
        registry.register(entry("done", started), DuplicateScanPolicy::Ignore).await;
        registry.register(entry("again", started), DuplicateScanPolicy::Ignore).await;
        registry.register(entry("stale", started), DuplicateScanPolicy::Ignore).await;

        registry
            .apply_status("done", Some(ScanStatus::Completed), Utc::now())
            .await;
        registry
            .register(entry("again", Utc::now()), DuplicateScanPolicy::Replace)
            .await;

        assert!(registry.remove_if_started("done", started).await.is_none());
        assert!(registry.remove_if_started("again", started).await.is_none());
        assert!(registry.get("again").await.is_some());

        let removed = registry.remove_if_started("stale", started).await;
        assert_eq!(removed.map(|e| e.scan_id), Some("stale".to_string()));
        assert_eq!(registry.len().await, 1);
    }
}
