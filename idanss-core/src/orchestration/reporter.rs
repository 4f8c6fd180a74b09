use idanss_model::ScanStatus;
use tracing::error;

use super::registry::ScanRegistry;
use crate::progress::ProgressTracker;

/// Marks a scan as failed: the progress record goes to `error` at 0% and
/// the registry forgets the scan.
#[derive(Clone, Debug)]
pub struct ErrorReporter {
    registry: ScanRegistry,
    progress: ProgressTracker,
}

impl ErrorReporter {
    pub fn new(registry: ScanRegistry, progress: ProgressTracker) -> Self {
        Self { registry, progress }
    }

    /// Without a scan id there is no record to attach the failure to, so it
    /// is only logged.
    pub async fn report_error(&self, scan_id: Option<&str>, message: &str) {
        let Some(scan_id) = scan_id else {
            error!(target: "scan::error", error = %message, "scan failed before it could be identified");
            return;
        };

        self.record_error(scan_id, message).await;
        self.registry.remove(scan_id).await;
    }

    /// Writes the failure to the progress record without touching the
    /// registry. For callers that already removed the entry themselves.
    pub async fn record_error(&self, scan_id: &str, message: &str) {
        error!(target: "scan::error", %scan_id, error = %message, "scan failed");

        self.progress
            .update_scan_progress(scan_id, Some(ScanStatus::Error), message, Some(0))
            .await;
    }
}
