use chrono::Utc;
use idanss_model::ScanStatusUpdate;
use tracing::{debug, info, warn};

use super::registry::{ScanRegistry, StatusTransition};
use crate::progress::ProgressTracker;

/// Applies backend status reports to the registry and the progress record.
#[derive(Clone, Debug)]
pub struct StatusCollector {
    registry: ScanRegistry,
    progress: ProgressTracker,
}

impl StatusCollector {
    pub fn new(registry: ScanRegistry, progress: ProgressTracker) -> Self {
        Self { registry, progress }
    }

    /// Returns `None` when the update carried no scan id and was dropped.
    ///
    /// The progress record is written whether or not this process tracks the
    /// scan; pollers depend on it across restarts.
    pub async fn handle_scan_status(
        &self,
        update: ScanStatusUpdate,
    ) -> Option<StatusTransition> {
        let Some(scan_id) = update.scan_id().map(str::to_owned) else {
            warn!(target: "scan::status", message = %update.message, "status update without scanId dropped");
            return None;
        };

        let transition = self
            .registry
            .apply_status(&scan_id, update.status, Utc::now())
            .await;

        match &transition {
            StatusTransition::Finished(entry) => info!(
                target: "scan::status",
                %scan_id,
                status = %entry.status,
                "scan finished"
            ),
            StatusTransition::Untracked => debug!(
                target: "scan::status",
                %scan_id,
                "status for scan not tracked by this instance"
            ),
            StatusTransition::Updated(_) | StatusTransition::Unchanged => {}
        }

        self.progress
            .update_scan_progress(&scan_id, update.status, &update.message, update.progress)
            .await;

        Some(transition)
    }
}
