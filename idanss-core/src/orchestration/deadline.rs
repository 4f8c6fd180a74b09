use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{lanes::ScanLanes, registry::ScanRegistry, reporter::ErrorReporter};

/// Fails scans that have been active longer than the configured timeout.
///
/// Each expiry runs in the scan's lane, so a status report queued for the
/// same scan is applied either entirely before or entirely after it.
#[derive(Clone, Debug)]
pub struct DeadlineSweeper {
    registry: ScanRegistry,
    reporter: ErrorReporter,
    lanes: ScanLanes,
    timeout: Duration,
    interval: Duration,
}

impl DeadlineSweeper {
    pub fn new(
        registry: ScanRegistry,
        reporter: ErrorReporter,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            reporter,
            lanes: ScanLanes::default(),
            timeout,
            interval,
        }
    }

    /// Shares the lanes the status consumers run in.
    pub fn with_lanes(mut self, lanes: ScanLanes) -> Self {
        self.lanes = lanes;
        self
    }

    /// Times out every scan older than the timeout at `now` and returns the
    /// ids that were actually failed. Scans that finished while the sweep
    /// was running are skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired = self.registry.expired(now, self.timeout).await;
        let mut timed_out = Vec::with_capacity(expired.len());

        for candidate in expired {
            let scan_id = candidate.scan_id.clone();
            let registry = self.registry.clone();
            let reporter = self.reporter.clone();
            let timeout_secs = self.timeout.as_secs();

            let failed = self
                .lanes
                .run(&scan_id, async move {
                    let Some(entry) = registry
                        .remove_if_started(&candidate.scan_id, candidate.start_time)
                        .await
                    else {
                        debug!(target: "scan::deadline", scan_id = %candidate.scan_id, "scan finished before its deadline");
                        return false;
                    };
                    warn!(
                        target: "scan::deadline",
                        scan_id = %entry.scan_id,
                        timeout_secs,
                        "scan exceeded its deadline"
                    );
                    reporter.record_error(&entry.scan_id, "timed out").await;
                    true
                })
                .await;

            if failed == Some(true) {
                timed_out.push(scan_id);
            }
        }
        timed_out
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!(target: "scan::deadline", "Deadline sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let expired = self.sweep(Utc::now()).await;
                        if !expired.is_empty() {
                            debug!(target: "scan::deadline", count = expired.len(), "expired scans reported");
                        }
                    }
                }
            }
        })
    }
}
