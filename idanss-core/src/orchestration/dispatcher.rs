use std::{fmt, sync::Arc};

use chrono::Utc;
use idanss_model::{ScanKeys, ScanRequestMessage, ScanStatus, ScanSubmission, ScanType};
use tracing::{debug, info, warn};

use super::{
    config::DuplicateScanPolicy,
    registry::{ActiveScanEntry, Registration, ScanRegistry},
    reporter::ErrorReporter,
};
use crate::{
    bus::{Delivery, MessageBus},
    progress::ProgressTracker,
};

/// What happened to one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a `start_scan` message.
    Ignored,
    /// Id already active and the policy says to keep the existing entry.
    Duplicate,
    /// Validation, type resolution or forwarding failed; reported as an
    /// error on the scan's progress record where possible.
    Rejected { reason: String },
    /// Republished to the backend channel `topic`.
    Forwarded { topic: String },
}

/// Validates `start_scan` requests, registers them and routes them to the
/// backend for their scan type.
#[derive(Clone)]
pub struct ScanDispatcher {
    bus: Arc<dyn MessageBus>,
    registry: ScanRegistry,
    progress: ProgressTracker,
    reporter: ErrorReporter,
    keys: ScanKeys,
    duplicate_policy: DuplicateScanPolicy,
}

impl fmt::Debug for ScanDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanDispatcher")
            .field("bus", &self.bus)
            .field("prefix", &self.keys.prefix())
            .field("duplicate_policy", &self.duplicate_policy)
            .finish()
    }
}

impl ScanDispatcher {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: ScanRegistry,
        progress: ProgressTracker,
        keys: ScanKeys,
    ) -> Self {
        let reporter = ErrorReporter::new(registry.clone(), progress.clone());
        Self {
            bus,
            registry,
            progress,
            reporter,
            keys,
            duplicate_policy: DuplicateScanPolicy::default(),
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicateScanPolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub async fn handle_scan_request(
        &self,
        delivery: Delivery<ScanRequestMessage>,
    ) -> DispatchOutcome {
        let request = match delivery.payload {
            ScanRequestMessage::StartScan(request) => request,
            ScanRequestMessage::Unsupported => {
                warn!(target: "scan::dispatch", topic = %delivery.topic, "ignoring request with unsupported action");
                return DispatchOutcome::Ignored;
            }
        };

        let scan_id = request.scan_id().map(str::to_owned);
        let submission = match request.into_submission() {
            Ok(submission) => submission,
            Err(err) => {
                debug!(target: "scan::dispatch", error = %err, "request failed validation");
                self.reporter
                    .report_error(scan_id.as_deref(), "missing scan data")
                    .await;
                return DispatchOutcome::Rejected {
                    reason: err.to_string(),
                };
            }
        };

        let entry = ActiveScanEntry::from_submission(&submission, Utc::now());
        match self.registry.register(entry, self.duplicate_policy).await {
            Registration::Registered => {}
            Registration::Replaced(previous) => {
                warn!(
                    target: "scan::dispatch",
                    scan_id = %submission.scan_id,
                    previous_status = %previous.status,
                    "scan id already active, replacing entry"
                );
            }
            Registration::AlreadyActive(existing) => {
                warn!(
                    target: "scan::dispatch",
                    scan_id = %submission.scan_id,
                    status = %existing.status,
                    "scan id already active, dropping duplicate request"
                );
                return DispatchOutcome::Duplicate;
            }
        }

        info!(
            target: "scan::dispatch",
            scan_id = %submission.scan_id,
            scan_type = %submission.scan_type,
            target_url = %submission.target,
            "starting scan"
        );

        self.progress
            .update_scan_progress(
                &submission.scan_id,
                Some(ScanStatus::Initializing),
                &format!("initializing {} scan", submission.scan_type),
                Some(5),
            )
            .await;

        match submission.resolve_type() {
            Ok(scan_type) => self.forward_to_scanner(&submission, scan_type, &delivery.raw).await,
            Err(err) => {
                let reason = err.to_string();
                self.reporter
                    .report_error(Some(&submission.scan_id), &reason)
                    .await;
                DispatchOutcome::Rejected { reason }
            }
        }
    }

    /// Marks the scan queued and republishes the original request bytes on
    /// the backend channel for `scan_type`.
    pub async fn forward_to_scanner(
        &self,
        submission: &ScanSubmission,
        scan_type: ScanType,
        raw: &str,
    ) -> DispatchOutcome {
        let scan_id = submission.scan_id.as_str();
        let topic = self.keys.scanner(scan_type);

        self.registry
            .update_status(scan_id, ScanStatus::Queued, None)
            .await;
        self.progress
            .update_scan_progress(
                scan_id,
                Some(ScanStatus::Queued),
                &format!("forwarding scan to {} scanner", scan_type.topic_suffix()),
                Some(10),
            )
            .await;

        if let Err(err) = self.bus.publish(&topic, raw).await {
            warn!(target: "scan::dispatch", %scan_id, %topic, error = %err, "forward publish failed");
            let reason = format!("failed to forward scan to {} scanner", scan_type.topic_suffix());
            self.reporter.report_error(Some(scan_id), &reason).await;
            return DispatchOutcome::Rejected { reason };
        }

        info!(target: "scan::dispatch", %scan_id, %topic, "scan forwarded");
        DispatchOutcome::Forwarded { topic }
    }
}
