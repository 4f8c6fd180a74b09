use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::scan::ScanStatus;

/// Upper bound for `overall_progress`.
pub const MAX_PROGRESS: u8 = 100;

/// Severity recorded on a progress log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LogLevel {
    Error,
    #[cfg_attr(feature = "serde", serde(alias = "warning"))]
    Warn,
    #[default]
    Info,
    Debug,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressLogEntry {
    pub timestamp: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub level: LogLevel,
    pub message: String,
}

impl ProgressLogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.into(),
        }
    }
}

/// Durable, externally readable progress document for one scan.
///
/// Pollers read this independently of the orchestrator, so it is always
/// written whole. `steps` belongs to the scanner backends and is carried
/// through untouched.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ProgressRecord {
    pub scan_id: String,
    pub status: ScanStatus,
    #[cfg_attr(feature = "serde", serde(default))]
    pub steps: Vec<Value>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub overall_progress: u8,
    #[cfg_attr(feature = "serde", serde(default))]
    pub logs: Vec<ProgressLogEntry>,
}

impl ProgressRecord {
    /// Fresh record used the first time a scan reports progress.
    pub fn new(scan_id: impl Into<String>) -> Self {
        Self {
            scan_id: scan_id.into(),
            status: ScanStatus::Running,
            steps: Vec::new(),
            overall_progress: 0,
            logs: Vec::new(),
        }
    }

    /// Appends a log line and applies the optional status/progress
    /// overrides. Progress above [`MAX_PROGRESS`] is clamped.
    pub fn apply(
        &mut self,
        status: Option<ScanStatus>,
        message: impl Into<String>,
        progress: Option<u8>,
    ) {
        self.logs.push(ProgressLogEntry::info(message));
        if let Some(status) = status {
            self.status = status;
        }
        if let Some(progress) = progress {
            self.overall_progress = progress.min(MAX_PROGRESS);
        }
    }

    pub fn last_log(&self) -> Option<&ProgressLogEntry> {
        self.logs.last()
    }
}

/// Notifications published on the updates channel.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(
        tag = "type",
        rename_all = "snake_case",
        rename_all_fields = "camelCase"
    )
)]
pub enum ScanUpdate {
    ProgressUpdate {
        scan_id: String,
        data: ProgressRecord,
    },
}

impl ScanUpdate {
    pub fn progress(record: &ProgressRecord) -> Self {
        ScanUpdate::ProgressUpdate {
            scan_id: record.scan_id.clone(),
            data: record.clone(),
        }
    }
}
