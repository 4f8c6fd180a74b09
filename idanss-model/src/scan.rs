use std::{fmt, str::FromStr};

use serde_json::Value;

use crate::error::{ModelError, Result};

/// Scanner family a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum ScanType {
    Sast,
    Dast,
    Api,
}

impl ScanType {
    pub const ALL: [ScanType; 3] = [ScanType::Sast, ScanType::Dast, ScanType::Api];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Sast => "SAST",
            ScanType::Dast => "DAST",
            ScanType::Api => "API",
        }
    }

    /// Lowercase name used for backend channel suffixes.
    pub fn topic_suffix(&self) -> &'static str {
        match self {
            ScanType::Sast => "sast",
            ScanType::Dast => "dast",
            ScanType::Api => "api",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAST" => Ok(ScanType::Sast),
            "DAST" => Ok(ScanType::Dast),
            "API" => Ok(ScanType::Api),
            _ => Err(ModelError::UnsupportedScanType(s.to_string())),
        }
    }
}

/// Life-cycle state of a scan as seen by the orchestrator and its pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScanStatus {
    Initializing,
    Queued,
    Running,
    Completed,
    #[cfg_attr(feature = "serde", serde(alias = "failed"))]
    Error,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Initializing => "initializing",
            ScanStatus::Queued => "queued",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Error => "error",
        }
    }

    /// `completed` and `error` end a scan; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Error)
    }

    /// Parses a status that may legitimately be blank on the wire.
    pub fn parse_optional(raw: &str) -> Result<Option<Self>> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "initializing" => Ok(ScanStatus::Initializing),
            "queued" => Ok(ScanStatus::Queued),
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            // scanner backends report failures as `failed`
            "error" | "failed" => Ok(ScanStatus::Error),
            _ => Err(ModelError::UnknownStatus(s.to_string())),
        }
    }
}

/// Closed set of messages accepted on the request channel.
///
/// The `action` field selects the variant; anything other than
/// `start_scan` decodes to [`ScanRequestMessage::Unsupported`] so it can be
/// logged and ignored instead of failing the decode.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "action", rename_all = "snake_case")
)]
pub enum ScanRequestMessage {
    StartScan(ScanRequest),
    #[cfg_attr(feature = "serde", serde(other))]
    Unsupported,
}

/// Body of a `start_scan` request. Fields stay optional at the wire level so
/// validation can still attribute a failure to the scan id when one exists.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct ScanRequest {
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub scan_id: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub scan_type: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub target: Option<String>,
    /// Scanner-specific configuration, never inspected here.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub parameters: Option<Value>,
}

impl ScanRequest {
    pub fn new(
        scan_id: impl Into<String>,
        scan_type: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            scan_id: Some(scan_id.into()),
            scan_type: Some(scan_type.into()),
            target: Some(target.into()),
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Scan id if present and not blank.
    pub fn scan_id(&self) -> Option<&str> {
        non_blank(self.scan_id.as_deref())
    }

    /// Checks the required fields and hands back an owned submission.
    pub fn into_submission(self) -> Result<ScanSubmission> {
        let scan_id = self.scan_id().map(str::to_owned);
        let missing = |field| ModelError::MissingScanData {
            scan_id: scan_id.clone(),
            field,
        };

        let id = scan_id.clone().ok_or_else(|| missing("scanId"))?;
        let scan_type = non_blank(self.scan_type.as_deref())
            .ok_or_else(|| missing("scanType"))?
            .trim()
            .to_ascii_uppercase();
        let target = non_blank(self.target.as_deref())
            .ok_or_else(|| missing("target"))?
            .to_string();

        Ok(ScanSubmission {
            scan_id: id,
            scan_type,
            target,
            parameters: self.parameters,
        })
    }
}

/// A request that passed presence validation. `scan_type` is normalized to
/// uppercase but not yet resolved to a [`ScanType`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSubmission {
    pub scan_id: String,
    pub scan_type: String,
    pub target: String,
    pub parameters: Option<Value>,
}

impl ScanSubmission {
    pub fn resolve_type(&self) -> Result<ScanType> {
        self.scan_type.parse()
    }
}

/// Status report published by a scanner backend.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct ScanStatusUpdate {
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub scan_id: Option<String>,
    #[cfg_attr(
        feature = "serde",
        serde(
            skip_serializing_if = "Option::is_none",
            deserialize_with = "serde_support::optional_status"
        )
    )]
    pub status: Option<ScanStatus>,
    pub message: String,
    /// Overall progress, clamped to `0..=100` on decode.
    #[cfg_attr(
        feature = "serde",
        serde(
            skip_serializing_if = "Option::is_none",
            deserialize_with = "serde_support::clamped_progress"
        )
    )]
    pub progress: Option<u8>,
}

impl ScanStatusUpdate {
    pub fn new(
        scan_id: impl Into<String>,
        status: ScanStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            scan_id: Some(scan_id.into()),
            status: Some(status),
            message: message.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn scan_id(&self) -> Option<&str> {
        non_blank(self.scan_id.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(feature = "serde")]
mod serde_support {
    use serde::{Deserialize, Deserializer};

    use super::ScanStatus;
    use crate::progress::MAX_PROGRESS;

    /// Accepts a missing, `null`, or empty status as "no change" and parses
    /// anything else case-insensitively.
    pub fn optional_status<'de, D>(
        deserializer: D,
    ) -> Result<Option<ScanStatus>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(raw) => ScanStatus::parse_optional(&raw)
                .map_err(serde::de::Error::custom),
        }
    }

    /// Backends are not trusted to stay inside `0..=100` or to send whole
    /// numbers.
    pub fn clamped_progress<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<f64>::deserialize(deserializer)?;
        Ok(raw
            .filter(|value| value.is_finite())
            .map(|value| value.round().clamp(0.0, f64::from(MAX_PROGRESS)) as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_type_parsing_is_case_insensitive() {
        assert_eq!("dast".parse::<ScanType>(), Ok(ScanType::Dast));
        assert_eq!(" Sast ".parse::<ScanType>(), Ok(ScanType::Sast));
        assert_eq!("API".parse::<ScanType>(), Ok(ScanType::Api));
        assert_eq!(
            "XSS-SCAN".parse::<ScanType>(),
            Err(ModelError::UnsupportedScanType("XSS-SCAN".into()))
        );
    }

    #[test]
    fn failed_maps_to_terminal_error() {
        let status: ScanStatus = "failed".parse().unwrap();
        assert_eq!(status, ScanStatus::Error);
        assert!(status.is_terminal());
        assert!(!ScanStatus::Queued.is_terminal());
        assert_eq!(ScanStatus::parse_optional("  ").unwrap(), None);
    }

    #[test]
    fn submission_requires_every_field() {
        let err = ScanRequest {
            scan_id: Some("s1".into()),
            scan_type: Some("dast".into()),
            target: Some("   ".into()),
            parameters: None,
        }
        .into_submission()
        .unwrap_err();
        assert_eq!(
            err,
            ModelError::MissingScanData {
                scan_id: Some("s1".into()),
                field: "target",
            }
        );

        let err = ScanRequest {
            scan_id: None,
            ..ScanRequest::new("x", "sast", "repo")
        }
        .into_submission()
        .unwrap_err();
        assert!(matches!(
            err,
            ModelError::MissingScanData { scan_id: None, field: "scanId" }
        ));
    }

    #[test]
    fn submission_normalizes_type() {
        let submission = ScanRequest::new("s1", " dast", "https://example.com")
            .into_submission()
            .unwrap();
        assert_eq!(submission.scan_type, "DAST");
        assert_eq!(submission.resolve_type(), Ok(ScanType::Dast));
    }

    #[cfg(feature = "serde")]
    mod wire {
        use super::super::*;
        use serde_json::json;

        #[test]
        fn start_scan_decodes_with_parameters() {
            let raw = json!({
                "action": "start_scan",
                "scanId": "s1",
                "scanType": "dast",
                "target": "https://example.com",
                "parameters": { "depth": 3 }
            });
            let msg: ScanRequestMessage = serde_json::from_value(raw).unwrap();
            let ScanRequestMessage::StartScan(request) = msg else {
                panic!("expected start_scan");
            };
            assert_eq!(request.scan_id(), Some("s1"));
            assert_eq!(request.parameters, Some(json!({ "depth": 3 })));
        }

        #[test]
        fn other_actions_decode_as_unsupported() {
            let msg: ScanRequestMessage =
                serde_json::from_value(json!({ "action": "stop_scan", "scanId": "s1" }))
                    .unwrap();
            assert_eq!(msg, ScanRequestMessage::Unsupported);
        }

        #[test]
        fn status_update_tolerates_blank_status() {
            let update: ScanStatusUpdate = serde_json::from_value(json!({
                "scanId": "s1",
                "status": "",
                "message": "heartbeat"
            }))
            .unwrap();
            assert_eq!(update.status, None);
            assert_eq!(update.progress, None);

            let update: ScanStatusUpdate = serde_json::from_value(json!({
                "scanId": "s1",
                "status": "FAILED",
                "message": "boom",
                "progress": 40
            }))
            .unwrap();
            assert_eq!(update.status, Some(ScanStatus::Error));
            assert_eq!(update.progress, Some(40));

            let update: ScanStatusUpdate = serde_json::from_value(json!({
                "scanId": "s1",
                "status": "running",
                "message": "overshoot",
                "progress": 340
            }))
            .unwrap();
            assert_eq!(update.progress, Some(100));
        }

        #[test]
        fn status_update_rejects_unknown_status() {
            let decoded = serde_json::from_value::<ScanStatusUpdate>(json!({
                "scanId": "s1",
                "status": "exploding"
            }));
            assert!(decoded.is_err());
        }
    }
}
