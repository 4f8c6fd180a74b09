use std::fmt::{self, Display};

/// Errors produced by model parsing and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A required request field was absent or blank. Carries the scan id
    /// when the request had one so the failure can still be attributed.
    MissingScanData {
        scan_id: Option<String>,
        field: &'static str,
    },
    UnsupportedScanType(String),
    UnknownStatus(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::MissingScanData { field, .. } => {
                write!(f, "missing scan data: {field}")
            }
            ModelError::UnsupportedScanType(value) => {
                write!(f, "unsupported scan type: {value}")
            }
            ModelError::UnknownStatus(value) => {
                write!(f, "unknown scan status: {value}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
