use crate::scan::ScanType;

const DEFAULT_PREFIX: &str = "scan";

/// Naming scheme for every channel and key the orchestrator touches.
///
/// All names hang off a single prefix so several deployments can share one
/// Redis instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanKeys {
    prefix: String,
}

impl Default for ScanKeys {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl ScanKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim().trim_end_matches(':');
        let prefix = if trimmed.is_empty() {
            DEFAULT_PREFIX.to_string()
        } else {
            trimmed.to_string()
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Inbound channel carrying `start_scan` requests.
    pub fn requests(&self) -> String {
        format!("{}:requests", self.prefix)
    }

    /// Inbound channel carrying backend status updates.
    pub fn status(&self) -> String {
        format!("{}:status", self.prefix)
    }

    /// Outbound channel announcing every progress write.
    pub fn updates(&self) -> String {
        format!("{}:updates", self.prefix)
    }

    /// Per-backend channel a forwarded request is published on.
    pub fn scanner(&self, scan_type: ScanType) -> String {
        format!("{}:requests:{}", self.prefix, scan_type.topic_suffix())
    }

    pub fn progress(&self, scan_id: &str) -> String {
        format!("{}:progress:{scan_id}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_names_match_wire_contract() {
        let keys = ScanKeys::default();
        assert_eq!(keys.requests(), "scan:requests");
        assert_eq!(keys.status(), "scan:status");
        assert_eq!(keys.updates(), "scan:updates");
        assert_eq!(keys.scanner(ScanType::Dast), "scan:requests:dast");
        assert_eq!(keys.progress("s1"), "scan:progress:s1");
    }

    #[test]
    fn prefix_is_normalized() {
        assert_eq!(ScanKeys::new("tenant-a:").requests(), "tenant-a:requests");
        assert_eq!(ScanKeys::new("   ").prefix(), "scan");
    }
}
