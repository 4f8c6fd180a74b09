use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// What to do with a `start_scan` whose id is already being tracked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateScanPolicy {
    /// Treat the request as a retry and drop it.
    #[default]
    Ignore,
    /// Overwrite the entry and dispatch again.
    Replace,
}

impl DuplicateScanPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateScanPolicy::Ignore => "ignore",
            DuplicateScanPolicy::Replace => "replace",
        }
    }
}

impl fmt::Display for DuplicateScanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicateScanPolicy {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(DuplicateScanPolicy::Ignore),
            "replace" => Ok(DuplicateScanPolicy::Replace),
            other => Err(OrchestratorError::InvalidConfig(format!(
                "unknown duplicate scan policy '{other}'"
            ))),
        }
    }
}

/// Runtime knobs for the orchestrator.
///
/// Every field has a default so partial configuration files stay valid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Prefix for every channel and progress key.
    pub topic_prefix: String,
    /// Maximum number of message handlers running at once.
    pub worker_pool_size: usize,
    /// Per-scan deadline in seconds. `0` disables deadlines.
    pub scan_timeout_secs: u64,
    /// Cadence of the deadline sweeper (ms).
    pub deadline_sweep_interval_ms: u64,
    /// How long shutdown waits for in-flight handlers (ms).
    pub shutdown_grace_ms: u64,
    /// Capacity of the buffer between a bus subscription and its consumer.
    pub subscription_buffer: usize,
    /// Announce progress writes on the updates channel.
    pub publish_updates: bool,
    pub duplicate_policy: DuplicateScanPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "scan".to_string(),
            worker_pool_size: 16,
            scan_timeout_secs: 2 * 60 * 60,
            deadline_sweep_interval_ms: 30_000,
            shutdown_grace_ms: 30_000,
            subscription_buffer: 1_024,
            publish_updates: true,
            duplicate_policy: DuplicateScanPolicy::Ignore,
        }
    }
}

impl OrchestratorConfig {
    pub fn scan_timeout(&self) -> Option<Duration> {
        (self.scan_timeout_secs > 0).then(|| Duration::from_secs(self.scan_timeout_secs))
    }

    pub fn deadline_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.deadline_sweep_interval_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Rejects settings the runtime cannot work with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.worker_pool_size == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "worker_pool_size must be at least 1".into(),
            ));
        }
        if self.subscription_buffer == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "subscription_buffer must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_disables_deadline() {
        let config = OrchestratorConfig {
            scan_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.scan_timeout(), None);
        assert_eq!(
            OrchestratorConfig::default().scan_timeout(),
            Some(Duration::from_secs(7_200))
        );
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("Replace".parse::<DuplicateScanPolicy>().unwrap(), DuplicateScanPolicy::Replace);
        assert!("overwrite".parse::<DuplicateScanPolicy>().is_err());
    }

    #[test]
    fn empty_pool_is_rejected() {
        let config = OrchestratorConfig {
            worker_pool_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
