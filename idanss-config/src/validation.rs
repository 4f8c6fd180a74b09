use std::fmt;

use crate::models::Config;

/// Non-fatal configuration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{} (hint: {hint})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

/// Flags settings that are valid but probably not intended.
pub fn apply_guard_rails(config: &Config) -> ConfigWarnings {
    let mut warnings = ConfigWarnings::default();
    let orchestrator = &config.orchestrator;

    match orchestrator.scan_timeout() {
        None => warnings.push_with_hint(
            "Scan deadlines are disabled; scans whose backend never reports back stay active forever",
            "Set SCAN_TIMEOUT_SECS to a positive value",
        ),
        Some(timeout) if orchestrator.deadline_sweep_interval() > timeout => {
            warnings.push_with_hint(
                "Deadline sweep interval is longer than the scan timeout",
                "Lower SCAN_DEADLINE_SWEEP_SECS so expired scans are noticed in time",
            )
        }
        Some(_) => {}
    }

    if orchestrator.shutdown_grace_ms == 0 {
        warnings.push_with_hint(
            "Shutdown grace period is zero; in-flight handlers are abandoned on shutdown",
            "Set SCAN_SHUTDOWN_GRACE_SECS",
        );
    }

    if config.redis.url.starts_with("redis://")
        && !config.redis.url.contains('@')
        && !is_local_redis(&config.redis.url)
    {
        warnings.push_with_hint(
            "Redis connection to a remote host without credentials",
            "Use rediss:// and set a password for non-local deployments",
        );
    }

    warnings
}

fn is_local_redis(raw: &str) -> bool {
    url::Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned))
        .is_some_and(|host| matches!(host.as_str(), "localhost" | "127.0.0.1" | "[::1]" | "::1"))
}
