//! Health check configuration and state types

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::validation::{self, ValidationError};

/// Shortest accepted probe interval
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Kind of probe a check performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Http,
    Tcp,
    Ping,
    Ssl,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Http => "http",
            CheckType::Tcp => "tcp",
            CheckType::Ping => "ping",
            CheckType::Ssl => "ssl",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(CheckType::Http),
            "tcp" => Ok(CheckType::Tcp),
            "ping" => Ok(CheckType::Ping),
            "ssl" => Ok(CheckType::Ssl),
            other => Err(ValidationError::invalid(
                "check_type",
                format!("unknown check type '{}'", other),
            )),
        }
    }
}

/// Health status of a check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// No probe has completed yet
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Down,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Unknown => "unknown",
            CheckStatus::Healthy => "healthy",
            CheckStatus::Degraded => "degraded",
            CheckStatus::Down => "down",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-editable part of a health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Human-readable name
    pub name: String,
    /// URL or host (with optional port) to probe
    pub target: String,
    pub check_type: CheckType,
    /// Expected HTTP status (http checks only)
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// Time between probes
    #[serde(rename = "interval_secs", with = "duration_secs", default = "default_interval")]
    pub interval: Duration,
    /// Per-probe timeout
    #[serde(rename = "timeout_secs", with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Overrides the global down threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
}

fn default_expected_status() -> u16 {
    200
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_active() -> bool {
    true
}

impl CheckConfig {
    /// Create a new active check config with default interval and timeout
    pub fn new(name: impl Into<String>, target: impl Into<String>, check_type: CheckType) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            check_type,
            expected_status: default_expected_status(),
            interval: default_interval(),
            timeout: default_timeout(),
            is_active: true,
            failure_threshold: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Reject configurations that can never be probed
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::require("name", &self.name)?;
        validation::require("target", &self.target)?;

        match self.check_type {
            CheckType::Http => {
                validation::http_url("target", &self.target)?;
                if !(100..=599).contains(&self.expected_status) {
                    return Err(ValidationError::invalid(
                        "expected_status",
                        format!("{} is not an HTTP status code", self.expected_status),
                    ));
                }
            }
            CheckType::Tcp | CheckType::Ping | CheckType::Ssl => {
                parse_target(&self.target, 80)
                    .map_err(|reason| ValidationError::invalid("target", reason))?;
            }
        }

        if self.interval < MIN_INTERVAL {
            return Err(ValidationError::invalid(
                "interval",
                format!("must be at least {}s", MIN_INTERVAL.as_secs()),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ValidationError::invalid("timeout", "must be greater than zero"));
        }
        if self.timeout > self.interval {
            return Err(ValidationError::invalid("timeout", "must not exceed the interval"));
        }
        if self.failure_threshold == Some(0) {
            return Err(ValidationError::invalid(
                "failure_threshold",
                "must be at least 1",
            ));
        }

        Ok(())
    }
}

/// Tracker-owned part of a health check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckState {
    pub status: CheckStatus,
    pub consecutive_failures: u32,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,
    pub last_error: Option<String>,
    /// Start time of the most recently applied probe
    #[serde(skip)]
    pub last_probe_started_at: Option<DateTime<Utc>>,
}

/// A configured health check with its current state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub id: String,
    #[serde(flatten)]
    pub config: CheckConfig,
    #[serde(flatten)]
    pub state: CheckState,
    pub created_at: DateTime<Utc>,
}

impl HealthCheck {
    pub fn new(config: CheckConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            state: CheckState::default(),
            created_at: Utc::now(),
        }
    }
}

/// Split a probe target into host and port.
///
/// Accepts `host`, `host:port` and `scheme://host[:port][/path]`. Known
/// schemes (http, https) supply their default port, otherwise
/// `default_port` is used.
pub fn parse_target(target: &str, default_port: u16) -> Result<(String, u16), String> {
    let target = target.trim();
    if target.is_empty() {
        return Err("empty target".to_string());
    }

    let url = if target.contains("://") {
        Url::parse(target)
    } else {
        Url::parse(&format!("tcp://{}", target))
    }
    .map_err(|e| e.to_string())?;

    // Bare addresses, so `[::1]` becomes `::1` for connect, TLS and ping
    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        _ => return Err("missing host".to_string()),
    };
    let port = url.port_or_known_default().unwrap_or(default_port);

    Ok((host, port))
}

/// Serialize durations as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_check_builder() {
        let config = CheckConfig::new("api", "https://example.com/health", CheckType::Http)
            .with_interval(Duration::from_secs(30))
            .with_timeout(Duration::from_secs(5))
            .with_expected_status(204);

        assert_eq!(config.interval.as_secs(), 30);
        assert_eq!(config.expected_status, 204);
        assert!(config.is_active);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_new_check_starts_unknown() {
        let check = HealthCheck::new(CheckConfig::new("db", "db.internal:5432", CheckType::Tcp));
        assert_eq!(check.state.status, CheckStatus::Unknown);
        assert_eq!(check.state.consecutive_failures, 0);
        assert!(check.state.last_check_at.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let bad_url = CheckConfig::new("api", "example.com", CheckType::Http);
        assert_err!(bad_url.validate());

        let bad_status = CheckConfig::new("api", "https://example.com", CheckType::Http)
            .with_expected_status(42);
        assert_err!(bad_status.validate());

        let slow = CheckConfig::new("db", "db:5432", CheckType::Tcp)
            .with_interval(Duration::from_secs(5))
            .with_timeout(Duration::from_secs(10));
        assert_err!(slow.validate());

        let zero_threshold =
            CheckConfig::new("db", "db:5432", CheckType::Tcp).with_failure_threshold(0);
        assert_err!(zero_threshold.validate());

        let blank = CheckConfig::new(" ", "db:5432", CheckType::Tcp);
        assert_eq!(
            blank.validate(),
            Err(ValidationError::Missing { field: "name" })
        );
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("localhost:80", 443).unwrap(),
            ("localhost".to_string(), 80)
        );
        assert_eq!(
            parse_target("http://example.com:8080", 80).unwrap(),
            ("example.com".to_string(), 8080)
        );
        assert_eq!(
            parse_target("https://example.com/path", 80).unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_eq!(
            parse_target("example.com", 443).unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_err!(parse_target("", 80));
    }

    #[test]
    fn test_parse_target_ipv6() {
        assert_eq!(
            parse_target("[::1]:8443", 443).unwrap(),
            ("::1".to_string(), 8443)
        );
        assert_eq!(
            parse_target("https://[2001:db8::1]/health", 80).unwrap(),
            ("2001:db8::1".to_string(), 443)
        );
        assert_eq!(parse_target("[::1]", 80).unwrap(), ("::1".to_string(), 80));
    }

    #[test]
    fn test_config_json_shape() {
        let json = serde_json::json!({
            "name": "web",
            "target": "https://example.com",
            "check_type": "http",
            "interval_secs": 30,
            "timeout_secs": 5
        });
        let config: CheckConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.expected_status, 200);
        assert_eq!(config.interval, Duration::from_secs(30));
        assert!(config.is_active);
        assert_eq!("ssl".parse::<CheckType>().unwrap(), CheckType::Ssl);
    }
}
