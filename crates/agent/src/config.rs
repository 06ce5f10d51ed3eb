use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AgentError;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the device API, e.g. `http://10.0.0.2:5000`.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_identity_path")]
    pub identity_path: PathBuf,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Position reported by the headless capability layer.
    #[serde(default)]
    pub simulated_position: Option<SimulatedPosition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Deadline for the per-cycle device fetch.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Deadline for every other API call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_tracking_interval")]
    pub tracking_interval_secs: u64,

    /// User-visible pause before a wipe or release runs.
    #[serde(default = "default_command_delay")]
    pub command_delay_ms: u64,

    /// Pause between releasing ownership and clearing identity on unlink.
    #[serde(default = "default_unlink_delay")]
    pub unlink_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            request_timeout_secs: default_request_timeout(),
            tracking_interval_secs: default_tracking_interval(),
            command_delay_ms: default_command_delay(),
            unlink_delay_ms: default_unlink_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SimulatedPosition {
    pub lat: f64,
    pub lng: f64,
}

/// Durations derived from [`TimingConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub heartbeat_interval: Duration,
    pub fetch_timeout: Duration,
    pub request_timeout: Duration,
    pub tracking_interval: Duration,
    pub command_delay: Duration,
    pub unlink_delay: Duration,
}

impl From<&TimingConfig> for Timings {
    fn from(config: &TimingConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            tracking_interval: Duration::from_secs(config.tracking_interval_secs),
            command_delay: Duration::from_millis(config.command_delay_ms),
            unlink_delay: Duration::from_millis(config.unlink_delay_ms),
        }
    }
}

fn default_server_url() -> String {
    "http://localhost:5000".to_string()
}
fn default_identity_path() -> PathBuf {
    PathBuf::from("emi-agent/identity.json")
}
fn default_heartbeat_interval() -> u64 {
    10
}
fn default_fetch_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    15
}
fn default_tracking_interval() -> u64 {
    5
}
fn default_command_delay() -> u64 {
    2000
}
fn default_unlink_delay() -> u64 {
    3000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl AgentConfig {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. `config/agent.toml`, or the file given on the command line
    /// 2. Environment variables with EMI_AGENT__ prefix
    pub fn load(path: Option<&str>) -> Result<Self, AgentError> {
        let file = match path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name("config/agent").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("EMI_AGENT").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), AgentError> {
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(AgentError::Config(format!(
                "server_url must be an http(s) URL, got {}",
                self.server_url
            )));
        }

        let t = &self.timing;
        if t.heartbeat_interval_secs == 0 || t.tracking_interval_secs == 0 {
            return Err(AgentError::Config(
                "heartbeat and tracking intervals must be greater than 0".to_string(),
            ));
        }
        if t.fetch_timeout_secs == 0 || t.request_timeout_secs == 0 {
            return Err(AgentError::Config(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timings(&self) -> Timings {
        Timings::from(&self.timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<AgentConfig, AgentError> {
        let cfg: AgentConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn test_defaults_match_device_cadence() {
        let cfg = from_toml("").unwrap();
        let timings = cfg.timings();
        assert_eq!(timings.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(timings.fetch_timeout, Duration::from_secs(10));
        assert_eq!(timings.tracking_interval, Duration::from_secs(5));
        assert_eq!(timings.command_delay, Duration::from_millis(2000));
        assert_eq!(timings.unlink_delay, Duration::from_millis(3000));
        assert!(cfg.simulated_position.is_none());
    }

    #[test]
    fn test_overrides() {
        let cfg = from_toml(
            r#"
            server_url = "https://emi.example.in"

            [timing]
            heartbeat_interval_secs = 30

            [simulated_position]
            lat = 12.97
            lng = 77.59
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server_url, "https://emi.example.in");
        assert_eq!(cfg.timing.heartbeat_interval_secs, 30);
        assert_eq!(cfg.timing.tracking_interval_secs, 5);
        assert_eq!(cfg.simulated_position.unwrap().lat, 12.97);
    }

    #[test]
    fn test_rejects_non_http_url() {
        let result = from_toml(r#"server_url = "ftp://emi.example.in""#);
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = from_toml("[timing]\nheartbeat_interval_secs = 0");
        assert!(matches!(result, Err(AgentError::Config(_))));
    }
}
