//! Signal service configuration.
//!
//! Configuration is loaded from environment variables. Every setting has a
//! default, so an empty environment yields a runnable local instance.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default signaling WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:7000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default capacity of each session's outbound channel.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Default maximum size of one inbound WebSocket message (1 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Default time allowed for sessions to tear down on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 2;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "signal";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Signal service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Signaling WebSocket bind address (default: "0.0.0.0:7000").
    pub bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this instance.
    pub instance_id: String,

    /// Capacity of each session's outbound channel.
    pub outbound_buffer: usize,

    /// Maximum accepted inbound WebSocket message size in bytes.
    pub max_message_bytes: usize,

    /// Time allowed for sessions to tear down after the shutdown signal.
    pub shutdown_grace_period: Duration,

    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set to an unusable value.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("SIGNAL_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SIGNAL_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let outbound_buffer =
            parse_positive(vars, "SIGNAL_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?;

        let max_message_bytes =
            parse_positive(vars, "SIGNAL_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?;

        let shutdown_grace_seconds = vars
            .get("SIGNAL_SHUTDOWN_GRACE_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECONDS);

        let log_format = match vars.get("LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        let instance_id = vars.get("SIGNAL_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            instance_id,
            outbound_buffer,
            max_message_bytes,
            shutdown_grace_period: Duration::from_secs(shutdown_grace_seconds),
            log_format,
        })
    }
}

/// Parse a size setting that must be greater than zero.
fn parse_positive(
    vars: &HashMap<String, String>,
    name: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };
    match raw.parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue(format!(
            "{name} must be a positive integer, got '{raw}'"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_from_empty_environment() {
        let config = Config::from_vars(&HashMap::new()).expect("Defaults should load");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.outbound_buffer, DEFAULT_OUTBOUND_BUFFER);
        assert_eq!(config.max_message_bytes, DEFAULT_MAX_MESSAGE_BYTES);
        assert_eq!(
            config.shutdown_grace_period,
            Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECONDS)
        );
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.instance_id.starts_with("signal-"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(&vars(&[
            ("SIGNAL_BIND_ADDRESS", "127.0.0.1:9000"),
            ("SIGNAL_HEALTH_BIND_ADDRESS", "127.0.0.1:9001"),
            ("SIGNAL_INSTANCE_ID", "signal-test-1"),
            ("SIGNAL_OUTBOUND_BUFFER", "8"),
            ("SIGNAL_MAX_MESSAGE_BYTES", "4096"),
            ("SIGNAL_SHUTDOWN_GRACE_SECONDS", "5"),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.health_bind_address, "127.0.0.1:9001");
        assert_eq!(config.instance_id, "signal-test-1");
        assert_eq!(config.outbound_buffer, 8);
        assert_eq!(config.max_message_bytes, 4096);
        assert_eq!(config.shutdown_grace_period, Duration::from_secs(5));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_zero_outbound_buffer_is_invalid() {
        let result = Config::from_vars(&vars(&[("SIGNAL_OUTBOUND_BUFFER", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("SIGNAL_OUTBOUND_BUFFER")));
    }

    #[test]
    fn test_non_numeric_message_size_is_invalid() {
        let result = Config::from_vars(&vars(&[("SIGNAL_MAX_MESSAGE_BYTES", "lots")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_unknown_log_format_is_invalid() {
        let result = Config::from_vars(&vars(&[("LOG_FORMAT", "xml")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_unparseable_grace_period_falls_back_to_default() {
        let config =
            Config::from_vars(&vars(&[("SIGNAL_SHUTDOWN_GRACE_SECONDS", "soon")])).unwrap();
        assert_eq!(
            config.shutdown_grace_period,
            Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECONDS)
        );
    }
}
