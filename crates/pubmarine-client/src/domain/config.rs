//! Client configuration with validation.
//!
//! Values come from defaults, then `PUBMARINE_*` environment variables, then
//! whatever the embedding application overrides (the demo binary layers its
//! command-line flags on top).

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default endpoint of a local pubmarine server
pub const DEFAULT_URL: &str = "ws://localhost:10209";

/// Default maximum inbound message size (1MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint
    pub url: String,
    /// Deadline for a request's reply; `None` waits indefinitely
    #[serde(with = "humantime_serde::option")]
    pub request_timeout: Option<Duration>,
    /// How often expired pending calls are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Capacity of the caller → dispatcher command queue
    pub command_buffer: usize,
    /// Capacity of the unsolicited-envelope broadcast channel
    pub unsolicited_buffer: usize,
    /// Inbound messages above this size are dropped and the connection
    /// stays open.
    ///
    /// Checked after the message has been read in full, so it does not bound
    /// memory; tungstenite's own 64 MiB message limit still applies.
    pub max_message_size: usize,
    /// Logging setup
    pub telemetry: TelemetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            request_timeout: Some(Duration::from_secs(30)),
            sweep_interval: Duration::from_secs(1),
            command_buffer: 256,
            unsolicited_buffer: 1024,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PUBMARINE_URL`: endpoint (default: ws://localhost:10209)
    /// - `PUBMARINE_REQUEST_TIMEOUT`: e.g. `30s`, `500ms`, `off` (default: 30s)
    /// - `PUBMARINE_SWEEP_INTERVAL`: expiry sweep period (default: 1s)
    /// - `PUBMARINE_MAX_MESSAGE_SIZE`: bytes (default: 1048576)
    /// - `PUBMARINE_LOG_LEVEL` or `RUST_LOG`: log filter (default: info)
    /// - `PUBMARINE_JSON_LOGS`: JSON log lines (default: false)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            url: env::var("PUBMARINE_URL").unwrap_or(defaults.url),
            request_timeout: env::var("PUBMARINE_REQUEST_TIMEOUT")
                .ok()
                .and_then(|v| parse_request_timeout(&v))
                .unwrap_or(defaults.request_timeout),
            sweep_interval: env::var("PUBMARINE_SWEEP_INTERVAL")
                .ok()
                .and_then(|v| humantime_serde::parse_duration(&v).ok())
                .unwrap_or(defaults.sweep_interval),
            max_message_size: env::var("PUBMARINE_MAX_MESSAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_message_size),
            telemetry: TelemetryConfig::from_env(),
            ..defaults
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "sweep_interval cannot be 0".into(),
            ));
        }

        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidTimeout(
                "request_timeout cannot be 0 (omit it to disable)".into(),
            ));
        }

        if self.command_buffer == 0 || self.unsolicited_buffer == 0 {
            return Err(ConfigError::InvalidLimit(
                "channel buffers cannot be 0".into(),
            ));
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_message_size cannot be 0".into(),
            ));
        }

        Ok(())
    }
}

/// `off` or any zero duration (`0`, `0s`, `0ms`) disables the deadline.
///
/// Returns `None` when the value cannot be parsed.
fn parse_request_timeout(value: &str) -> Option<Option<Duration>> {
    if value.trim().eq_ignore_ascii_case("off") {
        return Some(None);
    }
    let timeout = humantime_serde::parse_duration(value).ok()?;
    Some((!timeout.is_zero()).then_some(timeout))
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Log level filter (trace, debug, info, warn, error or an EnvFilter directive)
    pub log_level: String,
    /// Emit JSON log lines instead of the pretty format
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("PUBMARINE_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),
            json_logs: env::var("PUBMARINE_JSON_LOGS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Endpoint is not a WebSocket URL
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
}

/// Duration serialization as `"30s"`, `"500ms"` or `"2m"`
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .ok()
                .and_then(|m| m.checked_mul(60))
                .map(Duration::from_secs)
                .ok_or("invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.url, "ws://localhost:10209");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_url() {
        let config = ClientConfig {
            url: "http://localhost:10209".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let config = ClientConfig {
            command_buffer: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLimit(_))
        ));

        let config = ClientConfig {
            request_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_parse_duration_suffixes() {
        use humantime_serde::parse_duration;
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("7"), Ok(Duration::from_secs(7)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_duration_minutes_overflow() {
        use humantime_serde::parse_duration;
        assert_eq!(
            parse_duration("999999999999999999m"),
            Err("invalid minutes")
        );
        assert_eq!(
            parse_duration(&format!("{}m", u64::MAX / 60)),
            Ok(Duration::from_secs(u64::MAX / 60 * 60))
        );
    }

    #[test]
    fn test_zero_request_timeout_disables() {
        for zero in ["0", "0s", "0ms", "0m", "off", "OFF"] {
            assert_eq!(parse_request_timeout(zero), Some(None), "{zero}");
        }
        assert_eq!(
            parse_request_timeout("250ms"),
            Some(Some(Duration::from_millis(250)))
        );
        assert_eq!(parse_request_timeout("soon"), None);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let json = r#"{
            "url": "ws://10.0.0.5:10209",
            "request_timeout": "250ms",
            "telemetry": { "json_logs": true }
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.url, "ws://10.0.0.5:10209");
        assert_eq!(config.request_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert!(config.telemetry.json_logs);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_disabled_timeout_roundtrip() {
        let config = ClientConfig {
            request_timeout: None,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_timeout, None);
        assert!(parsed.validate().is_ok());
    }
}
