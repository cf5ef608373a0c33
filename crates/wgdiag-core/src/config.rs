//! Session configuration
//!
//! Loaded from JSON; every key is optional.
//!
//! ```json
//! { "poll_interval_ms": 20, "acquire_timeout_ms": 10000, "baud_rate": 38400 }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_POLL_INTERVAL_MS};

/// Errors loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading the settings file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The settings are not valid JSON
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Timing and link settings of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Receive loop period when idle
    pub poll_interval_ms: u64,

    /// How long `write` waits for the link and the in-flight slot
    pub acquire_timeout_ms: u64,

    /// How long listener registration waits for the in-flight slot
    pub listener_wait_ms: u64,

    /// Minimum spacing between connection attempts
    pub reconnect_delay_ms: u64,

    /// Baud rate for serial adapters
    pub baud_rate: u32,

    /// Connect timeout for TCP adapters
    pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            acquire_timeout_ms: 10_000,
            listener_wait_ms: 5_000,
            reconnect_delay_ms: 500,
            baud_rate: DEFAULT_BAUD_RATE,
            connect_timeout_ms: 3_000,
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse from JSON text
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Receive loop period; never zero
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Bound for `write`
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Bound for listener registration
    pub fn listener_wait(&self) -> Duration {
        Duration::from_millis(self.listener_wait_ms)
    }

    /// Spacing between connection attempts
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// TCP connect timeout; never zero
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_take_defaults() {
        let config = SessionConfig::from_json(r#"{"baud_rate": 9600}"#).unwrap();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let config = SessionConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            SessionConfig::from_json("{"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"reconnect_delay_ms": 50}"#).unwrap();
        let config = SessionConfig::from_file(&path).unwrap();
        assert_eq!(config.reconnect_delay(), Duration::from_millis(50));
    }
}
