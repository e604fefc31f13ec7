use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigValidationError;

use super::BackoffConfig;

/// TCP connection parameters for the master side: the peer endpoint,
/// timeouts, and the error-recovery policy (§3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub port: u16,

    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// When set, a transport fault triggers one reconnect-and-retry before
    /// surfacing to the caller. CRC/framing errors are never recovered.
    pub error_recovery: bool,

    pub backoff: BackoffConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(1),
            error_recovery: true,
            backoff: BackoffConfig {
                initial_interval: Duration::from_millis(100),
                max_interval: Duration::from_secs(1),
                multiplier: 2.0,
                max_retries: 1,
            },
        }
    }
}

impl Config {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.host.is_empty() {
            return Err(ConfigValidationError::tcp("host must not be empty"));
        }
        if self.port == 0 {
            return Err(ConfigValidationError::tcp("port must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigValidationError::tcp(
                "connect_timeout must be non-zero",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigValidationError::tcp(
                "request_timeout must be non-zero",
            ));
        }
        if self.error_recovery && self.backoff.max_retries == 0 {
            return Err(ConfigValidationError::tcp(
                "error_recovery requires a non-zero retry budget",
            ));
        }
        Ok(())
    }
}
