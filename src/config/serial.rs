use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::types::{DataBits, Parity, StopBits};
use crate::errors::ConfigValidationError;

/// RTU connection parameters: the serial surface plus the local slave
/// address and the two RTU reader timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,

    /// Local slave address used as the sender on requests this side issues.
    pub slave_id: u8,

    /// Deadline waiting for the first byte of a reply.
    #[serde(with = "humantime_serde")]
    pub begin_frame_timeout: Duration,

    /// Inter-byte deadline once a reply has started arriving.
    #[serde(with = "humantime_serde")]
    pub end_frame_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            slave_id: 1,
            begin_frame_timeout: Duration::from_millis(500),
            end_frame_timeout: Duration::from_millis(500),
        }
    }
}

impl Config {
    pub fn serial_port_info(&self) -> String {
        format!(
            "{} ({} baud, {} data bits, {} parity, {} stop bits)",
            self.device, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.device.is_empty() {
            return Err(ConfigValidationError::serial("device must not be empty"));
        }
        if self.baud_rate == 0 {
            return Err(ConfigValidationError::serial("baud_rate must be non-zero"));
        }
        if self.begin_frame_timeout.is_zero() {
            return Err(ConfigValidationError::serial(
                "begin_frame_timeout must be non-zero",
            ));
        }
        if self.end_frame_timeout.is_zero() {
            return Err(ConfigValidationError::serial(
                "end_frame_timeout must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn empty_device_is_rejected() {
        let mut config = Config::default();
        config.device.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_baud_rate_is_rejected() {
        let mut config = Config::default();
        config.baud_rate = 0;
        assert!(config.validate().is_err());
    }
}
