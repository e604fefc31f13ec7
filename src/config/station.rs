use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use config::{Config as ConfigBuilder, ConfigError, Environment, File, FileFormat};

use super::{ConnectionConfig, LoggingConfig, SerialConfig, TcpConfig};

/// Top-level application configuration: the union of the serial (RTU) and
/// TCP connection parameters, logging, and listener bookkeeping.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// TCP connection parameters (master peer / slave listener share this shape)
    pub tcp: TcpConfig,

    /// RTU connection parameters
    pub serial: SerialConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Listener bookkeeping for a slave accepting multiple TCP clients
    pub connection: ConnectionConfig,
}

impl Config {
    pub const CONFIG_DIR: &'static str = "config";

    const ENV_PREFIX: &'static str = "MODBUS_STATION";

    /// Builds configuration using the following priority (highest to lowest):
    /// 1. Environment variables (MODBUS_STATION_*)
    /// 2. Local configuration file (config/local.yaml)
    /// 3. Environment specific file (config/{env}.yaml)
    /// 4. Default configuration (config/default.yaml)
    /// 5. Built-in defaults
    pub fn new() -> Result<Self, ConfigError> {
        let environment = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let defaults = Config::default();

        let mut builder = ConfigBuilder::builder();

        builder = builder
            .set_default("tcp.host", defaults.tcp.host)?
            .set_default("tcp.port", defaults.tcp.port)?
            .set_default(
                "tcp.connect_timeout",
                format!("{}s", defaults.tcp.connect_timeout.as_secs()),
            )?
            .set_default(
                "tcp.request_timeout",
                format!("{}s", defaults.tcp.request_timeout.as_secs()),
            )?
            .set_default("tcp.error_recovery", defaults.tcp.error_recovery)?
            .set_default(
                "tcp.backoff.initial_interval",
                format!("{}ms", defaults.tcp.backoff.initial_interval.as_millis()),
            )?
            .set_default(
                "tcp.backoff.max_interval",
                format!("{}s", defaults.tcp.backoff.max_interval.as_secs()),
            )?
            .set_default("tcp.backoff.multiplier", defaults.tcp.backoff.multiplier)?
            .set_default("tcp.backoff.max_retries", defaults.tcp.backoff.max_retries)?
            .set_default("serial.device", defaults.serial.device)?
            .set_default("serial.baud_rate", defaults.serial.baud_rate)?
            .set_default("serial.data_bits", defaults.serial.data_bits.to_string())?
            .set_default("serial.parity", defaults.serial.parity.to_string())?
            .set_default("serial.stop_bits", defaults.serial.stop_bits.to_string())?
            .set_default("serial.slave_id", defaults.serial.slave_id)?
            .set_default(
                "serial.begin_frame_timeout",
                format!("{}ms", defaults.serial.begin_frame_timeout.as_millis()),
            )?
            .set_default(
                "serial.end_frame_timeout",
                format!("{}ms", defaults.serial.end_frame_timeout.as_millis()),
            )?
            .set_default("logging.log_dir", defaults.logging.log_dir)?
            .set_default("logging.trace_frames", defaults.logging.trace_frames)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?
            .set_default(
                "logging.include_location",
                defaults.logging.include_location,
            )?
            .set_default("logging.thread_ids", defaults.logging.thread_ids)?
            .set_default("logging.thread_names", defaults.logging.thread_names)?
            .set_default(
                "connection.max_connections",
                defaults.connection.max_connections,
            )?
            .set_default(
                "connection.idle_timeout",
                format!("{}s", defaults.connection.idle_timeout.as_secs()),
            )?
            .set_default(
                "connection.connect_timeout",
                format!("{}s", defaults.connection.connect_timeout.as_secs()),
            )?
            .set_default(
                "connection.error_timeout",
                format!("{}s", defaults.connection.error_timeout.as_secs()),
            )?
            .set_default(
                "connection.per_ip_limits",
                defaults.connection.per_ip_limits,
            )?
            .set_default(
                "connection.backoff.initial_interval",
                format!(
                    "{}s",
                    defaults.connection.backoff.initial_interval.as_secs()
                ),
            )?
            .set_default(
                "connection.backoff.max_interval",
                format!("{}s", defaults.connection.backoff.max_interval.as_secs()),
            )?
            .set_default(
                "connection.backoff.multiplier",
                defaults.connection.backoff.multiplier,
            )?
            .set_default(
                "connection.backoff.max_retries",
                defaults.connection.backoff.max_retries,
            )?;

        let config = builder
            .add_source(File::new(
                &format!("{}/default", Self::CONFIG_DIR),
                FileFormat::Yaml,
            ))
            .add_source(
                File::new(
                    &format!("{}/{}", Self::CONFIG_DIR, environment),
                    FileFormat::Yaml,
                )
                .required(false),
            )
            .add_source(
                File::new(&format!("{}/local", Self::CONFIG_DIR), FileFormat::Yaml).required(false),
            )
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Self::validate(&config)?;

        Ok(config)
    }

    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .separator("_")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Self::validate(&config)?;

        Ok(config)
    }

    pub fn validate(config: &Self) -> Result<(), ConfigError> {
        config
            .tcp
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        config
            .serial
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        config
            .connection
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        config
            .logging
            .validate_level_and_format()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(())
    }
}
