use time::UtcOffset;
use tracing_subscriber::{
    fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

use crate::errors::InitializationError;
use crate::{ModbusError, StationConfig};

pub fn setup_logging(config: &StationConfig) -> Result<(), ModbusError> {
    config
        .logging
        .validate_level_and_format()
        .map_err(ModbusError::Init)?;

    let timer = OffsetTime::new(
        UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        time::format_description::well_known::Rfc3339,
    );

    let base_level = config.logging.get_level_filter();
    let mut env_filter = EnvFilter::default().add_directive(base_level.into());

    if config.logging.trace_frames {
        env_filter = env_filter
            .add_directive("modbus_station::codec=trace".parse().unwrap())
            .add_directive("modbus_station::transport=trace".parse().unwrap());
    }

    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(config.logging.thread_ids)
        .with_thread_names(config.logging.thread_names)
        .with_file(config.logging.include_location)
        .with_line_number(config.logging.include_location)
        .with_level(true)
        .with_timer(timer)
        .with_filter(env_filter);

    Registry::default().with(layer).try_init().map_err(|e| {
        ModbusError::Init(InitializationError::logging(format!(
            "failed to initialize logging: {}",
            e
        )))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::LoggingConfig;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn level_filter_falls_back_to_info_on_garbage() {
        let config = LoggingConfig {
            level: "not-a-level".to_string(),
            ..Default::default()
        };
        assert_eq!(config.get_level_filter(), LevelFilter::INFO);
    }

    #[test]
    fn level_filter_parses_known_levels() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(config.get_level_filter(), LevelFilter::DEBUG);
    }
}
