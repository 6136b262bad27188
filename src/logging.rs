//! log4rs initialization
//!
//! The server reads its appenders from the YAML file named in the logging
//! config. When that file is missing a console appender is installed so the
//! binary still logs. Both layouts are expected to print the `file_id` MDC key.

use log::{info, warn, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

use crate::config::LoggingConfig;
use crate::error::StripeError;

/// Console layout used when no log config file is present
pub const CONSOLE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l:<5})} [{X(file_id)(-)}] {t} - {m}{n}";

pub fn init_logging(config: &LoggingConfig) -> Result<(), StripeError> {
    if Path::new(&config.config_file).exists() {
        log4rs::init_file(&config.config_file, Default::default())
            .map_err(|e| StripeError::InvalidConfig(format!("log config {}: {}", config.config_file, e)))?;
        info!("Logging configured from {}", config.config_file);
        return Ok(());
    }

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
        .build();
    let log_config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .map_err(|e| StripeError::InvalidConfig(e.to_string()))?;
    log4rs::init_config(log_config).map_err(|e| StripeError::InvalidConfig(e.to_string()))?;

    warn!("Log config {} not found, logging to console", config.config_file);
    Ok(())
}
