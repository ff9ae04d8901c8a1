//! Logger initialisation
//! Installs `env_logger` at the configured level with an optional local
//! timestamp prefix.

use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};
use log::warn;

use crate::config::log_config::LogConfig;

/// Installs the process logger. A logger that is already installed is kept.
pub fn init(config: &LogConfig) {
    let env = Env::default().default_filter_or(config.level_filter().to_string());
    let mut builder = Builder::from_env(env);

    if config.show_timestamps {
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                record.args()
            )
        });
    }

    match builder.try_init() {
        Ok(()) => log::info!("Logging initialized"),
        Err(e) => warn!("Logger already installed: {}", e),
    }
}
