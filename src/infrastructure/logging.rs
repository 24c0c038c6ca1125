//! Logging system configuration and initialization
//!
//! Sets up the `tracing` stack from [`LoggingConfig`]:
//! - console output through a compact fmt layer
//! - optional file output through a non-blocking daily-rolling writer
//! - `EnvFilter` built from the configured level plus per-module filters,
//!   overridable with `RUST_LOG`

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use lazy_static::lazy_static;
use std::sync::Mutex;
use tracing_subscriber::{
    EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

lazy_static! {
    // Keeps the non-blocking writer guards alive for the process lifetime;
    // dropping them would silently stop file logging.
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

/// Log directory relative to the executable location.
pub fn get_log_directory() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    exe_dir.join("logs")
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Initialize logging with custom configuration.
///
/// `RUST_LOG` overrides the config-derived filter entirely, e.g.
/// `RUST_LOG="debug,reqwest=trace" enos-harvester` while debugging the
/// WebDriver conversation.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = build_env_filter(config)?;

    let console_layer = config.console_output.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
    });

    let file_layer = if config.file_output {
        let log_dir = get_log_directory();
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {log_dir:?}: {e}"))?;

        let appender = tracing_appender::rolling::daily(&log_dir, "enos-harvester.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        LOG_GUARDS
            .lock()
            .map_err(|e| anyhow!("log guard mutex poisoned: {e}"))?
            .push(guard);

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
    } else {
        None
    };

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;

    Ok(())
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    config_filter(config)
}

/// Filter derived purely from config (no environment involved).
fn config_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut directives = vec![config.level.clone()];
    for (module, level) in &config.module_filters {
        directives.push(format!("{module}={level}"));
    }

    EnvFilter::try_new(directives.join(","))
        .map_err(|e| anyhow!("Invalid log filter '{}': {e}", directives.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_includes_module_directives() {
        let config = LoggingConfig::default();
        let filter = config_filter(&config).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("info"));
        assert!(rendered.contains("sqlx=warn"));
    }
}
