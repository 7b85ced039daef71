//! Logging initialization.
//!
//! Logs go to stderr (or a file) so command output on stdout stays clean.

use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

// The file writer flushes on drop; keep its guard for the whole run.
static LOG_GUARD: Mutex<Option<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(None);

/// Initialize logging from `config`.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    match &config.log_file {
        Some(path) => init_telemetry_with_file(&config.level, path),
        None => init_telemetry(&config.level, config.format == "json"),
    }
}

/// Initialize logging to stderr.
pub fn init_telemetry(log_level: &str, json_format: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(log_level)?;

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}

/// Initialize logging with file output.
pub fn init_telemetry_with_file(log_level: &str, log_file: &std::path::Path) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(log_level)?;

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
        .try_init()?;

    if let Ok(mut g) = LOG_GUARD.lock() {
        *g = Some(guard);
    }

    Ok(())
}
