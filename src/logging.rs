//! Process-wide log output.
//!
//! The serial crate logs through the `log` facade; records are bridged into
//! `tracing` and written to stderr and, when available, to the application
//! log file.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ConfigError, ConfigResult};

pub const LOG_LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Parse a level name as given on the command line.
pub fn parse_level(name: &str) -> ConfigResult<LevelFilter> {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Ok(LevelFilter::TRACE),
        "DEBUG" => Ok(LevelFilter::DEBUG),
        "INFO" => Ok(LevelFilter::INFO),
        "WARN" | "WARNING" => Ok(LevelFilter::WARN),
        "ERROR" | "CRITICAL" => Ok(LevelFilter::ERROR),
        _ => Err(ConfigError::invalid_value(format!(
            "`{}` is not a valid log level. Must be any of: {}",
            name,
            LOG_LEVELS.join(", ")
        ))),
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `level` when set. Lines go to stderr (as JSON when
/// `json` is set) and, in plain text, to `log_file`.
pub fn init(level: LevelFilter, json: bool, log_file: Option<&Path>) -> ConfigResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let file_layer = match log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };
    let stderr_json = json.then(|| fmt::layer().json().with_writer(io::stderr));
    let stderr_plain = (!json).then(|| fmt::layer().with_target(false).with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_plain)
        .with(stderr_json)
        .with(file_layer)
        .try_init()
        .map_err(|e| ConfigError::invalid_value(format!("logging already initialised: {}", e)))?;

    if let Some(path) = log_file {
        tracing::info!("Logging to {}", path.display());
    }
    Ok(())
}

fn open_log_file(path: &Path) -> ConfigResult<fs::File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| ConfigError::from(e).with_path(path))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ConfigError::from(e).with_path(path))
}
