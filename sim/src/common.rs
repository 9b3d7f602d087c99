//! Common utility functions for the simulation binary.
//!
//! This module contains:
//! - Logger initialization
//! - Path validation for configuration inputs and result outputs

use std::error::Error;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Timestamp layout of every log line, millisecond resolution in local time.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Parse a level name (off, error, warn, info, debug, trace), falling back to `info`.
pub fn parse_level(log_level: &str) -> log::LevelFilter {
    log_level.parse().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    })
}

/// Open `path` for appending, creating it and its parent directory when missing.
fn open_log_file(path: &Path) -> Result<File, Box<dyn Error>> {
    ensure_parent_dir(path)?;
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Install the global logger: `<timestamp> [LEVEL] - message`, written to stderr or appended
/// to `log_file`.
///
/// # Errors
/// Returns an error if the log file cannot be opened or a logger is already installed.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(parse_level(log_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                chrono::Local::now().format(TIMESTAMP_FORMAT),
                record.level(),
                record.args()
            )
        });
    if let Some(path) = log_file {
        builder.target(env_logger::Target::Pipe(Box::new(open_log_file(path)?)));
    }
    builder.try_init()?;
    Ok(())
}

/// Check that a configuration file exists and is a regular file.
pub fn validate_config_path(path: &Path) -> Result<(), Box<dyn Error>> {
    if !path.exists() {
        return Err(format!("Config file '{}' does not exist.", path.display()).into());
    }
    if !path.is_file() {
        return Err(format!("Config path '{}' is not a file.", path.display()).into());
    }
    Ok(())
}

/// Create the parent directory of an output file if it is missing.
///
/// # Errors
/// Returns an error if directory creation fails.
pub fn ensure_parent_dir(output: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
