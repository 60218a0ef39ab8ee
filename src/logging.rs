//! Logging setup.
//!
//! Logs go to the console and, when a log directory is configured, are appended to
//! `<log_directory>/<app_name>` as well. `RUST_LOG` overrides the configured level.

use crate::config::Config;
use std::fmt;
use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, Layer, fmt as tracing_fmt, prelude::*};

/// Verbosity levels, ordered from least to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
    /// Request access logs, emitted under the `access` target.
    Access = 3,
    Debug = 4,
}

impl LogLevel {
    /// Filter directive for this level.
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info,access=off",
            Self::Access => "info",
            Self::Debug => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" | "0" => Ok(Self::Error),
            "warning" | "warn" | "1" => Ok(Self::Warning),
            "info" | "2" => Ok(Self::Info),
            "access" | "3" => Ok(Self::Access),
            "debug" | "4" => Ok(Self::Debug),
            other => Err(format!(
                "LOG_LEVEL: should be error, warning, info, access, debug or a number 0-4, got ({})",
                other
            )),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Access => "access",
            Self::Debug => "debug",
        };
        write!(f, "{}", name)
    }
}

/// Initialize the tracing subscriber for logging.
///
/// Fails only when the log file cannot be opened.
pub fn init_tracing(config: &Config) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));

    let console = if config.json_logs {
        tracing_fmt::layer().json().boxed()
    } else {
        tracing_fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .boxed()
    };

    let file = match config.log_file() {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(())
}
