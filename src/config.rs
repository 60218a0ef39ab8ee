//! Configuration handling for backend-kit.
//!
//! This module provides configuration management via CLI arguments and environment variables.
//! Every option can be given as a flag (`--db-host`) or as the matching environment
//! variable (`DB_HOST`); flags win.

use crate::logging::LogLevel;
use clap::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_APP_NAME: &str = "backend-kit";
pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 26257;
pub const DEFAULT_DB_NAME: &str = "db_test";
pub const DEFAULT_DB_USER: &str = "user_test";
pub const DEFAULT_DB_CERTS_PATH: &str = "certs";

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 100;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Hard upper bound on pooled connections.
pub const MAX_POOL_SIZE: u32 = 100;

/// Errors found while validating the configuration. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Certs path is required when running in secure db mode\neither run with --db-insecure or --db-certs-path=folder"
    )]
    CertsPathRequired,

    #[error(
        "cannot access certs directory: {path}: {source}\nadjust path with --db-certs-path=folder or run with --db-insecure"
    )]
    CertsDirUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Missing a cert needed for secure db mode: {path}\nadjust path with --db-certs-path=folder, run with --db-insecure or make sure the file is present"
    )]
    MissingCert { path: String },

    #[error("Invalid pool options: {0}")]
    InvalidPoolOptions(String),
}

/// Connection pool configuration options.
#[derive(Debug, Clone, Default, Args, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 100)
    #[arg(long = "db-max-connections", env = "DB_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    #[arg(long = "db-min-connections", env = "DB_MIN_CONNECTIONS")]
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    #[arg(long = "db-idle-timeout", env = "DB_IDLE_TIMEOUT")]
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    #[arg(long = "db-acquire-timeout", env = "DB_ACQUIRE_TIMEOUT")]
    pub acquire_timeout_secs: Option<u64>,
}

impl PoolOptions {
    /// Get max_connections with default value.
    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let max = self.max_connections_or_default();
        let min = self.min_connections_or_default();
        if max == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        if max > MAX_POOL_SIZE {
            return Err(format!(
                "max_connections ({}) cannot exceed {}",
                max, MAX_POOL_SIZE
            ));
        }
        if min == 0 {
            return Err("min_connections must be greater than 0".to_string());
        }
        if min > max {
            return Err(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                min, max
            ));
        }
        Ok(())
    }
}

/// Paths of the TLS material used in secure mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca: PathBuf,
    pub key: PathBuf,
    pub cert: PathBuf,
}

/// Process-wide configuration. Read once at startup and never mutated afterwards.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Application name, used as the log file name
    #[arg(long, default_value = DEFAULT_APP_NAME, env = "APP_NAME")]
    pub app_name: String,

    /// Log level: error, warning, info, access, debug (or 0-4)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: LogLevel,

    /// Directory for the log file. Logs go to the console only when empty.
    #[arg(long, default_value = "", env = "LOG_DIRECTORY", value_parser = trim_trailing_slash)]
    pub log_directory: String,

    /// Enable JSON logging format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    /// Database host
    #[arg(long, default_value = DEFAULT_DB_HOST, env = "DB_HOST")]
    pub db_host: String,

    /// Database port
    #[arg(long, default_value_t = DEFAULT_DB_PORT, env = "DB_PORT")]
    pub db_port: u16,

    /// Database name
    #[arg(long, default_value = DEFAULT_DB_NAME, env = "DB_NAME")]
    pub db_name: String,

    /// Database user. Also selects the client certificate in secure mode.
    #[arg(long, default_value = DEFAULT_DB_USER, env = "DB_USER")]
    pub db_user: String,

    /// Folder holding ca.crt, client.<user>.key and client.<user>.crt
    #[arg(
        long,
        default_value = DEFAULT_DB_CERTS_PATH,
        env = "DB_CERTS_PATH",
        value_parser = trim_trailing_slash
    )]
    pub db_certs_path: String,

    /// Connect without TLS
    #[arg(long, env = "DB_INSECURE")]
    pub db_insecure: bool,

    #[command(flatten)]
    pub pool: PoolOptions,
}

fn trim_trailing_slash(value: &str) -> Result<String, String> {
    Ok(value.strip_suffix('/').unwrap_or(value).to_string())
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            log_level: LogLevel::Info,
            log_directory: String::new(),
            json_logs: false,
            db_host: DEFAULT_DB_HOST.to_string(),
            db_port: DEFAULT_DB_PORT,
            db_name: DEFAULT_DB_NAME.to_string(),
            db_user: DEFAULT_DB_USER.to_string(),
            db_certs_path: DEFAULT_DB_CERTS_PATH.to_string(),
            db_insecure: false,
            pool: PoolOptions::default(),
        }
    }

    /// Path of the log file, if file logging is enabled.
    pub fn log_file(&self) -> Option<PathBuf> {
        if self.log_directory.is_empty() {
            None
        } else {
            Some(Path::new(&self.log_directory).join(&self.app_name))
        }
    }

    /// TLS file locations derived from the certs path and the database user.
    pub fn tls_files(&self) -> TlsFiles {
        let dir = Path::new(&self.db_certs_path);
        TlsFiles {
            ca: dir.join("ca.crt"),
            key: dir.join(format!("client.{}.key", self.db_user)),
            cert: dir.join(format!("client.{}.crt", self.db_user)),
        }
    }

    /// Validate the options a database-backed command needs.
    ///
    /// In secure mode every TLS file must be present before the pool is built.
    pub fn validate_db(&self) -> Result<(), ConfigError> {
        self.pool
            .validate()
            .map_err(ConfigError::InvalidPoolOptions)?;

        if self.db_insecure {
            return Ok(());
        }
        if self.db_certs_path.is_empty() {
            return Err(ConfigError::CertsPathRequired);
        }

        let present: Vec<String> = std::fs::read_dir(&self.db_certs_path)
            .and_then(|entries| {
                entries
                    .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
                    .collect()
            })
            .map_err(|source| ConfigError::CertsDirUnreadable {
                path: self.db_certs_path.clone(),
                source,
            })?;

        let files = self.tls_files();
        for path in [&files.ca, &files.key, &files.cert] {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !present.contains(&name) {
                return Err(ConfigError::MissingCert {
                    path: path.display().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Log the effective configuration at debug level.
    pub fn log_summary(&self) {
        debug!(
            app_name = %self.app_name,
            log_level = %self.log_level,
            log_directory = %self.log_directory,
            db_host = %self.db_host,
            db_port = self.db_port,
            db_name = %self.db_name,
            db_user = %self.db_user,
            db_certs_path = %self.db_certs_path,
            db_insecure = self.db_insecure,
            max_connections = self.pool.max_connections_or_default(),
            min_connections = self.pool.min_connections_or_default(),
            "Config"
        );
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: Config,
    }

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["backend-kit"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.db_host, "localhost");
        assert_eq!(config.db_port, 26257);
        assert!(!config.db_insecure);
        assert!(config.log_file().is_none());
    }

    #[test]
    fn test_parse_flags() {
        let config = parse(&[
            "--db-host",
            "10.0.0.5",
            "--db-port",
            "5432",
            "--db-user",
            "app",
            "--db-insecure",
            "--log-level",
            "debug",
        ]);
        assert_eq!(config.db_host, "10.0.0.5");
        assert_eq!(config.db_port, 5432);
        assert_eq!(config.db_user, "app");
        assert!(config.db_insecure);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_non_numeric_port_rejected() {
        let result = TestCli::try_parse_from(["backend-kit", "--db-port", "abc"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_numeric_log_level() {
        let config = parse(&["--log-level", "0"]);
        assert_eq!(config.log_level, LogLevel::Error);
    }

    #[test]
    fn test_trailing_slash_removed() {
        let config = parse(&["--db-certs-path", "/etc/certs/", "--log-directory", "/var/log/"]);
        assert_eq!(config.db_certs_path, "/etc/certs");
        assert_eq!(config.log_directory, "/var/log");
        assert_eq!(
            config.log_file(),
            Some(PathBuf::from("/var/log/backend-kit"))
        );
    }

    #[test]
    fn test_tls_files_use_db_user() {
        let config = Config {
            db_certs_path: "certs".to_string(),
            db_user: "root".to_string(),
            ..Config::default()
        };
        let files = config.tls_files();
        assert_eq!(files.ca, PathBuf::from("certs/ca.crt"));
        assert_eq!(files.key, PathBuf::from("certs/client.root.key"));
        assert_eq!(files.cert, PathBuf::from("certs/client.root.crt"));
    }

    #[test]
    fn test_validate_insecure_skips_certs() {
        let config = Config {
            db_insecure: true,
            db_certs_path: "/definitely/not/here".to_string(),
            ..Config::default()
        };
        assert!(config.validate_db().is_ok());
    }

    #[test]
    fn test_validate_requires_certs_path() {
        let config = Config {
            db_certs_path: String::new(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate_db(),
            Err(ConfigError::CertsPathRequired)
        ));
    }

    #[test]
    fn test_validate_unreadable_dir() {
        let config = Config {
            db_certs_path: "/definitely/not/here".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate_db(),
            Err(ConfigError::CertsDirUnreadable { .. })
        ));
    }

    #[test]
    fn test_validate_missing_cert() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ca.crt"), "ca").unwrap();
        fs::write(dir.path().join("client.app.key"), "key").unwrap();

        let config = Config {
            db_certs_path: dir.path().to_string_lossy().into_owned(),
            db_user: "app".to_string(),
            ..Config::default()
        };
        match config.validate_db() {
            Err(ConfigError::MissingCert { path }) => assert!(path.ends_with("client.app.crt")),
            other => panic!("expected MissingCert, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_all_certs_present() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ca.crt", "client.app.key", "client.app.crt"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let config = Config {
            db_certs_path: dir.path().to_string_lossy().into_owned(),
            db_user: "app".to_string(),
            ..Config::default()
        };
        assert!(config.validate_db().is_ok());
    }

    // =========================================================================
    // Pool Options Tests
    // =========================================================================

    #[test]
    fn test_pool_options_defaults() {
        let opts = PoolOptions::default();
        assert_eq!(opts.max_connections_or_default(), 100);
        assert_eq!(opts.min_connections_or_default(), 1);
        assert_eq!(opts.idle_timeout_or_default(), Duration::from_secs(600));
        assert_eq!(opts.acquire_timeout_or_default(), Duration::from_secs(30));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_pool_options_from_flags() {
        let config = parse(&["--db-max-connections", "20", "--db-min-connections", "5"]);
        assert_eq!(config.pool.max_connections, Some(20));
        assert_eq!(config.pool.min_connections, Some(5));
    }

    #[test]
    fn test_pool_options_validation_max_zero() {
        let opts = PoolOptions {
            max_connections: Some(0),
            ..PoolOptions::default()
        };
        assert!(opts.validate().unwrap_err().contains("max_connections"));
    }

    #[test]
    fn test_pool_options_validation_max_above_limit() {
        let opts = PoolOptions {
            max_connections: Some(101),
            ..PoolOptions::default()
        };
        assert!(opts.validate().unwrap_err().contains("cannot exceed 100"));
    }

    #[test]
    fn test_pool_options_validation_min_exceeds_max() {
        let opts = PoolOptions {
            max_connections: Some(5),
            min_connections: Some(10),
            ..PoolOptions::default()
        };
        let err = opts.validate().unwrap_err();
        assert!(err.contains("min_connections"));
        assert!(err.contains("cannot exceed"));
    }

    #[test]
    fn test_invalid_pool_options_fail_db_validation() {
        let config = Config {
            db_insecure: true,
            pool: PoolOptions {
                min_connections: Some(0),
                ..PoolOptions::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            config.validate_db(),
            Err(ConfigError::InvalidPoolOptions(_))
        ));
    }
}
