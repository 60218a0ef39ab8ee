//! Connection pool management.
//!
//! The production pool is a lazily-connecting `PgPool` pointed at CockroachDB.
//! Nothing is dialed until the first connection is acquired, so building the
//! pool never blocks startup.

use crate::config::{Config, ConfigError};
use crate::db::executor::DbConnection;
use crate::error::{DbError, DbResult};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Postgres};
use std::future::Future;
use std::time::Duration;
use tracing::info;

/// A source of database connections.
///
/// Acquisition suspends while every connection is leased. Dropping the returned
/// connection hands it back.
pub trait ConnectionPool: Send + Sync {
    type Connection: DbConnection;

    fn acquire(&self) -> impl Future<Output = DbResult<Self::Connection>> + Send;
}

impl ConnectionPool for PgPool {
    type Connection = PoolConnection<Postgres>;

    async fn acquire(&self) -> DbResult<Self::Connection> {
        sqlx::Pool::acquire(self)
            .await
            .map_err(|e| acquire_error(e, self.options().get_acquire_timeout()))
    }
}

/// Map a failed acquisition, reporting the pool's own acquire timeout.
fn acquire_error(error: sqlx::Error, acquire_timeout: Duration) -> DbError {
    if let sqlx::Error::PoolTimedOut = error {
        let secs = u32::try_from(acquire_timeout.as_secs()).unwrap_or(u32::MAX);
        return DbError::timeout("connection pool acquire", secs);
    }
    let suggestion = connection_suggestion(&error);
    match DbError::from(error) {
        DbError::Connection { message, .. } => DbError::connection(message, suggestion),
        other => other,
    }
}

/// Connect options for the configured cluster.
///
/// Secure mode verifies the server against `ca.crt` and authenticates with the
/// user's client certificate. Host names are not checked.
pub fn connect_options(config: &Config) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&config.db_host)
        .port(config.db_port)
        .username(&config.db_user)
        .database(&config.db_name)
        .application_name(&config.app_name);

    if config.db_insecure {
        options.ssl_mode(PgSslMode::Disable)
    } else {
        let tls = config.tls_files();
        options
            .ssl_mode(PgSslMode::VerifyCa)
            .ssl_root_cert(&tls.ca)
            .ssl_client_cert(&tls.cert)
            .ssl_client_key(&tls.key)
    }
}

/// Create the connection pool for the given configuration.
///
/// Must be called from within a Tokio runtime.
pub fn create_pool(config: &Config) -> DbResult<PgPool> {
    let pool_opts = &config.pool;
    pool_opts
        .validate()
        .map_err(|e| DbError::Config(ConfigError::InvalidPoolOptions(e)))?;

    let pool = PgPoolOptions::new()
        .min_connections(pool_opts.min_connections_or_default())
        .max_connections(pool_opts.max_connections_or_default())
        .acquire_timeout(pool_opts.acquire_timeout_or_default())
        .idle_timeout(Some(pool_opts.idle_timeout_or_default()))
        .connect_lazy_with(connect_options(config));

    info!(
        host = %config.db_host,
        port = config.db_port,
        database = %config.db_name,
        user = %config.db_user,
        insecure = config.db_insecure,
        max_connections = pool_opts.max_connections_or_default(),
        "Database pool created"
    );
    Ok(pool)
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(error: &sqlx::Error) -> &'static str {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return "Check that the CockroachDB node is running and reachable on --db-host/--db-port";
    }

    if error_str.contains("certificate") || error_str.contains("tls") || error_str.contains("ssl")
    {
        return "Check the files in --db-certs-path or run with --db-insecure";
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify --db-user and its client certificate";
    }

    if error_str.contains("does not exist") {
        return "Check that the database named by --db-name exists";
    }

    "Check the database host, port, user and certificates"
}
