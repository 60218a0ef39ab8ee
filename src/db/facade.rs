//! Database facade: the entry point application code talks to.

use crate::config::Config;
use crate::db::connection::ConnectionLease;
use crate::db::pool::{ConnectionPool, create_pool};
use crate::db::querier::Querier;
use crate::db::retry::{DEFAULT_RETRIES, RetryPolicy, run_transaction};
use crate::error::DbResult;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::time::Instant;
use tracing::{debug, info, warn};

const HEALTH_QUERY: &str = "SELECT 1+2 AS result";

/// Outcome of [`Db::health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// The probe query returned the expected answer.
    Ok,
    /// The probe query ran but returned something else.
    Error,
    /// The probe query failed.
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub health: HealthState,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared handle to the connection pool.
///
/// Clone it or wrap it in an `Arc` to share between tasks.
#[derive(Debug, Clone)]
pub struct Db<P: ConnectionPool = PgPool> {
    pool: P,
}

impl Db<PgPool> {
    /// Validate the configuration and build the pool.
    ///
    /// No connection is opened here; the first one is dialed on first use.
    pub fn new(config: &Config) -> DbResult<Self> {
        config.validate_db()?;
        let pool = create_pool(config)?;
        Ok(Self { pool })
    }

    /// Close every connection and refuse further acquisitions.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}

impl<P: ConnectionPool> Db<P> {
    pub fn with_pool(pool: P) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Lease a connection. Waits while the pool is exhausted.
    pub async fn connection(&self) -> DbResult<ConnectionLease<P::Connection>> {
        let conn = self.pool.acquire().await?;
        Ok(ConnectionLease::new(conn))
    }

    /// Run `f` once on a leased connection, outside any explicit transaction.
    pub async fn read<F, T>(&self, f: F) -> DbResult<T>
    where
        F: for<'q> FnOnce(Querier<'q, P::Connection>) -> BoxFuture<'q, DbResult<T>> + Send,
        T: Send,
    {
        let mut lease = self.connection().await?;
        f(lease.querier()).await
    }

    /// Run `f` in a transaction, retrying conflicts up to [`DEFAULT_RETRIES`] attempts.
    ///
    /// `f` may run more than once and must not have side effects outside the
    /// database.
    ///
    /// ```ignore
    /// let rows = db
    ///     .write(|mut q| {
    ///         Box::pin(async move {
    ///             q.query("UPDATE counters SET n = n + 1 WHERE id = 1").await?;
    ///             q.query("SELECT n FROM counters WHERE id = 1").await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn write<F, T>(&self, f: F) -> DbResult<T>
    where
        F: for<'q> FnMut(Querier<'q, P::Connection>) -> BoxFuture<'q, DbResult<T>> + Send,
        T: Send,
    {
        self.write_with_retries(f, DEFAULT_RETRIES).await
    }

    /// Like [`Db::write`] with a custom attempt budget.
    pub async fn write_with_retries<F, T>(&self, f: F, max_attempts: u32) -> DbResult<T>
    where
        F: for<'q> FnMut(Querier<'q, P::Connection>) -> BoxFuture<'q, DbResult<T>> + Send,
        T: Send,
    {
        self.write_with_policy(RetryPolicy::new(max_attempts), f)
            .await
    }

    /// Like [`Db::write`] with full control over the retry policy.
    pub async fn write_with_policy<F, T>(&self, policy: RetryPolicy, f: F) -> DbResult<T>
    where
        F: for<'q> FnMut(Querier<'q, P::Connection>) -> BoxFuture<'q, DbResult<T>> + Send,
        T: Send,
    {
        let mut lease = self.connection().await?;
        run_transaction(&mut lease, policy, f).await
    }

    /// Probe the database with a trivial query.
    pub async fn health(&self) -> HealthReport {
        let start = Instant::now();
        let result = self
            .read(|mut q| Box::pin(async move { q.query(HEALTH_QUERY).await }))
            .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(rows) => {
                let answer = rows.first().and_then(|row| row.get("result"));
                let health = if answer.is_some_and(is_three) {
                    HealthState::Ok
                } else {
                    HealthState::Error
                };
                debug!(?health, elapsed_ms, "Health check");
                HealthReport {
                    health,
                    elapsed_ms,
                    error: None,
                }
            }
            Err(err) => {
                warn!(error = %err, elapsed_ms, "Health check failed");
                HealthReport {
                    health: HealthState::Down,
                    elapsed_ms,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

fn is_three(value: &JsonValue) -> bool {
    match value {
        JsonValue::Number(n) => n.as_f64() == Some(3.0),
        JsonValue::String(s) => s.trim().parse::<f64>().ok() == Some(3.0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_three() {
        assert!(is_three(&json!(3)));
        assert!(is_three(&json!("3")));
        assert!(!is_three(&json!(4)));
        assert!(!is_three(&json!(null)));
    }

    #[test]
    fn test_health_report_serializes() {
        let report = HealthReport {
            health: HealthState::Ok,
            elapsed_ms: 4,
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"health": "ok", "elapsed_ms": 4})
        );
    }

    #[test]
    fn test_new_rejects_missing_certs() {
        let config = Config {
            db_certs_path: "/nonexistent/certs".to_string(),
            ..Config::default_config()
        };
        assert!(matches!(
            Db::new(&config),
            Err(crate::error::DbError::Config(_))
        ));
    }
}
