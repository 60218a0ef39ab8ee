//! Transaction retry engine.
//!
//! CockroachDB runs at SERIALIZABLE isolation and reports contention as SQLSTATE
//! `40001`. A write therefore runs inside `BEGIN; SAVEPOINT cockroach_restart` and,
//! on a conflict, rolls back to the savepoint and runs the transaction function
//! again. Each attempt ends with `RELEASE SAVEPOINT` and `COMMIT`, so a conflict
//! reported at commit time is retried like any other.
//!
//! ```text
//! BEGIN ─▶ attempt ─▶ commit ─▶ COMMITTED
//!             ▲  │
//!             │  ├─ 40001, budget left ─▶ ROLLBACK TO SAVEPOINT ─┐
//!             └──┼───────────── jitter ◀─────────────────────────┘
//!                └─ other error / budget spent ─▶ ROLLBACK ─▶ error
//! ```

use crate::db::connection::ConnectionLease;
use crate::db::executor::DbConnection;
use crate::db::querier::Querier;
use crate::error::DbResult;
use futures_util::future::BoxFuture;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Name of the retry savepoint. Fixed, so writes cannot nest.
pub const SAVEPOINT: &str = "cockroach_restart";

/// Default number of attempts per write.
pub const DEFAULT_RETRIES: u32 = 20;

/// Default upper bound of the pause before a retry.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(100);

const BEGIN: &str = "BEGIN; SAVEPOINT cockroach_restart";
const COMMIT: &str = "RELEASE SAVEPOINT cockroach_restart; COMMIT";
const ROLLBACK_TO_SAVEPOINT: &str = "ROLLBACK TO SAVEPOINT cockroach_restart";
const ROLLBACK: &str = "ROLLBACK";

/// Retry settings for one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Retries wait a uniformly random time in `0..=max_jitter`.
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRIES,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

/// Run `f` in a transaction on `lease`, retrying serialization conflicts.
///
/// Returns the value of the first attempt that commits. Any other outcome rolls
/// the transaction back completely and returns the error of the last attempt.
pub async fn run_transaction<C, F, T>(
    lease: &mut ConnectionLease<C>,
    policy: RetryPolicy,
    mut f: F,
) -> DbResult<T>
where
    C: DbConnection,
    F: for<'q> FnMut(Querier<'q, C>) -> BoxFuture<'q, DbResult<T>> + Send,
    T: Send,
{
    // Marked before BEGIN: a cancelled or half-started transaction must not reach the pool.
    lease.set_in_transaction(true);

    let result = match lease.conn_mut().execute_raw(BEGIN).await {
        Ok(()) => attempt_loop(lease.conn_mut(), policy, &mut f).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(value) => {
            lease.set_in_transaction(false);
            Ok(value)
        }
        Err(err) => {
            match lease.conn_mut().execute_raw(ROLLBACK).await {
                Ok(()) => lease.set_in_transaction(false),
                Err(rollback_err) => {
                    warn!(error = %rollback_err, "Transaction rollback failed");
                }
            }
            Err(err)
        }
    }
}

async fn attempt_loop<C, F, T>(conn: &mut C, policy: RetryPolicy, f: &mut F) -> DbResult<T>
where
    C: DbConnection,
    F: for<'q> FnMut(Querier<'q, C>) -> BoxFuture<'q, DbResult<T>> + Send,
    T: Send,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        if attempt > 1 {
            let delay = policy.jitter();
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }

        let err = match attempt_once(conn, f).await {
            Ok(value) => {
                debug!(attempt, "Transaction committed");
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_serialization_failure() {
            return Err(err);
        }
        if attempt >= max_attempts {
            error!(
                attempts = attempt,
                error = %err,
                "Transaction conflict, out of retries"
            );
            return Err(err);
        }

        debug!(attempt, error = %err, "Transaction conflict, retrying");
        conn.execute_raw(ROLLBACK_TO_SAVEPOINT).await?;
        attempt += 1;
    }
}

async fn attempt_once<C, F, T>(conn: &mut C, f: &mut F) -> DbResult<T>
where
    C: DbConnection,
    F: for<'q> FnMut(Querier<'q, C>) -> BoxFuture<'q, DbResult<T>> + Send,
    T: Send,
{
    let value = f(Querier::new(conn)).await?;
    conn.execute_raw(COMMIT).await?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 20);
        assert_eq!(policy.max_jitter, Duration::from_millis(100));
    }

    #[test]
    fn test_zero_attempts_runs_once() {
        assert_eq!(RetryPolicy::new(0).attempts(), 1);
        assert_eq!(RetryPolicy::new(5).attempts(), 5);
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            assert!(policy.jitter() <= Duration::from_millis(100));
        }
        let policy = policy.with_max_jitter(Duration::ZERO);
        assert_eq!(policy.jitter(), Duration::ZERO);
    }

    #[test]
    fn test_statements_use_savepoint() {
        assert!(BEGIN.ends_with(SAVEPOINT));
        assert!(COMMIT.contains(SAVEPOINT));
        assert!(ROLLBACK_TO_SAVEPOINT.ends_with(SAVEPOINT));
    }
}
