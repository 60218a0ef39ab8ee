//! In-memory pool and connection for exercising the database layer without a server.
//!
//! The connection models savepoint semantics: statements run inside a transaction
//! stay pending until `RELEASE SAVEPOINT ...; COMMIT` and are discarded by either
//! rollback. Failures are scripted per statement text.

#![allow(dead_code)]

use backend_kit::db::{ConnectionPool, DbConnection};
use backend_kit::error::{DbError, DbResult};
use backend_kit::models::{Query, Row};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const BEGIN: &str = "BEGIN; SAVEPOINT cockroach_restart";
pub const COMMIT: &str = "RELEASE SAVEPOINT cockroach_restart; COMMIT";
pub const ROLLBACK_TO_SAVEPOINT: &str = "ROLLBACK TO SAVEPOINT cockroach_restart";
pub const ROLLBACK: &str = "ROLLBACK";

struct Failure {
    statement: String,
    remaining: usize,
    sql_state: &'static str,
    message: &'static str,
}

#[derive(Default)]
pub struct MockState {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub closed: AtomicUsize,
    statements: Mutex<Vec<String>>,
    committed: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<Failure>>,
}

impl MockState {
    /// Every statement sent, in order, across all connections.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    /// Statements whose effects are durable.
    pub fn committed(&self) -> Vec<String> {
        self.committed.lock().unwrap().clone()
    }

    pub fn count(&self, statement: &str) -> usize {
        self.statements()
            .iter()
            .filter(|s| s.as_str() == statement)
            .count()
    }

    fn record(&self, statement: &str) -> DbResult<()> {
        self.statements.lock().unwrap().push(statement.to_string());

        let mut failures = self.failures.lock().unwrap();
        let Some(failure) = failures
            .iter_mut()
            .find(|f| f.statement == statement && f.remaining > 0)
        else {
            return Ok(());
        };
        failure.remaining -= 1;
        Err(DbError::database(
            failure.message,
            Some(failure.sql_state.to_string()),
            "",
        ))
    }
}

pub struct MockPool {
    pub state: Arc<MockState>,
    permits: Arc<Semaphore>,
}

impl MockPool {
    pub fn new(max_connections: usize) -> Self {
        Self {
            state: Arc::new(MockState::default()),
            permits: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Make `statement` fail `times` times with the given SQLSTATE.
    pub fn fail(&self, statement: &str, times: usize, sql_state: &'static str) {
        let message = match sql_state {
            "40001" => "restart transaction: TransactionRetryWithProtoRefreshError",
            "42601" => "syntax error at or near \"SELEC\"",
            "23502" => "null value in column \"name\" violates not-null constraint",
            _ => "statement failed",
        };
        self.state.failures.lock().unwrap().push_back(Failure {
            statement: statement.to_string(),
            remaining: times,
            sql_state,
            message,
        });
    }

    pub fn leased(&self) -> usize {
        self.state.acquired.load(Ordering::SeqCst) - self.state.released.load(Ordering::SeqCst)
    }
}

impl ConnectionPool for MockPool {
    type Connection = MockConnection;

    async fn acquire(&self) -> DbResult<MockConnection> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| DbError::connection("pool closed", ""))?;
        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
            in_transaction: false,
            close: false,
            _permit: permit,
        })
    }
}

pub struct MockConnection {
    state: Arc<MockState>,
    pending: Vec<String>,
    in_transaction: bool,
    close: bool,
    _permit: OwnedSemaphorePermit,
}

impl DbConnection for MockConnection {
    async fn execute_raw(&mut self, sql: &str) -> DbResult<()> {
        tokio::task::yield_now().await;
        self.state.record(sql)?;
        match sql {
            BEGIN => {
                self.in_transaction = true;
                self.pending.clear();
            }
            ROLLBACK_TO_SAVEPOINT => self.pending.clear(),
            COMMIT => {
                self.state
                    .committed
                    .lock()
                    .unwrap()
                    .extend(self.pending.drain(..));
                self.in_transaction = false;
            }
            ROLLBACK => {
                self.pending.clear();
                self.in_transaction = false;
            }
            other => self.apply(other),
        }
        Ok(())
    }

    async fn fetch_all(&mut self, query: &Query) -> DbResult<Vec<Row>> {
        tokio::task::yield_now().await;
        self.state.record(&query.text)?;
        self.apply(&query.text);

        if query.text.contains("1+2") {
            let row = json!({ "result": 3 });
            return Ok(vec![row.as_object().cloned().unwrap_or_default()]);
        }
        Ok(Vec::new())
    }

    fn close_on_release(&mut self) {
        self.close = true;
    }
}

impl MockConnection {
    fn apply(&mut self, statement: &str) {
        if self.in_transaction {
            self.pending.push(statement.to_string());
        } else {
            self.state
                .committed
                .lock()
                .unwrap()
                .push(statement.to_string());
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.released.fetch_add(1, Ordering::SeqCst);
        if self.close {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
