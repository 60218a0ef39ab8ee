//! Statement execution on a single connection.
//!
//! [`DbConnection`] is the seam between the transaction machinery and the driver.
//! The production implementation runs on a pooled PostgreSQL-protocol connection.
//! Tests substitute an in-memory connection.

use crate::db::params::bind_all;
use crate::db::types::RowToJson;
use crate::error::DbResult;
use crate::models::{Query, Row};
use sqlx::{Executor, PgConnection, Postgres};
use sqlx::pool::PoolConnection;
use std::future::Future;

/// One physical database connection.
pub trait DbConnection: Send {
    /// Run one or more statements as a simple query. No values, no rows.
    fn execute_raw(&mut self, sql: &str) -> impl Future<Output = DbResult<()>> + Send;

    /// Run a query and collect every result row. Values bind to positional placeholders.
    fn fetch_all(&mut self, query: &Query) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    /// Ask for the connection to be closed instead of reused once released.
    fn close_on_release(&mut self) {}
}

impl DbConnection for PoolConnection<Postgres> {
    async fn execute_raw(&mut self, sql: &str) -> DbResult<()> {
        // Multi-statement text such as `BEGIN; SAVEPOINT ...` needs the simple protocol.
        let conn: &mut PgConnection = &mut *self;
        conn.execute(sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn fetch_all(&mut self, query: &Query) -> DbResult<Vec<Row>> {
        // Text without values runs unprepared, so scripts of several statements work.
        let conn: &mut PgConnection = &mut *self;
        let rows = if query.values.is_empty() {
            conn.fetch_all(sqlx::raw_sql(&query.text)).await?
        } else {
            conn.fetch_all(bind_all(&query.text, &query.values)).await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    fn close_on_release(&mut self) {
        self.close_on_drop();
    }
}
