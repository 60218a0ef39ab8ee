//! Query execution with error classification.

use crate::db::builder;
use crate::db::executor::DbConnection;
use crate::error::{DbResult, ErrorClass};
use crate::models::{Fill, Query, Row};
use tracing::{debug, error};

/// Runs queries on a borrowed connection.
///
/// Handed to `read` and `write` callbacks. A querier inside a `write` runs within
/// the open transaction.
pub struct Querier<'c, C> {
    conn: &'c mut C,
}

impl<'c, C: DbConnection> Querier<'c, C> {
    pub(crate) fn new(conn: &'c mut C) -> Self {
        Self { conn }
    }

    /// Run raw query text or a pre-built [`Query`].
    pub async fn query(&mut self, query: impl Into<Query>) -> DbResult<Vec<Row>> {
        let query = query.into();
        match self.conn.fetch_all(&query).await {
            Ok(rows) => {
                debug!(sql = %query.text, rows = rows.len(), "Query executed");
                Ok(rows)
            }
            Err(err) => {
                match err.class() {
                    ErrorClass::SyntaxError | ErrorClass::NotNullViolation => {
                        error!(sql = %query.text, error = %err, "Query failed");
                        debug!(values = ?query.values, "Values of the failed query");
                    }
                    ErrorClass::SerializationFailure | ErrorClass::Other => {}
                }
                Err(err)
            }
        }
    }

    /// Substitute `fills` into `template` and run the result.
    ///
    /// Template errors are reported without touching the database.
    pub async fn query_with(&mut self, template: &str, fills: &[Fill]) -> DbResult<Vec<Row>> {
        let query = builder::prepare(template, fills)?;
        self.query(query).await
    }
}
