//! Leased connections.

use crate::db::executor::DbConnection;
use crate::db::querier::Querier;
use tracing::{debug, warn};

/// RAII lease on one pooled connection.
///
/// The connection goes back to the pool exactly once, when the lease is dropped.
/// This holds on every path, including errors and cancelled futures.
///
/// # Cancellation
///
/// A lease dropped while a transaction is still open (the caller gave up on a
/// `write` mid-flight) cannot know what state the server session is in. Such a
/// connection is closed rather than reused.
///
/// # Usage
///
/// ```ignore
/// let mut lease = db.connection().await?;
/// let rows = lease.querier().query("SELECT now()").await?;
/// lease.release();
/// ```
pub struct ConnectionLease<C: DbConnection> {
    conn: C,
    in_transaction: bool,
}

impl<C: DbConnection> std::fmt::Debug for ConnectionLease<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl<C: DbConnection> ConnectionLease<C> {
    pub(crate) fn new(conn: C) -> Self {
        debug!("Connection acquired");
        Self {
            conn,
            in_transaction: false,
        }
    }

    /// A querier bound to this connection.
    pub fn querier(&mut self) -> Querier<'_, C> {
        Querier::new(&mut self.conn)
    }

    /// Whether a transaction opened through this lease has not finished yet.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub(crate) fn conn_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    pub(crate) fn set_in_transaction(&mut self, open: bool) {
        self.in_transaction = open;
    }

    /// Return the connection to the pool now.
    pub fn release(self) {
        drop(self);
    }
}

impl<C: DbConnection> Drop for ConnectionLease<C> {
    fn drop(&mut self) {
        if self.in_transaction {
            warn!("Connection released with an open transaction, closing it");
            self.conn.close_on_release();
        }
        debug!("Connection released");
    }
}
