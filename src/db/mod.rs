//! Database access layer.
//!
//! - Connection pool and leased connections
//! - Query builder for `$$`/`$$$` templates and multi-row inserts
//! - Querier with error classification
//! - Transaction retry engine for serialization conflicts
//! - The [`Db`] facade tying them together

pub mod builder;
pub mod connection;
pub mod executor;
pub mod facade;
pub(crate) mod params;
pub mod pool;
pub mod querier;
pub mod retry;
pub mod types;

pub use connection::ConnectionLease;
pub use executor::DbConnection;
pub use facade::{Db, HealthReport, HealthState};
pub use pool::{ConnectionPool, connect_options, create_pool};
pub use querier::Querier;
pub use retry::{DEFAULT_RETRIES, RetryPolicy, SAVEPOINT, run_transaction};
