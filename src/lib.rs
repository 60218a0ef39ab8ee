//! backend-kit library.
//!
//! Database access for services backed by CockroachDB: a connection pool, a
//! placeholder-based query builder, and write transactions that retry
//! serialization conflicts. Configuration and logging setup come with it.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;

pub use config::Config;
pub use db::{Db, Querier};
pub use error::{DbError, DbResult};
pub use models::{DbValue, Fill, Query};
