//! Error types for backend-kit.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Database errors keep their SQLSTATE so callers (and the transaction retry engine)
//! can classify them without parsing messages.

use crate::config::ConfigError;
use thiserror::Error;

/// SQLSTATE reported when a serializable transaction must be retried.
pub const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE for a syntax error.
pub const SQLSTATE_SYNTAX_ERROR: &str = "42601";
/// SQLSTATE for a NOT NULL constraint violation.
pub const SQLSTATE_NOT_NULL_VIOLATION: &str = "23502";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "40001" for a serialization failure
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Query with {placeholders} placeholders was provided {fillers} fillers")]
    PlaceholderMismatch { placeholders: usize, fillers: usize },

    #[error("Placeholder({placeholder}) does not match value type ({value})")]
    PlaceholderType { placeholder: String, value: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse classification of a failed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Concurrent transactions conflicted; the whole transaction may be retried.
    SerializationFailure,
    SyntaxError,
    NotNullViolation,
    Other,
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a serialization failure, as reported by the database on a conflict.
    pub fn serialization_failure(message: impl Into<String>) -> Self {
        Self::database(
            message,
            Some(SQLSTATE_SERIALIZATION_FAILURE.to_string()),
            "Retry the transaction",
        )
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a placeholder type mismatch error.
    pub fn placeholder_type(placeholder: impl Into<String>, value: impl Into<String>) -> Self {
        Self::PlaceholderType {
            placeholder: placeholder.into(),
            value: value.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// SQLSTATE of a database error.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Classify a database error.
    ///
    /// The SQLSTATE decides when the driver reports one. Message prefixes are only
    /// a fallback for errors without a code, and depend on the server's locale and
    /// version.
    pub fn class(&self) -> ErrorClass {
        let Self::Database {
            message, sql_state, ..
        } = self
        else {
            return ErrorClass::Other;
        };

        match sql_state.as_deref() {
            Some(SQLSTATE_SERIALIZATION_FAILURE) => ErrorClass::SerializationFailure,
            Some(SQLSTATE_SYNTAX_ERROR) => ErrorClass::SyntaxError,
            Some(SQLSTATE_NOT_NULL_VIOLATION) => ErrorClass::NotNullViolation,
            Some(_) => ErrorClass::Other,
            None if message.starts_with("syntax error") => ErrorClass::SyntaxError,
            None if message.starts_with("null value in column") => ErrorClass::NotNullViolation,
            None => ErrorClass::Other,
        }
    }

    /// Check if the transaction that produced this error may be retried.
    pub fn is_serialization_failure(&self) -> bool {
        self.class() == ErrorClass::SerializationFailure
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the database host, port, user and certificates",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let suggestion = match code.as_deref() {
                    Some(SQLSTATE_SERIALIZATION_FAILURE) => "Retry the transaction",
                    _ => "Check the SQL syntax and referenced objects",
                };
                DbError::database(db_err.message(), code, suggestion)
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            // The pool layer substitutes its configured timeout.
            sqlx::Error::PoolTimedOut => DbError::timeout(
                "connection pool acquire",
                crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS as u32,
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
