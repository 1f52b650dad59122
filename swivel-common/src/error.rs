//! Common error types for Swivel

use thiserror::Error;

/// Common result type for Swivel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Swivel crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the persistence substrate as a whole cannot be reached
    ///
    /// Pool exhaustion, a closed pool and I/O failures affect every device
    /// alike. Anything else (constraint violations, a missing row, a bad
    /// decode) is scoped to the record being written.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Error::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            Error::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_unavailable() {
        let err = Error::Database(sqlx::Error::PoolTimedOut);
        assert!(err.is_unavailable());

        let err = Error::Database(sqlx::Error::PoolClosed);
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_row_level_errors_are_not_unavailable() {
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_unavailable());
        assert!(!Error::NotFound("device".to_string()).is_unavailable());
        assert!(!Error::InvalidInput("rssi".to_string()).is_unavailable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Config("missing database_path".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing database_path");
    }
}
