//! Error types for database sessions

use thiserror::Error;

/// Database operation errors
///
/// Raised by the data-access layer. Background workers never propagate
/// these to callers; they are captured into the session's terminal state.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQL query execution failed
    #[error("Query error: {0}")]
    QueryError(String),

    /// Identifier rejected before being interpolated into SQL
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Database type not supported
    #[error("Unsupported database: {0}")]
    UnsupportedDatabase(String),

    /// Feature not supported for this database
    #[error("Feature not supported: {0}")]
    FeatureNotSupported(String),

    /// Command or total call timeout elapsed
    #[error("{0}")]
    Timeout(String),

    /// Execution stopped because a cancellation signal fired
    #[error("{0}")]
    Cancelled(String),

    /// sqlx database error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Whether this error was caused by cancellation or a deadline rather
    /// than by the database itself
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled(_) | Self::Timeout(_))
    }
}

/// Errors surfaced synchronously when starting a background session
///
/// Nothing is recorded in the session set when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Query text or procedure name was empty or whitespace-only
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Concurrent session ceiling reached
    #[error("Maximum concurrent sessions ({max}) reached")]
    CapacityExceeded { max: usize },

    /// Sessions are started from a thread with no tokio runtime to run them
    #[error("No tokio runtime is available to run background sessions")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_message_names_limit() {
        let err = SessionError::CapacityExceeded { max: 3 };
        assert_eq!(err.to_string(), "Maximum concurrent sessions (3) reached");
    }

    #[test]
    fn test_interruption_classification() {
        assert!(DatabaseError::Cancelled("stop".to_string()).is_interruption());
        assert!(DatabaseError::Timeout("late".to_string()).is_interruption());
        assert!(!DatabaseError::QueryError("syntax".to_string()).is_interruption());
    }

    #[test]
    fn test_cancelled_message_is_verbatim() {
        let err = DatabaseError::Cancelled("Query execution was cancelled".to_string());
        assert_eq!(err.to_string(), "Query execution was cancelled");
    }
}
