//! Background database sessions with shared timeout budgets
//!
//! Long-running queries and stored procedures are started as background
//! sessions and polled for progress, while every call is bounded by a
//! shrinking [`TimeoutBudget`]. Supports PostgreSQL, MySQL, MariaDB and
//! SQLite through sqlx's `Any` driver.

pub mod budget;
pub mod cancel;
pub mod config;
pub mod connection;
pub mod dsn;
pub mod error;
pub mod retry;
pub mod session;
pub mod source;
pub mod types;
pub mod validate;

// Re-export secrecy types for consumers
pub use secrecy::{ExposeSecret, SecretString};

pub use budget::{TimeoutBudget, combine_cancellation, command_timeout};
pub use cancel::CancelSignal;
pub use config::SessionConfig;
pub use connection::{DatabaseConnection, setup_database_pool, warmup_pool};
pub use dsn::{extract_database, redact_dsn, validate_dsn};
pub use error::{DatabaseError, SessionError};
pub use retry::run_with_budget;
pub use session::{CancelOutcome, Session, SessionManager, SessionSnapshot};
pub use source::{DataSource, OpenOptions, RowStream, SqlxDataSource};
pub use types::{DatabaseType, ProcedureParameters, SessionId, SessionKind, SessionStatus};

use anyhow::Context;
use std::sync::Arc;

/// Connect to the configured database and build a session manager over it
///
/// # Errors
/// Returns error if the configuration is invalid or the database is
/// unreachable
pub async fn connect_session_manager(config: &SessionConfig) -> anyhow::Result<Arc<SessionManager>> {
    config.validate()?;
    let connection = setup_database_pool(config).await?;
    let source = SqlxDataSource::new(
        connection.pool,
        connection.connection_url.expose_secret(),
        config.clone(),
    )
    .context("Failed to create data source")?;

    Ok(Arc::new(SessionManager::new(Arc::new(source), config)))
}
