//! Type definitions for database sessions

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Named procedure parameters, in the order the caller supplied them
///
/// `serde_json` is built with `preserve_order`, so positional dialects
/// (MySQL `CALL`) bind values in insertion order.
pub type ProcedureParameters = serde_json::Map<String, serde_json::Value>;

/// Process-unique handle of a background session
///
/// Allocated from a per-manager monotonically increasing counter and
/// never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a session executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Query,
    StoredProcedure,
}

/// Lifecycle state of a session
///
/// `Running` is the only non-terminal state. The three terminal states are
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Database type for SQL dialect-specific handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    Postgres,
    MySQL,
    MariaDB,
    SQLite,
    SqlServer, // Included for future sqlx mssql support
}

impl DatabaseType {
    /// Detect database type from connection URL scheme
    ///
    /// # Examples
    /// ```
    /// # use kodegen_tools_db_sessions::types::DatabaseType;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = DatabaseType::from_url("postgres://localhost/mydb")?;
    /// assert_eq!(db, DatabaseType::Postgres);
    /// assert_eq!(DatabaseType::from_url("sqlite::memory:")?, DatabaseType::SQLite);
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_url(url: &str) -> Result<Self, crate::error::DatabaseError> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else if url.starts_with("mysql://") {
            Ok(Self::MySQL)
        } else if url.starts_with("mariadb://") {
            Ok(Self::MariaDB)
        } else if url.starts_with("sqlite:") || url.starts_with("file:") {
            Ok(Self::SQLite)
        } else if url.starts_with("sqlserver://") || url.starts_with("mssql://") {
            Ok(Self::SqlServer)
        } else {
            Err(crate::error::DatabaseError::UnsupportedDatabase(format!(
                "Cannot determine database type from URL: {}",
                crate::dsn::redact_dsn(url)
            )))
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres => write!(f, "PostgreSQL"),
            Self::MySQL => write!(f, "MySQL"),
            Self::MariaDB => write!(f, "MariaDB"),
            Self::SQLite => write!(f, "SQLite"),
            Self::SqlServer => write!(f, "SQL Server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Cancelled);
        assert!(json.is_ok(), "serialize failed: {:?}", json.err());
        if let Ok(json) = json {
            assert_eq!(json, "\"cancelled\"");
        }
    }

    #[test]
    fn test_only_running_is_non_terminal() {
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_detects_mysql_and_rejects_unknown() {
        assert!(matches!(
            DatabaseType::from_url("mysql://root@localhost/app"),
            Ok(DatabaseType::MySQL)
        ));
        assert!(DatabaseType::from_url("oracle://scott@tiger").is_err());
    }

    #[test]
    fn test_procedure_parameters_keep_insertion_order() {
        let params: Result<ProcedureParameters, _> =
            serde_json::from_str(r#"{"zeta": 1, "alpha": 2, "mid": 3}"#);
        assert!(params.is_ok(), "parse failed: {:?}", params.err());
        if let Ok(params) = params {
            let keys: Vec<&str> = params.keys().map(String::as_str).collect();
            assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        }
    }
}
