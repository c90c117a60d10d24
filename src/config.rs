//! Session and timeout configuration
//!
//! Values are read from environment variables; every field has a default so
//! an empty environment yields a usable in-memory SQLite setup.

use crate::budget::TimeoutBudget;
use anyhow::{Context, Result, bail};
use secrecy::SecretString;
use std::num::NonZeroU64;
use std::time::Duration;

/// Configuration consumed by the session core and the SQL data source
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Database connection string
    pub dsn: SecretString,

    /// Per-command timeout used when no budget is tighter
    pub default_command_timeout_secs: u64,

    /// Pool acquire timeout
    pub connection_timeout_secs: u64,

    /// Ceiling on sessions in the running state
    pub max_concurrent_sessions: usize,

    /// How long terminal sessions stay visible before cleanup evicts them
    pub session_retention_minutes: u64,

    /// Total deadline for one tool call; `None` disables budgeting
    pub total_tool_call_timeout_secs: Option<NonZeroU64>,

    /// Retries for transient connection errors (attempts = retries + 1)
    pub max_retries: u32,

    /// Base retry backoff
    pub retry_backoff_ms: u64,

    /// Retry backoff cap
    pub max_backoff_ms: u64,

    pub db_max_connections: u32,

    pub db_min_connections: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dsn: SecretString::from("sqlite::memory:".to_string()),
            default_command_timeout_secs: 30,
            connection_timeout_secs: 15,
            max_concurrent_sessions: 10,
            session_retention_minutes: 60,
            total_tool_call_timeout_secs: NonZeroU64::new(120),
            max_retries: 2,
            retry_backoff_ms: 500,
            max_backoff_ms: 5000,
            db_max_connections: 10,
            db_min_connections: 2,
        }
    }
}

impl SessionConfig {
    /// Load configuration from process environment variables
    ///
    /// # Environment Variables
    /// * `DATABASE_DSN` - Database connection string (defaults to `sqlite::memory:`)
    /// * `DEFAULT_COMMAND_TIMEOUT_SECONDS` - Per-command timeout (default: 30)
    /// * `CONNECTION_TIMEOUT_SECONDS` - Pool acquire timeout (default: 15)
    /// * `MAX_CONCURRENT_SESSIONS` - Running session ceiling (default: 10)
    /// * `SESSION_CLEANUP_INTERVAL_MINUTES` - Terminal session retention (default: 60)
    /// * `TOTAL_TOOL_CALL_TIMEOUT_SECONDS` - Total call deadline (default: 120, `0`/`none` disables)
    /// * `DB_MAX_RETRIES`, `DB_RETRY_BACKOFF_MS`, `DB_MAX_BACKOFF_MS` - Retry policy
    /// * `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS` - Pool sizing
    ///
    /// # Errors
    /// Returns error if a variable is set but cannot be parsed, or if the
    /// resulting configuration fails [`validate`](Self::validate)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let dsn = match lookup("DATABASE_DSN") {
            Some(dsn) => SecretString::from(dsn),
            None => {
                log::info!("DATABASE_DSN not set, defaulting to sqlite::memory:");
                defaults.dsn
            }
        };

        let total_tool_call_timeout_secs = match lookup("TOTAL_TOOL_CALL_TIMEOUT_SECONDS") {
            None => defaults.total_tool_call_timeout_secs,
            Some(raw) if raw.trim().eq_ignore_ascii_case("none") => None,
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .context("TOTAL_TOOL_CALL_TIMEOUT_SECONDS must be a whole number of seconds")?;
                NonZeroU64::new(secs)
            }
        };

        let config = Self {
            dsn,
            default_command_timeout_secs: parse_or(
                &lookup,
                "DEFAULT_COMMAND_TIMEOUT_SECONDS",
                defaults.default_command_timeout_secs,
            )?,
            connection_timeout_secs: parse_or(
                &lookup,
                "CONNECTION_TIMEOUT_SECONDS",
                defaults.connection_timeout_secs,
            )?,
            max_concurrent_sessions: parse_or(
                &lookup,
                "MAX_CONCURRENT_SESSIONS",
                defaults.max_concurrent_sessions,
            )?,
            session_retention_minutes: parse_or(
                &lookup,
                "SESSION_CLEANUP_INTERVAL_MINUTES",
                defaults.session_retention_minutes,
            )?,
            total_tool_call_timeout_secs,
            max_retries: parse_or(&lookup, "DB_MAX_RETRIES", defaults.max_retries)?,
            retry_backoff_ms: parse_or(&lookup, "DB_RETRY_BACKOFF_MS", defaults.retry_backoff_ms)?,
            max_backoff_ms: parse_or(&lookup, "DB_MAX_BACKOFF_MS", defaults.max_backoff_ms)?,
            db_max_connections: parse_or(
                &lookup,
                "DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )?,
            db_min_connections: parse_or(
                &lookup,
                "DB_MIN_CONNECTIONS",
                defaults.db_min_connections,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the session core cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            bail!("MAX_CONCURRENT_SESSIONS must be at least 1");
        }
        if self.db_max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be at least 1");
        }
        if self.db_min_connections > self.db_max_connections {
            bail!(
                "DB_MIN_CONNECTIONS ({}) cannot exceed DB_MAX_CONNECTIONS ({})",
                self.db_min_connections,
                self.db_max_connections
            );
        }
        Ok(())
    }

    /// Budget for one incoming call, or `None` when no total deadline is configured
    pub fn call_budget(&self) -> Option<TimeoutBudget> {
        self.total_tool_call_timeout_secs.map(TimeoutBudget::new)
    }

    pub fn default_command_timeout(&self) -> Duration {
        Duration::from_secs(self.default_command_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn session_retention(&self) -> chrono::Duration {
        i64::try_from(self.session_retention_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number, got '{}'", key, raw)),
        None => Ok(default),
    }
}
