//! Database connection setup and pooling utilities
//!
//! Builds the shared `AnyPool` used by [`SqlxDataSource`](crate::source::SqlxDataSource)
//! and warms it up before any session is accepted.

use crate::config::SessionConfig;
use crate::dsn::{redact_dsn, validate_dsn};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Idle connections are closed after this long
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Connections are recycled after this long
const MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Warm up connection pool by pre-establishing `min_connections`
///
/// Concurrently acquires `min_connections` to force pool establishment,
/// so an unreachable database is reported at startup rather than by the
/// first background session.
///
/// # Errors
/// Returns error if every warmup connection fails
pub async fn warmup_pool(pool: &AnyPool, min_connections: u32) -> Result<()> {
    if min_connections == 0 {
        return Ok(());
    }
    let start = Instant::now();

    let mut handles = Vec::new();
    for i in 0..min_connections {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            sqlx::query("SELECT 1")
                .fetch_one(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("Warmup connection {} failed: {}", i + 1, e))
        }));
    }

    let mut success_count = 0;
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(_)) => success_count += 1,
            Ok(Err(e)) => log::warn!("Connection {} warmup failed: {}", i + 1, e),
            Err(e) => log::warn!("Connection {} warmup task panicked: {}", i + 1, e),
        }
    }

    let elapsed = start.elapsed();
    if success_count == 0 {
        return Err(anyhow::anyhow!(
            "Pool warmup failed: 0/{} connections established",
            min_connections
        ));
    }

    log::info!(
        "Connection pool warmed up: {}/{} connections ready ({:?})",
        success_count,
        min_connections,
        elapsed
    );
    if elapsed > Duration::from_secs(2) {
        log::warn!(
            "Pool warmup was slow ({:?}), sessions may see high latency",
            elapsed
        );
    }
    Ok(())
}

/// Database pool setup result
pub struct DatabaseConnection {
    /// Configured connection pool
    pub pool: Arc<AnyPool>,
    /// Connection string the pool was built from
    pub connection_url: SecretString,
}

/// Build and warm the connection pool described by `config`
///
/// # Errors
/// Returns error if the DSN is invalid, or if connecting or warmup fails
pub async fn setup_database_pool(config: &SessionConfig) -> Result<DatabaseConnection> {
    let dsn = config.dsn.expose_secret();
    let db_type = validate_dsn(dsn).context("Invalid database connection string")?;
    let redacted = redact_dsn(dsn);

    // Must run before any AnyPool or AnyConnection is created
    sqlx::any::install_default_drivers();

    let pool: AnyPool = AnyPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .acquire_timeout(config.connection_timeout())
        .idle_timeout(Some(IDLE_TIMEOUT))
        .max_lifetime(Some(MAX_LIFETIME))
        .test_before_acquire(true)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SELECT 1").fetch_one(conn).await?;
                Ok(())
            })
        })
        .connect(dsn)
        .await
        .with_context(|| format!("Failed to connect to database at {}", redacted))?;

    warmup_pool(&pool, config.db_min_connections).await?;

    log::info!(
        "Database connected ({}) at {}",
        db_type,
        redacted
    );

    Ok(DatabaseConnection {
        pool: Arc::new(pool),
        connection_url: config.dsn.clone(),
    })
}
