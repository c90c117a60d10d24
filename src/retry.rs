//! Budget-aware timeout and retry for database calls
//!
//! Every attempt gets the budget's effective command timeout, so retries
//! never stretch a call past the caller's total deadline.

use crate::budget::{TimeoutBudget, command_timeout};
use crate::cancel::CancelSignal;
use crate::config::SessionConfig;
use crate::error::DatabaseError;
use std::time::Duration;
use tokio::time::timeout;

/// Message stored when a cancellation signal stops execution
pub const CANCELLED_MESSAGE: &str = "Query execution was cancelled";

/// Calculate retry backoff duration with exponential growth, cap, and jitter
///
/// # Formula
///
/// `backoff = min(base_ms * 2^attempt, max_ms) + random_jitter(0-100ms)`
///
/// # Example
///
/// With defaults (base=500ms, max=5000ms):
/// - Attempt 0: 500ms + jitter = 500-600ms
/// - Attempt 1: 1000ms + jitter = 1000-1100ms
/// - Attempt 4+: 5000ms + jitter = 5000-5100ms (capped)
pub fn calculate_backoff(config: &SessionConfig, attempt: u32) -> Duration {
    // Add jitter to prevent thundering herd
    let jitter = rand::random::<u64>() % 100;

    let growth = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let backoff_ms = config
        .retry_backoff_ms
        .saturating_mul(growth)
        .min(config.max_backoff_ms)
        + jitter;

    Duration::from_millis(backoff_ms)
}

/// Execute a database call under a timeout budget with automatic retry
///
/// Connection-level failures are retried with exponential backoff until
/// `config.max_retries` is exhausted, the budget runs out, or `cancel`
/// fires. Each attempt is bounded by the budget's effective command
/// timeout, falling back to `config.default_command_timeout()`.
///
/// # Arguments
///
/// * `config` - Retry policy and default command timeout
/// * `budget` - Total deadline of the enclosing call, if configured
/// * `cancel` - Signal that aborts the call between or during attempts
/// * `query_fn` - Closure that returns the async operation to execute
/// * `operation_description` - Human-readable description for error messages
///
/// # Returns
///
/// * `Ok(T)` - Result on success
/// * `Err(DatabaseError::Timeout)` - Budget exhausted or final attempt timed out
/// * `Err(DatabaseError::Cancelled)` - `cancel` fired
/// * `Err(DatabaseError::QueryError)` - Non-retryable error, or retries exhausted
pub async fn run_with_budget<T, F, Fut>(
    config: &SessionConfig,
    budget: Option<&TimeoutBudget>,
    cancel: Option<&CancelSignal>,
    query_fn: F,
    operation_description: &str,
) -> Result<T, DatabaseError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let max_retries = config.max_retries;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if let Some(budget) = budget
            && budget.is_exceeded()
        {
            return Err(DatabaseError::Timeout(budget.exceeded_message()));
        }

        let timeout_duration = command_timeout(budget, config.default_command_timeout());

        let outcome = tokio::select! {
            biased;
            _ = wait_cancelled(cancel) => {
                return Err(DatabaseError::Cancelled(CANCELLED_MESSAGE.to_string()));
            }
            outcome = timeout(timeout_duration, query_fn()) => outcome,
        };

        match outcome {
            Ok(Ok(result)) => return Ok(result),
            Ok(Err(sqlx_err)) => {
                if is_connection_error(&sqlx_err) && attempt < max_retries {
                    log::warn!(
                        "Connection error on attempt {}/{}: {}. Retrying...",
                        attempt + 1,
                        max_retries + 1,
                        sqlx_err
                    );
                    last_error = Some(sqlx_err);
                } else {
                    return Err(DatabaseError::QueryError(format!(
                        "{}: {}",
                        operation_description, sqlx_err
                    )));
                }
            }
            Err(_elapsed) => {
                if let Some(budget) = budget
                    && budget.is_exceeded()
                {
                    return Err(DatabaseError::Timeout(budget.exceeded_message()));
                }
                if attempt < max_retries {
                    log::warn!(
                        "Timeout on attempt {}/{}. Retrying...",
                        attempt + 1,
                        max_retries + 1
                    );
                } else {
                    return Err(DatabaseError::Timeout(format!(
                        "{} timed out after {:?}",
                        operation_description, timeout_duration
                    )));
                }
            }
        }

        tokio::select! {
            biased;
            _ = wait_cancelled(cancel) => {
                return Err(DatabaseError::Cancelled(CANCELLED_MESSAGE.to_string()));
            }
            _ = tokio::time::sleep(calculate_backoff(config, attempt)) => {}
        }
    }

    Err(DatabaseError::QueryError(format!(
        "{}: Max retries ({}) exceeded. Last error: {}",
        operation_description,
        max_retries,
        last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    )))
}

async fn wait_cancelled(cancel: Option<&CancelSignal>) {
    match cancel {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Check if a sqlx error is connection-related and retryable
pub fn is_connection_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_lowercase();
            msg.contains("connection")
                || msg.contains("broken pipe")
                || msg.contains("reset by peer")
                || msg.contains("closed")
        }
        _ => false,
    }
}
