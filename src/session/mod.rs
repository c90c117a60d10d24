//! Background query and stored-procedure sessions
//!
//! A [`Session`] records one background execution: its immutable request
//! attributes, its lifecycle state, and the result text accumulated so
//! far. Sessions are shared between the [`SessionManager`] and the worker
//! task that runs them; all mutable state sits behind short-lived locks so
//! observers always see a consistent view.

mod manager;
mod worker;


pub use manager::{CancelOutcome, SessionManager, USER_CANCELLED_MESSAGE};

use crate::cancel::CancelSignal;
use crate::types::{ProcedureParameters, SessionId, SessionKind, SessionStatus};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Immutable attributes captured when a session is started
#[derive(Debug, Clone)]
pub(crate) struct SessionRequest {
    pub kind: SessionKind,
    pub statement: String,
    pub database: Option<String>,
    pub parameters: Option<ProcedureParameters>,
    pub timeout_secs: u64,
}

#[derive(Debug)]
struct Lifecycle {
    status: SessionStatus,
    ended_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct Progress {
    row_count: u64,
    results: String,
}

/// One background execution
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    request: SessionRequest,
    started_at: DateTime<Utc>,
    lifecycle: Mutex<Lifecycle>,
    progress: Mutex<Progress>,
    cancel: CancelSignal,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub(crate) fn new(id: SessionId, request: SessionRequest) -> Self {
        Self {
            id,
            request,
            started_at: Utc::now(),
            lifecycle: Mutex::new(Lifecycle {
                status: SessionStatus::Running,
                ended_at: None,
                error: None,
            }),
            progress: Mutex::new(Progress::default()),
            cancel: CancelSignal::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.request.kind
    }

    /// Query text, or the procedure name for stored-procedure sessions
    pub fn statement(&self) -> &str {
        &self.request.statement
    }

    pub fn database(&self) -> Option<&str> {
        self.request.database.as_deref()
    }

    pub fn parameters(&self) -> Option<&ProcedureParameters> {
        self.request.parameters.as_ref()
    }

    /// Total time budget in seconds; 0 means unbounded
    pub fn timeout_secs(&self) -> u64 {
        self.request.timeout_secs
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.lifecycle).status
    }

    pub fn is_running(&self) -> bool {
        self.status() == SessionStatus::Running
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.lifecycle).ended_at
    }

    pub fn error(&self) -> Option<String> {
        lock(&self.lifecycle).error.clone()
    }

    pub fn row_count(&self) -> u64 {
        lock(&self.progress).row_count
    }

    /// Result text published so far
    pub fn results(&self) -> String {
        lock(&self.progress).results.clone()
    }

    /// Time from start to end, or to now while running
    pub fn duration(&self) -> chrono::Duration {
        let end = self.ended_at().unwrap_or_else(Utc::now);
        end.signed_duration_since(self.started_at)
    }

    /// Point-in-time copy of every observable attribute
    pub fn snapshot(&self) -> SessionSnapshot {
        // Lifecycle before progress: workers publish before finishing, so a
        // terminal status here implies the final flush is visible below
        let (status, ended_at, error) = {
            let lifecycle = lock(&self.lifecycle);
            (lifecycle.status, lifecycle.ended_at, lifecycle.error.clone())
        };
        let (row_count, results) = {
            let progress = lock(&self.progress);
            (progress.row_count, progress.results.clone())
        };
        let end = ended_at.unwrap_or_else(Utc::now);

        SessionSnapshot {
            session_id: self.id,
            kind: self.request.kind,
            status,
            statement: self.request.statement.clone(),
            database: self.request.database.clone(),
            parameters: self.request.parameters.clone(),
            timeout_secs: self.request.timeout_secs,
            start_time: self.started_at.to_rfc3339(),
            end_time: ended_at.map(|t| t.to_rfc3339()),
            duration_seconds: end.signed_duration_since(self.started_at).num_milliseconds() as f64
                / 1000.0,
            row_count,
            error,
            results,
        }
    }

    pub(crate) fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Append a chunk of result text and publish the new row count
    pub(crate) fn publish(&self, row_count: u64, chunk: &str) {
        let mut progress = lock(&self.progress);
        progress.results.push_str(chunk);
        progress.row_count = row_count;
    }

    /// Move to a terminal state if still running
    ///
    /// Returns `false` when another party already finished the session; the
    /// earlier outcome is kept.
    pub(crate) fn finish(&self, status: SessionStatus, error: Option<String>) -> bool {
        debug_assert!(status.is_terminal());
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.status.is_terminal() {
            return false;
        }
        lifecycle.status = status;
        lifecycle.ended_at = Some(Utc::now());
        lifecycle.error = error;
        true
    }
}

/// Serializable view of a session
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub kind: SessionKind,
    pub status: SessionStatus,
    /// Query text or procedure name
    pub statement: String,
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ProcedureParameters>,
    pub timeout_secs: u64,
    /// RFC 3339 start time
    pub start_time: String,
    /// RFC 3339 end time, absent while running
    pub end_time: Option<String>,
    pub duration_seconds: f64,
    pub row_count: u64,
    pub error: Option<String>,
    pub results: String,
}
