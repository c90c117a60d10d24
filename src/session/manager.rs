use super::worker::{self, WorkerContext};
use super::{Session, SessionRequest};
use crate::cancel::CancelSignal;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::source::DataSource;
use crate::types::{ProcedureParameters, SessionId, SessionKind, SessionStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Error recorded on a session stopped through [`SessionManager::cancel_session`]
pub const USER_CANCELLED_MESSAGE: &str = "Session was cancelled by user";

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The session was running and is now cancelled
    Cancelled,
    /// No session with that handle exists
    NotFound,
    /// The session had already reached a terminal state
    AlreadyFinished,
}

impl CancelOutcome {
    pub fn is_cancelled(self) -> bool {
        self == Self::Cancelled
    }
}

/// Registry and launcher of background sessions
///
/// Owns the set of sessions keyed by handle. Starting a session records it
/// and spawns a detached worker; callers observe progress through
/// [`get_session`](Self::get_session) and [`list_sessions`](Self::list_sessions).
pub struct SessionManager {
    source: Arc<dyn DataSource>,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
    max_concurrent_sessions: usize,
    retention: chrono::Duration,
    default_command_timeout_secs: u64,
}

impl SessionManager {
    pub fn new(source: Arc<dyn DataSource>, config: &SessionConfig) -> Self {
        Self {
            source,
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            max_concurrent_sessions: config.max_concurrent_sessions.max(1),
            retention: config.session_retention(),
            default_command_timeout_secs: config.default_command_timeout_secs,
        }
    }

    /// Start an ad hoc query in the background
    ///
    /// `timeout_secs` is the session's total time budget; 0 runs without
    /// one. `cancel` is an optional caller signal observed alongside the
    /// session's own.
    ///
    /// # Errors
    /// * `InvalidArgument` - `query` is empty or whitespace
    /// * `CapacityExceeded` - the running-session ceiling is reached
    /// * `NoRuntime` - called outside a tokio runtime
    pub fn start_query(
        &self,
        query: &str,
        database: Option<&str>,
        timeout_secs: u64,
        cancel: Option<CancelSignal>,
    ) -> Result<Arc<Session>, SessionError> {
        if query.trim().is_empty() {
            return Err(SessionError::InvalidArgument(
                "Query cannot be empty".to_string(),
            ));
        }
        self.start(
            SessionRequest {
                kind: SessionKind::Query,
                statement: query.to_string(),
                database: normalize_database(database),
                parameters: None,
                timeout_secs,
            },
            cancel,
        )
    }

    /// Start a stored procedure in the background
    ///
    /// # Errors
    /// * `InvalidArgument` - `procedure_name` is empty or whitespace
    /// * `CapacityExceeded` - the running-session ceiling is reached
    /// * `NoRuntime` - called outside a tokio runtime
    pub fn start_stored_procedure(
        &self,
        procedure_name: &str,
        parameters: Option<ProcedureParameters>,
        database: Option<&str>,
        timeout_secs: u64,
        cancel: Option<CancelSignal>,
    ) -> Result<Arc<Session>, SessionError> {
        if procedure_name.trim().is_empty() {
            return Err(SessionError::InvalidArgument(
                "Procedure name cannot be empty".to_string(),
            ));
        }
        self.start(
            SessionRequest {
                kind: SessionKind::StoredProcedure,
                statement: procedure_name.trim().to_string(),
                database: normalize_database(database),
                parameters,
                timeout_secs,
            },
            cancel,
        )
    }

    fn start(
        &self,
        request: SessionRequest,
        cancel: Option<CancelSignal>,
    ) -> Result<Arc<Session>, SessionError> {
        // Checked before anything is recorded, so a caller outside a runtime
        // never leaves a session behind with no worker
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        let session = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            let running = sessions.values().filter(|s| s.is_running()).count();
            if running >= self.max_concurrent_sessions {
                log::warn!(
                    "Rejecting new session: {} of {} slots in use",
                    running,
                    self.max_concurrent_sessions
                );
                return Err(SessionError::CapacityExceeded {
                    max: self.max_concurrent_sessions,
                });
            }

            let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
            let session = Arc::new(Session::new(id, request));
            sessions.insert(id, session.clone());
            session
        };

        log::info!(
            "Started {:?} session {} (timeout: {}s): {}",
            session.kind(),
            session.id(),
            session.timeout_secs(),
            session.statement().chars().take(50).collect::<String>()
        );

        runtime.spawn(worker::run(WorkerContext {
            session: session.clone(),
            source: self.source.clone(),
            external_cancel: cancel,
            default_command_timeout_secs: self.default_command_timeout_secs,
        }));

        Ok(session)
    }

    pub fn get_session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Stop a running session
    ///
    /// The session is marked cancelled before the worker is signalled, so
    /// its error always reads as a user cancellation.
    pub fn cancel_session(&self, id: SessionId) -> CancelOutcome {
        let Some(session) = self.get_session(id) else {
            return CancelOutcome::NotFound;
        };

        if !session.finish(
            SessionStatus::Cancelled,
            Some(USER_CANCELLED_MESSAGE.to_string()),
        ) {
            return CancelOutcome::AlreadyFinished;
        }

        session.cancel_signal().cancel();
        log::info!("Cancelled session {}", id);
        CancelOutcome::Cancelled
    }

    /// Sessions ordered newest first
    ///
    /// With `include_completed == false` only running sessions are returned.
    pub fn list_sessions(&self, include_completed: bool) -> Vec<Arc<Session>> {
        let mut listed: Vec<Arc<Session>> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| include_completed || s.is_running())
            .cloned()
            .collect();
        listed.sort_by(|a, b| {
            b.started_at()
                .cmp(&a.started_at())
                .then_with(|| b.id().cmp(&a.id()))
        });
        listed
    }

    pub fn running_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.is_running())
            .count()
    }

    /// Remove terminal sessions that ended before the retention window
    ///
    /// Returns the number of sessions removed. Running sessions are never
    /// removed.
    pub fn cleanup_completed_sessions(&self) -> usize {
        let cutoff = Utc::now()
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.cleanup_ended_before(cutoff)
    }

    pub(crate) fn cleanup_ended_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| match session.ended_at() {
            Some(ended) => ended >= cutoff || session.is_running(),
            None => true,
        });
        let removed = before - sessions.len();
        if removed > 0 {
            log::info!("Removed {} finished sessions", removed);
        }
        removed
    }

    /// Run [`cleanup_completed_sessions`](Self::cleanup_completed_sessions)
    /// every `every` until the manager is dropped
    pub fn spawn_cleanup_loop(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.cleanup_completed_sessions();
            }
        })
    }
}

fn normalize_database(database: Option<&str>) -> Option<String> {
    database
        .map(str::trim)
        .filter(|db| !db.is_empty())
        .map(str::to_string)
}
