//! Background execution of a single session

use super::Session;
use crate::budget::{TimeoutBudget, combine_cancellation};
use crate::cancel::CancelSignal;
use crate::error::DatabaseError;
use crate::retry::CANCELLED_MESSAGE;
use crate::source::{DataSource, NULL_MARKER, OpenOptions, RowStream};
use crate::types::{SessionKind, SessionStatus};
use std::num::NonZeroU64;
use std::sync::Arc;

/// Rows between publications of partial results
pub(crate) const PUBLISH_EVERY_ROWS: u64 = 1000;

const WORKER_LOST_MESSAGE: &str = "Background worker exited unexpectedly";

pub(crate) struct WorkerContext {
    pub session: Arc<Session>,
    pub source: Arc<dyn DataSource>,
    pub external_cancel: Option<CancelSignal>,
    pub default_command_timeout_secs: u64,
}

/// Marks the session failed if the worker ends without finishing it
struct TerminalGuard(Arc<Session>);

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self
            .0
            .finish(SessionStatus::Failed, Some(WORKER_LOST_MESSAGE.to_string()))
        {
            log::error!("Session {} worker ended without a result", self.0.id());
        }
    }
}

pub(crate) async fn run(ctx: WorkerContext) {
    let WorkerContext {
        session,
        source,
        external_cancel,
        default_command_timeout_secs,
    } = ctx;
    let _guard = TerminalGuard(session.clone());

    let budget = NonZeroU64::new(session.timeout_secs()).map(TimeoutBudget::new);
    let base = match external_cancel {
        Some(external) => CancelSignal::any([session.cancel_signal().clone(), external]),
        None => session.cancel_signal().clone(),
    };
    let cancel = combine_cancellation(budget.as_ref(), Some(base.clone())).unwrap_or(base);
    let command_timeout_secs = budget
        .as_ref()
        .map(|b| b.effective_command_timeout(default_command_timeout_secs))
        .unwrap_or(default_command_timeout_secs);

    let outcome = execute(
        &session,
        source.as_ref(),
        budget.as_ref(),
        &cancel,
        command_timeout_secs,
    )
    .await;

    let (status, error) = match outcome {
        Ok(()) => (SessionStatus::Completed, None),
        Err(e) if e.is_interruption() || cancel.is_cancelled() => {
            match budget.as_ref().filter(|b| b.is_exceeded()) {
                Some(budget) => (SessionStatus::Cancelled, Some(budget.exceeded_message())),
                None if matches!(e, DatabaseError::Timeout(_)) && !cancel.is_cancelled() => {
                    (SessionStatus::Failed, Some(e.to_string()))
                }
                None => (SessionStatus::Cancelled, Some(CANCELLED_MESSAGE.to_string())),
            }
        }
        Err(e) => (SessionStatus::Failed, Some(e.to_string())),
    };

    if session.finish(status, error) {
        match status {
            SessionStatus::Completed => log::info!(
                "Session {} completed with {} rows",
                session.id(),
                session.row_count()
            ),
            _ => log::warn!(
                "Session {} ended as {}: {}",
                session.id(),
                status,
                session.error().unwrap_or_default()
            ),
        }
    } else {
        log::debug!(
            "Session {} was already {} when its worker finished",
            session.id(),
            session.status()
        );
    }
}

async fn execute(
    session: &Session,
    source: &dyn DataSource,
    budget: Option<&TimeoutBudget>,
    cancel: &CancelSignal,
    command_timeout_secs: u64,
) -> Result<(), DatabaseError> {
    let options = OpenOptions {
        database: session.database(),
        budget,
        command_timeout_secs,
        cancel,
    };
    let opening = async {
        match session.kind() {
            SessionKind::Query => source.open_query(session.statement(), options).await,
            SessionKind::StoredProcedure => {
                source
                    .open_procedure(session.statement(), session.parameters(), options)
                    .await
            }
        }
    };

    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(DatabaseError::Cancelled(CANCELLED_MESSAGE.to_string()));
        }
        opened = opening => opened?,
    };

    let mut writer = ResultWriter::new(session);
    let result = pump(stream.as_mut(), &mut writer, cancel).await;
    writer.flush();
    stream.close().await;
    result
}

/// Copy every result set from `stream` into `writer` as tab-delimited text
async fn pump(
    stream: &mut dyn RowStream,
    writer: &mut ResultWriter<'_>,
    cancel: &CancelSignal,
) -> Result<(), DatabaseError> {
    loop {
        let width = stream.column_count();
        if width > 0 {
            if writer.has_output() {
                writer.line("");
            }
            let header: Vec<&str> = (0..width)
                .map(|i| stream.column_name(i).unwrap_or_default())
                .collect();
            writer.line(&header.join("\t"));
        }

        loop {
            let has_row = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DatabaseError::Cancelled(CANCELLED_MESSAGE.to_string()));
                }
                next = stream.next_row() => next?,
            };
            if !has_row {
                break;
            }

            let mut fields = Vec::with_capacity(width);
            for i in 0..stream.column_count() {
                if stream.is_null(i) {
                    fields.push(NULL_MARKER.to_string());
                } else {
                    fields.push(stream.value(i)?);
                }
            }
            writer.line(&fields.join("\t"));
            writer.row_done();
        }

        let more = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DatabaseError::Cancelled(CANCELLED_MESSAGE.to_string()));
            }
            more = stream.next_result_set() => more?,
        };
        if !more {
            return Ok(());
        }
    }
}

/// Buffers result lines and publishes them to the session in batches
struct ResultWriter<'a> {
    session: &'a Session,
    pending: String,
    wrote_any: bool,
    rows: u64,
    unpublished_rows: u64,
}

impl<'a> ResultWriter<'a> {
    fn new(session: &'a Session) -> Self {
        Self {
            session,
            pending: String::new(),
            wrote_any: false,
            rows: 0,
            unpublished_rows: 0,
        }
    }

    fn has_output(&self) -> bool {
        self.wrote_any
    }

    fn line(&mut self, line: &str) {
        if self.wrote_any {
            self.pending.push('\n');
        }
        self.pending.push_str(line);
        self.wrote_any = true;
    }

    fn row_done(&mut self) {
        self.rows += 1;
        self.unpublished_rows += 1;
        if self.unpublished_rows >= PUBLISH_EVERY_ROWS {
            self.flush();
        }
    }

    fn flush(&mut self) {
        self.session.publish(self.rows, &self.pending);
        self.pending.clear();
        self.unpublished_rows = 0;
    }
}
