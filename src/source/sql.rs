//! `DataSource` backed by a sqlx `AnyPool`
//!
//! Each opened stream owns one connection. A producer task drives
//! `fetch_many` on that connection and forwards rows and result-set
//! boundaries through a bounded channel, so the reader sees rows as the
//! server produces them.

use super::render::render_value;
use super::{DataSource, NULL_MARKER, OpenOptions, RowStream};
use crate::cancel::CancelSignal;
use crate::config::SessionConfig;
use crate::error::DatabaseError;
use crate::retry::{CANCELLED_MESSAGE, run_with_budget};
use crate::types::{DatabaseType, ProcedureParameters};
use crate::validate::{validate_identifier, validate_qualified_name};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use serde_json::Value;
use sqlx::any::{Any, AnyArguments, AnyRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{AnyConnection, AnyPool, Column, Either, Executor, Row, Statement, ValueRef};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Rows buffered between the producer task and the reader
const ROW_CHANNEL_CAPACITY: usize = 64;

/// A JSON parameter converted to a bindable value
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&Value> for BindValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Self::Int(i),
                (None, Some(f)) => Self::Float(f),
                (None, None) => Self::Text(n.to_string()),
            },
            Value::String(s) => Self::Text(s.clone()),
            // Arrays and objects travel as their JSON text
            other => Self::Text(other.to_string()),
        }
    }
}

impl BindValue {
    fn bind_to<'q>(
        self,
        query: Query<'q, Any, AnyArguments<'q>>,
    ) -> Query<'q, Any, AnyArguments<'q>> {
        match self {
            Self::Null => query.bind(None::<String>),
            Self::Bool(v) => query.bind(v),
            Self::Int(v) => query.bind(v),
            Self::Float(v) => query.bind(v),
            Self::Text(v) => query.bind(v),
        }
    }
}

/// Build the statement that invokes a stored procedure on `db_type`
///
/// Parameters are bound positionally in the order they appear in
/// `parameters`. PostgreSQL uses named notation so the mapping survives
/// reordering; a leading `@` on parameter names is ignored.
///
/// # Errors
/// * `InvalidIdentifier` - procedure or parameter name is unsafe to splice
/// * `FeatureNotSupported` - the backend has no stored procedures reachable
///   through the Any driver
pub fn build_procedure_call(
    db_type: DatabaseType,
    procedure_name: &str,
    parameters: Option<&ProcedureParameters>,
) -> Result<(String, Vec<BindValue>), DatabaseError> {
    let qualified = validate_qualified_name(procedure_name)?.join(".");
    let entries: Vec<(&String, &Value)> = parameters
        .map(|p| p.iter().collect())
        .unwrap_or_default();
    let binds = entries.iter().map(|(_, v)| BindValue::from(*v)).collect();

    let sql = match db_type {
        DatabaseType::MySQL | DatabaseType::MariaDB => {
            let placeholders = vec!["?"; entries.len()].join(", ");
            format!("CALL {}({})", qualified, placeholders)
        }
        DatabaseType::Postgres => {
            let mut args = Vec::with_capacity(entries.len());
            for (index, (name, _)) in entries.iter().enumerate() {
                let name = name.trim_start_matches('@');
                validate_identifier(name)?;
                args.push(format!("{} => ${}", name, index + 1));
            }
            format!("SELECT * FROM {}({})", qualified, args.join(", "))
        }
        DatabaseType::SQLite => {
            return Err(DatabaseError::FeatureNotSupported(
                "SQLite does not support stored procedures".to_string(),
            ));
        }
        DatabaseType::SqlServer => {
            return Err(DatabaseError::FeatureNotSupported(
                "SQL Server procedures are not reachable through the sqlx Any driver".to_string(),
            ));
        }
    };

    Ok((sql, binds))
}

/// Production data source over a shared connection pool
pub struct SqlxDataSource {
    pool: Arc<AnyPool>,
    db_type: DatabaseType,
    home_database: Option<String>,
    config: SessionConfig,
}

impl SqlxDataSource {
    /// Create a data source for the pool behind `connection_url`
    ///
    /// # Errors
    /// Returns error if the database type cannot be determined from the URL
    pub fn new(
        pool: Arc<AnyPool>,
        connection_url: &str,
        config: SessionConfig,
    ) -> Result<Self, DatabaseError> {
        let db_type = DatabaseType::from_url(connection_url)?;
        let home_database = crate::dsn::extract_database(connection_url);
        Ok(Self {
            pool,
            db_type,
            home_database,
            config,
        })
    }

    pub fn database_type(&self) -> DatabaseType {
        self.db_type
    }

    async fn open(
        &self,
        sql: String,
        binds: Vec<BindValue>,
        options: OpenOptions<'_>,
    ) -> Result<Box<dyn RowStream>, DatabaseError> {
        let pool = self.pool.clone();
        let pooled = run_with_budget(
            &self.config,
            options.budget,
            Some(options.cancel),
            || {
                let pool = pool.clone();
                async move { pool.acquire().await }
            },
            "Acquiring connection",
        )
        .await?;

        let mut conn = match options.database {
            Some(database) if !self.is_home_database(database) => {
                self.switch_database(pooled, database, &options).await?
            }
            _ => StreamConnection::Pooled(pooled),
        };

        let command_timeout = Duration::from_secs(options.command_timeout_secs.max(1));
        let cancel = options.cancel.clone();
        let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        let producer_cancel = cancel.clone();

        let producer = tokio::spawn(async move {
            let forwarded =
                forward_results(conn.connection(), &sql, binds, &tx, &producer_cancel).await;
            if let Forwarded::NoRows { boundaries } = forwarded {
                // No row carried column metadata, so describe the statement instead
                let columns = describe_columns(conn.connection(), &sql).await;
                if !columns.is_empty()
                    && tx.send(StreamEvent::Columns(columns)).await.is_err()
                {
                    return;
                }
                for _ in 0..boundaries {
                    if tx.send(StreamEvent::ResultSetEnd).await.is_err() {
                        return;
                    }
                }
            }
        });

        let mut stream = SqlRowStream {
            events: rx,
            producer,
            cancel,
            columns: Vec::new(),
            current: None,
            peeked: None,
            at_boundary: false,
            finished: false,
        };
        stream.prime(command_timeout).await?;
        Ok(Box::new(stream))
    }

    fn is_home_database(&self, database: &str) -> bool {
        self.home_database
            .as_deref()
            .is_some_and(|home| home.eq_ignore_ascii_case(database))
    }

    /// Point a connection at `database`
    ///
    /// The connection is detached from the pool first so the changed
    /// default database never leaks into later sessions.
    async fn switch_database(
        &self,
        pooled: PoolConnection<Any>,
        database: &str,
        options: &OpenOptions<'_>,
    ) -> Result<StreamConnection, DatabaseError> {
        match self.db_type {
            DatabaseType::MySQL | DatabaseType::MariaDB => {
                validate_identifier(database)?;
                let mut conn = pooled.detach();
                let statement = format!("USE `{}`", database);
                let timeout = crate::budget::command_timeout(
                    options.budget,
                    Duration::from_secs(options.command_timeout_secs.max(1)),
                );
                log::debug!("Switching detached connection to database {}", database);
                let switched = (&mut conn).execute(sqlx::raw_sql(&statement));
                match tokio::time::timeout(timeout, switched).await {
                    Ok(Ok(_)) => Ok(StreamConnection::Detached(conn)),
                    Ok(Err(e)) => Err(DatabaseError::QueryError(format!(
                        "Failed to switch to database '{}': {}",
                        database, e
                    ))),
                    Err(_) => Err(DatabaseError::Timeout(format!(
                        "Switching to database '{}' timed out after {:?}",
                        database, timeout
                    ))),
                }
            }
            other => Err(DatabaseError::FeatureNotSupported(format!(
                "Switching databases per session is not supported for {}; \
                 connect with a DSN that names '{}' instead",
                other, database
            ))),
        }
    }
}

#[async_trait]
impl DataSource for SqlxDataSource {
    async fn open_query(
        &self,
        sql: &str,
        options: OpenOptions<'_>,
    ) -> Result<Box<dyn RowStream>, DatabaseError> {
        self.open(sql.to_string(), Vec::new(), options).await
    }

    async fn open_procedure(
        &self,
        procedure_name: &str,
        parameters: Option<&ProcedureParameters>,
        options: OpenOptions<'_>,
    ) -> Result<Box<dyn RowStream>, DatabaseError> {
        let (sql, binds) = build_procedure_call(self.db_type, procedure_name, parameters)?;
        log::debug!("Invoking procedure with statement: {}", sql);
        self.open(sql, binds, options).await
    }
}

enum StreamConnection {
    Pooled(PoolConnection<Any>),
    Detached(AnyConnection),
}

impl StreamConnection {
    fn connection(&mut self) -> &mut AnyConnection {
        match self {
            Self::Pooled(conn) => &mut **conn,
            Self::Detached(conn) => conn,
        }
    }
}

enum StreamEvent {
    Columns(Vec<String>),
    Row(AnyRow),
    ResultSetEnd,
    Failed(sqlx::Error),
}

enum Forwarded {
    /// At least one row reached the reader
    Rows,
    /// The statement finished without producing a row; `boundaries`
    /// result-set ends are still owed to the reader
    NoRows { boundaries: usize },
    /// Cancelled, failed, or the reader went away
    Stopped,
}

/// Drive `sql` on `conn` and forward its rows and result-set ends to `tx`
///
/// Result-set ends seen before the first row are held back, so a statement
/// that returns no rows at all can still have its columns described before
/// the reader learns the result set is over.
async fn forward_results(
    conn: &mut AnyConnection,
    sql: &str,
    binds: Vec<BindValue>,
    tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancelSignal,
) -> Forwarded {
    let mut results = if binds.is_empty() {
        conn.fetch_many(sqlx::raw_sql(sql))
    } else {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = value.bind_to(query);
        }
        conn.fetch_many(query)
    };

    let mut held_boundaries = 0;
    let mut seen_row = false;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Forwarded::Stopped,
            next = results.try_next() => next,
        };
        let event = match next {
            Ok(Some(Either::Left(_))) if !seen_row => {
                held_boundaries += 1;
                continue;
            }
            Ok(Some(Either::Left(_))) => StreamEvent::ResultSetEnd,
            Ok(Some(Either::Right(row))) => {
                if !seen_row {
                    seen_row = true;
                    for _ in 0..held_boundaries {
                        if tx.send(StreamEvent::ResultSetEnd).await.is_err() {
                            return Forwarded::Stopped;
                        }
                    }
                }
                StreamEvent::Row(row)
            }
            Ok(None) if seen_row => return Forwarded::Rows,
            Ok(None) => {
                return Forwarded::NoRows {
                    boundaries: held_boundaries,
                };
            }
            Err(e) => {
                let _ = tx.send(StreamEvent::Failed(e)).await;
                return Forwarded::Stopped;
            }
        };
        if tx.send(event).await.is_err() {
            return Forwarded::Stopped;
        }
    }
}

/// Column names of `sql` as reported by preparing it
///
/// Statements the backend refuses to prepare (several statements in one
/// batch, some DDL) describe as no columns.
async fn describe_columns(conn: &mut AnyConnection, sql: &str) -> Vec<String> {
    match conn.prepare(sql).await {
        Ok(statement) => statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
        Err(e) => {
            log::debug!("Could not describe result columns: {}", e);
            Vec::new()
        }
    }
}

/// Row stream fed by a producer task that owns the connection
pub struct SqlRowStream {
    events: mpsc::Receiver<StreamEvent>,
    producer: JoinHandle<()>,
    cancel: CancelSignal,
    columns: Vec<String>,
    current: Option<AnyRow>,
    peeked: Option<AnyRow>,
    at_boundary: bool,
    finished: bool,
}

impl SqlRowStream {
    /// Wait for the first event so column metadata is known up front
    async fn prime(&mut self, command_timeout: Duration) -> Result<(), DatabaseError> {
        let deadline = tokio::time::Instant::now() + command_timeout;
        loop {
            let Ok(first) = tokio::time::timeout_at(deadline, self.events.recv()).await else {
                self.producer.abort();
                return Err(DatabaseError::Timeout(format!(
                    "Command did not return a result within {:?}",
                    command_timeout
                )));
            };
            match first {
                Some(StreamEvent::Columns(columns)) => self.columns = columns,
                Some(StreamEvent::Row(row)) => {
                    self.columns = column_names(&row);
                    self.peeked = Some(row);
                    return Ok(());
                }
                Some(StreamEvent::ResultSetEnd) => {
                    self.at_boundary = true;
                    return Ok(());
                }
                Some(StreamEvent::Failed(e)) => {
                    self.finished = true;
                    return Err(e.into());
                }
                None => return self.end_of_stream().map(|_| ()),
            }
        }
    }

    /// Channel closed: either the statement finished or the producer
    /// stopped because of cancellation
    fn end_of_stream(&mut self) -> Result<bool, DatabaseError> {
        self.finished = true;
        self.current = None;
        if self.cancel.is_cancelled() {
            return Err(DatabaseError::Cancelled(CANCELLED_MESSAGE.to_string()));
        }
        Ok(false)
    }
}

fn column_names(row: &AnyRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

#[async_trait]
impl RowStream for SqlRowStream {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(String::as_str)
    }

    async fn next_row(&mut self) -> Result<bool, DatabaseError> {
        if self.finished || self.at_boundary {
            return Ok(false);
        }
        if let Some(row) = self.peeked.take() {
            self.current = Some(row);
            return Ok(true);
        }
        loop {
            match self.events.recv().await {
                Some(StreamEvent::Columns(columns)) => self.columns = columns,
                Some(StreamEvent::Row(row)) => {
                    self.current = Some(row);
                    return Ok(true);
                }
                Some(StreamEvent::ResultSetEnd) => {
                    self.current = None;
                    self.at_boundary = true;
                    return Ok(false);
                }
                Some(StreamEvent::Failed(e)) => {
                    self.finished = true;
                    self.current = None;
                    return Err(e.into());
                }
                None => return self.end_of_stream(),
            }
        }
    }

    fn is_null(&self, index: usize) -> bool {
        self.current
            .as_ref()
            .and_then(|row| row.try_get_raw(index).ok().map(|v| v.is_null()))
            .unwrap_or(false)
    }

    fn value(&self, index: usize) -> Result<String, DatabaseError> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| DatabaseError::QueryError("No current row".to_string()))?;
        Ok(render_value(row, index)?.unwrap_or_else(|| NULL_MARKER.to_string()))
    }

    async fn next_result_set(&mut self) -> Result<bool, DatabaseError> {
        while !self.finished && !self.at_boundary {
            self.next_row().await?;
        }
        if self.finished {
            return Ok(false);
        }

        // Skip statements that produced no rows (DDL, DML)
        loop {
            match self.events.recv().await {
                Some(StreamEvent::Row(row)) => {
                    self.columns = column_names(&row);
                    self.peeked = Some(row);
                    self.current = None;
                    self.at_boundary = false;
                    return Ok(true);
                }
                Some(StreamEvent::Columns(_) | StreamEvent::ResultSetEnd) => continue,
                Some(StreamEvent::Failed(e)) => {
                    self.finished = true;
                    return Err(e.into());
                }
                None => return self.end_of_stream(),
            }
        }
    }

    async fn close(&mut self) {
        self.finished = true;
        self.current = None;
        self.peeked = None;
        self.events.close();
        self.producer.abort();
    }
}

impl Drop for SqlRowStream {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::any::AnyPoolOptions;

    async fn sqlite_source() -> Result<SqlxDataSource, DatabaseError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        SqlxDataSource::new(Arc::new(pool), "sqlite::memory:", SessionConfig::default())
    }

    fn options(cancel: &CancelSignal) -> OpenOptions<'_> {
        OpenOptions {
            database: None,
            budget: None,
            command_timeout_secs: 30,
            cancel,
        }
    }

    fn params(value: Value) -> ProcedureParameters {
        match value {
            Value::Object(map) => map,
            _ => ProcedureParameters::new(),
        }
    }

    #[test]
    fn test_mysql_procedure_call_uses_positional_placeholders() {
        let p = params(json!({"start": "2024-01-01", "limit": 10}));
        let call = build_procedure_call(DatabaseType::MySQL, "reports.daily_totals", Some(&p));
        assert!(call.is_ok(), "build failed: {:?}", call.err());
        if let Ok((sql, binds)) = call {
            assert_eq!(sql, "CALL reports.daily_totals(?, ?)");
            assert_eq!(
                binds,
                vec![BindValue::Text("2024-01-01".to_string()), BindValue::Int(10)]
            );
        }
    }

    #[test]
    fn test_postgres_procedure_call_uses_named_arguments() {
        let p = params(json!({"@customer_id": 7, "active": true, "note": null}));
        let call = build_procedure_call(DatabaseType::Postgres, "order_history", Some(&p));
        assert!(call.is_ok(), "build failed: {:?}", call.err());
        if let Ok((sql, binds)) = call {
            assert_eq!(
                sql,
                "SELECT * FROM order_history(customer_id => $1, active => $2, note => $3)"
            );
            assert_eq!(
                binds,
                vec![BindValue::Int(7), BindValue::Bool(true), BindValue::Null]
            );
        }
    }

    #[test]
    fn test_procedure_call_without_parameters() {
        let call = build_procedure_call(DatabaseType::MariaDB, "refresh_cache", None);
        assert!(matches!(call, Ok((ref sql, ref binds)) if sql == "CALL refresh_cache()" && binds.is_empty()));
    }

    #[test]
    fn test_procedure_call_rejects_unsafe_names() {
        let call = build_procedure_call(DatabaseType::MySQL, "x(); DROP TABLE t; --", None);
        assert!(matches!(call, Err(DatabaseError::InvalidIdentifier(_))));

        let p = params(json!({"a b": 1}));
        let call = build_procedure_call(DatabaseType::Postgres, "ok_name", Some(&p));
        assert!(matches!(call, Err(DatabaseError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_procedure_call_unsupported_backends() {
        for db_type in [DatabaseType::SQLite, DatabaseType::SqlServer] {
            let call = build_procedure_call(db_type, "anything", None);
            assert!(matches!(call, Err(DatabaseError::FeatureNotSupported(_))));
        }
    }

    #[test]
    fn test_structured_parameters_bind_as_json_text() {
        let value = json!({"tags": ["a", "b"]});
        assert_eq!(
            BindValue::from(&value),
            BindValue::Text(r#"{"tags":["a","b"]}"#.to_string())
        );
        assert_eq!(BindValue::from(&json!(2.5)), BindValue::Float(2.5));
    }

    #[tokio::test]
    async fn test_query_streams_rows_and_nulls() {
        let source = sqlite_source().await;
        assert!(source.is_ok(), "setup failed: {:?}", source.err());
        let Ok(source) = source else { return };
        let cancel = CancelSignal::new();

        let stream = source
            .open_query(
                "SELECT 1 AS id, 'alpha' AS name UNION ALL SELECT 2, NULL",
                options(&cancel),
            )
            .await;
        assert!(stream.is_ok(), "open failed: {:?}", stream.err());
        let Ok(mut stream) = stream else { return };

        assert_eq!(stream.column_count(), 2);
        assert_eq!(stream.column_name(0), Some("id"));
        assert_eq!(stream.column_name(1), Some("name"));

        assert!(matches!(stream.next_row().await, Ok(true)));
        assert_eq!(stream.value(0).ok().as_deref(), Some("1"));
        assert_eq!(stream.value(1).ok().as_deref(), Some("alpha"));

        assert!(matches!(stream.next_row().await, Ok(true)));
        assert!(stream.is_null(1));

        assert!(matches!(stream.next_row().await, Ok(false)));
        assert!(matches!(stream.next_result_set().await, Ok(false)));
        stream.close().await;
    }

    #[tokio::test]
    async fn test_multiple_statements_yield_multiple_result_sets() {
        let source = sqlite_source().await;
        assert!(source.is_ok(), "setup failed: {:?}", source.err());
        let Ok(source) = source else { return };
        let cancel = CancelSignal::new();

        let stream = source
            .open_query("SELECT 1 AS first; SELECT 'two' AS second", options(&cancel))
            .await;
        assert!(stream.is_ok(), "open failed: {:?}", stream.err());
        let Ok(mut stream) = stream else { return };

        assert_eq!(stream.column_name(0), Some("first"));
        assert!(matches!(stream.next_row().await, Ok(true)));
        assert!(matches!(stream.next_row().await, Ok(false)));

        assert!(matches!(stream.next_result_set().await, Ok(true)));
        assert_eq!(stream.column_name(0), Some("second"));
        assert!(matches!(stream.next_row().await, Ok(true)));
        assert_eq!(stream.value(0).ok().as_deref(), Some("two"));
        stream.close().await;
    }

    #[tokio::test]
    async fn test_zero_row_query_still_reports_columns() {
        let source = sqlite_source().await;
        assert!(source.is_ok(), "setup failed: {:?}", source.err());
        let Ok(source) = source else { return };
        let cancel = CancelSignal::new();

        let stream = source
            .open_query("SELECT 1 AS id, 'x' AS label WHERE 1 = 0", options(&cancel))
            .await;
        assert!(stream.is_ok(), "open failed: {:?}", stream.err());
        let Ok(mut stream) = stream else { return };

        assert_eq!(stream.column_count(), 2);
        assert_eq!(stream.column_name(0), Some("id"));
        assert_eq!(stream.column_name(1), Some("label"));
        assert!(matches!(stream.next_row().await, Ok(false)));
        assert!(matches!(stream.next_result_set().await, Ok(false)));
        stream.close().await;
    }

    #[tokio::test]
    async fn test_statement_without_columns_reports_none() {
        let source = sqlite_source().await;
        assert!(source.is_ok(), "setup failed: {:?}", source.err());
        let Ok(source) = source else { return };
        let cancel = CancelSignal::new();

        let stream = source
            .open_query("CREATE TABLE scratch (id INTEGER)", options(&cancel))
            .await;
        assert!(stream.is_ok(), "open failed: {:?}", stream.err());
        let Ok(mut stream) = stream else { return };

        assert_eq!(stream.column_count(), 0);
        assert!(matches!(stream.next_row().await, Ok(false)));
        assert!(matches!(stream.next_result_set().await, Ok(false)));
        stream.close().await;
    }

    #[tokio::test]
    async fn test_invalid_sql_fails_on_open() {
        let source = sqlite_source().await;
        assert!(source.is_ok(), "setup failed: {:?}", source.err());
        let Ok(source) = source else { return };
        let cancel = CancelSignal::new();

        let stream = source.open_query("SELEC nonsense", options(&cancel)).await;
        assert!(stream.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_signal_stops_open() {
        let source = sqlite_source().await;
        assert!(source.is_ok(), "setup failed: {:?}", source.err());
        let Ok(source) = source else { return };
        let cancel = CancelSignal::new();
        cancel.cancel();

        let stream = source.open_query("SELECT 1", options(&cancel)).await;
        assert!(matches!(stream, Err(DatabaseError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_sqlite_rejects_foreign_database_and_procedures() {
        let source = sqlite_source().await;
        assert!(source.is_ok(), "setup failed: {:?}", source.err());
        let Ok(source) = source else { return };
        let cancel = CancelSignal::new();

        let mut opts = options(&cancel);
        opts.database = Some("warehouse");
        let stream = source.open_query("SELECT 1", opts).await;
        assert!(matches!(stream, Err(DatabaseError::FeatureNotSupported(_))));

        let stream = source
            .open_procedure("usp_report", None, options(&cancel))
            .await;
        assert!(matches!(stream, Err(DatabaseError::FeatureNotSupported(_))));
    }
}
