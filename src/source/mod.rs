//! Data-access boundary used by background sessions
//!
//! The session core never talks to a driver directly. It opens a
//! forward-only [`RowStream`] through a [`DataSource`] and reads it row by
//! row. [`SqlxDataSource`] is the production implementation over a
//! `sqlx::AnyPool`.

pub mod render;
mod sql;

pub use sql::{BindValue, SqlRowStream, SqlxDataSource, build_procedure_call};

use crate::budget::TimeoutBudget;
use crate::cancel::CancelSignal;
use crate::error::DatabaseError;
use crate::types::ProcedureParameters;
use async_trait::async_trait;

/// Marker written for absent column values
pub const NULL_MARKER: &str = "NULL";

/// Settings shared by both stream-opening operations
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions<'a> {
    /// Database to run against instead of the connection's default
    pub database: Option<&'a str>,
    /// Deadline of the enclosing call, if any
    pub budget: Option<&'a TimeoutBudget>,
    /// Timeout for opening the stream and receiving the first result
    pub command_timeout_secs: u64,
    /// Signal observed while opening and on every fetch
    pub cancel: &'a CancelSignal,
}

/// Forward-only cursor over one or more result sets
#[async_trait]
pub trait RowStream: Send {
    /// Number of columns in the current result set
    fn column_count(&self) -> usize;

    fn column_name(&self, index: usize) -> Option<&str>;

    /// Advance to the next row of the current result set
    ///
    /// Returns `Ok(false)` once the current result set is exhausted.
    async fn next_row(&mut self) -> Result<bool, DatabaseError>;

    /// Whether column `index` of the current row is NULL
    fn is_null(&self, index: usize) -> bool;

    /// Text rendering of column `index` of the current row
    fn value(&self, index: usize) -> Result<String, DatabaseError>;

    /// Move to the next result set that has columns
    async fn next_result_set(&mut self) -> Result<bool, DatabaseError> {
        Ok(false)
    }

    /// Release the underlying connection. Safe to call more than once.
    async fn close(&mut self);
}

/// Executes queries and stored procedures, returning row streams
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn open_query(
        &self,
        sql: &str,
        options: OpenOptions<'_>,
    ) -> Result<Box<dyn RowStream>, DatabaseError>;

    async fn open_procedure(
        &self,
        procedure_name: &str,
        parameters: Option<&ProcedureParameters>,
        options: OpenOptions<'_>,
    ) -> Result<Box<dyn RowStream>, DatabaseError>;
}
