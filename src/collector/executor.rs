//! Query executor abstraction.
//!
//! The exporter never talks to the database directly. It issues one query per
//! namespace through a [`QueryExecutor`] and walks the result with a
//! [`RowCursor`]. Production uses [`PostgresExecutor`]; tests use
//! [`MockExecutor`].
//!
//! [`PostgresExecutor`]: super::PostgresExecutor
//! [`MockExecutor`]: super::mock::MockExecutor

use super::value::ColumnValue;

/// Error type for query execution.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Backend unreachable or connection lost.
    ConnectionError(String),
    /// The backend rejected the query.
    QueryError(String),
    /// Column metadata could not be read.
    ColumnsError(String),
    /// The current row could not be decoded into the slot array.
    RowError(String),
    /// The result stream ended abnormally.
    StreamError(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::ConnectionError(msg) => write!(f, "connection error: {}", msg),
            QueryError::QueryError(msg) => write!(f, "query error: {}", msg),
            QueryError::ColumnsError(msg) => write!(f, "column metadata error: {}", msg),
            QueryError::RowError(msg) => write!(f, "row read error: {}", msg),
            QueryError::StreamError(msg) => write!(f, "result stream error: {}", msg),
        }
    }
}

impl std::error::Error for QueryError {}

/// Executes queries against the monitored backend.
///
/// Implementations hold at most one physical connection; callers never issue
/// a second query while a cursor from the first is alive.
pub trait QueryExecutor {
    /// Lightweight connectivity check.
    fn ping(&mut self) -> Result<(), QueryError>;

    /// Issues a query and returns a cursor over its rows.
    fn query(&mut self, sql: &str) -> Result<Box<dyn RowCursor + '_>, QueryError>;
}

/// Forward-only cursor over a query result.
pub trait RowCursor {
    /// Column names in result order.
    fn columns(&mut self) -> Result<Vec<String>, QueryError>;

    /// Moves to the next row. `Ok(false)` means the result is exhausted;
    /// an error means the stream was cut short.
    fn advance(&mut self) -> Result<bool, QueryError>;

    /// Reads the current row into `slots`, which has one entry per column.
    fn read_row(&mut self, slots: &mut [ColumnValue]) -> Result<(), QueryError>;
}
