//! Scripted in-memory executor for testing the exporter without PgBouncer.
//!
//! Each query string is mapped to a canned [`MockResult`]. The executor is
//! cheaply cloneable and clones share state, so a test can keep a handle,
//! hand a clone to the exporter, then flip the backend down or inspect which
//! queries were issued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::executor::{QueryError, QueryExecutor, RowCursor};
use super::value::ColumnValue;

#[derive(Debug, Clone)]
enum MockRow {
    Values(Vec<ColumnValue>),
    Broken(String),
}

/// Canned result of one query.
#[derive(Debug, Clone)]
pub struct MockResult {
    columns: Result<Vec<String>, String>,
    rows: Vec<MockRow>,
    stream_error: Option<String>,
}

impl MockResult {
    /// Empty result with the given columns.
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: Ok(columns.iter().map(|c| c.to_string()).collect()),
            rows: Vec::new(),
            stream_error: None,
        }
    }

    /// Result whose column metadata cannot be read.
    pub fn columns_error(msg: &str) -> Self {
        Self {
            columns: Err(msg.to_string()),
            rows: Vec::new(),
            stream_error: None,
        }
    }

    /// Appends a row.
    pub fn row<V: Into<ColumnValue>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.rows
            .push(MockRow::Values(values.into_iter().map(Into::into).collect()));
        self
    }

    /// Appends a row that fails to decode.
    pub fn broken_row(mut self, msg: &str) -> Self {
        self.rows.push(MockRow::Broken(msg.to_string()));
        self
    }

    /// Cuts the stream short after the rows added so far.
    pub fn stream_error(mut self, msg: &str) -> Self {
        self.stream_error = Some(msg.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    results: HashMap<String, Result<MockResult, String>>,
    down: Option<String>,
    issued: Vec<String>,
    pings: usize,
}

/// In-memory [`QueryExecutor`].
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    state: Arc<Mutex<MockState>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers the result for `sql`.
    pub fn add_result(&self, sql: &str, result: MockResult) -> &Self {
        self.state().results.insert(sql.to_string(), Ok(result));
        self
    }

    /// Makes `sql` fail when issued.
    pub fn fail_query(&self, sql: &str, msg: &str) -> &Self {
        self.state()
            .results
            .insert(sql.to_string(), Err(msg.to_string()));
        self
    }

    /// Makes every ping and query fail with a connection error.
    pub fn set_down(&self, msg: &str) {
        self.state().down = Some(msg.to_string());
    }

    pub fn set_up(&self) {
        self.state().down = None;
    }

    /// Queries issued so far, in order.
    pub fn issued(&self) -> Vec<String> {
        self.state().issued.clone()
    }

    pub fn pings(&self) -> usize {
        self.state().pings
    }
}

impl QueryExecutor for MockExecutor {
    fn ping(&mut self) -> Result<(), QueryError> {
        let mut state = self.state();
        state.pings += 1;
        match &state.down {
            Some(msg) => Err(QueryError::ConnectionError(msg.clone())),
            None => Ok(()),
        }
    }

    fn query(&mut self, sql: &str) -> Result<Box<dyn RowCursor + '_>, QueryError> {
        let mut state = self.state();
        state.issued.push(sql.to_string());
        if let Some(msg) = &state.down {
            return Err(QueryError::ConnectionError(msg.clone()));
        }
        match state.results.get(sql) {
            Some(Ok(result)) => Ok(Box::new(MockCursor {
                result: result.clone(),
                position: None,
            })),
            Some(Err(msg)) => Err(QueryError::QueryError(msg.clone())),
            None => Err(QueryError::QueryError(format!("unexpected query: {}", sql))),
        }
    }
}

struct MockCursor {
    result: MockResult,
    position: Option<usize>,
}

impl RowCursor for MockCursor {
    fn columns(&mut self) -> Result<Vec<String>, QueryError> {
        self.result
            .columns
            .clone()
            .map_err(QueryError::ColumnsError)
    }

    fn advance(&mut self) -> Result<bool, QueryError> {
        let next = self.position.map_or(0, |p| p + 1);
        self.position = Some(next);
        if next < self.result.rows.len() {
            return Ok(true);
        }
        match &self.result.stream_error {
            Some(msg) => Err(QueryError::StreamError(msg.clone())),
            None => Ok(false),
        }
    }

    fn read_row(&mut self, slots: &mut [ColumnValue]) -> Result<(), QueryError> {
        let row = self
            .position
            .and_then(|p| self.result.rows.get(p))
            .ok_or_else(|| QueryError::RowError("no current row".to_string()))?;
        match row {
            MockRow::Broken(msg) => Err(QueryError::RowError(msg.clone())),
            MockRow::Values(values) if values.len() != slots.len() => Err(QueryError::RowError(
                format!("expected {} values, got {}", slots.len(), values.len()),
            )),
            MockRow::Values(values) => {
                slots.clone_from_slice(values);
                Ok(())
            }
        }
    }
}
