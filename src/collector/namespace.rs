//! Per-namespace query execution.
//!
//! [`run_query`] issues exactly one query for a namespace, reads the result
//! row by row into a reusable [`RowBuffer`] and hands each row to the
//! namespace's row strategy.
//!
//! Failures are split in two classes. Structural failures (query rejected,
//! column metadata unreadable, row undecodable, malformed key/value row)
//! abandon the namespace. Value failures (a column that does not parse, a
//! result stream cut short after some rows) are collected and the namespace
//! keeps whatever it already emitted.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::executor::{QueryError, QueryExecutor};
use super::mapping::NamespaceMapping;
use super::sample::MetricSample;
use super::value::ColumnValue;

/// Error raised while scraping one namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrapeError {
    /// Executor failure while issuing or reading the query.
    Query { namespace: String, error: QueryError },
    /// A mapped column whose value is not numeric.
    ColumnValue {
        namespace: String,
        column: String,
        value: String,
    },
    /// A known key whose value is not numeric.
    KeyValue {
        namespace: String,
        key: String,
        value: String,
    },
    /// Key/value row with fewer than two columns.
    TooFewColumns { namespace: String, columns: usize },
    /// Key/value row whose first column is not text.
    KeyNotText {
        namespace: String,
        found: &'static str,
    },
}

impl std::fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeError::Query { namespace, error } => write!(f, "{}: {}", namespace, error),
            ScrapeError::ColumnValue {
                namespace,
                column,
                value,
            } => write!(
                f,
                "{}: unexpected value for column {}: {}",
                namespace, column, value
            ),
            ScrapeError::KeyValue {
                namespace,
                key,
                value,
            } => write!(f, "{}: unexpected value for key {}: {}", namespace, key, value),
            ScrapeError::TooFewColumns { namespace, columns } => write!(
                f,
                "{}: key/value row needs at least 2 columns, got {}",
                namespace, columns
            ),
            ScrapeError::KeyNotText { namespace, found } => write!(
                f,
                "{}: key/value row key must be text, got {}",
                namespace, found
            ),
        }
    }
}

impl std::error::Error for ScrapeError {}

/// Current row of a query: column names, name lookup and one value slot per
/// column. Slots are overwritten for every row.
#[derive(Debug)]
pub struct RowBuffer {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    values: Vec<ColumnValue>,
}

impl RowBuffer {
    pub fn new(columns: Vec<String>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let values = vec![ColumnValue::Null; columns.len()];
        Self {
            columns,
            index,
            values,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[ColumnValue] {
        &self.values
    }

    /// Value of a column in the current row, `None` if the result has no such column.
    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.index.get(column).map(|&i| &self.values[i])
    }

    /// `(column, value)` pairs of the current row in result order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [ColumnValue] {
        &mut self.values
    }
}

/// Result of scraping one namespace.
#[derive(Debug, Default)]
pub struct NamespaceReport {
    /// Value-level errors; the namespace continued past them.
    pub nonfatal: Vec<ScrapeError>,
    /// Structural error that abandoned the namespace.
    pub fatal: Option<ScrapeError>,
    /// Samples emitted before completion or abandonment.
    pub emitted: usize,
}

/// Runs the namespace query and emits one sample per convertible value.
pub fn run_query(
    mapping: &NamespaceMapping,
    executor: &mut dyn QueryExecutor,
    emit: &mut dyn FnMut(MetricSample),
) -> NamespaceReport {
    let namespace = mapping.namespace();
    let mut report = NamespaceReport::default();
    let fail = |error: QueryError| ScrapeError::Query {
        namespace: namespace.to_string(),
        error,
    };

    let mut cursor = match executor.query(mapping.query()) {
        Ok(cursor) => cursor,
        Err(e) => {
            report.fatal = Some(fail(e));
            return report;
        }
    };

    let columns = match cursor.columns() {
        Ok(columns) => columns,
        Err(e) => {
            report.fatal = Some(fail(e));
            return report;
        }
    };
    let mut row = RowBuffer::new(columns);

    let mut counting_emit = |sample: MetricSample| {
        report.emitted += 1;
        emit(sample);
    };

    loop {
        match cursor.advance() {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                warn!(namespace, error = %e, "failed to consume all rows");
                report.nonfatal.push(fail(e));
                break;
            }
        }

        if let Err(e) = cursor.read_row(row.slots_mut()) {
            report.fatal = Some(fail(e));
            break;
        }

        match mapping
            .strategy()
            .convert_row(mapping, &row, &mut counting_emit)
        {
            Ok(errors) => report.nonfatal.extend(errors),
            Err(e) => {
                report.fatal = Some(e);
                break;
            }
        }
    }

    debug!(
        namespace,
        emitted = report.emitted,
        errors = report.nonfatal.len(),
        "namespace scraped"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mapping::{ColumnDef, ColumnUsage, NamespaceDef, RowStrategy};
    use crate::collector::mock::{MockExecutor, MockResult};

    fn pools() -> NamespaceMapping {
        NamespaceMapping::new(
            "pgbouncer",
            &NamespaceDef::new(
                "pools",
                RowStrategy::Wide,
                vec![
                    ColumnDef::new("database", ColumnUsage::Label, "Database"),
                    ColumnDef::new("cl_active", ColumnUsage::Gauge, "Active clients"),
                    ColumnDef::new("cl_waiting", ColumnUsage::Gauge, "Waiting clients"),
                ],
            ),
        )
        .unwrap()
    }

    fn scrape(mapping: &NamespaceMapping, exec: &MockExecutor) -> (NamespaceReport, Vec<MetricSample>) {
        let mut exec = exec.clone();
        let mut samples = Vec::new();
        let report = run_query(mapping, &mut exec, &mut |s| samples.push(s));
        (report, samples)
    }

    #[test]
    fn row_buffer_lookup() {
        let row = RowBuffer::new(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(row.get("b"), Some(&ColumnValue::Null));
        assert_eq!(row.get("c"), None);
        assert_eq!(row.values().len(), 2);
    }

    #[test]
    fn issues_one_query_and_emits_per_row() {
        let exec = MockExecutor::new();
        exec.add_result(
            "SHOW pools;",
            MockResult::new(&["database", "cl_active", "cl_waiting", "pool_mode"])
                .row(["app", "3", "0", "session"])
                .row(["pgbouncer", "1", "2", "statement"]),
        );

        let (report, samples) = scrape(&pools(), &exec);
        assert_eq!(exec.issued(), ["SHOW pools;"]);
        assert!(report.fatal.is_none());
        assert!(report.nonfatal.is_empty());
        assert_eq!(report.emitted, 4);
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[2].name(), "pgbouncer_pools_cl_active");
        assert_eq!(samples[2].label("database"), Some("pgbouncer"));
        assert_eq!(samples[2].value, 1.0);
    }

    #[test]
    fn query_failure_is_fatal_and_emits_nothing() {
        let exec = MockExecutor::new();
        exec.fail_query("SHOW pools;", "invalid command");

        let (report, samples) = scrape(&pools(), &exec);
        assert!(samples.is_empty());
        assert_eq!(
            report.fatal,
            Some(ScrapeError::Query {
                namespace: "pools".to_string(),
                error: QueryError::QueryError("invalid command".to_string()),
            })
        );
    }

    #[test]
    fn column_metadata_failure_is_fatal() {
        let exec = MockExecutor::new();
        exec.add_result("SHOW pools;", MockResult::columns_error("no description"));

        let (report, samples) = scrape(&pools(), &exec);
        assert!(samples.is_empty());
        assert!(matches!(
            report.fatal,
            Some(ScrapeError::Query {
                error: QueryError::ColumnsError(_),
                ..
            })
        ));
    }

    #[test]
    fn row_read_failure_abandons_remaining_rows() {
        let exec = MockExecutor::new();
        exec.add_result(
            "SHOW pools;",
            MockResult::new(&["database", "cl_active"])
                .row(["app", "3"])
                .broken_row("invalid utf-8")
                .row(["other", "4"]),
        );

        let (report, samples) = scrape(&pools(), &exec);
        assert_eq!(samples.len(), 1);
        assert!(matches!(
            report.fatal,
            Some(ScrapeError::Query {
                error: QueryError::RowError(_),
                ..
            })
        ));
    }

    #[test]
    fn truncated_stream_is_nonfatal() {
        let exec = MockExecutor::new();
        exec.add_result(
            "SHOW pools;",
            MockResult::new(&["database", "cl_active"])
                .row(["app", "3"])
                .stream_error("unexpected EOF"),
        );

        let (report, samples) = scrape(&pools(), &exec);
        assert_eq!(samples.len(), 1);
        assert!(report.fatal.is_none());
        assert_eq!(report.nonfatal.len(), 1);
    }

    #[test]
    fn value_errors_accumulate_across_rows() {
        let exec = MockExecutor::new();
        exec.add_result(
            "SHOW pools;",
            MockResult::new(&["database", "cl_active", "cl_waiting"])
                .row(["a", "x", "1"])
                .row(["b", "2", "y"]),
        );

        let (report, samples) = scrape(&pools(), &exec);
        assert_eq!(samples.len(), 2);
        assert_eq!(report.nonfatal.len(), 2);
        assert!(report.fatal.is_none());
    }

    #[test]
    fn key_value_structural_error_stops_namespace() {
        let mapping = NamespaceMapping::new(
            "pgbouncer",
            &NamespaceDef::new(
                "lists",
                RowStrategy::KeyValue,
                vec![ColumnDef::new("databases", ColumnUsage::Gauge, "Databases")],
            ),
        )
        .unwrap();
        let exec = MockExecutor::new();
        exec.add_result(
            "SHOW lists;",
            MockResult::new(&["list", "items"])
                .row([ColumnValue::from("databases"), ColumnValue::Int(2)])
                .row([ColumnValue::Int(1), ColumnValue::Int(2)])
                .row([ColumnValue::from("databases"), ColumnValue::Int(3)]),
        );

        let (report, samples) = scrape(&mapping, &exec);
        assert_eq!(samples.len(), 1);
        assert_eq!(
            report.fatal,
            Some(ScrapeError::KeyNotText {
                namespace: "lists".to_string(),
                found: "integer",
            })
        );
    }
}
