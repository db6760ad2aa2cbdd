//! PgBouncer statistics collector.
//!
//! Turns the result sets of PgBouncer's admin console (`SHOW STATS`,
//! `SHOW POOLS`, ...) into typed, labeled metrics.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Exporter                            │
//! │   probe ─► for each NamespaceMapping ─► meta-metrics         │
//! │                     │                                        │
//! │              ┌──────▼──────┐     ┌─────────────────────┐     │
//! │              │  run_query  │────►│ RowStrategy         │     │
//! │              │  RowBuffer  │     │  Wide | KeyValue    │     │
//! │              └──────┬──────┘     └──────────┬──────────┘     │
//! │                     │                       │                │
//! │              ┌──────▼──────┐         to_float / to_label     │
//! │              │QueryExecutor│ (trait)                         │
//! │              └──────┬──────┘                                 │
//! └─────────────────────┼────────────────────────────────────────┘
//!              ┌────────┴────────┐
//!       ┌──────▼───────┐  ┌──────▼──────┐
//!       │PostgresExec. │  │MockExecutor │
//!       │ (PgBouncer)  │  │ (Testing)   │
//!       └──────────────┘  └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use pgbouncer_exporter::collector::mock::{MockExecutor, MockResult};
//! use pgbouncer_exporter::collector::{Exporter, builtin_definitions};
//!
//! let exec = MockExecutor::new();
//! exec.add_result(
//!     "SHOW lists;",
//!     MockResult::new(&["list", "items"]).row(["pools", "2"]),
//! );
//! let exporter = Exporter::new("pgbouncer", &builtin_definitions(), exec).unwrap();
//! let samples = exporter.collect();
//! assert!(samples.iter().any(|s| s.name() == "pgbouncer_lists_pools"));
//! ```

mod convert;
pub mod definitions;
pub mod executor;
mod exporter;
pub mod mapping;
pub mod mock;
mod namespace;
mod pg_executor;
mod sample;
pub mod value;

pub use definitions::{builtin_definitions, load_definitions};
pub use executor::{QueryError, QueryExecutor, RowCursor};
pub use exporter::{DEFAULT_NAMESPACE, Exporter, ScrapeHealth};
pub use mapping::{
    ColumnDef, ColumnUsage, MappingError, MetricDescriptor, MetricKind, NamespaceDef,
    NamespaceMapping, RowStrategy,
};
pub use namespace::{NamespaceReport, RowBuffer, ScrapeError, run_query};
pub use pg_executor::{DEFAULT_CONNECT_TIMEOUT, PostgresExecutor};
pub use sample::MetricSample;
pub use value::ColumnValue;
