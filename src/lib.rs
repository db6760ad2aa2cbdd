//! pgbouncer-exporter - PgBouncer statistics as Prometheus metrics.
//!
//! This library provides:
//! - `collector` - mapping engine, query executors and the scrape orchestration
//! - `server` - HTTP endpoint serving the metrics registry

pub mod collector;
pub mod server;

/// Crate version, used by the binary and the landing page.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
