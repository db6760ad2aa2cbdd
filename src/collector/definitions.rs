//! Mapping definitions: the built-in PgBouncer table and TOML mapping files.
//!
//! A mapping file replaces the built-in table entirely:
//!
//! ```toml
//! [[namespace]]
//! name = "pools"
//! strategy = "wide"
//!
//! [[namespace.column]]
//! name = "database"
//! usage = "label"
//! description = "Database name"
//!
//! [[namespace.column]]
//! name = "cl_active"
//! usage = "gauge"
//! description = "Client connections linked to a server connection"
//! ```

use std::path::Path;

use serde::Deserialize;

use super::mapping::{ColumnDef, ColumnUsage, MappingError, NamespaceDef, RowStrategy};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MappingFile {
    #[serde(default, rename = "namespace")]
    namespaces: Vec<NamespaceDef>,
}

/// Parses mapping definitions from TOML text. `origin` names the source in errors.
pub fn parse_definitions(text: &str, origin: &str) -> Result<Vec<NamespaceDef>, MappingError> {
    toml::from_str::<MappingFile>(text)
        .map(|file| file.namespaces)
        .map_err(|e| MappingError::Parse {
            path: origin.to_string(),
            error: e.message().to_string(),
        })
}

/// Reads mapping definitions from a TOML file.
pub fn load_definitions(path: &Path) -> Result<Vec<NamespaceDef>, MappingError> {
    let text = std::fs::read_to_string(path).map_err(|e| MappingError::Io {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    parse_definitions(&text, &path.display().to_string())
}

fn label(name: &str, description: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnUsage::Label, description)
}

fn counter(name: &str, description: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnUsage::Counter, description)
}

fn gauge(name: &str, description: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnUsage::Gauge, description)
}

fn scaled(name: &str, metric: &str, description: &str) -> ColumnDef {
    ColumnDef::new(name, ColumnUsage::GaugeScaled, description).rename(metric)
}

/// Built-in mapping for the PgBouncer admin console, in scrape order.
pub fn builtin_definitions() -> Vec<NamespaceDef> {
    vec![
        NamespaceDef::new(
            "stats",
            RowStrategy::Wide,
            vec![
                label("database", "The database for which statistics are reported"),
                counter("total_xact_count", "Total number of SQL transactions pooled by pgbouncer"),
                counter("total_query_count", "Total number of SQL queries pooled by pgbouncer"),
                counter("total_received", "Total volume in bytes of network traffic received by pgbouncer"),
                counter("total_sent", "Total volume in bytes of network traffic sent by pgbouncer"),
                scaled(
                    "total_xact_time",
                    "total_xact_time_seconds",
                    "Total number of seconds spent by pgbouncer when connected to PostgreSQL in a transaction",
                ),
                scaled(
                    "total_query_time",
                    "total_query_time_seconds",
                    "Total number of seconds spent by pgbouncer when actively connected to PostgreSQL",
                ),
                scaled(
                    "total_wait_time",
                    "total_wait_time_seconds",
                    "Time spent by clients waiting for a server in seconds",
                ),
                gauge("avg_xact_count", "Average transactions per second in last stat period"),
                gauge("avg_query_count", "Average queries per second in last stat period"),
                gauge("avg_recv", "Average received (from clients) bytes per second"),
                gauge("avg_sent", "Average sent (to clients) bytes per second"),
                scaled(
                    "avg_xact_time",
                    "avg_xact_time_seconds",
                    "Average transaction duration in seconds",
                ),
                scaled(
                    "avg_query_time",
                    "avg_query_time_seconds",
                    "Average query duration in seconds",
                ),
                scaled(
                    "avg_wait_time",
                    "avg_wait_time_seconds",
                    "Average time spent by clients waiting for a server in seconds",
                ),
            ],
        ),
        NamespaceDef::new(
            "pools",
            RowStrategy::Wide,
            vec![
                label("database", "Database name"),
                label("user", "User name"),
                label("pool_mode", "The pooling mode in use"),
                gauge("cl_active", "Client connections linked to server connection and able to process queries"),
                gauge("cl_waiting", "Client connections waiting on a server connection"),
                gauge("sv_active", "Server connections linked to a client connection"),
                gauge("sv_idle", "Server connections idle and ready for a client query"),
                gauge("sv_used", "Server connections idle more than server_check_delay, needing server_check_query"),
                gauge("sv_tested", "Server connections currently running either server_reset_query or server_check_query"),
                gauge("sv_login", "Server connections currently in the process of logging in"),
                gauge("maxwait", "Age of the oldest unserved client connection in seconds"),
                scaled(
                    "maxwait_us",
                    "maxwait_us_seconds",
                    "Microsecond part of the age of the oldest unserved client connection, in seconds",
                ),
            ],
        ),
        NamespaceDef::new(
            "databases",
            RowStrategy::Wide,
            vec![
                label("name", "Name of configured database entry"),
                label("host", "Host pgbouncer connects to"),
                label("port", "Port pgbouncer connects to"),
                label("database", "Actual database name pgbouncer connects to"),
                label("force_user", "When user is part of the connection string, the connection between pgbouncer and PostgreSQL is forced to the given user"),
                label("pool_mode", "The database's override pool_mode"),
                gauge("pool_size", "Maximum number of server connections"),
                gauge("min_pool_size", "Minimum number of server connections"),
                gauge("reserve_pool", "Maximum number of additional connections for this database"),
                gauge("max_connections", "Maximum number of allowed connections for this database"),
                gauge("current_connections", "Current number of connections for this database"),
                gauge("paused", "1 if this database is currently paused, else 0"),
                gauge("disabled", "1 if this database is currently disabled, else 0"),
            ],
        ),
        NamespaceDef::new(
            "lists",
            RowStrategy::KeyValue,
            vec![
                gauge("databases", "Count of databases"),
                gauge("users", "Count of users"),
                gauge("pools", "Count of pools"),
                gauge("free_clients", "Count of free clients"),
                gauge("used_clients", "Count of used clients"),
                gauge("login_clients", "Count of clients in login state"),
                gauge("free_servers", "Count of free servers"),
                gauge("used_servers", "Count of used servers"),
                gauge("dns_names", "Count of DNS names in the cache"),
                gauge("dns_zones", "Count of DNS zones in the cache"),
                gauge("dns_queries", "Count of in-flight DNS queries"),
                gauge("dns_pending", "Count of pending DNS queries"),
            ],
        ),
        NamespaceDef::new(
            "config",
            RowStrategy::KeyValue,
            vec![
                gauge("max_client_conn", "Maximum number of client connections allowed"),
                gauge("default_pool_size", "How many server connections to allow per user/database pair"),
                gauge("min_pool_size", "Minimum number of server connections to keep in a pool"),
                gauge("reserve_pool_size", "How many additional connections to allow to a pool"),
                gauge("reserve_pool_timeout", "Seconds a client waits before the reserve pool is used"),
                gauge("max_db_connections", "Maximum number of server connections per database"),
                gauge("max_user_connections", "Maximum number of server connections per user"),
                gauge("listen_backlog", "Backlog argument for listen(2)"),
                gauge("server_lifetime", "Seconds after which an unused server connection is closed"),
                gauge("server_idle_timeout", "Seconds after which an idle server connection is closed"),
                gauge("query_timeout", "Queries running longer than this many seconds are canceled"),
                gauge("query_wait_timeout", "Maximum seconds a query may wait for execution"),
                gauge("client_idle_timeout", "Seconds after which an idle client connection is closed"),
            ],
        ),
    ]
}
