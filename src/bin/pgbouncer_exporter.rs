//! pgbouncer_exporter - serves PgBouncer statistics to Prometheus.
//!
//! Each scrape of the telemetry path probes PgBouncer's admin console, runs
//! one `SHOW` command per configured namespace and returns the results in the
//! text exposition format.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use prometheus::Registry;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgbouncer_exporter::collector::{
    DEFAULT_NAMESPACE, Exporter, PostgresExecutor, QueryExecutor, builtin_definitions,
    load_definitions,
};
use pgbouncer_exporter::server;

// ============================================================
// CLI
// ============================================================

/// PgBouncer metrics exporter.
#[derive(Parser)]
#[command(name = "pgbouncer_exporter", about = "PgBouncer metrics exporter", version = pgbouncer_exporter::VERSION)]
struct Args {
    /// Connection string for the PgBouncer admin console.
    #[arg(
        long,
        env = "PGBOUNCER_EXPORTER_CONNECTION_STRING",
        default_value = "host=localhost port=6432 user=pgbouncer dbname=pgbouncer"
    )]
    connection_string: String,

    /// Listen address.
    #[arg(long, env = "PGBOUNCER_EXPORTER_LISTEN", default_value = "0.0.0.0:9127")]
    listen: String,

    /// Path under which metrics are exposed.
    #[arg(long, default_value = "/metrics", value_parser = parse_telemetry_path)]
    telemetry_path: String,

    /// Prefix of every exported metric name.
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// TOML file with namespace mappings, replacing the built-in table.
    #[arg(long, env = "PGBOUNCER_EXPORTER_MAPPINGS", value_name = "FILE")]
    mappings: Option<PathBuf>,

    /// Timeout in seconds for connecting to PgBouncer.
    #[arg(long, default_value = "5")]
    connect_timeout: u64,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_telemetry_path(s: &str) -> Result<String, String> {
    if !s.starts_with('/') {
        return Err(format!("telemetry path must start with '/': {}", s));
    }
    // The router would read these as captures or wildcards.
    if s.contains(['{', '}']) || s.split('/').any(|seg| seg.starts_with([':', '*'])) {
        return Err(format!("telemetry path must be a literal path: {}", s));
    }
    Ok(s.to_string())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pgbouncer_exporter={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("pgbouncer_exporter {} starting", pgbouncer_exporter::VERSION);

    let definitions = match &args.mappings {
        Some(path) => match load_definitions(path) {
            Ok(defs) => {
                info!(path = %path.display(), namespaces = defs.len(), "loaded mapping file");
                defs
            }
            Err(e) => {
                error!(error = %e, "failed to load mappings");
                process::exit(1);
            }
        },
        None => builtin_definitions(),
    };

    let mut executor = match PostgresExecutor::new(&args.connection_string) {
        Ok(exec) => exec.with_connect_timeout(Duration::from_secs(args.connect_timeout)),
        Err(e) => {
            error!(error = %e, "invalid PgBouncer connection settings");
            process::exit(1);
        }
    };

    // Not fatal: the exporter reports up=0 until PgBouncer is reachable.
    if let Err(e) = executor.ping() {
        warn!(error = %e, "PgBouncer is not reachable yet");
    }

    let exporter = match Exporter::new(&args.namespace, &definitions, executor) {
        Ok(exporter) => exporter,
        Err(e) => {
            error!(error = %e, "invalid metric mappings");
            process::exit(1);
        }
    };

    let registry = Registry::new();
    if let Err(e) = registry.register(Box::new(exporter)) {
        error!(error = %e, "failed to register exporter");
        process::exit(1);
    }

    let router = server::router(registry, &args.telemetry_path);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    info!(
        listen = %args.listen,
        path = %args.telemetry_path,
        namespace = %args.namespace,
        "serving metrics"
    );
    if let Err(e) = runtime.block_on(server::serve(&args.listen, router)) {
        error!(error = %e, listen = %args.listen, "server failed");
        process::exit(1);
    }
}
