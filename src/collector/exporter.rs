//! The exporter: full scrapes across all namespaces plus scrape health.
//!
//! A scrape probes the backend, runs every namespace query in definition order
//! and finishes with four meta-metrics:
//!
//! - `<ns>_up`: 1 if the backend answered the probe
//! - `<ns>_last_scrape_duration_seconds`
//! - `<ns>_scrapes_total`
//! - `<ns>_last_scrape_error`: number of errors in the last scrape, 1 if the
//!   backend was down
//!
//! Scrapes are serialized: the executor holds a single connection and the
//! health counters are only touched while the state lock is held.

use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use tracing::{debug, error, warn};

use super::executor::QueryExecutor;
use super::mapping::{
    MappingError, MetricDescriptor, MetricKind, NamespaceDef, NamespaceMapping, build_mappings,
};
use super::namespace::run_query;
use super::sample::{MetricSample, into_metric_families};

/// Default global metric prefix.
pub const DEFAULT_NAMESPACE: &str = "pgbouncer";

/// Health of the most recent scrape and cumulative scrape count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeHealth {
    pub up: bool,
    /// Errors seen during the last scrape.
    pub last_error: u64,
    pub last_duration: Duration,
    pub scrapes_total: u64,
}

struct MetaDescriptors {
    up: Arc<MetricDescriptor>,
    duration: Arc<MetricDescriptor>,
    scrapes_total: Arc<MetricDescriptor>,
    error: Arc<MetricDescriptor>,
}

impl MetaDescriptors {
    fn new(namespace: &str) -> Result<Self, MappingError> {
        let meta = |name: &str, kind: MetricKind, help: &str| {
            MetricDescriptor::new(
                format!("{}_{}", namespace, name),
                help.to_string(),
                kind,
                Vec::new(),
            )
            .map(Arc::new)
        };
        Ok(Self {
            up: meta(
                "up",
                MetricKind::Gauge,
                "Was the PgBouncer instance query successful?",
            )?,
            duration: meta(
                "last_scrape_duration_seconds",
                MetricKind::Gauge,
                "Duration of the last scrape of metrics from PgBouncer.",
            )?,
            scrapes_total: meta(
                "scrapes_total",
                MetricKind::Counter,
                "Total number of times PgBouncer has been scraped for metrics.",
            )?,
            error: meta(
                "last_scrape_error",
                MetricKind::Gauge,
                "Number of errors in the last scrape of metrics from PgBouncer (1 if PgBouncer was unreachable).",
            )?,
        })
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<MetricDescriptor>> {
        [&self.duration, &self.up, &self.scrapes_total, &self.error].into_iter()
    }
}

struct ScrapeState<E> {
    executor: E,
    health: ScrapeHealth,
}

/// Republishes PgBouncer statistics as metrics.
pub struct Exporter<E> {
    namespace: String,
    mappings: Vec<NamespaceMapping>,
    meta: MetaDescriptors,
    state: Mutex<ScrapeState<E>>,
}

impl<E: QueryExecutor + Send> Exporter<E> {
    /// Builds all descriptors from `defs`. Fails on any invalid definition.
    pub fn new(namespace: &str, defs: &[NamespaceDef], executor: E) -> Result<Self, MappingError> {
        let mappings = build_mappings(namespace, defs)?;
        let meta = MetaDescriptors::new(namespace)?;
        let metrics = {
            let mut names = HashSet::new();
            for desc in mappings.iter().flat_map(|m| m.descriptors()).chain(meta.iter()) {
                if !names.insert(desc.fq_name()) {
                    return Err(MappingError::DuplicateMetric(desc.fq_name().to_string()));
                }
            }
            names.len()
        };
        debug!(
            namespace,
            namespaces = mappings.len(),
            metrics,
            "exporter mappings built"
        );
        Ok(Self {
            namespace: namespace.to_string(),
            mappings,
            meta,
            state: Mutex::new(ScrapeState {
                executor,
                health: ScrapeHealth::default(),
            }),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn mappings(&self) -> &[NamespaceMapping] {
        &self.mappings
    }

    /// Snapshot of the scrape health.
    pub fn health(&self) -> ScrapeHealth {
        self.lock().health.clone()
    }

    /// Every descriptor this exporter can emit, derived from the mappings.
    pub fn descriptors(&self) -> Vec<&Arc<MetricDescriptor>> {
        self.mappings
            .iter()
            .flat_map(|m| m.descriptors())
            .chain(self.meta.iter())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, ScrapeState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one scrape and returns all samples, meta-metrics last.
    pub fn collect(&self) -> Vec<MetricSample> {
        let mut samples = Vec::new();
        self.collect_with(&mut |s| samples.push(s));
        samples
    }

    /// Runs one scrape, passing each sample to `emit` as soon as it is produced.
    pub fn collect_with(&self, emit: &mut dyn FnMut(MetricSample)) {
        let mut state = self.lock();
        self.scrape(&mut state, emit);

        let health = &state.health;
        let meta = [
            (&self.meta.duration, health.last_duration.as_secs_f64()),
            (&self.meta.up, if health.up { 1.0 } else { 0.0 }),
            (&self.meta.scrapes_total, health.scrapes_total as f64),
            (&self.meta.error, health.last_error as f64),
        ];
        for (descriptor, value) in meta {
            emit(MetricSample::new(descriptor.clone(), value, Vec::new()));
        }
    }

    /// Descriptors of the samples a scrape currently produces.
    ///
    /// Runs a full scrape on a background thread and keeps only the
    /// descriptors. When the backend is down only the meta-metrics are
    /// reported.
    pub fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        let (tx, rx) = mpsc::channel::<MetricSample>();
        thread::scope(|s| {
            s.spawn(move || {
                self.collect_with(&mut |sample| {
                    // `rx` lives until the scope ends, so send cannot fail.
                    let _ = tx.send(sample);
                });
            });

            let mut seen = HashSet::new();
            let mut descriptors = Vec::new();
            for sample in rx {
                if seen.insert(sample.name().to_string()) {
                    descriptors.push(sample.descriptor);
                }
            }
            descriptors
        })
    }

    fn scrape(&self, state: &mut ScrapeState<E>, emit: &mut dyn FnMut(MetricSample)) {
        let started = Instant::now();
        debug!("starting scrape");

        state.health.last_error = 0;
        state.health.scrapes_total += 1;

        match state.executor.ping() {
            Err(e) => {
                error!(error = %e, "backend is down, failed to connect");
                state.health.up = false;
                state.health.last_error = 1;
            }
            Ok(()) => {
                debug!("backend is up, proceeding with scrape");
                state.health.up = true;
                for mapping in &self.mappings {
                    let report = run_query(mapping, &mut state.executor, emit);
                    for e in &report.nonfatal {
                        warn!(error = %e, "scrape error");
                    }
                    let mut errors = report.nonfatal.len() as u64;
                    if let Some(e) = report.fatal {
                        error!(namespace = mapping.namespace(), error = %e,
                            "namespace scrape aborted");
                        errors += 1;
                    }
                    state.health.last_error += errors;
                }
            }
        }

        state.health.last_duration = started.elapsed();
        debug!(
            duration_ms = state.health.last_duration.as_millis() as u64,
            errors = state.health.last_error,
            "ending scrape"
        );
    }
}

impl<E: QueryExecutor + Send> Collector for Exporter<E> {
    fn desc(&self) -> Vec<&Desc> {
        self.descriptors().into_iter().map(|d| d.desc()).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut samples = Vec::new();
        self.collect_with(&mut |s| samples.push(s));
        into_metric_families(&samples)
    }
}
