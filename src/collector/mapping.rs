//! Column-to-metric mapping.
//!
//! A [`NamespaceDef`] is the declarative description of one namespace: which
//! columns become labels, which become counters or gauges, and which row
//! strategy applies. [`NamespaceMapping::new`] turns it into the immutable
//! lookup structure used at scrape time, deriving one [`MetricDescriptor`]
//! per metric column. Descriptors are built once and shared for the life of
//! the process so every scrape reports identical names and label sets.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use prometheus::core::Desc;
use prometheus::proto::MetricType;
use serde::Deserialize;

/// Multiplier applied to [`ColumnUsage::GaugeScaled`] columns.
///
/// PgBouncer reports times in microseconds; the scaled gauge exposes seconds.
pub const SCALED_MULTIPLIER: f64 = 1e-6;

/// Error raised while building mappings from definitions.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingError {
    /// Usage string outside the supported set.
    UnknownUsage(String),
    /// A column definition without a description.
    MissingHelp { namespace: String, column: String },
    /// The same column declared twice in one namespace.
    DuplicateColumn { namespace: String, column: String },
    /// Two columns resolve to the same fully-qualified metric name.
    DuplicateMetric(String),
    /// The same namespace declared twice.
    DuplicateNamespace(String),
    /// Key/value namespaces emit unlabeled samples and cannot declare labels.
    LabelInKeyValue { namespace: String, column: String },
    /// Metric or label name rejected by the metrics library.
    InvalidDescriptor { name: String, reason: String },
    /// Mapping file could not be read.
    Io { path: String, error: String },
    /// Mapping file could not be parsed.
    Parse { path: String, error: String },
}

impl std::fmt::Display for MappingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MappingError::UnknownUsage(usage) => write!(
                f,
                "unknown column usage '{}' (expected label, counter, gauge or gauge_scaled)",
                usage
            ),
            MappingError::MissingHelp { namespace, column } => {
                write!(f, "{}.{}: description must not be empty", namespace, column)
            }
            MappingError::DuplicateColumn { namespace, column } => {
                write!(f, "{}.{}: column declared more than once", namespace, column)
            }
            MappingError::DuplicateMetric(name) => {
                write!(f, "metric {} is produced by more than one column", name)
            }
            MappingError::DuplicateNamespace(namespace) => {
                write!(f, "namespace {} declared more than once", namespace)
            }
            MappingError::LabelInKeyValue { namespace, column } => write!(
                f,
                "{}.{}: key/value namespaces cannot declare label columns",
                namespace, column
            ),
            MappingError::InvalidDescriptor { name, reason } => {
                write!(f, "invalid metric {}: {}", name, reason)
            }
            MappingError::Io { path, error } => {
                write!(f, "failed to read mapping file {}: {}", path, error)
            }
            MappingError::Parse { path, error } => {
                write!(f, "failed to parse mapping file {}: {}", path, error)
            }
        }
    }
}

impl std::error::Error for MappingError {}

/// Role of a source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ColumnUsage {
    /// Column value becomes a label on every metric of the row.
    Label,
    /// Monotonic counter, exported as is.
    Counter,
    /// Point-in-time value, exported as is.
    Gauge,
    /// Point-in-time value scaled by [`SCALED_MULTIPLIER`].
    GaugeScaled,
}

impl ColumnUsage {
    /// Metric kind and multiplier for metric columns, `None` for labels.
    pub fn metric(self) -> Option<(MetricKind, f64)> {
        match self {
            ColumnUsage::Label => None,
            ColumnUsage::Counter => Some((MetricKind::Counter, 1.0)),
            ColumnUsage::Gauge => Some((MetricKind::Gauge, 1.0)),
            ColumnUsage::GaugeScaled => Some((MetricKind::Gauge, SCALED_MULTIPLIER)),
        }
    }
}

impl FromStr for ColumnUsage {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "label" => Ok(ColumnUsage::Label),
            "counter" => Ok(ColumnUsage::Counter),
            "gauge" => Ok(ColumnUsage::Gauge),
            "gauge_scaled" | "gauge_ms" => Ok(ColumnUsage::GaugeScaled),
            _ => Err(MappingError::UnknownUsage(s.to_string())),
        }
    }
}

impl TryFrom<String> for ColumnUsage {
    type Error = MappingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// How rows of a namespace are turned into samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStrategy {
    /// Every mapped column of a row is its own metric; label columns are shared.
    Wide,
    /// Each row is `(key, value, ...)`; the key selects the metric.
    KeyValue,
}

/// Declarative description of one column.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnDef {
    /// Column name as returned by the query (or key, for key/value rows).
    pub name: String,
    pub usage: ColumnUsage,
    /// Overrides the column name in the exported metric name.
    #[serde(default)]
    pub metric: Option<String>,
    pub description: String,
}

impl ColumnDef {
    pub fn new(name: &str, usage: ColumnUsage, description: &str) -> Self {
        Self {
            name: name.to_string(),
            usage,
            metric: None,
            description: description.to_string(),
        }
    }

    /// Sets the exported metric name suffix.
    pub fn rename(mut self, metric: &str) -> Self {
        self.metric = Some(metric.to_string());
        self
    }
}

/// Declarative description of one namespace.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamespaceDef {
    pub name: String,
    pub strategy: RowStrategy,
    /// Query to run; defaults to `SHOW <name>;`.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default, rename = "column")]
    pub columns: Vec<ColumnDef>,
}

impl NamespaceDef {
    pub fn new(name: &str, strategy: RowStrategy, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.to_string(),
            strategy,
            query: None,
            columns,
        }
    }
}

/// Metric type of an exported series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn metric_type(self) -> MetricType {
        match self {
            MetricKind::Counter => MetricType::COUNTER,
            MetricKind::Gauge => MetricType::GAUGE,
        }
    }
}

/// Identity of an exported metric: name, kind, ordered label names and help.
#[derive(Debug)]
pub struct MetricDescriptor {
    kind: MetricKind,
    desc: Desc,
}

impl MetricDescriptor {
    /// Builds a descriptor, validating the metric and label names.
    pub fn new(
        fq_name: String,
        help: String,
        kind: MetricKind,
        label_names: Vec<String>,
    ) -> Result<Self, MappingError> {
        let desc = Desc::new(fq_name.clone(), help, label_names, HashMap::new()).map_err(|e| {
            MappingError::InvalidDescriptor {
                name: fq_name,
                reason: e.to_string(),
            }
        })?;
        Ok(Self { kind, desc })
    }

    pub fn fq_name(&self) -> &str {
        &self.desc.fq_name
    }

    pub fn help(&self) -> &str {
        &self.desc.help
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn label_names(&self) -> &[String] {
        &self.desc.variable_labels
    }

    /// Descriptor in the form the registry expects.
    pub fn desc(&self) -> &Desc {
        &self.desc
    }
}

impl PartialEq for MetricDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.fq_name() == other.fq_name()
            && self.label_names() == other.label_names()
            && self.help() == other.help()
    }
}

/// A metric column resolved to its descriptor and multiplier.
#[derive(Debug, Clone)]
pub struct MetricMapping {
    pub descriptor: Arc<MetricDescriptor>,
    pub multiplier: f64,
}

/// Immutable, scrape-ready mapping for one namespace.
#[derive(Debug)]
pub struct NamespaceMapping {
    namespace: String,
    query: String,
    strategy: RowStrategy,
    labels: Vec<String>,
    metrics: HashMap<String, MetricMapping>,
}

impl NamespaceMapping {
    /// Derives descriptors for every metric column of `def`.
    ///
    /// Metric names are `<exporter_namespace>_<namespace>_<column or override>`.
    /// Label names are sorted, so every descriptor in the namespace carries the
    /// same label order regardless of declaration order.
    pub fn new(exporter_namespace: &str, def: &NamespaceDef) -> Result<Self, MappingError> {
        let mut seen = HashSet::new();
        for column in &def.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(MappingError::DuplicateColumn {
                    namespace: def.name.clone(),
                    column: column.name.clone(),
                });
            }
            if column.description.trim().is_empty() {
                return Err(MappingError::MissingHelp {
                    namespace: def.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        let mut labels: Vec<String> = def
            .columns
            .iter()
            .filter(|c| c.usage == ColumnUsage::Label)
            .map(|c| c.name.clone())
            .collect();
        labels.sort();

        if def.strategy == RowStrategy::KeyValue
            && let Some(label) = labels.first()
        {
            return Err(MappingError::LabelInKeyValue {
                namespace: def.name.clone(),
                column: label.clone(),
            });
        }

        let mut metrics = HashMap::new();
        let mut names = HashSet::new();
        for column in &def.columns {
            let Some((kind, multiplier)) = column.usage.metric() else {
                continue;
            };
            let suffix = column.metric.as_deref().unwrap_or(&column.name);
            let fq_name = format!("{}_{}_{}", exporter_namespace, def.name, suffix);
            if !names.insert(fq_name.clone()) {
                return Err(MappingError::DuplicateMetric(fq_name));
            }
            let descriptor =
                MetricDescriptor::new(fq_name, column.description.clone(), kind, labels.clone())?;
            metrics.insert(
                column.name.clone(),
                MetricMapping {
                    descriptor: Arc::new(descriptor),
                    multiplier,
                },
            );
        }

        Ok(Self {
            namespace: def.name.clone(),
            query: def
                .query
                .clone()
                .unwrap_or_else(|| format!("SHOW {};", def.name)),
            strategy: def.strategy,
            labels,
            metrics,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn strategy(&self) -> RowStrategy {
        self.strategy
    }

    /// Label column names in descriptor order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Metric mapping for a column (or key), if it is a metric column.
    pub fn metric(&self, column: &str) -> Option<&MetricMapping> {
        self.metrics.get(column)
    }

    /// All descriptors of this namespace, sorted by name.
    pub fn descriptors(&self) -> Vec<&Arc<MetricDescriptor>> {
        let mut descs: Vec<_> = self.metrics.values().map(|m| &m.descriptor).collect();
        descs.sort_by(|a, b| a.fq_name().cmp(b.fq_name()));
        descs
    }
}

/// Builds mappings for all namespaces, preserving definition order.
///
/// Fails on the first invalid definition; nothing is partially built.
pub fn build_mappings(
    exporter_namespace: &str,
    defs: &[NamespaceDef],
) -> Result<Vec<NamespaceMapping>, MappingError> {
    let mut namespaces = HashSet::new();
    let mut names = HashSet::new();
    let mut mappings = Vec::with_capacity(defs.len());

    for def in defs {
        if !namespaces.insert(def.name.as_str()) {
            return Err(MappingError::DuplicateNamespace(def.name.clone()));
        }
        let mapping = NamespaceMapping::new(exporter_namespace, def)?;
        for desc in mapping.descriptors() {
            if !names.insert(desc.fq_name().to_string()) {
                return Err(MappingError::DuplicateMetric(desc.fq_name().to_string()));
            }
        }
        mappings.push(mapping);
    }

    Ok(mappings)
}
