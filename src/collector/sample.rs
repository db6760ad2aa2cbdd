//! Metric samples and their conversion into exposition metric families.

use std::collections::HashMap;
use std::sync::Arc;

use prometheus::proto::{Counter, Gauge, LabelPair, Metric, MetricFamily};

use super::mapping::{MetricDescriptor, MetricKind};

/// One value of one series, ready to be exposed.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub descriptor: Arc<MetricDescriptor>,
    pub value: f64,
    /// Values in the order of `descriptor.label_names()`.
    pub label_values: Vec<String>,
}

impl MetricSample {
    pub fn new(descriptor: Arc<MetricDescriptor>, value: f64, label_values: Vec<String>) -> Self {
        Self {
            descriptor,
            value,
            label_values,
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.fq_name()
    }

    /// Value of a label by name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.descriptor
            .label_names()
            .iter()
            .position(|l| l == name)
            .and_then(|i| self.label_values.get(i))
            .map(String::as_str)
    }

    fn to_metric(&self) -> Metric {
        let mut metric = Metric::default();
        for (name, value) in self
            .descriptor
            .label_names()
            .iter()
            .zip(&self.label_values)
        {
            let mut pair = LabelPair::default();
            pair.set_name(name.clone());
            pair.set_value(value.clone());
            metric.mut_label().push(pair);
        }
        match self.descriptor.kind() {
            MetricKind::Counter => {
                let mut counter = Counter::default();
                counter.set_value(self.value);
                metric.set_counter(counter);
            }
            MetricKind::Gauge => {
                let mut gauge = Gauge::default();
                gauge.set_value(self.value);
                metric.set_gauge(gauge);
            }
        }
        metric
    }
}

/// Groups samples into one family per metric name, in first-seen order.
pub fn into_metric_families(samples: &[MetricSample]) -> Vec<MetricFamily> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut families: Vec<MetricFamily> = Vec::new();

    for sample in samples {
        let slot = *index.entry(sample.name()).or_insert_with(|| {
            let mut family = MetricFamily::default();
            family.set_name(sample.name().to_string());
            family.set_help(sample.descriptor.help().to_string());
            family.set_field_type(sample.descriptor.kind().metric_type());
            families.push(family);
            families.len() - 1
        });
        families[slot].mut_metric().push(sample.to_metric());
    }

    families
}
