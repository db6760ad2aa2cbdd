//! Row strategies: turning one result row into metric samples.

use tracing::trace;

use super::mapping::{NamespaceMapping, RowStrategy};
use super::namespace::{RowBuffer, ScrapeError};
use super::sample::MetricSample;
use super::value::{ColumnValue, to_float, to_label_string};

impl RowStrategy {
    /// Converts the current row of `row`.
    ///
    /// `Ok` carries value-level errors for columns that were skipped. `Err`
    /// means the row does not have the shape the strategy requires.
    pub fn convert_row(
        self,
        mapping: &NamespaceMapping,
        row: &RowBuffer,
        emit: &mut dyn FnMut(MetricSample),
    ) -> Result<Vec<ScrapeError>, ScrapeError> {
        match self {
            RowStrategy::Wide => Ok(convert_wide(mapping, row, emit)),
            RowStrategy::KeyValue => convert_key_value(mapping, row, emit),
        }
    }
}

/// Every mapped column of the row becomes a sample, labeled with the row's
/// label columns. Unmapped columns are ignored.
fn convert_wide(
    mapping: &NamespaceMapping,
    row: &RowBuffer,
    emit: &mut dyn FnMut(MetricSample),
) -> Vec<ScrapeError> {
    let label_values: Vec<String> = mapping
        .labels()
        .iter()
        .map(|label| match row.get(label) {
            Some(value) => to_label_string(value).unwrap_or_else(|| {
                trace!(namespace = mapping.namespace(), label = %label, value = %value,
                    "label value has no string form, using empty label");
                String::new()
            }),
            None => String::new(),
        })
        .collect();

    let mut errors = Vec::new();
    for (column, value) in row.iter() {
        let Some(metric) = mapping.metric(column) else {
            trace!(namespace = mapping.namespace(), column, "ignoring unmapped column");
            continue;
        };
        let Some(v) = to_float(value) else {
            errors.push(ScrapeError::ColumnValue {
                namespace: mapping.namespace().to_string(),
                column: column.to_string(),
                value: value.to_string(),
            });
            continue;
        };
        emit(MetricSample::new(
            metric.descriptor.clone(),
            v * metric.multiplier,
            label_values.clone(),
        ));
    }
    errors
}

/// The row is `(key, value, ...)`. A known key emits one unlabeled sample.
fn convert_key_value(
    mapping: &NamespaceMapping,
    row: &RowBuffer,
    emit: &mut dyn FnMut(MetricSample),
) -> Result<Vec<ScrapeError>, ScrapeError> {
    let values = row.values();
    if values.len() < 2 {
        return Err(ScrapeError::TooFewColumns {
            namespace: mapping.namespace().to_string(),
            columns: values.len(),
        });
    }

    let key = match &values[0] {
        ColumnValue::Text(key) => key.as_str(),
        other => {
            return Err(ScrapeError::KeyNotText {
                namespace: mapping.namespace().to_string(),
                found: other.type_name(),
            });
        }
    };

    let Some(metric) = mapping.metric(key) else {
        trace!(namespace = mapping.namespace(), key, "ignoring unmapped key");
        return Ok(Vec::new());
    };

    match to_float(&values[1]) {
        Some(v) => {
            emit(MetricSample::new(
                metric.descriptor.clone(),
                v * metric.multiplier,
                Vec::new(),
            ));
            Ok(Vec::new())
        }
        None => Ok(vec![ScrapeError::KeyValue {
            namespace: mapping.namespace().to_string(),
            key: key.to_string(),
            value: values[1].to_string(),
        }]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mapping::{ColumnDef, ColumnUsage, NamespaceDef};

    fn row(columns: &[&str], values: Vec<ColumnValue>) -> RowBuffer {
        let mut row = RowBuffer::new(columns.iter().map(|c| c.to_string()).collect());
        row.slots_mut().clone_from_slice(&values);
        row
    }

    fn convert(
        mapping: &NamespaceMapping,
        row: &RowBuffer,
    ) -> (Result<Vec<ScrapeError>, ScrapeError>, Vec<MetricSample>) {
        let mut samples = Vec::new();
        let result = mapping
            .strategy()
            .convert_row(mapping, row, &mut |s| samples.push(s));
        (result, samples)
    }

    fn wide() -> NamespaceMapping {
        NamespaceMapping::new(
            "pgbouncer",
            &NamespaceDef::new(
                "pools",
                RowStrategy::Wide,
                vec![
                    ColumnDef::new("name", ColumnUsage::Label, "Name"),
                    ColumnDef::new("waiting", ColumnUsage::Counter, "Waiting"),
                    ColumnDef::new("idle", ColumnUsage::Gauge, "Idle"),
                    ColumnDef::new("wait_us", ColumnUsage::GaugeScaled, "Wait")
                        .rename("wait_seconds"),
                ],
            ),
        )
        .unwrap()
    }

    fn key_value() -> NamespaceMapping {
        NamespaceMapping::new(
            "pgbouncer",
            &NamespaceDef::new(
                "config",
                RowStrategy::KeyValue,
                vec![ColumnDef::new("pool_size", ColumnUsage::Gauge, "Pool size")],
            ),
        )
        .unwrap()
    }

    #[test]
    fn wide_row_skips_unparsable_column() {
        let r = row(
            &["name", "waiting", "idle"],
            vec!["db1".into(), ColumnValue::Int(3), "notanumber".into()],
        );
        let (result, samples) = convert(&wide(), &r);

        let errors = result.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ScrapeError::ColumnValue { column, .. } if column == "idle"));

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name(), "pgbouncer_pools_waiting");
        assert_eq!(samples[0].value, 3.0);
        assert_eq!(samples[0].label_values, ["db1"]);
    }

    #[test]
    fn wide_row_scales_microseconds() {
        let r = row(&["name", "wait_us"], vec!["db1".into(), ColumnValue::Int(1500)]);
        let (_, samples) = convert(&wide(), &r);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name(), "pgbouncer_pools_wait_seconds");
        assert!((samples[0].value - 0.0015).abs() < 1e-12);
    }

    #[test]
    fn wide_row_label_fallbacks() {
        let missing = row(&["waiting"], vec![ColumnValue::Int(1)]);
        let (_, samples) = convert(&wide(), &missing);
        assert_eq!(samples[0].label_values, [""]);

        let null = row(&["name", "waiting"], vec![ColumnValue::Null, ColumnValue::Int(1)]);
        let (_, samples) = convert(&wide(), &null);
        assert_eq!(samples[0].label_values, [""]);

        let int = row(&["name", "waiting"], vec![ColumnValue::Int(5), ColumnValue::Int(1)]);
        let (_, samples) = convert(&wide(), &int);
        assert_eq!(samples[0].label_values, ["5"]);

        let unsupported = row(
            &["name", "waiting"],
            vec![ColumnValue::Bool(true), ColumnValue::Int(1)],
        );
        let (result, samples) = convert(&wide(), &unsupported);
        assert!(result.unwrap().is_empty());
        assert_eq!(samples[0].label_values, [""]);
    }

    #[test]
    fn wide_row_ignores_unmapped_columns_and_keeps_nulls() {
        let r = row(
            &["name", "pool_mode", "idle"],
            vec!["db1".into(), "session".into(), ColumnValue::Null],
        );
        let (result, samples) = convert(&wide(), &r);
        assert!(result.unwrap().is_empty());
        assert_eq!(samples.len(), 1);
        assert!(samples[0].value.is_nan());
    }

    #[test]
    fn key_value_known_key() {
        let r = row(
            &["key", "value", "changeable"],
            vec!["pool_size".into(), "10".into(), "ignored".into()],
        );
        let (result, samples) = convert(&key_value(), &r);
        assert!(result.unwrap().is_empty());
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name(), "pgbouncer_config_pool_size");
        assert_eq!(samples[0].value, 10.0);
        assert!(samples[0].label_values.is_empty());
    }

    #[test]
    fn key_value_unknown_key_is_silent() {
        let r = row(&["key", "value"], vec!["unknown_key".into(), "5".into()]);
        let (result, samples) = convert(&key_value(), &r);
        assert!(result.unwrap().is_empty());
        assert!(samples.is_empty());
    }

    #[test]
    fn key_value_bad_value_is_nonfatal() {
        let r = row(&["key", "value"], vec!["pool_size".into(), "lots".into()]);
        let (result, samples) = convert(&key_value(), &r);
        assert_eq!(result.unwrap().len(), 1);
        assert!(samples.is_empty());
    }

    #[test]
    fn key_value_single_column_is_fatal() {
        let r = row(&["key"], vec!["x".into()]);
        let (result, samples) = convert(&key_value(), &r);
        assert_eq!(
            result.unwrap_err(),
            ScrapeError::TooFewColumns {
                namespace: "config".to_string(),
                columns: 1,
            }
        );
        assert!(samples.is_empty());
    }

    #[test]
    fn key_value_non_text_key_is_fatal() {
        let r = row(&["key", "value"], vec![ColumnValue::Bytes(b"pool_size".to_vec()), "1".into()]);
        let (result, _) = convert(&key_value(), &r);
        assert!(matches!(
            result,
            Err(ScrapeError::KeyNotText { found: "bytes", .. })
        ));
    }
}
