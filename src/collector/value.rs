//! Column values returned by a query executor and their coercion into
//! metric values and label values.

use chrono::{DateTime, Utc};

/// A single raw column value as produced by a [`QueryExecutor`].
///
/// The set of variants is closed: executors map whatever the backend sends
/// onto one of these before the mapping engine sees it.
///
/// [`QueryExecutor`]: super::executor::QueryExecutor
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ColumnValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl ColumnValue {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnValue::Null => "null",
            ColumnValue::Bool(_) => "bool",
            ColumnValue::Int(_) => "integer",
            ColumnValue::Float(_) => "float",
            ColumnValue::Text(_) => "text",
            ColumnValue::Bytes(_) => "bytes",
            ColumnValue::Timestamp(_) => "timestamp",
        }
    }
}

impl std::fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "NULL"),
            ColumnValue::Bool(v) => write!(f, "{}", v),
            ColumnValue::Int(v) => write!(f, "{}", v),
            ColumnValue::Float(v) => write!(f, "{}", v),
            ColumnValue::Text(v) => write!(f, "{:?}", v),
            ColumnValue::Bytes(v) => write!(f, "{:?}", String::from_utf8_lossy(v)),
            ColumnValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::Text(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::Text(v)
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Int(v)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Float(v)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ColumnValue::Null, Into::into)
    }
}

/// Converts a column value to a metric value.
///
/// NULL maps to NaN and is accepted. Text and bytes are parsed as floats;
/// a parse failure returns `None`. Timestamps become seconds since the epoch.
pub fn to_float(value: &ColumnValue) -> Option<f64> {
    match value {
        ColumnValue::Null => Some(f64::NAN),
        ColumnValue::Int(v) => Some(*v as f64),
        ColumnValue::Float(v) => Some(*v),
        ColumnValue::Timestamp(v) => Some(v.timestamp() as f64),
        ColumnValue::Text(v) => v.parse::<f64>().ok(),
        ColumnValue::Bytes(v) => std::str::from_utf8(v).ok()?.parse::<f64>().ok(),
        ColumnValue::Bool(_) => None,
    }
}

/// Converts a column value to a label value. NULL maps to the empty string.
///
/// Returns `None` for types that have no label representation.
pub fn to_label_string(value: &ColumnValue) -> Option<String> {
    match value {
        ColumnValue::Null => Some(String::new()),
        ColumnValue::Int(v) => Some(v.to_string()),
        ColumnValue::Float(v) => Some(v.to_string()),
        ColumnValue::Timestamp(v) => Some(v.timestamp().to_string()),
        ColumnValue::Text(v) => Some(v.clone()),
        ColumnValue::Bytes(v) => Some(String::from_utf8_lossy(v).into_owned()),
        ColumnValue::Bool(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn null_is_nan_and_accepted() {
        let v = to_float(&ColumnValue::Null).unwrap();
        assert!(v.is_nan());
    }

    #[test]
    fn text_parses_or_is_rejected() {
        assert_eq!(to_float(&"3.5".into()), Some(3.5));
        assert_eq!(to_float(&"abc".into()), None);
        assert_eq!(to_float(&"".into()), None);
    }

    #[test]
    fn native_numbers_convert_directly() {
        assert_eq!(to_float(&ColumnValue::Int(7)), Some(7.0));
        assert_eq!(to_float(&ColumnValue::Float(-0.25)), Some(-0.25));
    }

    #[test]
    fn bytes_are_parsed_as_text() {
        assert_eq!(to_float(&ColumnValue::Bytes(b"42".to_vec())), Some(42.0));
        assert_eq!(to_float(&ColumnValue::Bytes(vec![0xff, 0xfe])), None);
    }

    #[test]
    fn timestamp_is_seconds_since_epoch() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(to_float(&ColumnValue::Timestamp(ts)), Some(1_704_067_200.0));
        assert_eq!(
            to_label_string(&ColumnValue::Timestamp(ts)).as_deref(),
            Some("1704067200")
        );
    }

    #[test]
    fn bool_is_unsupported() {
        assert_eq!(to_float(&ColumnValue::Bool(true)), None);
        assert_eq!(to_label_string(&ColumnValue::Bool(true)), None);
    }

    #[test]
    fn label_strings() {
        assert_eq!(to_label_string(&ColumnValue::Null).as_deref(), Some(""));
        assert_eq!(to_label_string(&ColumnValue::Int(5)).as_deref(), Some("5"));
        assert_eq!(to_label_string(&ColumnValue::Float(3.0)).as_deref(), Some("3"));
        assert_eq!(to_label_string(&"db1".into()).as_deref(), Some("db1"));
        assert_eq!(
            to_label_string(&ColumnValue::Bytes(b"app".to_vec())).as_deref(),
            Some("app")
        );
    }
}
