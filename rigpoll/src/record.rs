//! Vendor-neutral records and metrics.

use std::fmt;

use serde::Serialize;
use serde_json::{json, Map, Value};

/// Ordered field name to value mapping, one table row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an earlier value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend(&mut self, other: Record) {
        self.0.extend(other.0);
    }
}

/// Value of a metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    /// Convert a scalar JSON value; arrays and objects become their text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetricValue::Int(i),
                None => MetricValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => MetricValue::Text(s.clone()),
            Value::Bool(b) => MetricValue::Int(*b as i64),
            Value::Null => MetricValue::Text(String::new()),
            other => MetricValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(i) => write!(f, "{}", i),
            MetricValue::Float(x) => f.write_str(&display_float(*x)),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::Int(v as i64)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

/// One monitoring item value for one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub host: String,
    pub key: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn new(host: impl Into<String>, key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        Self {
            host: host.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// All metrics produced for one task, sent together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricBatch {
    pub task: String,
    pub metrics: Vec<Metric>,
}

/// Low-level discovery payload: `{"data":[{"{#MACRO}":"0"}, ...]}`.
pub fn discovery(macro_name: &str, count: usize) -> MetricValue {
    let key = format!("{{#{}}}", macro_name);
    let data: Vec<Value> = (0..count)
        .map(|i| {
            let mut entry = serde_json::Map::new();
            entry.insert(key.clone(), Value::String(i.to_string()));
            Value::Object(entry)
        })
        .collect();
    MetricValue::Text(json!({ "data": data }).to_string())
}

/// Format a float the way the monitoring side expects: integral values keep
/// one decimal place, others use the shortest exact representation.
pub fn display_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

/// Round half away from zero to `places` decimals.
pub fn round_to(x: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (x * scale).round() / scale
}
