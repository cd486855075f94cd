//! # Sample
//!
//! The shape of one observation handed over by the host agent. Everything here is
//! owned by the caller and only read by the writer.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Kind of a data source, decides how a value is rendered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DsType {
    Counter,
    Gauge,
    Derive,
    Absolute,
}

impl DsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DsType::Counter => "counter",
            DsType::Gauge => "gauge",
            DsType::Derive => "derive",
            DsType::Absolute => "absolute",
        }
    }
}

impl fmt::Display for DsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value of a sample
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Counter(u64),
    Gauge(f64),
    Derive(i64),
    Absolute(u64),
}

impl Value {
    pub fn ds_type(&self) -> DsType {
        match self {
            Value::Counter(_) => DsType::Counter,
            Value::Gauge(_) => DsType::Gauge,
            Value::Derive(_) => DsType::Derive,
            Value::Absolute(_) => DsType::Absolute,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataSource {
    pub name: String,
    pub ds_type: DsType,
}

impl DataSource {
    pub fn new(name: impl Into<String>, ds_type: DsType) -> Self {
        Self {
            name: name.into(),
            ds_type,
        }
    }
}

/// Describes the values of every sample of one type, e.g. `if_octets` has `rx` and `tx`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataSet {
    pub type_name: String,
    pub sources: Vec<DataSource>,
}

impl DataSet {
    pub fn new(type_name: impl Into<String>, sources: Vec<DataSource>) -> Self {
        Self {
            type_name: type_name.into(),
            sources,
        }
    }

    /// Data set with a single source named `value`
    pub fn single(type_name: impl Into<String>, ds_type: DsType) -> Self {
        Self::new(type_name, vec![DataSource::new("value", ds_type)])
    }
}

/// Typed metadata attached to a sample by earlier stages of the host agent
#[derive(Clone, Debug, PartialEq)]
pub enum MetaValue {
    String(String),
    SignedInt(i64),
    UnsignedInt(u64),
    Double(f64),
    Boolean(bool),
}

/// One observation: identity, timing, values and the data set describing them
#[derive(Clone, Debug)]
pub struct MetricSample {
    pub host: String,
    pub plugin: String,
    pub plugin_instance: String,
    pub type_name: String,
    pub type_instance: String,
    pub time: SystemTime,
    pub interval: Duration,
    pub meta: Option<BTreeMap<String, MetaValue>>,
    pub data_set: DataSet,
    pub values: Vec<Value>,
}

impl MetricSample {
    /// Sample whose type name is taken from the data set
    pub fn new(host: impl Into<String>, plugin: impl Into<String>, data_set: DataSet, values: Vec<Value>) -> Self {
        Self {
            host: host.into(),
            plugin: plugin.into(),
            plugin_instance: String::new(),
            type_name: data_set.type_name.clone(),
            type_instance: String::new(),
            time: SystemTime::now(),
            interval: Duration::from_secs(10),
            meta: None,
            data_set,
            values,
        }
    }

    pub fn plugin_instance(self, plugin_instance: impl Into<String>) -> Self {
        Self {
            plugin_instance: plugin_instance.into(),
            ..self
        }
    }

    pub fn type_instance(self, type_instance: impl Into<String>) -> Self {
        Self {
            type_instance: type_instance.into(),
            ..self
        }
    }

    pub fn time(self, time: SystemTime) -> Self {
        Self { time, ..self }
    }

    pub fn interval(self, interval: Duration) -> Self {
        Self { interval, ..self }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: MetaValue) -> Self {
        self.meta.get_or_insert_with(BTreeMap::new).insert(key.into(), value);
        self
    }
}
