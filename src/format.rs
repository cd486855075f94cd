//! # Format
//!
//! Renders samples into the two wire encodings understood by the TSDB.
//!
//! * JSON data points for the HTTP `/api/put` endpoint, one object per value
//!   <http://opentsdb.net/docs/build/html/api_http/put.html>
//! * `PUTVAL` command lines, one per sample
//!
//! Every JSON fragment starts with a comma; [SendBuffer::finalize](crate::buffer::SendBuffer::finalize)
//! turns the first one into the opening bracket of the array.

use crate::error::{Error, Result};
use crate::record::{self, build_records, NoRates, RateSource, Record, Tag, MAX_TAGS};
use crate::sample::{MetricSample, Value};
use crate::sanitize::{is_forbidden, sanitize_with, DEFAULT_REPLACEMENT};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// PUTVAL lines longer than this are refused
pub const MAX_COMMAND_LEN: usize = 1024;

/// How the buffer is shipped to the TSDB
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum SendFormat {
    /// `PUTVAL` lines
    #[serde(rename = "put", alias = "PUT", alias = "line")]
    Put,
    /// One JSON array of data points
    #[default]
    #[serde(rename = "json", alias = "HTTP", alias = "http")]
    Json,
}

impl SendFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            SendFormat::Put => "text/plain",
            SendFormat::Json => "application/json",
        }
    }

    /// Bytes kept free for [SendBuffer::finalize](crate::buffer::SendBuffer::finalize)
    pub fn trailer_len(&self) -> usize {
        match self {
            SendFormat::Put => 0,
            SendFormat::Json => 2,
        }
    }

    /// A buffer filled up to this many bytes has nothing worth sending
    pub fn empty_fill(&self) -> usize {
        match self {
            SendFormat::Put => 0,
            SendFormat::Json => 2,
        }
    }
}

/// Naming convention for JSON data points
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum DataFormat {
    /// `prefix.plugin.plugin_instance.type.type_instance.ds` names, `host` tag only
    #[serde(rename = "hierarchical", alias = "GRAPHITE", alias = "graphite")]
    Hierarchical,
    /// Short names, identity carried in tags
    #[default]
    #[serde(rename = "tagged", alias = "TAGS", alias = "tags")]
    Tagged,
}

/// Immutable per destination encoding settings
#[derive(Clone)]
pub struct EncoderConfig {
    pub send_format: SendFormat,
    pub data_format: DataFormat,
    /// Replace non-finite gauges by the rate from [EncoderConfig::rates]
    pub store_rates: bool,
    /// Add the data source type to names and tags
    pub append_data_type: bool,
    pub replace_char: char,
    pub prefix: Option<String>,
    pub static_tags: Vec<Tag>,
    pub rates: Arc<dyn RateSource>,
}

impl EncoderConfig {
    pub fn new(send_format: SendFormat, data_format: DataFormat) -> Self {
        Self {
            send_format,
            data_format,
            store_rates: false,
            append_data_type: false,
            replace_char: DEFAULT_REPLACEMENT,
            prefix: None,
            static_tags: Vec::new(),
            rates: Arc::new(NoRates),
        }
    }
}

impl EncoderConfig {
    /// [EncoderConfig::replace_char], or `_` when it is itself forbidden
    fn replacement(&self) -> char {
        if is_forbidden(self.replace_char) {
            warn!(
                replace_char = %self.replace_char.escape_debug(),
                "replace character invalid, using {DEFAULT_REPLACEMENT}"
            );
            return DEFAULT_REPLACEMENT;
        }
        self.replace_char
    }
}

impl fmt::Debug for EncoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderConfig")
            .field("send_format", &self.send_format)
            .field("data_format", &self.data_format)
            .field("store_rates", &self.store_rates)
            .field("append_data_type", &self.append_data_type)
            .field("replace_char", &self.replace_char)
            .field("prefix", &self.prefix)
            .field("static_tags", &self.static_tags)
            .finish_non_exhaustive()
    }
}

#[derive(serde::Serialize)]
struct DataPoint<'a> {
    metric: String,
    timestamp: i64,
    value: &'a RawValue,
    tags: TagMap<'a>,
}

/// Record tags followed by the static ones, sanitized while serializing
struct TagMap<'a> {
    record: &'a [Tag],
    fixed: &'a [Tag],
    replace_char: char,
}

impl Serialize for TagMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.record.len() + self.fixed.len()))?;
        for tag in self.record.iter().chain(self.fixed) {
            map.serialize_entry(
                &sanitize_with(&tag.name, self.replace_char),
                &sanitize_with(&tag.value, self.replace_char),
            )?;
        }
        map.end()
    }
}

/// Renders one record as a JSON object, preceded by the separating comma
pub fn encode_record(record: &Record, config: &EncoderConfig) -> Result<String> {
    let needed = record.tags.len() + config.static_tags.len();
    if needed > MAX_TAGS {
        return Err(Error::TagCapacity {
            needed,
            capacity: MAX_TAGS,
        });
    }

    let value = RawValue::from_string(record.value.clone())
        .map_err(|e| Error::Encoding(format!("value {} of {}: {e}", record.value, record.metric)))?;
    let replace_char = config.replacement();
    let point = DataPoint {
        metric: sanitize_with(&record.metric, replace_char),
        timestamp: record.timestamp,
        value: &value,
        tags: TagMap {
            record: record.tags.as_slice(),
            fixed: &config.static_tags,
            replace_char,
        },
    };

    let json = serde_json::to_string(&point).map_err(|e| Error::Encoding(e.to_string()))?;
    let mut fragment = String::with_capacity(json.len() + 1);
    fragment.push(',');
    fragment.push_str(&json);
    Ok(fragment)
}

/// Renders every value of `sample` into one fragment for the configured send format
///
/// Nothing is returned unless all values were encoded.
pub fn encode_sample(sample: &MetricSample, config: &EncoderConfig) -> Result<String> {
    match config.send_format {
        SendFormat::Json => {
            let mut fragment = String::new();
            for record in build_records(sample, config)? {
                fragment.push_str(&encode_record(&record, config)?);
            }
            Ok(fragment)
        }
        SendFormat::Put => encode_command(sample, config),
    }
}

/// `PUTVAL <identifier> interval=<seconds> <time>:<value>[:<value>...]\r\n`
pub fn encode_command(sample: &MetricSample, config: &EncoderConfig) -> Result<String> {
    record::check_shape(sample)?;

    let command = format!(
        "PUTVAL {} interval={:.3} {}\r\n",
        escape_identifier(&format_identifier(sample)),
        sample.interval.as_secs_f64(),
        format_values(sample, config)?
    );

    if command.len() >= MAX_COMMAND_LEN {
        return Err(Error::Encoding(format!(
            "command buffer too small, need {} bytes",
            command.len() + 1
        )));
    }
    Ok(command)
}

/// `host/plugin[-plugin_instance]/type[-type_instance]`
pub fn format_identifier(sample: &MetricSample) -> String {
    let mut identifier = format!("{}/{}", sample.host, sample.plugin);
    if !sample.plugin_instance.is_empty() {
        identifier.push('-');
        identifier.push_str(&sample.plugin_instance);
    }
    identifier.push('/');
    identifier.push_str(&sample.type_name);
    if !sample.type_instance.is_empty() {
        identifier.push('-');
        identifier.push_str(&sample.type_instance);
    }
    identifier
}

/// Quotes the identifier when it contains blanks, quotes or backslashes
pub fn escape_identifier(identifier: &str) -> String {
    if !identifier.contains([' ', '\t', '"', '\\']) {
        return identifier.to_string();
    }

    let mut escaped = String::with_capacity(identifier.len() + 2);
    escaped.push('"');
    for c in identifier.chars() {
        if c == '"' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('"');
    escaped
}

fn seconds_since_epoch(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or_default()
}

/// `<time>:<v1>:<v2>...`, counters turned into rates when `store_rates` is set
fn format_values(sample: &MetricSample, config: &EncoderConfig) -> Result<String> {
    let mut values = format!("{:.3}", seconds_since_epoch(sample.time));
    let mut rates: Option<Vec<f64>> = None;

    for (index, value) in sample.values.iter().enumerate() {
        values.push(':');
        match *value {
            Value::Gauge(v) if v.is_finite() => values.push_str(&record::format_g(v, 15)),
            Value::Gauge(_) => values.push('U'),
            _ if config.store_rates => {
                if rates.is_none() {
                    rates = config.rates.rates(sample);
                }
                let rate = rates
                    .as_ref()
                    .and_then(|r| r.get(index).copied())
                    .ok_or_else(|| Error::Encoding(format!("no rate available for value {index}")))?;
                values.push_str(&record::format_g(rate, 15));
            }
            Value::Counter(v) | Value::Absolute(v) => values.push_str(&v.to_string()),
            Value::Derive(v) => values.push_str(&v.to_string()),
        }
    }
    Ok(values)
}
