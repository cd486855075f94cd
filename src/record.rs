//! # Record
//!
//! Canonical per-value unit derived from a [MetricSample]: metric name, millisecond
//! timestamp, rendered value and an ordered, bounded tag list.

use crate::error::{Error, Result};
use crate::format::{DataFormat, EncoderConfig};
use crate::sample::{MetaValue, MetricSample, Value};
use serde::Deserialize;
use std::time::UNIX_EPOCH;

/// A record never carries more tags than this, static tags included
pub const MAX_TAGS: usize = 32;

/// Largest number of values a single sample may carry
pub const MAX_VALUES: usize = 32;

/// Metadata key overriding the configured prefix for one sample
pub const META_PREFIX: &str = "prefix";

/// Name of the data source that is left out of metric names and tags
const DEFAULT_DS_NAME: &str = "value";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered tag sequence that refuses to grow past [MAX_TAGS]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagList(Vec<Tag>);

impl TagList {
    pub fn new() -> Self {
        Self(Vec::with_capacity(MAX_TAGS))
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        if self.0.len() >= MAX_TAGS {
            return Err(Error::TagCapacity {
                needed: self.0.len() + 1,
                capacity: MAX_TAGS,
            });
        }
        self.0.push(Tag::new(name, value));
        Ok(())
    }

    /// Pushes only when the value is non-empty
    fn push_present(&mut self, name: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        self.push(name, value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Tag] {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub metric: String,
    pub timestamp: i64,
    pub value: String,
    pub tags: TagList,
}

/// Supplies rates computed by the host's value cache, one per value of the sample
pub trait RateSource: Send + Sync {
    fn rates(&self, sample: &MetricSample) -> Option<Vec<f64>>;
}

/// Rate source for hosts without a value cache
pub struct NoRates;

impl RateSource for NoRates {
    fn rates(&self, _sample: &MetricSample) -> Option<Vec<f64>> {
        None
    }
}

impl<F> RateSource for F
where
    F: Fn(&MetricSample) -> Option<Vec<f64>> + Send + Sync,
{
    fn rates(&self, sample: &MetricSample) -> Option<Vec<f64>> {
        self(sample)
    }
}

/// Checks that the values agree with the data set describing them
pub(crate) fn check_shape(sample: &MetricSample) -> Result<()> {
    let data_set = &sample.data_set;
    if data_set.type_name != sample.type_name {
        return Err(Error::TypeMismatch {
            expected: data_set.type_name.clone(),
            actual: sample.type_name.clone(),
        });
    }
    if sample.values.len() > MAX_VALUES {
        return Err(Error::TooManyValues(sample.values.len()));
    }
    if sample.values.len() != data_set.sources.len() {
        return Err(Error::TypeMismatch {
            expected: format!("{} values", data_set.sources.len()),
            actual: format!("{} values", sample.values.len()),
        });
    }
    for (source, value) in data_set.sources.iter().zip(&sample.values) {
        if source.ds_type != value.ds_type() {
            return Err(Error::TypeMismatch {
                expected: format!("{} for {}", source.ds_type, source.name),
                actual: value.ds_type().to_string(),
            });
        }
    }
    Ok(())
}

/// Prefix from the sample metadata, falling back to the configured one
fn sample_prefix<'a>(sample: &'a MetricSample, config: &'a EncoderConfig) -> Result<Option<&'a str>> {
    match sample.meta.as_ref().and_then(|meta| meta.get(META_PREFIX)) {
        Some(MetaValue::String(prefix)) => Ok(Some(prefix)),
        Some(_) => Err(Error::InvalidMetadata(META_PREFIX)),
        None => Ok(config.prefix.as_deref()),
    }
}

/// Builds one [Record] per value of `sample`
///
/// Fails as a whole: either every value is turned into a record or none is.
pub fn build_records(sample: &MetricSample, config: &EncoderConfig) -> Result<Vec<Record>> {
    check_shape(sample)?;

    let prefix = sample_prefix(sample, config)?;
    let timestamp = sample
        .time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();
    let interval_ms = sample.interval.as_millis().to_string();

    // Fetched at most once, and only when a gauge needs it
    let mut rates: Option<Option<Vec<f64>>> = None;
    let mut records = Vec::with_capacity(sample.values.len());

    for (index, (source, value)) in sample.data_set.sources.iter().zip(&sample.values).enumerate() {
        let rendered = match *value {
            Value::Counter(v) | Value::Absolute(v) => v.to_string(),
            Value::Derive(v) => v.to_string(),
            Value::Gauge(v) if v.is_finite() => format_g(v, 6),
            Value::Gauge(v) if config.store_rates => {
                let rate = rates
                    .get_or_insert_with(|| config.rates.rates(sample))
                    .as_ref()
                    .and_then(|r| r.get(index).copied())
                    .filter(|r| r.is_finite());
                match rate {
                    Some(rate) => format_g(rate, 6),
                    None => {
                        return Err(Error::InvalidGaugeValue {
                            name: source.name.clone(),
                            value: v,
                        })
                    }
                }
            }
            Value::Gauge(v) => {
                return Err(Error::InvalidGaugeValue {
                    name: source.name.clone(),
                    value: v,
                })
            }
        };

        let ds_name = if source.name == DEFAULT_DS_NAME { "" } else { source.name.as_str() };
        let ds_type = if config.append_data_type { source.ds_type.as_str() } else { "" };

        let mut tags = TagList::new();
        tags.push("host", sample.host.as_str())?;

        let metric = match config.data_format {
            DataFormat::Hierarchical => [
                prefix.unwrap_or_default(),
                sample.plugin.as_str(),
                sample.plugin_instance.as_str(),
                sample.type_name.as_str(),
                sample.type_instance.as_str(),
                ds_name,
                ds_type,
            ]
            .iter()
            .filter(|segment| !segment.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("."),
            DataFormat::Tagged => {
                tags.push("interval", interval_ms.as_str())?;
                tags.push_present("prefix", prefix.unwrap_or_default())?;
                tags.push_present("plugin", &sample.plugin)?;
                tags.push_present("plugin_instance", &sample.plugin_instance)?;
                tags.push_present("type", &sample.type_name)?;
                tags.push_present("type_instance", &sample.type_instance)?;
                tags.push_present("data_name", ds_name)?;
                tags.push_present("data_type", ds_type)?;

                if sample.plugin.is_empty() {
                    sample.type_name.clone()
                } else {
                    sample.plugin.clone()
                }
            }
        };

        records.push(Record {
            metric,
            timestamp,
            value: rendered,
            tags,
        });
    }

    Ok(records)
}

/// Renders like C's `%.<precision>g`: shortest of fixed or exponent notation,
/// trailing zeros removed, exponent with sign and at least two digits
pub(crate) fn format_g(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value.is_sign_negative() { "-inf" } else { "inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let precision = precision.max(1);
    let scientific = format!("{:.*e}", precision - 1, value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= precision as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}
