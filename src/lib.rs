pub use {
    builder::{Builder, DestinationConfig},
    destination::Destination,
    error::{Error, Result},
    flush::FlushOutcome,
    format::{DataFormat, EncoderConfig, SendFormat},
    periodic::{spawn_flush_task, FlushTask},
    record::{RateSource, Tag},
    sample::{DataSet, DataSource, DsType, MetaValue, MetricSample, Value},
    transport::{TlsVersion, Transport, TransportResponse},
};

pub mod buffer;
mod builder;
mod destination;
mod error;
mod flush;
pub mod format;
mod periodic;
pub mod record;
mod sample;
pub mod sanitize;
#[cfg(test)]
mod test;
pub mod transport;
