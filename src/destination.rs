//! # Destination
//!
//! One configured TSDB endpoint: encoder settings, a send buffer and a lazily
//! connected transport, all behind a single mutex.

use crate::error::{Error, Result};
use crate::flush::{Batch, FlushOutcome};
use crate::format::{self, EncoderConfig};
use crate::sample::MetricSample;
use crate::transport::Transport;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Opens the transport on first use
pub(crate) type Connector = Box<dyn FnMut() -> Result<Box<dyn Transport>> + Send>;

/// Configuration via Builder
#[derive(Debug)]
pub struct Config {
    /// Used in log fields and telemetry labels
    pub name: String,
    pub buffer_size: usize,
    pub encoder: EncoderConfig,
}

/// State guarded by the destination lock
struct DestinationState {
    batch: Batch,
    transport: Option<Box<dyn Transport>>,
    connector: Connector,
}

impl DestinationState {
    fn transport<'a>(
        transport: &'a mut Option<Box<dyn Transport>>,
        connector: &mut Connector,
        name: &str,
    ) -> Result<&'a mut Box<dyn Transport>> {
        if transport.is_none() {
            *transport = Some(connector()?);
            info!(destination = name, "transport initialized");
        }
        transport
            .as_mut()
            .ok_or_else(|| Error::Transport("transport unavailable".into()))
    }

    fn flush(&mut self, timeout: Duration, name: &str) -> Result<FlushOutcome> {
        let transport = Self::transport(&mut self.transport, &mut self.connector, name)?;
        self.batch.flush(timeout, transport.as_mut(), name)
    }

    fn write(&mut self, sample: &MetricSample, config: &Config) -> Result<()> {
        Self::transport(&mut self.transport, &mut self.connector, &config.name)?;

        let fragment = format::encode_sample(sample, &config.encoder)?;
        let fragment = fragment.as_bytes();

        match self.batch.buffer_mut().try_append(fragment) {
            Err(Error::InsufficientSpace { .. }) => {}
            result => return result,
        }

        debug!(
            destination = %config.name,
            fill = self.batch.buffer().fill(),
            needed = fragment.len(),
            "send buffer full, flushing"
        );
        self.flush(Duration::ZERO, &config.name)?;

        self.batch
            .buffer_mut()
            .try_append(fragment)
            .map_err(|_| Error::RecordTooLarge(fragment.len()))
    }
}

/// Buffered writer for one TSDB endpoint
///
/// Use [Builder](super::Builder) to construct. Share it between threads with an
/// [Arc](std::sync::Arc); every call serializes on one lock.
///
/// # Example
/// ```no_run
/// use metrics_tsdb_writer::{Builder, DataSet, DsType, MetricSample, Value};
/// use std::time::Duration;
///
/// let destination = Builder::new()
///     .url("http://tsdb.example.com:4242/api/put")
///     .init()
///     .unwrap();
///
/// let sample = MetricSample::new("h1", "load", DataSet::single("load", DsType::Gauge), vec![Value::Gauge(0.5)]);
/// destination.write(&sample).unwrap();
/// destination.flush(Duration::ZERO).unwrap();
/// ```
pub struct Destination {
    state: Mutex<DestinationState>,
    pub config: Config,
}

impl Destination {
    pub(crate) fn new(config: Config, connector: Connector) -> Self {
        Self {
            state: Mutex::new(DestinationState {
                batch: Batch::new(config.buffer_size, config.encoder.send_format),
                transport: None,
                connector,
            }),
            config,
        }
    }

    /// A panic on another thread never leaves the buffer half written, so the state
    /// of a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, DestinationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Encodes `sample` and appends it to the send buffer
    ///
    /// A full buffer is flushed first and the append retried once. Nothing is
    /// buffered when encoding fails.
    pub fn write(&self, sample: &MetricSample) -> Result<()> {
        let result = {
            let mut state = self.lock();
            let result = state.write(sample, &self.config);
            if result.is_ok() {
                let buffer = state.batch.buffer();
                trace!(
                    destination = %self.config.name,
                    fill = buffer.fill(),
                    free = buffer.free(),
                    "sample buffered"
                );
            }
            result
        };

        if let Err(e) = &result {
            warn!(
                destination = %self.config.name,
                host = %sample.host,
                plugin = %sample.plugin,
                "unable to write sample: {e}"
            );
            metrics::counter!(
                "tsdb_writer_write_errors_total",
                "destination" => self.config.name.clone(),
                "kind" => e.kind()
            )
            .increment(1);
        }
        result
    }

    /// Sends the buffer unless it was reset less than `timeout` ago
    ///
    /// [Duration::ZERO] forces the flush.
    pub fn flush(&self, timeout: Duration) -> Result<FlushOutcome> {
        self.lock().flush(timeout, &self.config.name)
    }

    /// Bytes currently committed to the send buffer
    pub fn buffered(&self) -> usize {
        self.lock().batch.buffer().fill()
    }
}

impl Drop for Destination {
    fn drop(&mut self) {
        let name = &self.config.name;
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.batch.buffer().is_empty() {
            return;
        }
        if let Err(e) = state.flush(Duration::ZERO, name) {
            error!(destination = %name, "final flush failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{DataSet, DsType, Value};
    use crate::test::{sample_at, RecordingTransport, StaticTransport};
    use crate::{Builder, DataFormat, SendFormat};
    use std::sync::Arc;
    use std::thread;

    fn json_destination(transport: RecordingTransport) -> Destination {
        Builder::new()
            .name("test")
            .buffer_size(1024)
            .with_transport(transport)
            .init()
            .unwrap()
    }

    #[test]
    fn write_buffers_until_flush() {
        let transport = RecordingTransport::default();
        let destination = json_destination(transport.clone());

        destination.write(&sample_at(1, 1.0)).unwrap();
        destination.write(&sample_at(2, 2.0)).unwrap();
        assert!(transport.payloads().is_empty());
        assert!(destination.buffered() > 0);

        assert!(matches!(destination.flush(Duration::ZERO).unwrap(), FlushOutcome::Sent { .. }));
        assert_eq!(destination.buffered(), 0);

        let payloads = transport.payloads();
        assert_eq!(payloads.len(), 1);
        let points: Vec<serde_json::Value> = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn overflow_flushes_then_appends() {
        let transport = RecordingTransport::default();
        let destination = json_destination(transport.clone());

        let mut written = 0;
        while transport.payloads().is_empty() {
            destination.write(&sample_at(written, written as f64)).unwrap();
            written += 1;
        }

        // The record that overflowed is the only one left in the buffer
        let payloads = transport.payloads();
        let sent: Vec<serde_json::Value> = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(sent.len() as u64, written - 1);
        assert!(payloads[0].len() <= 1024);

        destination.flush(Duration::ZERO).unwrap();
        let rest: Vec<serde_json::Value> = serde_json::from_slice(&transport.payloads()[1]).unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn failed_overflow_flush_drops_sample() {
        let destination = Builder::new()
            .name("test")
            .buffer_size(1024)
            .send_format(SendFormat::Put)
            .with_transport(StaticTransport::failing())
            .init()
            .unwrap();

        let mut result = Ok(());
        for i in 0..100 {
            result = destination.write(&sample_at(i, 1.0));
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(destination.buffered(), 0);
    }

    #[test]
    fn oversized_record_is_rejected() {
        let transport = RecordingTransport::default();
        let destination = json_destination(transport.clone());
        let sample = MetricSample::new(
            "h".repeat(1100),
            "cpu",
            DataSet::single("cpu", DsType::Gauge),
            vec![Value::Gauge(1.0)],
        );

        assert!(matches!(destination.write(&sample), Err(Error::RecordTooLarge(_))));
        assert_eq!(destination.buffered(), 0);
    }

    #[test]
    fn encode_error_leaves_buffer_untouched() {
        let transport = RecordingTransport::default();
        let destination = json_destination(transport.clone());
        destination.write(&sample_at(0, 1.0)).unwrap();
        let before = destination.buffered();

        let nan = MetricSample::new("h1", "load", DataSet::single("load", DsType::Gauge), vec![Value::Gauge(f64::NAN)]);
        assert!(matches!(destination.write(&nan), Err(Error::InvalidGaugeValue { .. })));
        assert_eq!(destination.buffered(), before);
    }

    #[test]
    fn empty_flush_is_idempotent() {
        let transport = RecordingTransport::default();
        let destination = json_destination(transport.clone());

        assert_eq!(destination.flush(Duration::ZERO).unwrap(), FlushOutcome::Empty);
        assert_eq!(destination.flush(Duration::ZERO).unwrap(), FlushOutcome::Empty);
        assert!(transport.payloads().is_empty());
    }

    #[test]
    fn drop_flushes_remaining_records() {
        let transport = RecordingTransport::default();
        {
            let destination = Builder::new()
                .name("test")
                .send_format(SendFormat::Put)
                .data_format(DataFormat::Hierarchical)
                .with_transport(transport.clone())
                .init()
                .unwrap();
            destination.write(&sample_at(0, 1.0)).unwrap();
        }

        let payloads = transport.payloads();
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].starts_with(b"PUTVAL h1/load/load interval=10.000 "));
    }

    #[test]
    fn concurrent_writers_share_one_buffer() {
        let transport = RecordingTransport::default();
        let destination = Arc::new(json_destination(transport.clone()));

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let destination = Arc::clone(&destination);
                thread::spawn(move || {
                    for i in 0..50 {
                        destination.write(&sample_at(t * 100 + i, i as f64)).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        destination.flush(Duration::ZERO).unwrap();

        let total: usize = transport
            .payloads()
            .iter()
            .map(|payload| serde_json::from_slice::<Vec<serde_json::Value>>(payload).unwrap().len())
            .sum();
        assert_eq!(total, 200);
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let transport = RecordingTransport::default();
        let destination = Arc::new(json_destination(transport.clone()));

        let poisoner = Arc::clone(&destination);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("poison");
        })
        .join();

        destination.write(&sample_at(0, 1.0)).unwrap();
        assert!(matches!(destination.flush(Duration::ZERO).unwrap(), FlushOutcome::Sent { .. }));
    }
}
