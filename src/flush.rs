//! # Flush
//!
//! Decides whether a flush is due, hands the finished buffer to the transport and
//! always resets the buffer afterwards, whatever the outcome.

use crate::buffer::SendBuffer;
use crate::error::{Error, Result};
use crate::format::SendFormat;
use crate::transport::{classify, Delivery, Transport};
use bytes::Bytes;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result of a flush request that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The buffer is younger than the requested timeout
    Skipped,
    /// Nothing to send
    Empty,
    /// Payload of this many bytes handed to the transport
    Sent { bytes: usize },
}

/// Send buffer plus the time it was last reset
pub(crate) struct Batch {
    buffer: SendBuffer,
    last_reset: Instant,
}

impl Batch {
    pub(crate) fn new(capacity: usize, format: SendFormat) -> Self {
        Self {
            buffer: SendBuffer::new(capacity, format),
            last_reset: Instant::now(),
        }
    }

    pub(crate) fn buffer(&self) -> &SendBuffer {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut SendBuffer {
        &mut self.buffer
    }

    pub(crate) fn reset(&mut self) {
        self.buffer.initialize();
        self.last_reset = Instant::now();
    }

    /// Flushes unless `timeout` is non-zero and has not elapsed since the last reset
    pub(crate) fn flush(
        &mut self,
        timeout: Duration,
        transport: &mut dyn Transport,
        destination: &str,
    ) -> Result<FlushOutcome> {
        if !timeout.is_zero() && self.last_reset.elapsed() < timeout {
            return Ok(FlushOutcome::Skipped);
        }

        if self.buffer.is_empty() {
            self.last_reset = Instant::now();
            return Ok(FlushOutcome::Empty);
        }

        if let Err(e) = self.buffer.finalize() {
            error!(destination, fill = self.buffer.fill(), "unable to finalize send buffer: {e}");
            record_flush(destination, "malformed");
            self.reset();
            return Err(e);
        }

        let payload = Bytes::copy_from_slice(self.buffer.as_bytes());
        let bytes = payload.len();
        debug!(destination, bytes, "sending buffer");

        let result = transport.send(payload);
        self.reset();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                error!(destination, bytes, "unable to send buffer: {e}");
                record_flush(destination, "failed");
                return Err(e);
            }
        };

        let status = response.status.as_u16();
        match classify(response.status) {
            Delivery::Accepted => {
                debug!(destination, status, headers = ?response.headers, "response accepted");
                info!(destination, status, body = %response.body, "buffer sent");
            }
            Delivery::Rejected => {
                error!(destination, status, headers = ?response.headers, body = %response.body, "response rejected");
                record_flush(destination, "rejected");
                return Err(Error::Status {
                    status: response.status,
                    body: response.body,
                });
            }
            Delivery::Unexpected => {
                warn!(destination, status, headers = ?response.headers, body = %response.body, "unexpected response");
            }
        }

        record_flush(destination, "sent");
        metrics::counter!("tsdb_writer_bytes_sent_total", "destination" => destination.to_string())
            .increment(bytes as u64);
        Ok(FlushOutcome::Sent { bytes })
    }
}

fn record_flush(destination: &str, outcome: &'static str) {
    metrics::counter!("tsdb_writer_flushes_total", "destination" => destination.to_string(), "outcome" => outcome)
        .increment(1);
}
