use super::*;
use crate::transport::TransportResponse;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

/// Keeps every payload it is handed and answers 204
#[derive(Clone, Default)]
pub(crate) struct RecordingTransport {
    payloads: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingTransport {
    pub(crate) fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, payload: Bytes) -> Result<TransportResponse> {
        self.payloads.lock().unwrap().push(payload.to_vec());
        Ok(TransportResponse::accepted())
    }
}

/// Answers every payload with the same status, or fails outright
pub(crate) struct StaticTransport {
    status: Option<StatusCode>,
}

impl StaticTransport {
    pub(crate) fn status(status: StatusCode) -> Self {
        Self { status: Some(status) }
    }

    pub(crate) fn failing() -> Self {
        Self { status: None }
    }
}

impl Transport for StaticTransport {
    fn send(&mut self, _payload: Bytes) -> Result<TransportResponse> {
        match self.status {
            Some(status) => Ok(TransportResponse {
                status,
                headers: HeaderMap::new(),
                body: "{}".into(),
            }),
            None => Err(Error::Transport("connection refused".into())),
        }
    }
}

/// Single gauge `h1/load/load` taken `seconds` after the epoch
pub(crate) fn sample_at(seconds: u64, value: f64) -> MetricSample {
    MetricSample::new("h1", "load", DataSet::single("load", DsType::Gauge), vec![Value::Gauge(value)])
        .time(UNIX_EPOCH + Duration::from_secs(seconds))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Counts increments per `name{label=value,...}`
#[derive(Default)]
struct CountingRecorder {
    counters: Mutex<BTreeMap<String, Arc<AtomicU64>>>,
}

impl CountingRecorder {
    fn get(&self, key: &str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(key)
            .map(|value| value.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl metrics::Recorder for CountingRecorder {
    fn describe_counter(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

    fn describe_gauge(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

    fn describe_histogram(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

    fn register_counter(&self, key: &metrics::Key, _metadata: &metrics::Metadata<'_>) -> metrics::Counter {
        let labels: Vec<String> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let name = format!("{}{{{}}}", key.name(), labels.join(","));
        let value = self.counters.lock().unwrap().entry(name).or_default().clone();
        metrics::Counter::from_arc(value)
    }

    fn register_gauge(&self, _key: &metrics::Key, _metadata: &metrics::Metadata<'_>) -> metrics::Gauge {
        metrics::Gauge::noop()
    }

    fn register_histogram(&self, _key: &metrics::Key, _metadata: &metrics::Metadata<'_>) -> metrics::Histogram {
        metrics::Histogram::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn tagged_round_trip() {
        init_tracing();
        let transport = RecordingTransport::default();
        let destination = Builder::new()
            .name("round_trip")
            .with_tag("dc", "lga")
            .with_transport(transport.clone())
            .init()
            .unwrap();

        let if_octets = DataSet::new(
            "if_octets",
            vec![
                DataSource::new("rx", DsType::Derive),
                DataSource::new("tx", DsType::Derive),
            ],
        );
        let samples = [
            MetricSample::new("h1", "interface", if_octets.clone(), vec![Value::Derive(10), Value::Derive(20)])
                .plugin_instance("eth0"),
            MetricSample::new("h1", "cpu", DataSet::single("cpu", DsType::Derive), vec![Value::Derive(18)])
                .plugin_instance("1")
                .type_instance("nice"),
            sample_at(1346846400, 0.25),
        ];
        for sample in &samples {
            destination.write(sample).unwrap();
        }
        destination.flush(Duration::ZERO).unwrap();

        let payloads = transport.payloads();
        assert_eq!(payloads.len(), 1);
        let points: Vec<serde_json::Value> = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(points.len(), 4);

        assert_eq!(points[0]["metric"], "interface");
        assert_eq!(points[0]["value"], 10);
        assert_eq!(points[0]["tags"]["data_name"], "rx");
        assert_eq!(points[1]["tags"]["data_name"], "tx");
        assert_eq!(points[1]["tags"]["plugin_instance"], "eth0");

        assert_eq!(points[2]["metric"], "cpu");
        assert_eq!(points[2]["tags"]["type_instance"], "nice");

        assert_eq!(points[3]["metric"], "load");
        assert_eq!(points[3]["timestamp"], 1346846400000i64);
        assert_eq!(points[3]["value"], 0.25);
        for point in &points {
            assert_eq!(point["tags"]["host"], "h1");
            assert_eq!(point["tags"]["interval"], "10000");
            assert_eq!(point["tags"]["dc"], "lga");
        }
    }

    #[test]
    fn hierarchical_names_are_sanitized() {
        let transport = RecordingTransport::default();
        let destination = Builder::new()
            .name("hierarchical")
            .data_format(DataFormat::Hierarchical)
            .prefix("tsdb")
            .replace_char("-")
            .with_transport(transport.clone())
            .init()
            .unwrap();

        let df = DataSet::single("df_complex", DsType::Gauge);
        let sample = MetricSample::new("h 1", "df", df, vec![Value::Gauge(3.0)])
            .plugin_instance("root/var")
            .type_instance("free");
        destination.write(&sample).unwrap();
        destination.flush(Duration::ZERO).unwrap();

        let points: Vec<serde_json::Value> = serde_json::from_slice(&transport.payloads()[0]).unwrap();
        assert_eq!(points[0]["metric"], "tsdb.df.root-var.df_complex.free");
        assert_eq!(points[0]["tags"]["host"], "h-1");
        assert_eq!(points[0]["tags"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn put_lines_fill_buffer_before_one_flush() {
        let transport = RecordingTransport::default();
        let destination = Builder::new()
            .name("put")
            .buffer_size(1024)
            .send_format(SendFormat::Put)
            .with_transport(transport.clone())
            .init()
            .unwrap();
        let line = b"PUTVAL h1/load/load interval=10.000 0.000:1\r\n";

        // 22 lines of 45 bytes leave 34 bytes free
        for _ in 0..22 {
            destination.write(&sample_at(0, 1.0)).unwrap();
        }
        assert!(transport.payloads().is_empty());
        assert_eq!(destination.buffered(), 22 * line.len());

        destination.write(&sample_at(0, 1.0)).unwrap();
        let payloads = transport.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0], line.repeat(22));
        assert_eq!(destination.buffered(), line.len());
    }

    #[test]
    fn put_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).unwrap();
            String::from_utf8(received).unwrap()
        });

        {
            let destination = Builder::new()
                .url(format!("tcp://127.0.0.1:{port}"))
                .send_format(SendFormat::Put)
                .timeout(Duration::from_secs(5))
                .init()
                .unwrap();
            let sample = MetricSample::new(
                "h1",
                "interface",
                DataSet::new(
                    "if_octets",
                    vec![
                        DataSource::new("rx", DsType::Derive),
                        DataSource::new("tx", DsType::Derive),
                    ],
                ),
                vec![Value::Derive(1), Value::Derive(2)],
            )
            .plugin_instance("eth0")
            .time(UNIX_EPOCH + Duration::from_secs(1346846400));
            destination.write(&sample).unwrap();
            destination.write(&sample_at(1346846410, 0.5)).unwrap();
        }

        assert_eq!(
            server.join().unwrap(),
            "PUTVAL h1/interface-eth0/if_octets interval=10.000 1346846400.000:1:2\r\n\
             PUTVAL h1/load/load interval=10.000 1346846410.000:0.5\r\n"
        );
    }

    #[test]
    fn store_rates_replaces_missing_gauge() {
        let transport = RecordingTransport::default();
        let destination = Builder::new()
            .name("rates")
            .store_rates(true)
            .with_rate_source(|_: &MetricSample| Some(vec![42.5]))
            .with_transport(transport.clone())
            .init()
            .unwrap();

        destination.write(&sample_at(0, f64::NAN)).unwrap();
        destination.flush(Duration::ZERO).unwrap();

        let points: Vec<serde_json::Value> = serde_json::from_slice(&transport.payloads()[0]).unwrap();
        assert_eq!(points[0]["value"], 42.5);
    }

    #[test]
    fn telemetry_counters() {
        let recorder = CountingRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            let transport = RecordingTransport::default();
            let destination = Builder::new()
                .name("telemetry")
                .with_transport(transport.clone())
                .init()
                .unwrap();

            destination.write(&sample_at(0, 1.0)).unwrap();
            let Ok(FlushOutcome::Sent { bytes }) = destination.flush(Duration::ZERO) else {
                panic!("nothing sent");
            };
            assert_eq!(
                recorder.get("tsdb_writer_bytes_sent_total{destination=telemetry}"),
                bytes as u64
            );

            assert!(destination.write(&sample_at(0, f64::INFINITY)).is_err());
            drop(destination);

            let rejected = Builder::new()
                .name("rejected")
                .with_transport(StaticTransport::status(StatusCode::SERVICE_UNAVAILABLE))
                .init()
                .unwrap();
            rejected.write(&sample_at(0, 1.0)).unwrap();
            assert!(rejected.flush(Duration::ZERO).is_err());
        });

        assert_eq!(
            recorder.get("tsdb_writer_flushes_total{destination=telemetry,outcome=sent}"),
            1
        );
        assert_eq!(
            recorder.get("tsdb_writer_write_errors_total{destination=telemetry,kind=invalid_gauge_value}"),
            1
        );
        assert_eq!(
            recorder.get("tsdb_writer_flushes_total{destination=rejected,outcome=rejected}"),
            1
        );
        assert_eq!(recorder.get("tsdb_writer_bytes_sent_total{destination=rejected}"), 0);
    }
}
