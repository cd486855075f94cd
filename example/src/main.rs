use metrics_tsdb_writer::{spawn_flush_task, Builder, DataSet, DestinationConfig, DsType, MetricSample, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reads the destination from the JSON file given as first argument, or posts to a
/// local OpenTSDB when there is none
fn load_config() -> Result<DestinationConfig, Error> {
    let config = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => serde_json::from_str(r#"{"name": "local", "url": "http://localhost:4242/api/put"}"#)?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .with_target(false)
        .without_time()
        .compact()
        .init();

    let destination = Arc::new(Builder::from(load_config()?).init()?);
    let flusher = spawn_flush_task(Arc::clone(&destination), Duration::from_secs(10))?;

    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    for second in 0..30u32 {
        ticker.tick().await;
        let sample = MetricSample::new(
            host.as_str(),
            "demo",
            DataSet::single("gauge", DsType::Gauge),
            vec![Value::Gauge(f64::from(second).sin())],
        )
        .type_instance("sine")
        .interval(Duration::from_secs(1));

        let destination = Arc::clone(&destination);
        tokio::task::spawn_blocking(move || destination.write(&sample)).await??;
    }

    let outcome = flusher.shutdown().await?;
    info!(?outcome, "done");
    Ok(())
}
