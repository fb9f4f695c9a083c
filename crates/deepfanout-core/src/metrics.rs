use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct SearchMetrics {
    requests: Counter<u64>,
    latency_ms: Histogram<f64>,
    records: Counter<u64>,
}

static METRICS: OnceCell<SearchMetrics> = OnceCell::new();

fn handles() -> &'static SearchMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("deepfanout.search");
        SearchMetrics {
            requests: meter
                .u64_counter("search_requests_total")
                .with_description("Search provider requests by provider and status")
                .init(),
            latency_ms: meter
                .f64_histogram("search_latency_ms")
                .with_description("Search provider request latency in milliseconds")
                .init(),
            records: meter
                .u64_counter("fanout_records_total")
                .with_description("Source records surviving threshold and de-duplication")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("DEEPFANOUT_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "DEEPFANOUT_OTEL_METRICS_ENDPOINT detected for {service_name}. \
             Configure an OTLP meter provider in your deployment to export search metrics."
        );
    }
}

/// Record one provider request (no-op if no meter provider is installed).
pub fn record_search_request(provider: &str, status: &str, duration_ms: u64, hits: usize) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("provider", provider.to_string()),
        KeyValue::new("status", status.to_string()),
        KeyValue::new("hits", hits as i64),
    ];

    metrics.requests.add(1, &attrs);
    metrics.latency_ms.record(duration_ms as f64, &attrs);
}

/// Record how many records a fan-out kept.
pub fn record_fanout_records(kept: usize) {
    handles().records.add(kept as u64, &[]);
}
