use lazy_static::lazy_static;
use prometheus::{
    core::Collector, Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref POLLS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minut_bridge_polls_total",
        "Total poll cycles started"
    ))
    .unwrap();
    pub static ref POLL_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minut_bridge_poll_failures_total",
        "Total poll cycles that failed"
    ))
    .unwrap();
    pub static ref API_REQUESTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minut_bridge_api_requests_total",
        "Total HTTP requests sent to the Minut API"
    ))
    .unwrap();
    pub static ref TOKEN_REFRESH_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minut_bridge_token_refresh_total",
        "Total access token refreshes"
    ))
    .unwrap();
    pub static ref POLL_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "minut_bridge_poll_latency_seconds",
            "Time taken by a successful poll cycle"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0])
    )
    .unwrap();
    pub static ref DEVICES: Gauge = Gauge::with_opts(Opts::new(
        "minut_bridge_devices",
        "Number of Points known to the bridge"
    ))
    .unwrap();
    pub static ref SNAPSHOTS_DROPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minut_bridge_snapshots_dropped_total",
        "Snapshots not forwarded because the publisher channel was full"
    ))
    .unwrap();
    pub static ref MQTT_PUBLISH_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minut_bridge_mqtt_publish_failures_total",
        "Total failed MQTT publishes"
    ))
    .unwrap();
}

pub fn init_metrics() {
    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(POLLS_TOTAL.clone()),
        Box::new(POLL_FAILURES_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(TOKEN_REFRESH_TOTAL.clone()),
        Box::new(POLL_LATENCY_SECONDS.clone()),
        Box::new(DEVICES.clone()),
        Box::new(SNAPSHOTS_DROPPED_TOTAL.clone()),
        Box::new(MQTT_PUBLISH_FAILURES_TOTAL.clone()),
    ];

    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            warn!("Failed to register metric: {}", e);
        }
    }
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
