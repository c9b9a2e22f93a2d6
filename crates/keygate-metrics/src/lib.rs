//! Prometheus metrics for HTTP and proxy activity.
//!
//! `init()` is idempotent: multiple initialization paths (tests, production,
//! live reload) may call it, and an already-registered collector counts as
//! success. All label sets are bounded; unmatched routes must be coalesced
//! to `"unknown"` by the caller.

use std::sync::OnceLock;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, TextEncoder,
    exponential_buckets,
};

const PROXY_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0];

struct MetricsSink {
    http_requests_total: IntCounterVec,
    http_request_duration: HistogramVec,
    http_request_size: HistogramVec,
    http_response_size: HistogramVec,
    active_keys_total: IntGaugeVec,
    invalid_keys_total: IntGaugeVec,
    proxy_requests_total: IntCounterVec,
    proxy_request_duration: HistogramVec,
    key_rotations_total: IntCounterVec,
    key_validation_total: IntCounterVec,
}

static SINK: OnceLock<MetricsSink> = OnceLock::new();

impl MetricsSink {
    fn build() -> prometheus::Result<Self> {
        Ok(Self {
            http_requests_total: IntCounterVec::new(
                Opts::new("http_requests_total", "Total number of HTTP requests"),
                &["method", "endpoint", "status"],
            )?,
            http_request_duration: HistogramVec::new(
                HistogramOpts::new(
                    "http_request_duration_seconds",
                    "HTTP request duration in seconds",
                ),
                &["method", "endpoint", "status"],
            )?,
            http_request_size: HistogramVec::new(
                HistogramOpts::new("http_request_size_bytes", "HTTP request size in bytes")
                    .buckets(exponential_buckets(100.0, 10.0, 8)?),
                &["method", "endpoint"],
            )?,
            http_response_size: HistogramVec::new(
                HistogramOpts::new("http_response_size_bytes", "HTTP response size in bytes")
                    .buckets(exponential_buckets(100.0, 10.0, 8)?),
                &["method", "endpoint"],
            )?,
            active_keys_total: IntGaugeVec::new(
                Opts::new(
                    "active_keys_total",
                    "Total number of active API keys per group",
                ),
                &["group"],
            )?,
            invalid_keys_total: IntGaugeVec::new(
                Opts::new(
                    "invalid_keys_total",
                    "Total number of invalid API keys per group",
                ),
                &["group"],
            )?,
            proxy_requests_total: IntCounterVec::new(
                Opts::new(
                    "proxy_requests_total",
                    "Total number of proxy requests per group",
                ),
                &["group", "status"],
            )?,
            proxy_request_duration: HistogramVec::new(
                HistogramOpts::new(
                    "proxy_request_duration_seconds",
                    "Proxy request duration in seconds",
                )
                .buckets(PROXY_DURATION_BUCKETS.to_vec()),
                &["group"],
            )?,
            key_rotations_total: IntCounterVec::new(
                Opts::new(
                    "key_rotations_total",
                    "Total number of key rotations per group",
                ),
                &["group"],
            )?,
            key_validation_total: IntCounterVec::new(
                Opts::new("key_validation_total", "Total number of key validations"),
                &["group", "result"],
            )?,
        })
    }

    fn register(&self) -> prometheus::Result<()> {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(self.http_requests_total.clone()),
            Box::new(self.http_request_duration.clone()),
            Box::new(self.http_request_size.clone()),
            Box::new(self.http_response_size.clone()),
            Box::new(self.active_keys_total.clone()),
            Box::new(self.invalid_keys_total.clone()),
            Box::new(self.proxy_requests_total.clone()),
            Box::new(self.proxy_request_duration.clone()),
            Box::new(self.key_rotations_total.clone()),
            Box::new(self.key_validation_total.clone()),
        ];
        for collector in collectors {
            match prometheus::register(collector) {
                Ok(()) => {}
                // Expected when init runs more than once.
                Err(prometheus::Error::AlreadyReg) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Initialize and register all series. Safe to call multiple times.
pub fn init() -> prometheus::Result<()> {
    if SINK.get().is_some() {
        return Ok(());
    }
    let sink = MetricsSink::build()?;
    sink.register()?;
    // A racing second init built an equivalent sink; keep the first.
    let _ = SINK.set(sink);
    Ok(())
}

fn sink() -> Option<&'static MetricsSink> {
    SINK.get()
}

/// Text exposition of the default registry.
pub fn gather() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Record one inbound HTTP request.
///
/// Size histograms are observed only when the size is positive; zero-value
/// samples are noise, not signal.
pub fn record_http_request(
    method: &str,
    endpoint: &str,
    status: u16,
    duration_secs: f64,
    request_size: u64,
    response_size: u64,
) {
    let Some(sink) = sink() else { return };
    let status = status.to_string();
    sink.http_requests_total
        .with_label_values(&[method, endpoint, &status])
        .inc();
    sink.http_request_duration
        .with_label_values(&[method, endpoint, &status])
        .observe(duration_secs);
    if request_size > 0 {
        sink.http_request_size
            .with_label_values(&[method, endpoint])
            .observe(request_size as f64);
    }
    if response_size > 0 {
        sink.http_response_size
            .with_label_values(&[method, endpoint])
            .observe(response_size as f64);
    }
}

pub fn set_active_keys(group: &str, count: i64) {
    if let Some(sink) = sink() {
        sink.active_keys_total.with_label_values(&[group]).set(count);
    }
}

pub fn set_invalid_keys(group: &str, count: i64) {
    if let Some(sink) = sink() {
        sink.invalid_keys_total
            .with_label_values(&[group])
            .set(count);
    }
}

pub fn record_proxy_request(group: &str, status: &str, duration_secs: f64) {
    let Some(sink) = sink() else { return };
    sink.proxy_requests_total
        .with_label_values(&[group, status])
        .inc();
    sink.proxy_request_duration
        .with_label_values(&[group])
        .observe(duration_secs);
}

pub fn record_key_rotation(group: &str) {
    if let Some(sink) = sink() {
        sink.key_rotations_total.with_label_values(&[group]).inc();
    }
}

pub fn record_key_validation(group: &str, success: bool) {
    if let Some(sink) = sink() {
        let result = if success { "success" } else { "failure" };
        sink.key_validation_total
            .with_label_values(&[group, result])
            .inc();
    }
}
