//! Prometheus metrics for Meridian.
//!
//! All collectors live in a [`GatewayMetrics`] bundle that owns its own
//! `prometheus::Registry`. Nothing is registered process-wide: the bundle is
//! created once in `main` (or per test) and handed to every component that
//! records, so several gateways can coexist in one process.
//!
//! Provided metrics:
//! * `meridian_requests_total{route,method,status}` (counter)
//! * `meridian_request_duration_seconds{route,method}` (histogram)
//! * `meridian_auth_failures_total{reason}` (counter)
//! * `meridian_rate_limited_total{scope}` (counter)
//! * `meridian_rate_limit_tracked_clients` (gauge)
//! * `meridian_proxy_errors_total{target,kind}` (counter)
//! * `meridian_unavailable_total{reason}` (counter)
//! * `meridian_discovery_refresh_total{outcome}` (counter)
//! * `meridian_discovery_ready` (gauge)
//! * `meridian_discovery_last_success_timestamp_seconds` (gauge)
use std::time::Instant;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "meridian";

/// Explicit collector bundle shared (via `Arc`) by the handler chain and the
/// discovery manager.
pub struct GatewayMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    auth_failures_total: IntCounterVec,
    rate_limited_total: IntCounterVec,
    rate_limit_tracked_clients: IntGauge,
    proxy_errors_total: IntCounterVec,
    unavailable_total: IntCounterVec,
    discovery_refresh_total: IntCounterVec,
    discovery_ready: IntGauge,
    discovery_last_success: IntGauge,
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl GatewayMetrics {
    /// Create a bundle with a fresh registry and register every collector.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "request_duration_seconds",
                "Latency of HTTP requests handled by the gateway.",
            )
            .namespace(NAMESPACE),
            &["route", "method"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(Self {
            requests_total: counter_vec(
                &registry,
                "requests_total",
                "Total number of HTTP requests handled by the gateway.",
                &["route", "method", "status"],
            )?,
            request_duration_seconds,
            auth_failures_total: counter_vec(
                &registry,
                "auth_failures_total",
                "Requests rejected by the bearer token check.",
                &["reason"],
            )?,
            rate_limited_total: counter_vec(
                &registry,
                "rate_limited_total",
                "Requests rejected by the rate limiter.",
                &["scope"],
            )?,
            rate_limit_tracked_clients: gauge(
                &registry,
                "rate_limit_tracked_clients",
                "Clients currently holding a rate limit bucket.",
            )?,
            proxy_errors_total: counter_vec(
                &registry,
                "proxy_errors_total",
                "Transport failures while forwarding to an upstream.",
                &["target", "kind"],
            )?,
            unavailable_total: counter_vec(
                &registry,
                "unavailable_total",
                "Requests answered 503 because no upstream location was known.",
                &["reason"],
            )?,
            discovery_refresh_total: counter_vec(
                &registry,
                "discovery_refresh_total",
                "Topology refresh attempts by outcome.",
                &["outcome"],
            )?,
            discovery_ready: gauge(
                &registry,
                "discovery_ready",
                "1 when the most recent topology refresh succeeded.",
            )?,
            discovery_last_success: gauge(
                &registry,
                "discovery_last_success_timestamp_seconds",
                "Unix time of the most recent successful topology refresh.",
            )?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every collector in the Prometheus text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn observe_request(&self, route: &str, method: &str, status: u16, elapsed_secs: f64) {
        let status = status.to_string();
        self.requests_total
            .with_label_values(&[route, method, status.as_str()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[route, method])
            .observe(elapsed_secs);
    }

    pub fn record_auth_failure(&self, reason: &str) {
        self.auth_failures_total.with_label_values(&[reason]).inc();
    }

    pub fn record_rate_limited(&self, scope: &str) {
        self.rate_limited_total.with_label_values(&[scope]).inc();
    }

    pub fn set_tracked_clients(&self, count: usize) {
        self.rate_limit_tracked_clients.set(count as i64);
    }

    pub fn record_proxy_error(&self, target: &str, kind: &str) {
        self.proxy_errors_total
            .with_label_values(&[target, kind])
            .inc();
    }

    pub fn record_unavailable(&self, reason: &str) {
        self.unavailable_total.with_label_values(&[reason]).inc();
    }

    pub fn record_discovery_success(&self, unix_secs: i64) {
        self.discovery_refresh_total
            .with_label_values(&["success"])
            .inc();
        self.discovery_ready.set(1);
        self.discovery_last_success.set(unix_secs);
    }

    pub fn record_discovery_failure(&self) {
        self.discovery_refresh_total
            .with_label_values(&["failure"])
            .inc();
        self.discovery_ready.set(0);
    }

    pub fn proxy_error_count(&self, target: &str, kind: &str) -> u64 {
        self.proxy_errors_total
            .with_label_values(&[target, kind])
            .get()
    }

    pub fn auth_failure_count(&self, reason: &str) -> u64 {
        self.auth_failures_total.with_label_values(&[reason]).get()
    }

    pub fn rate_limited_count(&self, scope: &str) -> u64 {
        self.rate_limited_total.with_label_values(&[scope]).get()
    }

    pub fn discovery_refresh_count(&self, outcome: &str) -> u64 {
        self.discovery_refresh_total
            .with_label_values(&[outcome])
            .get()
    }
}

/// Stopwatch for inbound request latency.
pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
