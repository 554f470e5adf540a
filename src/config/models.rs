//! Configuration data structures for Meridian.
//!
//! The gateway is configured by a single flat table so that every key can be
//! set either in a config file or through a `MERIDIAN_<KEY>` environment
//! variable. Every field has a default; an empty configuration yields a
//! gateway that proxies to a local primary API with auth disabled.
use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::core::rate_limiter::{BucketShape, RateLimitSettings};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{other}' (expected json or pretty)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => f.write_str("json"),
            LogFormat::Pretty => f.write_str("pretty"),
        }
    }
}

/// Process-wide gateway settings, loaded once at startup.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Interface the listener binds to
    pub listen_host: String,
    /// TCP port the listener binds to
    pub port: u16,

    /// Default `tracing` filter directive, overridden by `RUST_LOG`
    pub log_level: String,
    pub log_format: LogFormat,

    pub auth_enabled: bool,
    /// Shared bearer secret; required when `auth_enabled` is set
    pub auth_token: Option<String>,

    /// Resolve upstreams from the Kubernetes API instead of the static URLs
    pub discovery_enabled: bool,
    pub discovery_namespace: String,
    /// Label selector for the metrics API services
    pub primary_selector: String,
    /// Label selector for the release-analyzer services
    pub analyzer_selector: String,
    /// Fail discovery when no analyzer service matches
    pub analyzer_required: bool,
    pub discovery_interval_secs: u64,
    pub discovery_timeout_secs: u64,
    pub cluster_domain: String,

    /// Static base URL of the metrics API
    pub primary_url: String,
    /// Static base URL of the release analyzer; absent means not deployed
    pub analyzer_url: Option<String>,

    /// Upper bound on waiting for upstream response headers
    pub upstream_timeout_secs: u64,
    pub upstream_connect_timeout_secs: u64,

    pub rate_limit_enabled: bool,
    /// Global refill rate in requests per second
    pub rate_limit_rps: f64,
    /// Global bucket capacity
    pub rate_limit_burst: u32,
    /// Per-client refill rate, defaults to `rate_limit_rps`
    pub rate_limit_client_rps: Option<f64>,
    /// Per-client bucket capacity, defaults to `rate_limit_burst`
    pub rate_limit_client_burst: Option<u32>,
    /// Client table size that triggers an idle sweep
    pub rate_limit_max_clients: usize,
    pub rate_limit_client_idle_secs: u64,

    /// Upper bound on draining in-flight requests at shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            auth_enabled: false,
            auth_token: None,
            discovery_enabled: false,
            discovery_namespace: "default".to_string(),
            primary_selector: "app=metrics-api".to_string(),
            analyzer_selector: "app=release-analyzer".to_string(),
            analyzer_required: false,
            discovery_interval_secs: 15,
            discovery_timeout_secs: 5,
            cluster_domain: "cluster.local".to_string(),
            primary_url: "http://localhost:8000".to_string(),
            analyzer_url: None,
            upstream_timeout_secs: 30,
            upstream_connect_timeout_secs: 5,
            rate_limit_enabled: true,
            rate_limit_rps: 50.0,
            rate_limit_burst: 100,
            rate_limit_client_rps: None,
            rate_limit_client_burst: None,
            rate_limit_max_clients: 10_000,
            rate_limit_client_idle_secs: 300,
            shutdown_timeout_secs: 15,
        }
    }
}

impl GatewayConfig {
    /// `host:port` string the listener binds to.
    pub fn listen_addr(&self) -> String {
        if self.listen_host.contains(':') && !self.listen_host.starts_with('[') {
            format!("[{}]:{}", self.listen_host, self.port)
        } else {
            format!("{}:{}", self.listen_host, self.port)
        }
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Auth token with surrounding whitespace removed, if one is set and non-blank.
    pub fn effective_auth_token(&self) -> Option<&str> {
        self.auth_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Limiter settings, or `None` when rate limiting is switched off.
    pub fn rate_limit_settings(&self) -> Option<RateLimitSettings> {
        if !self.rate_limit_enabled {
            return None;
        }
        Some(RateLimitSettings {
            global: BucketShape::new(self.rate_limit_rps, self.rate_limit_burst),
            client: BucketShape::new(
                self.rate_limit_client_rps.unwrap_or(self.rate_limit_rps),
                self.rate_limit_client_burst.unwrap_or(self.rate_limit_burst),
            ),
            max_clients: self.rate_limit_max_clients,
            client_idle: Duration::from_secs(self.rate_limit_client_idle_secs),
        })
    }
}
