//! Core gateway orchestration service.
//!
//! The `GatewayService` aggregates the per-process state the request path
//! consults: the auth gate, the optional rate limiter, the published topology
//! and the metrics bundle. It performs no I/O itself; adapters call into it to
//! make admission and routing decisions.
use std::sync::Arc;

use eyre::{Result, WrapErr};
use url::Url;

use crate::{
    config::GatewayConfig,
    core::{
        auth::{AuthDecision, AuthGate},
        backend::BackendTarget,
        rate_limiter::{GatewayRateLimiter, RateDecision},
        router,
        topology::TopologyHandle,
    },
    metrics::GatewayMetrics,
};

/// Where a request should go, or why it cannot go anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamLookup {
    /// No route matches the path.
    Unmatched,
    /// Discovery has never published a snapshot.
    NotReady { target: BackendTarget },
    /// The snapshot has no location for the routed target.
    Absent { target: BackendTarget },
    Found { target: BackendTarget, base: Url },
}

/// Central holder for admission and routing state. Shared behind an `Arc`.
pub struct GatewayService {
    auth: AuthGate,
    rate_limiter: Option<GatewayRateLimiter>,
    topology: TopologyHandle,
    metrics: Arc<GatewayMetrics>,
}

impl GatewayService {
    /// Build the service from validated configuration.
    pub fn new(
        config: &GatewayConfig,
        topology: TopologyHandle,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self> {
        let auth = match (config.auth_enabled, config.effective_auth_token()) {
            (true, Some(token)) => AuthGate::with_token(token),
            (true, None) => eyre::bail!("auth is enabled but no auth token is configured"),
            (false, _) => AuthGate::disabled(),
        };

        let rate_limiter = config
            .rate_limit_settings()
            .map(|settings| GatewayRateLimiter::new(&settings))
            .transpose()
            .wrap_err("Failed to build rate limiter")?;

        if rate_limiter.is_none() {
            tracing::info!("Rate limiting is disabled");
        }
        tracing::info!(auth_enabled = auth.is_enabled(), "Gateway service created");

        Ok(Self::from_parts(auth, rate_limiter, topology, metrics))
    }

    /// Assemble a service from already built components.
    pub fn from_parts(
        auth: AuthGate,
        rate_limiter: Option<GatewayRateLimiter>,
        topology: TopologyHandle,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            auth,
            rate_limiter,
            topology,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn topology(&self) -> &TopologyHandle {
        &self.topology
    }

    pub fn authorize(&self, path: &str, headers: &http::HeaderMap) -> AuthDecision {
        self.auth.check(path, headers)
    }

    /// Run the rate limiter for `client`. Always allowed when limiting is off.
    pub fn admit(&self, client: &str) -> RateDecision {
        let Some(limiter) = &self.rate_limiter else {
            return RateDecision::Allowed;
        };
        let decision = limiter.check(client);
        self.metrics.set_tracked_clients(limiter.tracked_clients());
        decision
    }

    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limiter.is_some()
    }

    /// Route `path` and resolve the target against the current snapshot.
    ///
    /// A snapshot that exists but failed its last refresh is still used.
    pub fn lookup(&self, path: &str) -> UpstreamLookup {
        let Some(target) = router::route(path) else {
            return UpstreamLookup::Unmatched;
        };
        let (snapshot, _ready) = self.topology.snapshot();
        let Some(snapshot) = snapshot else {
            return UpstreamLookup::NotReady { target };
        };
        match snapshot.url_for(target) {
            Some(base) => UpstreamLookup::Found {
                target,
                base: base.clone(),
            },
            None => UpstreamLookup::Absent { target },
        }
    }
}
