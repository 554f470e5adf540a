//! Background topology discovery.
//!
//! The [`DiscoveryManager`] owns a resolver and a [`TopologyHandle`]. Each
//! refresh runs the resolver once under a timeout; success replaces the
//! published snapshot and sets the gateway ready, failure only flips readiness
//! off and records the error. Request handlers read the handle without ever
//! waiting on a refresh.
use std::{sync::Arc, time::Duration};

use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    core::topology::{TopologyHandle, TopologySnapshot},
    metrics::GatewayMetrics,
    ports::resolver::{DiscoveryError, DiscoveryResult, Resolver},
};

pub struct DiscoveryManager<R> {
    resolver: R,
    topology: TopologyHandle,
    metrics: Arc<GatewayMetrics>,
    refresh_interval: Duration,
    refresh_timeout: Duration,
}

impl<R: Resolver> DiscoveryManager<R> {
    /// `refresh_timeout` must be shorter than `refresh_interval` so that a
    /// slow resolve can never overlap the next tick.
    pub fn new(
        resolver: R,
        metrics: Arc<GatewayMetrics>,
        refresh_interval: Duration,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            topology: TopologyHandle::new(),
            metrics,
            refresh_interval,
            refresh_timeout,
        }
    }

    /// Handle readers use to observe what this manager publishes.
    pub fn handle(&self) -> TopologyHandle {
        self.topology.clone()
    }

    /// Most recent good snapshot and the outcome of the latest refresh.
    pub fn snapshot(&self) -> (Option<Arc<TopologySnapshot>>, bool) {
        self.topology.snapshot()
    }

    /// Resolve once and publish the result.
    pub async fn refresh(&self) -> DiscoveryResult<()> {
        let outcome = match timeout(
            self.refresh_timeout,
            self.resolver.resolve(self.refresh_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DiscoveryError::Timeout(self.refresh_timeout)),
        };

        match outcome {
            Ok(snapshot) => {
                tracing::debug!(
                    resolver = self.resolver.kind(),
                    primary = ?snapshot.url_for(crate::core::backend::BackendTarget::PrimaryApi).map(|u| u.as_str()),
                    analyzer = ?snapshot.url_for(crate::core::backend::BackendTarget::Analyzer).map(|u| u.as_str()),
                    "Topology refreshed"
                );
                let resolved_at = snapshot.resolved_at().timestamp();
                if !self.topology.is_ready() {
                    tracing::info!(resolver = self.resolver.kind(), "Discovery is ready");
                }
                self.topology.publish(snapshot);
                self.metrics.record_discovery_success(resolved_at);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    resolver = self.resolver.kind(),
                    error = %e,
                    "Topology refresh failed; keeping last known snapshot"
                );
                self.topology.mark_failed(e.to_string());
                self.metrics.record_discovery_failure();
                Err(e)
            }
        }
    }

    /// Refresh on a fixed interval until `shutdown` is cancelled.
    ///
    /// The first refresh happens one interval after start; callers run the
    /// startup refresh themselves. Ticks missed while a refresh was running
    /// are delayed rather than replayed back to back.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The interval's first tick completes immediately.
        ticker.tick().await;

        tracing::info!(
            resolver = self.resolver.kind(),
            interval_secs = self.refresh_interval.as_secs_f64(),
            timeout_secs = self.refresh_timeout.as_secs_f64(),
            "Discovery loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    // Errors are already logged and counted by `refresh`.
                    let _ = self.refresh().await;
                }
            }
        }

        tracing::info!("Discovery loop stopped");
    }
}
