//! Meridian - a discovery-aware API gateway.
//!
//! Meridian fronts two backend services, the metrics API and the release
//! analyzer, and keeps track of where they currently run. It is built on a
//! **hexagonal architecture**: pure decision logic lives in `core`, the seams
//! are traits in `ports`, and `adapters` hold the Kubernetes, HTTP and axum
//! implementations.
//!
//! # Features
//! - Static or Kubernetes service discovery refreshed in the background, with
//!   the last good topology kept in service through discovery outages
//! - Fixed path routing to logical backends (`/api`, `/ws`, the analyzer family)
//! - Global plus per-client token bucket rate limiting with a bounded client table
//! - Shared-secret bearer authentication with probe endpoints exempt
//! - Streaming reverse proxy with connection upgrade (websocket) tunnelling
//! - Prometheus metrics from an explicit registry & structured tracing via `tracing`
//! - Graceful shutdown with a bounded drain
//!
//! # Quick Example
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use meridian::{
//!     DiscoveryManager, GatewayMetrics, GatewayService, HttpClientAdapter, HttpHandler,
//!     TopologyResolver, config::GatewayConfig,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = GatewayConfig::default();
//! let metrics = Arc::new(GatewayMetrics::new()?);
//! let resolver = TopologyResolver::from_config(&config).await?;
//! let discovery = DiscoveryManager::new(
//!     resolver,
//!     metrics.clone(),
//!     config.discovery_interval(),
//!     config.discovery_timeout(),
//! );
//! let _ = discovery.refresh().await;
//!
//! let gateway = Arc::new(GatewayService::new(&config, discovery.handle(), metrics)?);
//! let client = Arc::new(HttpClientAdapter::new(
//!     Duration::from_secs(5),
//!     Duration::from_secs(30),
//! )?);
//! let app = HttpHandler::new(gateway, client).router();
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Setup paths return `eyre::Result<T>` with context attached via `WrapErr`.
//! Request-path failures are typed (`ProxyError`, `DiscoveryError`,
//! `HttpClientError`) and map onto HTTP status codes; nothing on the request
//! path terminates the process.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler, TopologyResolver},
    core::{DiscoveryManager, GatewayService, TopologyHandle},
    metrics::GatewayMetrics,
    ports::{http_client::HttpClient, resolver::Resolver},
    utils::GracefulShutdown,
};
