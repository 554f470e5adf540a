use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{backend::BackendTarget, topology::TopologySnapshot};

/// Error type for topology resolution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The resolve call did not finish within its budget
    #[error("Topology resolution timed out after {0:?}")]
    Timeout(Duration),

    /// No service matched the selector of a required backend
    #[error("No service matches selector '{selector}' for required backend {target}")]
    NoMatch {
        target: BackendTarget,
        selector: String,
    },

    /// A service matched but declares no port to route to
    #[error("Service '{service}' selected for {target} exposes no ports")]
    NoUsablePort {
        target: BackendTarget,
        service: String,
    },

    /// The registry query itself failed
    #[error("Service registry query failed: {0}")]
    Registry(String),

    /// A resolved or configured location is not a valid base URL
    #[error("Invalid upstream URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Result type for topology resolution
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Resolver defines the port for producing the current upstream topology
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// Resolve every logical backend to a base URL.
    ///
    /// # Arguments
    /// * `timeout` - Upper bound for the whole resolution
    ///
    /// # Returns
    /// A complete snapshot, or an error if a required backend could not be resolved
    async fn resolve(&self, timeout: Duration) -> DiscoveryResult<TopologySnapshot>;

    /// Short name for logs.
    fn kind(&self) -> &'static str;
}
