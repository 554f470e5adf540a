pub mod auth;
pub mod backend;
pub mod discovery;
pub mod gateway;
pub mod rate_limiter;
pub mod router;
pub mod topology;

pub use discovery::DiscoveryManager;
pub use gateway::{GatewayService, UpstreamLookup};
pub use rate_limiter::GatewayRateLimiter;
pub use topology::{TopologyHandle, TopologySnapshot};
