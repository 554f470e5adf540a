pub mod http_client;
pub mod http_handler;
pub mod kubernetes_resolver;
pub mod middleware;
pub mod proxy_handler;
pub mod resolver;
pub mod static_resolver;

/// Re-export commonly used types from adapters
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use kubernetes_resolver::{KubernetesResolver, KubernetesResolverSettings};
pub use proxy_handler::{ProxyError, ProxyHandler};
pub use resolver::TopologyResolver;
pub use static_resolver::StaticResolver;
