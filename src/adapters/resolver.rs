use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr};

use crate::{
    adapters::{
        kubernetes_resolver::{KubernetesResolver, KubernetesResolverSettings},
        static_resolver::StaticResolver,
    },
    config::GatewayConfig,
    core::topology::TopologySnapshot,
    ports::resolver::{DiscoveryResult, Resolver},
};

/// The resolver chosen at startup: fixed URLs or the Kubernetes registry.
pub enum TopologyResolver {
    Static(StaticResolver),
    Kubernetes(KubernetesResolver),
}

impl TopologyResolver {
    /// Select and build the resolver named by `discovery_enabled`.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self> {
        if config.discovery_enabled {
            let settings = KubernetesResolverSettings {
                namespace: config.discovery_namespace.clone(),
                primary_selector: config.primary_selector.clone(),
                analyzer_selector: config.analyzer_selector.clone(),
                analyzer_required: config.analyzer_required,
                cluster_domain: config.cluster_domain.clone(),
            };
            Ok(Self::Kubernetes(KubernetesResolver::connect(settings).await?))
        } else {
            let resolver = StaticResolver::new(&config.primary_url, config.analyzer_url.as_deref())
                .wrap_err("Invalid static upstream configuration")?;
            Ok(Self::Static(resolver))
        }
    }
}

#[async_trait]
impl Resolver for TopologyResolver {
    async fn resolve(&self, timeout: Duration) -> DiscoveryResult<TopologySnapshot> {
        match self {
            TopologyResolver::Static(resolver) => resolver.resolve(timeout).await,
            TopologyResolver::Kubernetes(resolver) => resolver.resolve(timeout).await,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            TopologyResolver::Static(resolver) => resolver.kind(),
            TopologyResolver::Kubernetes(resolver) => resolver.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::BackendTarget;

    #[tokio::test]
    async fn test_static_selected_when_discovery_disabled() {
        let config = GatewayConfig {
            analyzer_url: Some("http://analyzer:9000".to_string()),
            ..Default::default()
        };
        let resolver = TopologyResolver::from_config(&config).await.unwrap();
        assert_eq!(resolver.kind(), "static");

        let snapshot = resolver.resolve(Duration::from_secs(1)).await.unwrap();
        assert!(snapshot.url_for(BackendTarget::Analyzer).is_some());
    }

    #[tokio::test]
    async fn test_invalid_static_url_fails_construction() {
        let config = GatewayConfig {
            primary_url: "::not a url".to_string(),
            ..Default::default()
        };
        assert!(TopologyResolver::from_config(&config).await.is_err());
    }
}
