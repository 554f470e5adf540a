//! Upstream discovery through the Kubernetes Service registry.
//!
//! Each logical backend is located by listing Services in one namespace with a
//! label selector. When several Services match, the one whose name sorts first
//! wins so repeated refreshes pick the same Service. The upstream URL is built
//! from the cluster DNS name of that Service.
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use k8s_openapi::api::core::v1::{Service, ServicePort};
use kube::api::{Api, ListParams};
use url::Url;

use crate::{
    core::{backend::BackendTarget, topology::TopologySnapshot},
    ports::resolver::{DiscoveryError, DiscoveryResult, Resolver},
};

/// Name of the port preferred when a Service declares several.
pub const PREFERRED_PORT_NAME: &str = "http";

#[derive(Debug, Clone)]
pub struct KubernetesResolverSettings {
    pub namespace: String,
    pub primary_selector: String,
    pub analyzer_selector: String,
    pub analyzer_required: bool,
    pub cluster_domain: String,
}

pub struct KubernetesResolver {
    services: Api<Service>,
    settings: KubernetesResolverSettings,
}

impl KubernetesResolver {
    /// Connect using in-cluster credentials or the local kubeconfig.
    pub async fn connect(settings: KubernetesResolverSettings) -> Result<Self> {
        let client = kube::Client::try_default()
            .await
            .wrap_err("Failed to create Kubernetes client")?;

        tracing::info!(
            namespace = %settings.namespace,
            primary_selector = %settings.primary_selector,
            analyzer_selector = %settings.analyzer_selector,
            analyzer_required = settings.analyzer_required,
            "Using Kubernetes service discovery"
        );

        Ok(Self {
            services: Api::namespaced(client, &settings.namespace),
            settings,
        })
    }

    async fn list_matching(&self, selector: &str) -> DiscoveryResult<Vec<Service>> {
        let params = ListParams::default().labels(selector);
        self.services
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| DiscoveryError::Registry(format!("listing services '{selector}': {e}")))
    }

    /// Resolve one backend. `Ok(None)` means an optional backend is not deployed.
    async fn resolve_target(
        &self,
        target: BackendTarget,
        selector: &str,
        required: bool,
    ) -> DiscoveryResult<Option<Url>> {
        let services = self.list_matching(selector).await?;
        select_url(
            &services,
            target,
            selector,
            required,
            &self.settings.namespace,
            &self.settings.cluster_domain,
        )
    }
}

#[async_trait]
impl Resolver for KubernetesResolver {
    async fn resolve(&self, timeout: Duration) -> DiscoveryResult<TopologySnapshot> {
        let lookups = async {
            let primary = self
                .resolve_target(
                    BackendTarget::PrimaryApi,
                    &self.settings.primary_selector,
                    true,
                )
                .await?;
            let analyzer = self
                .resolve_target(
                    BackendTarget::Analyzer,
                    &self.settings.analyzer_selector,
                    self.settings.analyzer_required,
                )
                .await?;
            Ok(TopologySnapshot::new(primary, analyzer))
        };

        tokio::time::timeout(timeout, lookups)
            .await
            .unwrap_or(Err(DiscoveryError::Timeout(timeout)))
    }

    fn kind(&self) -> &'static str {
        "kubernetes"
    }
}

/// Turn the Services matching `selector` into the backend's base URL.
///
/// A required backend fails with `NoMatch` when nothing matches and with
/// `NoUsablePort` when the chosen Service declares no port. An optional
/// backend is reported absent (`Ok(None)`) in both cases.
pub fn select_url(
    services: &[Service],
    target: BackendTarget,
    selector: &str,
    required: bool,
    namespace: &str,
    cluster_domain: &str,
) -> DiscoveryResult<Option<Url>> {
    let Some(service) = pick_service(services) else {
        if required {
            return Err(DiscoveryError::NoMatch {
                target,
                selector: selector.to_string(),
            });
        }
        tracing::debug!(%target, selector, "No service matches optional backend");
        return Ok(None);
    };

    match service_url(service, namespace, cluster_domain, target) {
        Ok(url) => {
            tracing::debug!(%target, url = %url, matches = services.len(), "Resolved backend");
            Ok(Some(url))
        }
        Err(e) if !required => {
            tracing::warn!(%target, error = %e, "Optional backend has no usable port");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Deterministically choose among matching Services: lowest name wins.
pub fn pick_service(services: &[Service]) -> Option<&Service> {
    services
        .iter()
        .filter(|service| service.metadata.name.is_some())
        .min_by(|a, b| a.metadata.name.cmp(&b.metadata.name))
}

/// Port named `http` if declared, else the first declared port.
pub fn pick_port(ports: &[ServicePort]) -> Option<&ServicePort> {
    ports
        .iter()
        .find(|port| port.name.as_deref() == Some(PREFERRED_PORT_NAME))
        .or_else(|| ports.first())
}

/// `http://<name>.<namespace>.svc.<cluster_domain>:<port>` for `service`.
pub fn service_url(
    service: &Service,
    namespace: &str,
    cluster_domain: &str,
    target: BackendTarget,
) -> DiscoveryResult<Url> {
    let name = service.metadata.name.as_deref().unwrap_or_default();
    let namespace = service.metadata.namespace.as_deref().unwrap_or(namespace);

    let port = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .and_then(pick_port)
        .ok_or_else(|| DiscoveryError::NoUsablePort {
            target,
            service: name.to_string(),
        })?;

    let raw = format!(
        "http://{name}.{namespace}.svc.{}:{}",
        cluster_domain.trim_matches('.'),
        port.port
    );
    Url::parse(&raw).map_err(|e| DiscoveryError::InvalidUrl {
        url: raw,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use k8s_openapi::{api::core::v1::ServiceSpec, apimachinery::pkg::apis::meta::v1::ObjectMeta};

    use super::*;

    fn port(name: Option<&str>, number: i32) -> ServicePort {
        ServicePort {
            name: name.map(str::to_string),
            port: number,
            ..Default::default()
        }
    }

    fn service(name: &str, ports: Option<Vec<ServicePort>>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pick_service_is_lexicographic() {
        let services = vec![
            service("metrics-api-b", None),
            service("metrics-api-a", None),
            service("metrics-api-c", None),
        ];
        let picked = pick_service(&services).unwrap();
        assert_eq!(picked.metadata.name.as_deref(), Some("metrics-api-a"));

        let reversed: Vec<_> = services.into_iter().rev().collect();
        let picked = pick_service(&reversed).unwrap();
        assert_eq!(picked.metadata.name.as_deref(), Some("metrics-api-a"));
    }

    #[test]
    fn test_pick_service_empty() {
        assert!(pick_service(&[]).is_none());
    }

    #[test]
    fn test_prefers_http_port() {
        let svc = service(
            "metrics-api",
            Some(vec![port(Some("grpc"), 9000), port(Some("http"), 8000)]),
        );
        let url = service_url(&svc, "observability", "cluster.local", BackendTarget::PrimaryApi)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://metrics-api.observability.svc.cluster.local:8000/"
        );
    }

    #[test]
    fn test_falls_back_to_first_port() {
        let svc = service(
            "release-analyzer",
            Some(vec![port(Some("web"), 9100), port(None, 9200)]),
        );
        let url = service_url(&svc, "default", "cluster.local", BackendTarget::Analyzer).unwrap();
        assert_eq!(url.port(), Some(9100));
        assert_eq!(
            url.host_str(),
            Some("release-analyzer.default.svc.cluster.local")
        );
    }

    #[test]
    fn test_service_without_ports() {
        let svc = service("metrics-api", Some(vec![]));
        let err =
            service_url(&svc, "default", "cluster.local", BackendTarget::PrimaryApi).unwrap_err();
        assert_eq!(
            err,
            DiscoveryError::NoUsablePort {
                target: BackendTarget::PrimaryApi,
                service: "metrics-api".to_string()
            }
        );

        let svc = service("metrics-api", None);
        assert!(service_url(&svc, "default", "cluster.local", BackendTarget::PrimaryApi).is_err());
    }

    #[test]
    fn test_service_namespace_takes_precedence() {
        let mut svc = service("metrics-api", Some(vec![port(None, 80)]));
        svc.metadata.namespace = Some("prod".to_string());
        let url = service_url(&svc, "default", "cluster.local.", BackendTarget::PrimaryApi)
            .unwrap();
        assert_eq!(url.host_str(), Some("metrics-api.prod.svc.cluster.local"));
    }

    #[test]
    fn test_select_url_branches() {
        let with_port = vec![
            service("metrics-api-b", Some(vec![port(Some("http"), 8000)])),
            service("metrics-api-a", Some(vec![port(None, 8080)])),
        ];
        let portless = vec![service("release-analyzer", Some(vec![]))];
        let selector = "app=x";
        let select = |services: &[Service], required: bool| {
            select_url(
                services,
                BackendTarget::Analyzer,
                selector,
                required,
                "default",
                "cluster.local",
            )
        };

        // Required backend with no match.
        assert_eq!(
            select(&[], true),
            Err(DiscoveryError::NoMatch {
                target: BackendTarget::Analyzer,
                selector: selector.to_string(),
            })
        );
        // Optional backend with no match is absent.
        assert_eq!(select(&[], false), Ok(None));

        // Matched service without ports.
        assert_eq!(
            select(&portless, true),
            Err(DiscoveryError::NoUsablePort {
                target: BackendTarget::Analyzer,
                service: "release-analyzer".to_string(),
            })
        );
        assert_eq!(select(&portless, false), Ok(None));

        // Lowest name wins for both required and optional backends.
        for required in [true, false] {
            let url = select(&with_port, required).unwrap().unwrap();
            assert_eq!(
                url.as_str(),
                "http://metrics-api-a.default.svc.cluster.local:8080/"
            );
        }
    }
}
