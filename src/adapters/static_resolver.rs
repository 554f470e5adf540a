use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::{
    core::topology::TopologySnapshot,
    ports::resolver::{DiscoveryError, DiscoveryResult, Resolver},
};

/// Resolver returning fixed upstream URLs from configuration.
///
/// URLs are parsed once at construction, so `resolve` never fails.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    primary: Url,
    analyzer: Option<Url>,
}

fn parse_base_url(raw: &str) -> DiscoveryResult<Url> {
    Url::parse(raw.trim()).map_err(|e| DiscoveryError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

impl StaticResolver {
    pub fn new(primary_url: &str, analyzer_url: Option<&str>) -> DiscoveryResult<Self> {
        let primary = parse_base_url(primary_url)?;
        let analyzer = analyzer_url
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(parse_base_url)
            .transpose()?;

        tracing::info!(
            primary = %primary,
            analyzer = analyzer.as_ref().map(Url::as_str).unwrap_or("<unset>"),
            "Using static upstream topology"
        );
        Ok(Self { primary, analyzer })
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _timeout: Duration) -> DiscoveryResult<TopologySnapshot> {
        Ok(TopologySnapshot::new(
            Some(self.primary.clone()),
            self.analyzer.clone(),
        ))
    }

    fn kind(&self) -> &'static str {
        "static"
    }
}
