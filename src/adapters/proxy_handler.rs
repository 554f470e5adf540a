//! Reverse proxy from the gateway to the resolved upstreams.
//!
//! For each request the handler routes the path, reads the current topology
//! snapshot and forwards the request to the target's base URL. Bodies stream
//! in both directions. `Upgrade` requests (websockets) are relayed and, once
//! the upstream answers `101 Switching Protocols`, both upgraded connections
//! are spliced together with `copy_bidirectional`.
use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body as AxumBody,
    extract::ConnectInfo,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use hyper::Request;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use url::Url;

use crate::{
    core::{
        backend::BackendTarget,
        gateway::{GatewayService, UpstreamLookup},
    },
    ports::http_client::{HttpClient, HttpClientError},
};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Headers that describe a single hop and are never forwarded verbatim.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    KEEP_ALIVE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Reasons a request could not be proxied.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("no route matches the request path")]
    NoRoute,

    #[error("gateway is not ready")]
    NotReady,

    #[error("upstream is unavailable")]
    UpstreamUnavailable { target: BackendTarget },

    #[error("cannot build upstream URI for {target}: {reason}")]
    BadUpstreamUri {
        target: BackendTarget,
        reason: String,
    },

    #[error("upstream request to {target} failed: {source}")]
    Transport {
        target: BackendTarget,
        #[source]
        source: HttpClientError,
    },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRoute => StatusCode::NOT_FOUND,
            ProxyError::NotReady | ProxyError::UpstreamUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::BadUpstreamUri { .. } | ProxyError::Transport { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = match &self {
            ProxyError::NoRoute => "not found",
            ProxyError::NotReady => "gateway is not ready",
            ProxyError::UpstreamUnavailable { .. } => "upstream is unavailable",
            ProxyError::BadUpstreamUri { .. } | ProxyError::Transport { .. } => "bad gateway",
        };
        (self.status(), body).into_response()
    }
}

/// Forwards routed requests to the upstream chosen from the live topology.
#[derive(Clone)]
pub struct ProxyHandler {
    gateway: Arc<GatewayService>,
    client: Arc<dyn HttpClient>,
}

impl ProxyHandler {
    pub fn new(gateway: Arc<GatewayService>, client: Arc<dyn HttpClient>) -> Self {
        Self { gateway, client }
    }

    /// Proxy `req`, turning every failure into its HTTP status.
    pub async fn handle(&self, req: Request<AxumBody>) -> Response {
        match self.forward(req).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }

    /// Proxy `req` and return the upstream response with its body streaming.
    pub async fn forward(&self, mut req: Request<AxumBody>) -> Result<Response, ProxyError> {
        let metrics = self.gateway.metrics();

        let (target, base) = match self.gateway.lookup(req.uri().path()) {
            UpstreamLookup::Found { target, base } => (target, base),
            UpstreamLookup::Unmatched => {
                tracing::debug!(path = req.uri().path(), "No route for path");
                return Err(ProxyError::NoRoute);
            }
            UpstreamLookup::NotReady { target } => {
                metrics.record_unavailable("not_ready");
                tracing::warn!(%target, "Rejecting request: no topology published yet");
                return Err(ProxyError::NotReady);
            }
            UpstreamLookup::Absent { target } => {
                metrics.record_unavailable("upstream_absent");
                tracing::warn!(%target, "Rejecting request: upstream location unknown");
                return Err(ProxyError::UpstreamUnavailable { target });
            }
        };

        let upstream_uri = upstream_uri(&base, req.uri()).map_err(|reason| {
            metrics.record_proxy_error(target.as_str(), "bad_uri");
            tracing::error!(%target, upstream = %base, error = %reason, "Invalid upstream URI");
            ProxyError::BadUpstreamUri { target, reason }
        })?;

        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let upgrade = is_upgrade_request(req.headers());
        let client_upgrade = upgrade.then(|| hyper::upgrade::on(&mut req));

        let original_host = req.headers().get(header::HOST).cloned();
        let headers = req.headers_mut();
        strip_hop_by_hop(headers, upgrade);
        set_forwarded_headers(headers, peer, original_host);
        if let Some(authority) = upstream_uri.authority() {
            if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                headers.insert(header::HOST, host);
            }
        }
        *req.uri_mut() = upstream_uri;

        tracing::debug!(%target, upstream = %req.uri(), upgrade, "Forwarding request");

        let mut response = self.client.send_request(req).await.map_err(|source| {
            metrics.record_proxy_error(target.as_str(), source.kind());
            tracing::warn!(%target, upstream = %base, error = %source, "Upstream request failed");
            ProxyError::Transport { target, source }
        })?;

        match client_upgrade {
            Some(client_upgrade) if response.status() == StatusCode::SWITCHING_PROTOCOLS => {
                let upstream_upgrade = hyper::upgrade::on(&mut response);
                tokio::spawn(async move {
                    tunnel(target, client_upgrade, upstream_upgrade).await;
                });
            }
            _ => strip_hop_by_hop(response.headers_mut(), false),
        }

        Ok(response)
    }
}

/// Splice the two upgraded connections until either side closes.
async fn tunnel(
    target: BackendTarget,
    client: hyper::upgrade::OnUpgrade,
    upstream: hyper::upgrade::OnUpgrade,
) {
    let (client, upstream) = match tokio::try_join!(client, upstream) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(%target, error = %e, "Connection upgrade failed");
            return;
        }
    };

    let mut client = TokioIo::new(client);
    let mut upstream = TokioIo::new(upstream);
    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((to_upstream, to_client)) => {
            tracing::debug!(%target, to_upstream, to_client, "Upgraded connection closed");
        }
        Err(e) => tracing::debug!(%target, error = %e, "Upgraded connection ended with error"),
    }
}

/// Join the upstream base URL with the inbound path and query.
///
/// A base path (e.g. `http://host/prefix`) is prepended to the request path.
pub fn upstream_uri(base: &Url, inbound: &Uri) -> Result<Uri, String> {
    let base_path = base.path().trim_end_matches('/');
    let path_and_query = inbound
        .path_and_query()
        .map_or("/", |pq| pq.as_str());

    let host = base.host_str().ok_or("upstream URL has no host")?;
    let authority = match base.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    format!(
        "{}://{authority}{base_path}{path_and_query}",
        base.scheme()
    )
    .parse::<Uri>()
    .map_err(|e| e.to_string())
}

/// `Connection: upgrade` together with an `Upgrade` header.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers.contains_key(header::UPGRADE)
        && headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// Remove hop-by-hop headers, including any named in `Connection`.
///
/// When `keep_upgrade` is set, `Connection` and `Upgrade` survive so the
/// upstream sees the handshake.
pub fn strip_hop_by_hop(headers: &mut HeaderMap, keep_upgrade: bool) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        if keep_upgrade && (*name == header::CONNECTION || *name == header::UPGRADE) {
            continue;
        }
        headers.remove(name);
    }

    if keep_upgrade {
        headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    }
}

fn set_forwarded_headers(
    headers: &mut HeaderMap,
    peer: Option<SocketAddr>,
    original_host: Option<HeaderValue>,
) {
    if let Some(peer) = peer {
        let ip = peer.ip().to_string();
        let chain = match headers
            .get(&X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
        {
            Some(existing) if !existing.trim().is_empty() => format!("{existing}, {ip}"),
            _ => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if let Some(host) = original_host {
        headers.insert(X_FORWARDED_HOST, host);
    }
    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }
}
