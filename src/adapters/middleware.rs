//! Axum middleware forming the gateway's admission chain.
//!
//! Requests pass auth, then rate limiting, then the metrics wrapper before
//! reaching the proxy. Each layer reads the shared [`GatewayService`]; none of
//! them hold a lock across the downstream call.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::Instrument;

use crate::{
    core::{
        auth::{AuthDecision, is_exempt_path},
        backend::BackendTarget,
        gateway::GatewayService,
        rate_limiter::{RateDecision, client_key},
        router,
    },
    metrics::RequestTimer,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Low-cardinality route label for request metrics.
pub fn route_label(path: &str) -> &'static str {
    match path {
        "/healthz" => "healthz",
        "/readyz" => "readyz",
        "/metrics" => "metrics",
        _ => match router::route(path) {
            Some(BackendTarget::PrimaryApi) => "primary",
            Some(BackendTarget::Analyzer) => "analyzer",
            None => "unmatched",
        },
    }
}

/// Reject requests without the configured bearer token with `401`.
pub async fn auth_middleware(
    State(gateway): State<Arc<GatewayService>>,
    req: Request,
    next: Next,
) -> Response {
    match gateway.authorize(req.uri().path(), req.headers()) {
        AuthDecision::Bypass | AuthDecision::Authorized => next.run(req).await,
        AuthDecision::Denied(failure) => {
            gateway.metrics().record_auth_failure(failure.as_str());
            tracing::warn!(
                path = req.uri().path(),
                reason = failure.as_str(),
                "Rejected unauthenticated request"
            );
            (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                "unauthorized",
            )
                .into_response()
        }
    }
}

/// Whole seconds a client should wait, never less than one.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Apply the global and per-client token buckets; answer `429` when either
/// is empty. Probe paths are never limited.
pub async fn rate_limit_middleware(
    State(gateway): State<Arc<GatewayService>>,
    req: Request,
    next: Next,
) -> Response {
    if is_exempt_path(req.uri().path()) {
        return next.run(req).await;
    }

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(req.headers(), peer);

    match gateway.admit(&client) {
        RateDecision::Allowed => next.run(req).await,
        RateDecision::Limited { scope, retry_after } => {
            gateway.metrics().record_rate_limited(scope.as_str());
            tracing::warn!(
                client = %client,
                scope = scope.as_str(),
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            let retry_after = HeaderValue::from(retry_after_secs(retry_after));
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after)],
                "rate limit exceeded",
            )
                .into_response()
        }
    }
}

/// Count requests and record latency by route, method and status.
pub async fn metrics_middleware(
    State(gateway): State<Arc<GatewayService>>,
    req: Request,
    next: Next,
) -> Response {
    let timer = RequestTimer::start();
    let route = route_label(req.uri().path());
    let method = req.method().clone();

    let response = next.run(req).await;

    gateway.metrics().observe_request(
        route,
        method.as_str(),
        response.status().as_u16(),
        timer.elapsed_secs(),
    );
    response
}

/// Tag the request with an id (the caller's `X-Request-ID` if it sent one,
/// otherwise a fresh UUID), run it inside a `request` span, and echo the id
/// back in the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = req.uri().path(),
    );
    let mut response = next.run(req).instrument(span).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, middleware, routing::get};
    use tower::ServiceExt; // for oneshot

    use super::*;
    use crate::{
        core::{
            auth::AuthGate,
            rate_limiter::{BucketShape, GatewayRateLimiter, RateLimitSettings},
            topology::TopologyHandle,
        },
        metrics::GatewayMetrics,
    };

    fn gateway(auth: AuthGate, limiter: Option<GatewayRateLimiter>) -> Arc<GatewayService> {
        Arc::new(GatewayService::from_parts(
            auth,
            limiter,
            TopologyHandle::new(),
            Arc::new(GatewayMetrics::new().unwrap()),
        ))
    }

    fn app(gateway: Arc<GatewayService>) -> Router {
        Router::new()
            .route("/healthz", get(|| async { "ok" }))
            .route("/api/v1/metrics/history", get(|| async { "history" }))
            .layer(middleware::from_fn_with_state(
                gateway.clone(),
                metrics_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                gateway.clone(),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn_with_state(gateway, auth_middleware))
            .layer(middleware::from_fn(request_id_middleware))
    }

    fn get_request(path: &str, token: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_route_labels() {
        assert_eq!(route_label("/healthz"), "healthz");
        assert_eq!(route_label("/metrics"), "metrics");
        assert_eq!(route_label("/api/v1/metrics/history"), "primary");
        assert_eq!(route_label("/api/v1/release-analyzer/x"), "analyzer");
        assert_eq!(route_label("/favicon.ico"), "unmatched");
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(0)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(300)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1_001)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
    }

    #[tokio::test]
    async fn test_auth_rejects_missing_token() {
        let gateway = gateway(AuthGate::with_token("secret"), None);
        let response = app(gateway.clone())
            .oneshot(get_request("/api/v1/metrics/history", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        assert_eq!(gateway.metrics().auth_failure_count("missing"), 1);
    }

    #[tokio::test]
    async fn test_auth_accepts_valid_token_and_exempts_probes() {
        let gateway = gateway(AuthGate::with_token("secret"), None);

        let response = app(gateway.clone())
            .oneshot(get_request("/api/v1/metrics/history", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(gateway.clone())
            .oneshot(get_request("/healthz", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(gateway.clone())
            .oneshot(get_request("/api/v1/metrics/history", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(gateway.metrics().auth_failure_count("invalid"), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429_with_retry_after() {
        // One token, refilled every two seconds: the second request is denied.
        let limiter = GatewayRateLimiter::new(&RateLimitSettings {
            global: BucketShape::new(0.5, 1),
            client: BucketShape::new(0.5, 1),
            max_clients: 16,
            client_idle: Duration::from_secs(60),
        })
        .unwrap();
        let gateway = gateway(AuthGate::disabled(), Some(limiter));

        let first = app(gateway.clone())
            .oneshot(get_request("/api/v1/metrics/history", None))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app(gateway.clone())
            .oneshot(get_request("/api/v1/metrics/history", None))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = second
            .headers()
            .get(header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=2).contains(&retry_after));
        assert_eq!(gateway.metrics().rate_limited_count("global"), 1);

        // Probes bypass the limiter entirely.
        let probe = app(gateway.clone())
            .oneshot(get_request("/healthz", None))
            .await
            .unwrap();
        assert_eq!(probe.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unlimited_gateway_never_throttles() {
        let gateway = gateway(AuthGate::disabled(), None);
        for _ in 0..20 {
            let response = app(gateway.clone())
                .oneshot(get_request("/api/v1/metrics/history", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_metrics_wrapper_counts_requests() {
        let gateway = gateway(AuthGate::disabled(), None);
        app(gateway.clone())
            .oneshot(get_request("/api/v1/metrics/history", None))
            .await
            .unwrap();

        let rendered = gateway.metrics().render().unwrap();
        assert!(rendered.contains(
            "meridian_requests_total{method=\"GET\",route=\"primary\",status=\"200\"} 1"
        ));
    }

    #[tokio::test]
    async fn test_request_id_generated_or_reused() {
        let gateway = gateway(AuthGate::disabled(), None);

        let response = app(gateway.clone())
            .oneshot(get_request("/healthz", None))
            .await
            .unwrap();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(uuid::Uuid::parse_str(request_id).is_ok());

        let request = Request::builder()
            .uri("/healthz")
            .header(REQUEST_ID_HEADER, "caller-supplied-id")
            .body(Body::empty())
            .unwrap();
        let response = app(gateway).oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "caller-supplied-id"
        );
    }
}
