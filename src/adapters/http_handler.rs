use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body as AxumBody,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{
    adapters::{
        middleware::{
            auth_middleware, metrics_middleware, rate_limit_middleware, request_id_middleware,
        },
        proxy_handler::ProxyHandler,
    },
    core::GatewayService,
    ports::http_client::HttpClient,
};

/// Shared state behind every gateway route.
#[derive(Clone)]
pub struct HttpHandler {
    gateway: Arc<GatewayService>,
    proxy: ProxyHandler,
}

/// Body of `GET /readyz`.
#[derive(Debug, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub resolved_at: Option<String>,
    pub last_error: Option<String>,
}

impl HttpHandler {
    pub fn new(gateway: Arc<GatewayService>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            proxy: ProxyHandler::new(gateway.clone(), http_client),
            gateway,
        }
    }

    /// Assemble the full router: probe and metrics endpoints, the proxy
    /// fallback, and the admission chain in front of them.
    ///
    /// Layer order, outermost first: tracing, request id, auth, rate limit,
    /// metrics.
    pub fn router(self) -> Router {
        let gateway = self.gateway.clone();

        Router::new()
            .route("/healthz", get(healthz))
            .route("/readyz", get(readyz))
            .route("/metrics", get(metrics))
            .fallback(proxy)
            .with_state(self)
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
            .layer(TraceLayer::new_for_http())
    }

    fn readiness(&self) -> ReadinessReport {
        let topology = self.gateway.topology();
        let (snapshot, ready) = topology.snapshot();
        ReadinessReport {
            ready,
            resolved_at: snapshot.map(|s| s.resolved_at().to_rfc3339()),
            last_error: topology.last_error(),
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(handler): State<HttpHandler>) -> Response {
    let report = handler.readiness();
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn metrics(State(handler): State<HttpHandler>) -> Response {
    match handler.gateway.metrics().render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn proxy(State(handler): State<HttpHandler>, req: Request<AxumBody>) -> Response {
    handler.proxy.handle(req).await
}
