//! API 路由

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::gateway::Gateway;
use crate::middleware::gateway_middleware;
use crate::upstream::{UpstreamClient, proxy_tool};

/// 运维路由共享状态
#[derive(Clone)]
pub struct OpsState {
    pub gateway: Arc<Gateway>,
    pub metrics: Option<PrometheusHandle>,
}

/// 完整应用：受网关保护的工具路由 + 不受限的运维路由
pub fn app(gateway: Arc<Gateway>, upstream: Arc<UpstreamClient>, metrics: Option<PrometheusHandle>) -> Router {
    let ops = OpsState {
        gateway: Arc::clone(&gateway),
        metrics,
    };

    gated_routes(gateway, upstream)
        .merge(ops_routes(ops))
        .layer(TraceLayer::new_for_http())
}

/// 工具路由，全部经过网关中间件
pub fn gated_routes(gateway: Arc<Gateway>, upstream: Arc<UpstreamClient>) -> Router {
    Router::new()
        .route("/api/tools/{tool}", post(proxy_tool))
        // 与配额计数的路径规范化保持一致
        .route("/api/tools/{tool}/", post(proxy_tool))
        .with_state(upstream)
        .layer(middleware::from_fn_with_state(gateway, gateway_middleware))
}

pub fn ops_routes(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn readiness_check(State(state): State<OpsState>) -> Response {
    let status = state.gateway.readiness().await;
    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}

async fn metrics_endpoint(State(state): State<OpsState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
