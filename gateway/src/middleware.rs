//! 网关中间件
//!
//! 安全校验 → 身份 → 等级 → 原子计数 → 判定 → 下游。
//! 所有结果都在这里转换为 HTTP 响应，不向外抛出

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tollgate_errors::AppError;
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

use crate::gateway::Gateway;
use crate::metrics::record_security_rejection;
use crate::rate_limit::{Decision, DenyReason, normalize_endpoint};
use crate::response::{
    ApiError, HEADER_REQUEST_ID, apply_degraded_headers, apply_quota_headers,
    rate_limited_response, sanitized_upstream_response,
};
use crate::security::{OriginCheck, apply_cors_headers, apply_vary_only, validate_request};
use crate::security_headers::apply_security_headers;

/// 客户端提供的请求 ID 的最大长度
const MAX_REQUEST_ID_LEN: usize = 128;

/// Axum 中间件函数
pub async fn gateway_middleware(
    State(gateway): State<Arc<Gateway>>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = request_id(&request);
    let span = info_span!(
        "gateway",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = handle(&gateway, request, next).instrument(span).await;

    let headers = response.headers_mut();
    apply_security_headers(headers);
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(HEADER_REQUEST_ID, value);
    }
    response
}

async fn handle(gateway: &Gateway, request: Request, next: Next) -> Response {
    let security = gateway.security();
    let endpoint = normalize_endpoint(request.uri().path());

    let origin = match security.check_origin(request.headers()) {
        Ok(origin) => origin,
        Err(e) => {
            warn!(
                security_event = true,
                origin = ?request.headers().get(header::ORIGIN),
                endpoint = %endpoint,
                "Request origin rejected"
            );
            record_security_rejection("origin");
            let mut response = ApiError(e).into_response();
            apply_vary_only(response.headers_mut());
            return response;
        }
    };

    // 预检请求不消耗配额
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        apply_cors_headers(response.headers_mut(), security, &origin, true);
        return response;
    }

    let mut request = match validate_request(security, request, &endpoint).await {
        Ok(request) => request,
        Err(e) => return rejected(gateway, &origin, e),
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let identity = gateway.resolver().resolve(request.headers(), peer);
    request.headers_mut().remove(gateway.resolver().header());

    let decision = gateway.check_quota(&identity, &endpoint).await;

    let mut response = match &decision {
        Decision::Denied(DenyReason::QuotaExceeded(rate)) => {
            debug!(
                client = %identity.key,
                identity_source = identity.source.as_str(),
                tier = %rate.tier,
                retry_after = rate.retry_after_secs,
                "Rate limit exceeded"
            );
            rate_limited_response(rate)
        }
        Decision::Denied(DenyReason::StoreUnavailable { reason, .. }) => {
            ApiError(AppError::store_unavailable(reason.clone())).into_response()
        }
        Decision::Admitted(_) | Decision::Degraded(_) => sanitize(next.run(request).await),
    };

    match &decision {
        Decision::Admitted(rate) => apply_quota_headers(response.headers_mut(), rate),
        Decision::Degraded(admission) => apply_degraded_headers(response.headers_mut(), admission),
        Decision::Denied(_) => {}
    }
    apply_cors_headers(response.headers_mut(), security, &origin, false);
    response
}

/// 结构校验失败
fn rejected(gateway: &Gateway, origin: &OriginCheck, err: AppError) -> Response {
    let reason = match &err {
        AppError::MethodNotAllowed(_) => "method",
        AppError::PayloadTooLarge(_) => "payload_too_large",
        AppError::UnsupportedMediaType(_) => "media_type",
        _ => "validation",
    };
    debug!(reason, error = %err, "Request rejected by validator");
    record_security_rejection(reason);

    let allow = matches!(err, AppError::MethodNotAllowed(_));
    let mut response = ApiError(err).into_response();
    let headers = response.headers_mut();
    if allow {
        headers.insert(header::ALLOW, gateway.security().allow_methods_value().clone());
    }
    apply_cors_headers(headers, gateway.security(), origin, false);
    response
}

/// 下游 5xx 不向客户端透出细节
fn sanitize(response: Response) -> Response {
    let status = response.status();
    if !status.is_server_error() {
        return response;
    }
    error!(status = status.as_u16(), "Downstream handler failed");
    sanitized_upstream_response(status)
}

fn request_id(request: &Request) -> String {
    request
        .headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
