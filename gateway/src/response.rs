//! 响应构造
//!
//! 错误体、配额头和 429 响应体

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tollgate_errors::AppError;

use crate::rate_limit::types::{DegradedAdmission, RateDecision};

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_DEGRADED: &str = "x-ratelimit-degraded";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// 把 `AppError` 转为 HTTP 响应
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_error_body())).into_response()
    }
}

/// 429 响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitExceededBody {
    pub error: String,
    pub message: String,
    pub tier: String,
    pub reset_time: String,
    pub retry_after: u64,
}

impl RateLimitExceededBody {
    pub fn from_decision(decision: &RateDecision) -> Self {
        Self {
            error: "RATE_LIMIT_EXCEEDED".to_string(),
            message: format!(
                "Rate limit of {} requests exceeded for tier '{}'. Try again in {} seconds.",
                decision.limit, decision.tier, decision.retry_after_secs
            ),
            tier: decision.tier.clone(),
            reset_time: format_reset(decision.reset_at),
            retry_after: decision.retry_after_secs,
        }
    }
}

/// ISO-8601（UTC，秒精度）
pub fn format_reset(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// 添加配额头（允许与拒绝的请求都会带上）
pub fn apply_quota_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(HEADER_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));
    insert_reset(headers, decision.reset_at);
}

/// 降级放行：计数未知，因此不输出 Remaining
pub fn apply_degraded_headers(headers: &mut HeaderMap, admission: &DegradedAdmission) {
    headers.insert(HEADER_LIMIT, HeaderValue::from(admission.tier.limit));
    insert_reset(headers, admission.reset_at);
    headers.insert(
        HEADER_DEGRADED,
        HeaderValue::from_static("store-unavailable"),
    );
}

fn insert_reset(headers: &mut HeaderMap, reset_at: DateTime<Utc>) {
    if let Ok(value) = HeaderValue::from_str(&format_reset(reset_at)) {
        headers.insert(HEADER_RESET, value);
    }
}

/// 429 响应：完整配额头 + Retry-After + JSON 体
pub fn rate_limited_response(decision: &RateDecision) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(RateLimitExceededBody::from_decision(decision)),
    )
        .into_response();

    let headers = response.headers_mut();
    apply_quota_headers(headers, decision);
    headers.insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after_secs));
    response
}

/// 下游 5xx 的统一响应体，保留状态码
pub fn sanitized_upstream_response(status: StatusCode) -> Response {
    let body = tollgate_errors::ErrorBody {
        error: "UPSTREAM_ERROR".to_string(),
        message: "upstream service failed".to_string(),
    };
    (status, Json(body)).into_response()
}
