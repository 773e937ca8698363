//! CORS 响应头

use axum::http::{HeaderMap, HeaderValue, header};

use crate::security::policy::{OriginCheck, SecurityPolicy};

/// 暴露给浏览器脚本的响应头
pub const EXPOSED_HEADERS: &str = "X-RateLimit-Limit, X-RateLimit-Remaining, X-RateLimit-Reset, \
                                   Retry-After, X-RateLimit-Degraded, X-Request-Id";

/// 为响应添加 CORS 头
///
/// `Vary: Origin` 总是输出，缓存不能把一个来源的响应给另一个来源复用
pub fn apply_cors_headers(
    headers: &mut HeaderMap,
    policy: &SecurityPolicy,
    origin: &OriginCheck,
    preflight: bool,
) {
    headers.append(header::VARY, HeaderValue::from_static("Origin"));

    let OriginCheck::Allowed(allow_origin) = origin else {
        return;
    };

    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin.clone());
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        policy.allow_methods_value().clone(),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        policy.allow_headers_value().clone(),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );
    if policy.allow_credentials() {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
    if preflight {
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, policy.max_age_value().clone());
    }
}

/// 被拒绝的请求只输出 `Vary`
pub fn apply_vary_only(headers: &mut HeaderMap) {
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
}
