//! 安全响应头

use axum::http::{HeaderMap, HeaderValue};

/// 为网关响应添加安全头
///
/// - X-Content-Type-Options: 防止 MIME 类型嗅探
/// - X-Frame-Options: 防止点击劫持
/// - Referrer-Policy: 控制 Referer 头信息
pub fn apply_security_headers(headers: &mut HeaderMap) {
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
}
