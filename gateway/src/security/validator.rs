//! 请求结构校验
//!
//! 只做廉价的结构检查（方法、大小、媒体类型、必填字段），不校验业务语义

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{Method, header};
use serde_json::Value;
use tollgate_errors::{AppError, AppResult};

use crate::security::policy::SecurityPolicy;

/// 校验请求，必要时读取并回填请求体
///
/// 返回的请求可以直接交给下游
pub async fn validate_request(
    policy: &SecurityPolicy,
    request: Request,
    endpoint: &str,
) -> AppResult<Request> {
    if !policy.is_method_allowed(request.method()) {
        return Err(AppError::method_not_allowed(format!(
            "Method {} is not allowed",
            request.method()
        )));
    }

    let limit = policy.max_body_bytes();
    if let Some(length) = declared_length(&request) {
        if length > limit {
            return Err(too_large(limit));
        }
    }

    if !carries_body(request.method()) {
        return Ok(request);
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| too_large(limit))?;

    let required = policy.required_fields(endpoint);
    if bytes.is_empty() {
        if let Some(field) = required.first() {
            return Err(AppError::validation(format!(
                "Missing required field `{}`",
                field
            )));
        }
        return Ok(Request::from_parts(parts, Body::empty()));
    }

    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(is_json_content_type)
        .unwrap_or(false);
    if !is_json {
        return Err(AppError::unsupported_media_type(
            "Content-Type must be application/json",
        ));
    }

    check_json_body(&bytes, required)?;
    Ok(Request::from_parts(parts, Body::from(bytes)))
}

fn declared_length(request: &Request) -> Option<usize> {
    request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn is_json_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

fn too_large(limit: usize) -> AppError {
    AppError::payload_too_large(format!("Request body exceeds {} bytes", limit))
}

/// JSON 必须是对象，且必填字段存在且非 null
fn check_json_body(bytes: &Bytes, required: &[String]) -> AppResult<()> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|_| AppError::validation("Request body must be valid JSON"))?;

    let Value::Object(object) = value else {
        return Err(AppError::validation("Request body must be a JSON object"));
    };

    for field in required {
        match object.get(field) {
            Some(Value::Null) | None => {
                return Err(AppError::validation(format!(
                    "Missing required field `{}`",
                    field
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
