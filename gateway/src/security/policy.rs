//! 安全策略
//!
//! 启动时从 `SecurityConfig` 构建一次，之后只读

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use tollgate_config::SecurityConfig;
use tollgate_errors::{AppError, AppResult};

/// 来源检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginCheck {
    /// 放行，携带 `Access-Control-Allow-Origin` 的值
    Allowed(HeaderValue),
    /// 请求没有 Origin 头且策略允许（服务端调用），不输出 CORS 头
    Missing,
}

/// 安全策略
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    allowed_origins: Vec<String>,
    /// 列表中包含 `*`
    any_origin: bool,
    allow_credentials: bool,
    allowed_methods: Vec<Method>,
    allow_methods_value: HeaderValue,
    allow_headers_value: HeaderValue,
    max_age_value: HeaderValue,
    max_body_bytes: usize,
    allow_missing_origin: bool,
    required_fields: HashMap<String, Vec<String>>,
}

impl SecurityPolicy {
    /// 从配置构建
    pub fn from_config(config: &SecurityConfig) -> AppResult<Self> {
        let allowed_methods = config
            .allowed_methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| AppError::config(format!("invalid HTTP method {:?}", m)))
            })
            .collect::<AppResult<Vec<_>>>()?;

        let allowed_headers = config
            .allowed_headers
            .iter()
            .map(|h| {
                HeaderName::try_from(h.trim())
                    .map_err(|_| AppError::config(format!("invalid header name {:?}", h)))
            })
            .collect::<AppResult<Vec<_>>>()?;

        let any_origin = config.allowed_origins.iter().any(|o| o == "*");
        if any_origin && config.allow_credentials {
            return Err(AppError::config(
                "wildcard origin cannot be combined with credentials",
            ));
        }

        let allow_methods_value = join_header_value(allowed_methods.iter().map(Method::as_str))?;
        let allow_headers_value = join_header_value(allowed_headers.iter().map(HeaderName::as_str))?;

        Ok(Self {
            allowed_origins: config
                .allowed_origins
                .iter()
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .collect(),
            any_origin,
            allow_credentials: config.allow_credentials,
            allowed_methods,
            allow_methods_value,
            allow_headers_value,
            max_age_value: HeaderValue::from(config.max_age_secs),
            max_body_bytes: config.max_body_bytes,
            allow_missing_origin: config.allow_missing_origin,
            required_fields: config.required_fields.clone(),
        })
    }

    /// 检查请求来源
    ///
    /// 匹配时回显请求的 Origin；仅在允许任意来源且不带凭证时返回 `*`
    pub fn check_origin(&self, headers: &HeaderMap) -> AppResult<OriginCheck> {
        let Some(origin) = headers.get(header::ORIGIN) else {
            if self.allow_missing_origin {
                return Ok(OriginCheck::Missing);
            }
            return Err(AppError::origin_forbidden("Origin header is required"));
        };

        let value = origin
            .to_str()
            .map_err(|_| AppError::origin_forbidden("Origin not allowed"))?;
        let normalized = value.trim().trim_end_matches('/');

        if self.allowed_origins.iter().any(|o| o == normalized) {
            return Ok(OriginCheck::Allowed(origin.clone()));
        }
        if self.any_origin {
            return Ok(OriginCheck::Allowed(HeaderValue::from_static("*")));
        }

        Err(AppError::origin_forbidden("Origin not allowed"))
    }

    pub fn is_method_allowed(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }

    pub fn allow_credentials(&self) -> bool {
        self.allow_credentials
    }

    pub fn allow_methods_value(&self) -> &HeaderValue {
        &self.allow_methods_value
    }

    pub fn allow_headers_value(&self) -> &HeaderValue {
        &self.allow_headers_value
    }

    pub fn max_age_value(&self) -> &HeaderValue {
        &self.max_age_value
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// 接口要求的顶层字段
    pub fn required_fields(&self, endpoint: &str) -> &[String] {
        self.required_fields
            .get(endpoint)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn join_header_value<'a>(items: impl Iterator<Item = &'a str>) -> AppResult<HeaderValue> {
    let joined = items.collect::<Vec<_>>().join(", ");
    HeaderValue::from_str(&joined)
        .map_err(|e| AppError::config(format!("invalid CORS header value: {}", e)))
}
