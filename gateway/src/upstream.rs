//! 下游生成服务代理
//!
//! 网关只负责准入；这里把通过准入的请求原样转发给配置的生成服务

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use once_cell::sync::Lazy;
use regex::Regex;
use tollgate_config::UpstreamConfig;
use tollgate_errors::{AppError, AppResult};
use tracing::{error, warn};

use crate::response::ApiError;

static TOOL_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,63}$").expect("valid regex"));

/// 生成服务客户端
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl UpstreamClient {
    pub fn from_config(config: &UpstreamConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::config(format!("failed to build upstream client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config
                .url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    /// 转发 JSON 请求体，返回状态码与响应体
    pub async fn forward(&self, tool: &str, body: Bytes) -> AppResult<(StatusCode, Bytes)> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| AppError::upstream("no upstream configured"))?;

        let response = self
            .client
            .post(format!("{}/{}", base, tool))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::upstream(format!("request to {} failed: {}", tool, e)))?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| AppError::upstream(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::upstream(format!("reading {} response failed: {}", tool, e)))?;
        Ok((status, bytes))
    }
}

/// `POST /api/tools/{tool}`
pub async fn proxy_tool(
    State(upstream): State<Arc<UpstreamClient>>,
    Path(tool): Path<String>,
    body: Bytes,
) -> Response {
    if !TOOL_NAME_REGEX.is_match(&tool) {
        return StatusCode::NOT_FOUND.into_response();
    }
    if !upstream.is_configured() {
        warn!(tool = %tool, "No upstream configured");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match upstream.forward(&tool, body).await {
        Ok((status, bytes)) => {
            let mut response = (status, bytes).into_response();
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => {
            error!(tool = %tool, error = %e, "Upstream call failed");
            ApiError(e).into_response()
        }
    }
}
