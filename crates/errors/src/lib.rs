//! tollgate-errors - 统一错误处理
//!
//! 网关层的错误分类，每个变体对应一个 HTTP 状态码和稳定的机器可读错误码

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Origin forbidden: {0}")]
    OriginForbidden(String),

    /// 计数存储不可达或超时，与“拒绝”严格区分
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        Self::PayloadTooLarge(msg.into())
    }

    pub fn unsupported_media_type(msg: impl Into<String>) -> Self {
        Self::UnsupportedMediaType(msg.into())
    }

    pub fn method_not_allowed(msg: impl Into<String>) -> Self {
        Self::MethodNotAllowed(msg.into())
    }

    pub fn origin_forbidden(msg: impl Into<String>) -> Self {
        Self::OriginForbidden(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::PayloadTooLarge(_) => 413,
            Self::UnsupportedMediaType(_) => 415,
            Self::MethodNotAllowed(_) => 405,
            Self::OriginForbidden(_) => 403,
            Self::StoreUnavailable(_) => 503,
            Self::Upstream(_) => 502,
            Self::Config(_) => 500,
        }
    }

    /// 机器可读错误码（响应体中的 `error` 字段）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            Self::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            Self::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            Self::OriginForbidden(_) => "ORIGIN_FORBIDDEN",
            Self::StoreUnavailable(_) => "RATE_LIMIT_UNAVAILABLE",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// 可以返回给客户端的消息
    ///
    /// 基础设施类错误只返回固定文案，内部细节仅写入日志
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg)
            | Self::PayloadTooLarge(msg)
            | Self::UnsupportedMediaType(msg)
            | Self::MethodNotAllowed(msg)
            | Self::OriginForbidden(msg) => msg.clone(),
            Self::StoreUnavailable(_) => "Rate limiting is temporarily unavailable".to_string(),
            Self::Upstream(_) => "Upstream service failed".to_string(),
            Self::Config(_) => "Internal server error".to_string(),
        }
    }

    /// 转换为错误响应体
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.error_code().to_string(),
            message: self.public_message(),
        }
    }
}

/// 最小 JSON 错误响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
