//! Tollgate API Gateway
//!
//! 在 AI 工具接口之前执行来源校验与跨实例分级限流

pub mod config;
pub mod gateway;
pub mod metrics;
pub mod middleware;
pub mod rate_limit;
pub mod response;
pub mod routing;
pub mod security;
pub mod security_headers;
pub mod shutdown;
pub mod upstream;

pub use gateway::{Gateway, GatewayOptions};
pub use middleware::gateway_middleware;
pub use rate_limit::Decision;
