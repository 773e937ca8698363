//! 请求安全校验
//!
//! 在限流之前运行：被拒绝的请求不消耗配额

pub mod cors;
pub mod policy;
pub mod validator;

pub use cors::{EXPOSED_HEADERS, apply_cors_headers, apply_vary_only};
pub use policy::{OriginCheck, SecurityPolicy};
pub use validator::validate_request;
