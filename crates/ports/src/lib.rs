//! tollgate-ports - 端口定义
//!
//! 网关依赖的外部能力：共享计数存储与时钟

pub mod clock;
pub mod window_store;

pub use clock::*;
pub use window_store::*;
