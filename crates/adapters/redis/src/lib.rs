//! tollgate-adapter-redis - Redis 计数存储适配器

mod connection;
mod retry;
mod window_store;

pub use connection::*;
pub use retry::*;
pub use window_store::*;
