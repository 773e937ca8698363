//! 分级限流
//!
//! 身份解析 → 等级 → 原子计数 → 判定

pub mod classifier;
pub mod decision;
pub mod identity;
pub mod limiter;
pub mod memory_store;
pub mod tier;
pub mod types;

pub use classifier::normalize_endpoint;
pub use decision::{decide, seconds_until};
pub use identity::IdentityResolver;
pub use limiter::RateLimiter;
pub use memory_store::{InMemoryWindowStore, spawn_sweeper};
pub use tier::TierTable;
pub use types::{
    ClientIdentity, Decision, DegradedAdmission, DenyReason, IdentitySource, RateDecision,
    TierConfig,
};
