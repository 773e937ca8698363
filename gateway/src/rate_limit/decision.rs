//! 限流判定
//!
//! 纯函数：存储返回的计数 + 等级 → 是否允许、剩余配额、重置时间、重试等待

use chrono::{DateTime, Duration, Utc};
use tollgate_ports::{WindowCount, window_millis};

use crate::rate_limit::types::{RateDecision, TierConfig};

/// 根据窗口计数做出判定
pub fn decide(count: &WindowCount, tier: &TierConfig, now: DateTime<Utc>) -> RateDecision {
    let reset_at = count.window_start + Duration::milliseconds(window_millis(tier.window_secs));

    RateDecision {
        allowed: count.admitted,
        tier: tier.name.clone(),
        limit: tier.limit,
        count: count.count,
        remaining: tier.limit.saturating_sub(count.count),
        reset_at,
        retry_after_secs: seconds_until(reset_at, now),
    }
}

/// 距 `reset_at` 的秒数，向上取整，不为负
pub fn seconds_until(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_at - now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    ((millis + 999) / 1000) as u64
}
