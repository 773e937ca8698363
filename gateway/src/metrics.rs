//! 网关指标
//!
//! 未安装 recorder 时（例如单元测试）这些调用都是空操作

use std::time::Duration;

use ::metrics::{counter, histogram};

/// 配额判定结果计数
pub fn record_decision(outcome: &'static str, tier: &str) {
    counter!("gateway_decisions_total", "outcome" => outcome, "tier" => tier.to_string())
        .increment(1);
}

/// 安全校验拒绝计数
pub fn record_security_rejection(reason: &'static str) {
    counter!("gateway_security_rejections_total", "reason" => reason).increment(1);
}

/// 计数存储调用耗时
pub fn record_store_call(backend: &'static str, result: &'static str, elapsed: Duration) {
    histogram!("window_store_duration_ms", "backend" => backend, "result" => result)
        .record(elapsed.as_secs_f64() * 1000.0);
}
