//! 限流器
//!
//! 对计数存储的一次调用：超时控制 + 耗时指标。
//! 原子性由存储自身保证，这里不做任何读后写

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tollgate_errors::{AppError, AppResult};
use tollgate_ports::{WindowCount, WindowKey, WindowStore};
use tracing::debug;

use crate::metrics::record_store_call;
use crate::rate_limit::types::TierConfig;

/// 限流器
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }

    /// 原子自增并检查上限
    ///
    /// 超时与存储错误都归为 `StoreUnavailable`，由调用方决定降级策略
    pub async fn increment(
        &self,
        key: &WindowKey,
        tier: &TierConfig,
        now: DateTime<Utc>,
    ) -> AppResult<WindowCount> {
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.timeout,
            self.store
                .increment_and_check(key, tier.limit, tier.window_secs, now),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AppError::store_unavailable(format!(
                "{} store timed out after {}ms",
                self.store.backend(),
                self.timeout.as_millis()
            )))
        });

        let label = match &result {
            Ok(count) if count.admitted => "admitted",
            Ok(_) => "rejected",
            Err(_) => "error",
        };
        record_store_call(self.store.backend(), label, started.elapsed());

        if let Ok(count) = &result {
            debug!(
                client = %key.client_key,
                endpoint = %key.endpoint,
                tier = %tier.name,
                count = count.count,
                admitted = count.admitted,
                "Window store result"
            );
        }

        result
    }

    /// 存储连通性检查（同样受超时约束）
    pub async fn ping(&self) -> AppResult<()> {
        tokio::time::timeout(self.timeout, self.store.ping())
            .await
            .unwrap_or_else(|_| Err(AppError::store_unavailable("ping timed out")))
    }
}
