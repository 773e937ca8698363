//! 固定窗口计数存储端口
//!
//! 所有处理实例共享的唯一可变状态。实现必须以单个原子操作完成
//! “读取-比较上限-自增-设置过期”，不允许调用方先读后写。

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use tollgate_errors::AppResult;

/// 计数记录的逻辑键：(客户端, 接口, 等级)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WindowKey {
    pub client_key: String,
    pub endpoint: String,
    pub tier: String,
}

impl WindowKey {
    pub fn new(
        client_key: impl Into<String>,
        endpoint: impl Into<String>,
        tier: impl Into<String>,
    ) -> Self {
        Self {
            client_key: client_key.into(),
            endpoint: endpoint.into(),
            tier: tier.into(),
        }
    }

    /// 生成存储键
    ///
    /// 键中包含窗口起点，新窗口总是落在新键上，过期记录不会被复用
    pub fn storage_key(&self, prefix: &str, window_start: DateTime<Utc>) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            prefix,
            self.tier,
            self.endpoint,
            self.client_key,
            window_start.timestamp()
        )
    }
}

/// 按墙上时钟对齐的固定窗口 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// 窗口时长上限（365 天），超出的配置按上限处理
pub const MAX_WINDOW_SECS: u64 = 31_536_000;

/// 窗口时长（毫秒），限制在 `[1s, MAX_WINDOW_SECS]` 内，不会溢出
pub fn window_millis(window_secs: u64) -> i64 {
    let secs = i64::try_from(window_secs.clamp(1, MAX_WINDOW_SECS)).unwrap_or(1);
    secs.checked_mul(1000).unwrap_or(1000)
}

impl FixedWindow {
    /// 计算包含 `now` 的窗口，起点为 `window_secs` 的整数倍
    pub fn containing(now: DateTime<Utc>, window_secs: u64) -> Self {
        let window_ms = window_millis(window_secs);
        let now_ms = now.timestamp_millis();
        let start_ms = now_ms - now_ms.rem_euclid(window_ms);
        let start = Utc
            .timestamp_millis_opt(start_ms)
            .single()
            .unwrap_or(now);
        Self {
            start,
            end: start + Duration::milliseconds(window_ms),
        }
    }

    /// 窗口在 `now` 时是否已失效
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end
    }
}

/// 原子自增并检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// 本次请求是否被计入
    pub admitted: bool,
    /// 操作后当前窗口内已计入的请求数（不超过上限）
    pub count: u64,
    /// 当前窗口起点
    pub window_start: DateTime<Utc>,
}

/// 共享计数存储
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// 原子地自增并检查上限
    ///
    /// - 计数未达上限：计数加一，`admitted = true`
    /// - 计数已达上限：计数不变，`admitted = false`
    /// - 存储不可达：返回 `AppError::StoreUnavailable`，不得伪装成允许或拒绝
    async fn increment_and_check(
        &self,
        key: &WindowKey,
        limit: u64,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> AppResult<WindowCount>;

    /// 连通性检查
    async fn ping(&self) -> AppResult<()>;

    /// 后端名称（日志与指标标签）
    fn backend(&self) -> &'static str;
}
