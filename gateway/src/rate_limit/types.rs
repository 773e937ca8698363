//! 数据结构定义

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 配额等级
///
/// 启动时从配置构建，请求处理期间不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierConfig {
    pub name: String,
    /// 窗口内最大请求数
    pub limit: u64,
    /// 窗口长度（秒）
    pub window_secs: u64,
}

impl TierConfig {
    pub fn new(name: impl Into<String>, limit: u64, window_secs: u64) -> Self {
        Self {
            name: name.into(),
            limit,
            window_secs,
        }
    }
}

/// 身份来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// 已登记的 API Key
    ApiKey,
    /// 受信任的代理头
    Forwarded,
    /// TCP 对端地址
    Peer,
    /// 无法确定
    Unknown,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::Forwarded => "forwarded",
            Self::Peer => "peer",
            Self::Unknown => "unknown",
        }
    }
}

/// 调用方身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// 稳定的限流键（`key:{hash}` 或 `ip:{addr}`）
    pub key: String,
    /// API Key 绑定的等级
    pub tier: Option<String>,
    pub source: IdentitySource,
}

/// 限流计算结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    /// 是否允许请求
    pub allowed: bool,
    /// 生效的等级名
    pub tier: String,
    /// 限制的最大请求数
    pub limit: u64,
    /// 当前窗口内的请求计数（操作后）
    pub count: u64,
    /// 剩余可用请求数
    pub remaining: u64,
    /// 窗口重置时间
    pub reset_at: DateTime<Utc>,
    /// 距重置的秒数（向上取整，不为负）
    pub retry_after_secs: u64,
}

/// 存储故障时放行的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedAdmission {
    pub tier: TierConfig,
    pub reset_at: DateTime<Utc>,
    pub reason: String,
}

/// 拒绝原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// 超出配额（429）
    QuotaExceeded(RateDecision),
    /// 存储不可用且策略为 fail-closed（503）
    StoreUnavailable { tier: TierConfig, reason: String },
}

/// 配额检查结论，按值返回
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admitted(RateDecision),
    Denied(DenyReason),
    Degraded(DegradedAdmission),
}

impl Decision {
    /// 指标与日志使用的结果标签
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Admitted(_) => "admitted",
            Self::Denied(DenyReason::QuotaExceeded(_)) => "rate_limited",
            Self::Denied(DenyReason::StoreUnavailable { .. }) => "store_unavailable",
            Self::Degraded(_) => "degraded",
        }
    }

    pub fn tier_name(&self) -> &str {
        match self {
            Self::Admitted(decision) => &decision.tier,
            Self::Denied(DenyReason::QuotaExceeded(decision)) => &decision.tier,
            Self::Denied(DenyReason::StoreUnavailable { tier, .. }) => &tier.name,
            Self::Degraded(admission) => &admission.tier.name,
        }
    }

    /// 请求是否会被转发到下游
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_) | Self::Degraded(_))
    }
}
