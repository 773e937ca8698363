//! 等级表
//!
//! 身份 + 接口 → 等级。纯函数、全函数：任何身份都会落到某个等级上

use std::collections::HashMap;

use tollgate_config::RateLimitConfig;
use tollgate_errors::{AppError, AppResult};
use tollgate_ports::MAX_WINDOW_SECS;
use tracing::debug;

use crate::rate_limit::classifier::normalize_endpoint;
use crate::rate_limit::types::{ClientIdentity, TierConfig};

/// 等级表
#[derive(Debug, Clone)]
pub struct TierTable {
    tiers: HashMap<String, TierConfig>,
    default_tier: TierConfig,
    /// 覆盖规则（key: "tier:endpoint"，value: 等级名）
    rules: HashMap<String, String>,
}

impl TierTable {
    /// 创建等级表，校验所有引用的等级都存在
    pub fn new(
        tiers: Vec<TierConfig>,
        default_tier: &str,
        rules: HashMap<String, String>,
    ) -> AppResult<Self> {
        let mut table = HashMap::new();
        for tier in tiers {
            if tier.limit == 0 || tier.window_secs == 0 || tier.window_secs > MAX_WINDOW_SECS {
                return Err(AppError::config(format!(
                    "tier {:?} must have a non-zero limit and a window of 1..={} seconds",
                    tier.name, MAX_WINDOW_SECS
                )));
            }
            if table.insert(tier.name.clone(), tier).is_some() {
                return Err(AppError::config("duplicate tier name"));
            }
        }

        let default_tier = table
            .get(default_tier)
            .cloned()
            .ok_or_else(|| AppError::config(format!("unknown default tier {:?}", default_tier)))?;

        let mut normalized = HashMap::with_capacity(rules.len());
        for (pattern, target) in rules {
            if !table.contains_key(&target) {
                return Err(AppError::config(format!(
                    "rule {:?} targets unknown tier {:?}",
                    pattern, target
                )));
            }
            let key = normalize_rule(&pattern)?;
            normalized.insert(key, target);
        }

        Ok(Self {
            tiers: table,
            default_tier,
            rules: normalized,
        })
    }

    /// 从配置构建
    pub fn from_config(config: &RateLimitConfig) -> AppResult<Self> {
        let tiers = config
            .tiers
            .iter()
            .map(|t| TierConfig::new(t.name.clone(), t.limit, t.window_secs))
            .collect();
        Self::new(tiers, &config.default_tier, config.rules.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tiers.contains_key(name)
    }

    /// 解析生效的等级
    ///
    /// # 优先级
    /// 1. 匹配 "tier:endpoint" 的规则
    /// 2. 匹配 "tier:*" 的规则
    /// 3. 匹配 "*:endpoint" 的规则
    /// 4. 身份自身的等级（API Key 绑定）
    /// 5. 默认等级
    pub fn resolve(&self, identity: &ClientIdentity, endpoint: &str) -> &TierConfig {
        let base = identity
            .tier
            .as_deref()
            .and_then(|name| self.tiers.get(name))
            .unwrap_or(&self.default_tier);

        let candidates = [
            format!("{}:{}", base.name, endpoint),
            format!("{}:*", base.name),
            format!("*:{}", endpoint),
        ];

        for candidate in &candidates {
            if let Some(tier) = self
                .rules
                .get(candidate)
                .and_then(|target| self.tiers.get(target))
            {
                debug!(rule = %candidate, tier = %tier.name, "Tier rule matched");
                return tier;
            }
        }

        base
    }
}

/// 规则键与请求使用同一套接口规范化，否则 "x/" 之类的写法永远匹配不上
fn normalize_rule(pattern: &str) -> AppResult<String> {
    let Some((tier, endpoint)) = pattern.split_once(':') else {
        return Err(AppError::config(format!(
            "rule {:?} must have the form \"tier:endpoint\"",
            pattern
        )));
    };
    match (tier, endpoint) {
        ("*", "*") => Err(AppError::config(format!(
            "rule {:?} matches everything, use the default tier instead",
            pattern
        ))),
        (_, "*") => Ok(pattern.to_string()),
        (_, endpoint) if endpoint.starts_with('/') => {
            Ok(format!("{}:{}", tier, normalize_endpoint(endpoint)))
        }
        _ => Err(AppError::config(format!(
            "rule {:?}: endpoint must be \"*\" or start with /",
            pattern
        ))),
    }
}
