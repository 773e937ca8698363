//! tollgate-config - 配置加载库
//!
//! 启动时加载一次：`default.toml` → `{APP_ENV}.toml` → `TOLLGATE_` 环境变量，
//! 校验通过后由网关转换为不可变的运行时值。

use std::collections::{HashMap, HashSet};

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::Secret;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// 单个窗口的最大时长（365 天）
pub const MAX_WINDOW_SECS: u64 = 31_536_000;

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 生产环境使用 JSON 日志
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

/// 计数存储后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// 进程内存储，仅适用于单实例部署和测试
    #[default]
    Memory,
    Redis,
}

/// 计数存储配置
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Redis URL（backend = redis 时必填）
    #[serde(default)]
    pub url: Option<Secret<String>>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// 单次存储调用的超时（毫秒）
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
    /// 瞬时连接错误的最大尝试次数
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// 内存后端清理过期记录的间隔（秒）
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_key_prefix() -> String {
    "rl".to_string()
}

fn default_store_timeout_ms() -> u64 {
    250
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    20
}

fn default_sweep_interval_secs() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            key_prefix: default_key_prefix(),
            timeout_ms: default_store_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// 请求安全校验配置
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// 允许的来源，支持列表或逗号分隔的字符串
    #[serde(default = "default_allowed_origins", deserialize_with = "string_or_list")]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default = "default_allowed_methods", deserialize_with = "string_or_list")]
    pub allowed_methods: Vec<String>,
    #[serde(default = "default_allowed_headers", deserialize_with = "string_or_list")]
    pub allowed_headers: Vec<String>,
    /// 预检结果缓存时间（秒）
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// 无 Origin 头的请求（服务端调用）是否放行
    #[serde(default = "default_true")]
    pub allow_missing_origin: bool,
    /// 接口 → 必填的顶层 JSON 字段
    #[serde(default)]
    pub required_fields: HashMap<String, Vec<String>>,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_allowed_methods() -> Vec<String> {
    ["GET", "POST", "OPTIONS"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_allowed_headers() -> Vec<String> {
    ["content-type", "x-api-key", "x-request-id"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_age_secs() -> u64 {
    86400
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allow_credentials: false,
            allowed_methods: default_allowed_methods(),
            allowed_headers: default_allowed_headers(),
            max_age_secs: default_max_age_secs(),
            max_body_bytes: default_max_body_bytes(),
            allow_missing_origin: true,
            required_fields: HashMap::new(),
        }
    }
}

/// 存储故障时的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// 放行但标记为降级
    #[default]
    Open,
    /// 返回 503
    Closed,
}

/// 单个等级
#[derive(Debug, Clone, Deserialize)]
pub struct TierSettings {
    pub name: String,
    /// 窗口内最大请求数
    pub limit: u64,
    /// 窗口长度（秒）
    pub window_secs: u64,
}

/// API Key 与等级的绑定
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySettings {
    pub key: Secret<String>,
    pub tier: String,
}

/// 分级限流配置
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// 携带调用方身份的请求头
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    /// 是否信任反向代理设置的 Forwarded / X-Forwarded-For / X-Real-IP
    #[serde(default)]
    pub trust_forwarded_headers: bool,
    #[serde(default = "default_tier_name")]
    pub default_tier: String,
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierSettings>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeySettings>,
    /// 覆盖规则（key: "tier:endpoint"，支持 `*` 通配，value: 等级名）
    #[serde(default)]
    pub rules: HashMap<String, String>,
}

fn default_identity_header() -> String {
    "x-api-key".to_string()
}

fn default_tier_name() -> String {
    "anonymous".to_string()
}

fn default_tiers() -> Vec<TierSettings> {
    vec![
        TierSettings {
            name: "anonymous".to_string(),
            limit: 10,
            window_secs: 60,
        },
        TierSettings {
            name: "verified".to_string(),
            limit: 60,
            window_secs: 60,
        },
        TierSettings {
            name: "partner".to_string(),
            limit: 600,
            window_secs: 60,
        },
    ]
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            identity_header: default_identity_header(),
            trust_forwarded_headers: false,
            default_tier: default_tier_name(),
            tiers: default_tiers(),
            api_keys: Vec::new(),
            rules: HashMap::new(),
        }
    }
}

/// 上游生成服务
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_upstream_timeout_ms() -> u64 {
    30_000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_upstream_timeout_ms(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

fn default_app_env() -> String {
    "development".to_string()
}

impl Settings {
    /// 从配置目录和环境变量加载并校验配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());

        let figment = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("TOLLGATE_").split("__"));

        Self::from_figment(figment)
    }

    /// 从任意 figment 提取并校验
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Self = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_store()?;
        self.validate_security()?;
        self.validate_rate_limit()?;
        self.validate_upstream()?;
        Ok(())
    }

    fn validate_store(&self) -> Result<(), ConfigError> {
        let store = &self.store;
        if store.backend == StoreBackend::Redis && store.url.is_none() {
            return Err(invalid("store.url is required when store.backend = \"redis\""));
        }
        if store.timeout_ms == 0 {
            return Err(invalid("store.timeout_ms must be greater than 0"));
        }
        if store.retry_attempts == 0 {
            return Err(invalid("store.retry_attempts must be at least 1"));
        }
        if store.key_prefix.is_empty() || store.key_prefix.contains(char::is_whitespace) {
            return Err(invalid("store.key_prefix must be non-empty without whitespace"));
        }
        Ok(())
    }

    fn validate_security(&self) -> Result<(), ConfigError> {
        let security = &self.security;
        if security.max_body_bytes == 0 {
            return Err(invalid("security.max_body_bytes must be greater than 0"));
        }
        if security.allowed_methods.is_empty() {
            return Err(invalid("security.allowed_methods must not be empty"));
        }
        let wildcard = security.allowed_origins.iter().any(|o| o == "*");
        if wildcard && security.allow_credentials {
            return Err(invalid(
                "security.allowed_origins must not contain \"*\" when allow_credentials = true",
            ));
        }
        for origin in &security.allowed_origins {
            if origin != "*" && !(origin.starts_with("http://") || origin.starts_with("https://"))
            {
                return Err(invalid(format!(
                    "security.allowed_origins entry {:?} must start with http:// or https://",
                    origin
                )));
            }
        }
        Ok(())
    }

    fn validate_rate_limit(&self) -> Result<(), ConfigError> {
        let rl = &self.rate_limit;
        if rl.tiers.is_empty() {
            return Err(invalid("rate_limit.tiers must define at least one tier"));
        }

        let mut names = HashSet::new();
        for tier in &rl.tiers {
            if !is_valid_tier_name(&tier.name) {
                return Err(invalid(format!(
                    "tier name {:?} must match [a-z][a-z0-9_-]*",
                    tier.name
                )));
            }
            if !names.insert(tier.name.as_str()) {
                return Err(invalid(format!("duplicate tier {:?}", tier.name)));
            }
            if tier.limit == 0 {
                return Err(invalid(format!("tier {:?}: limit must be at least 1", tier.name)));
            }
            if tier.window_secs == 0 || tier.window_secs > MAX_WINDOW_SECS {
                return Err(invalid(format!(
                    "tier {:?}: window_secs must be between 1 and {}",
                    tier.name, MAX_WINDOW_SECS
                )));
            }
        }

        if !names.contains(rl.default_tier.as_str()) {
            return Err(invalid(format!(
                "rate_limit.default_tier {:?} is not a defined tier",
                rl.default_tier
            )));
        }

        for api_key in &rl.api_keys {
            if !names.contains(api_key.tier.as_str()) {
                return Err(invalid(format!(
                    "api key bound to unknown tier {:?}",
                    api_key.tier
                )));
            }
        }

        for (pattern, target) in &rl.rules {
            let Some((tier, endpoint)) = pattern.split_once(':') else {
                return Err(invalid(format!(
                    "rule {:?} must have the form \"tier:endpoint\"",
                    pattern
                )));
            };
            if tier != "*" && !names.contains(tier) {
                return Err(invalid(format!("rule {:?} references unknown tier", pattern)));
            }
            if endpoint.is_empty() {
                return Err(invalid(format!("rule {:?} has an empty endpoint", pattern)));
            }
            if tier == "*" && endpoint == "*" {
                return Err(invalid(format!(
                    "rule {:?} matches everything, use rate_limit.default_tier instead",
                    pattern
                )));
            }
            if endpoint != "*" && !endpoint.starts_with('/') {
                return Err(invalid(format!(
                    "rule {:?}: endpoint must be \"*\" or start with /",
                    pattern
                )));
            }
            if !names.contains(target.as_str()) {
                return Err(invalid(format!(
                    "rule {:?} targets unknown tier {:?}",
                    pattern, target
                )));
            }
        }

        if rl.identity_header.trim().is_empty() {
            return Err(invalid("rate_limit.identity_header must not be empty"));
        }
        Ok(())
    }

    fn validate_upstream(&self) -> Result<(), ConfigError> {
        if self.upstream.timeout_ms == 0 {
            return Err(invalid("upstream.timeout_ms must be greater than 0"));
        }
        Ok(())
    }
}

fn is_valid_tier_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// 接受 `["a", "b"]` 或 `"a, b"` 两种写法
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        String(String),
        List(Vec<String>),
    }

    let values = match StringOrList::deserialize(deserializer)? {
        StringOrList::String(s) => s.split(',').map(|v| v.to_string()).collect::<Vec<_>>(),
        StringOrList::List(list) => list,
    };

    Ok(values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}
