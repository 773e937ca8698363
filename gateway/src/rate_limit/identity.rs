//! 调用方身份解析
//!
//! 从请求中得到稳定的限流键。不会失败：无法识别时退回到网络地址

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderMap, HeaderName, header};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use tollgate_config::RateLimitConfig;
use tollgate_errors::{AppError, AppResult};

use crate::rate_limit::types::{ClientIdentity, IdentitySource};

/// 键中保留的哈希前缀长度（十六进制字符）
const KEY_HASH_PREFIX_LEN: usize = 16;

/// 身份解析器
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    /// 携带 API Key 的请求头
    header: HeaderName,
    /// sha256(key) 十六进制 → 等级名
    api_keys: HashMap<String, String>,
    /// 是否信任代理头
    trust_forwarded: bool,
}

impl IdentityResolver {
    pub fn new(header: HeaderName, trust_forwarded: bool) -> Self {
        Self {
            header,
            api_keys: HashMap::new(),
            trust_forwarded,
        }
    }

    /// 登记一个 API Key
    pub fn with_api_key(mut self, key: &str, tier: impl Into<String>) -> Self {
        self.api_keys.insert(hash_key(key), tier.into());
        self
    }

    /// 从配置构建
    pub fn from_config(config: &RateLimitConfig) -> AppResult<Self> {
        let header = HeaderName::try_from(config.identity_header.trim()).map_err(|e| {
            AppError::config(format!(
                "invalid identity header {:?}: {}",
                config.identity_header, e
            ))
        })?;

        let resolver = config
            .api_keys
            .iter()
            .fold(Self::new(header, config.trust_forwarded_headers), |r, k| {
                r.with_api_key(k.key.expose_secret(), k.tier.clone())
            });
        Ok(resolver)
    }

    /// 身份请求头名称
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// 解析身份
    ///
    /// 1. 已登记的 API Key → `key:{hash}` + 绑定的等级
    /// 2. 受信任的代理头（Forwarded / X-Forwarded-For / X-Real-IP）→ `ip:{addr}`
    /// 3. TCP 对端地址 → `ip:{addr}`
    /// 4. `ip:unknown`
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientIdentity {
        if let Some(identity) = self.from_api_key(headers) {
            return identity;
        }

        if self.trust_forwarded {
            if let Some(ip) = forwarded_ip(headers) {
                return ClientIdentity {
                    key: format!("ip:{}", ip),
                    tier: None,
                    source: IdentitySource::Forwarded,
                };
            }
        }

        match peer {
            Some(addr) => ClientIdentity {
                key: format!("ip:{}", addr.ip()),
                tier: None,
                source: IdentitySource::Peer,
            },
            None => ClientIdentity {
                key: "ip:unknown".to_string(),
                tier: None,
                source: IdentitySource::Unknown,
            },
        }
    }

    fn from_api_key(&self, headers: &HeaderMap) -> Option<ClientIdentity> {
        let value = headers.get(&self.header)?.to_str().ok()?.trim();
        if value.is_empty() {
            return None;
        }

        let hash = hash_key(value);
        let tier = self.api_keys.get(&hash)?;
        Some(ClientIdentity {
            key: format!("key:{}", &hash[..KEY_HASH_PREFIX_LEN]),
            tier: Some(tier.clone()),
            source: IdentitySource::ApiKey,
        })
    }
}

fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// 从代理头中取第一个合法的客户端地址
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(header::FORWARDED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_forwarded_for)
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(parse_ip)
        })
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_ip)
        })
}

/// 解析 RFC 7239 `Forwarded` 头中第一个 `for=` 参数
fn parse_forwarded_for(value: &str) -> Option<IpAddr> {
    let first = value.split(',').next()?;
    first
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("for"))
        .and_then(|(_, node)| parse_ip(node))
}

/// 接受 `1.2.3.4`、`1.2.3.4:80`、`"[2001:db8::1]:4711"`、`2001:db8::1`
fn parse_ip(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    value
        .strip_prefix('[')
        .and_then(|rest| rest.split(']').next())
        .and_then(|ip| ip.parse().ok())
}
