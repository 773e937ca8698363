//! 接口路径规范化
//!
//! 限流按逻辑接口计数：去掉尾部斜杠、合并重复斜杠，
//! 并把不适合出现在存储键中的字符替换掉

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// 存储键中允许的字符之外的字符
static UNSAFE_CHARS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9/_.\-]").expect("valid regex"));

/// 连续斜杠
static REPEATED_SLASH_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"/{2,}").expect("valid regex"));

/// 规范化后的最大长度
const MAX_ENDPOINT_LEN: usize = 128;

/// 超长路径保留的摘要长度（十六进制字符）
const DIGEST_LEN: usize = 16;

/// 规范化接口路径
pub fn normalize_endpoint(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let collapsed = REPEATED_SLASH_REGEX.replace_all(path, "/");
    let safe = UNSAFE_CHARS_REGEX.replace_all(&collapsed, "_");

    let mut endpoint = safe.trim_end_matches('/').to_string();
    if !endpoint.starts_with('/') {
        endpoint.insert(0, '/');
    }
    if endpoint.len() > MAX_ENDPOINT_LEN {
        // 前缀 + 完整路径的摘要：长度有界，不同路径不会合并到同一个计数器
        let digest = hex::encode(Sha256::digest(endpoint.as_bytes()));
        endpoint.truncate(MAX_ENDPOINT_LEN - DIGEST_LEN - 1);
        endpoint.push('~');
        endpoint.push_str(&digest[..DIGEST_LEN]);
    }
    endpoint
}
