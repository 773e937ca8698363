//! Redis 固定窗口计数存储
//!
//! 使用 Lua 脚本在 Redis 端原子地完成“检查上限-自增-设置过期”，
//! 多个网关实例并发访问同一键时不会超发。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;
use redis::aio::ConnectionManager;
use tollgate_errors::{AppError, AppResult};
use tollgate_ports::{FixedWindow, WindowCount, WindowKey, WindowStore};
use tracing::debug;

use crate::connection::check_connection;
use crate::retry::{RetryPolicy, is_transient, with_retry};

/// Lua 脚本：带上限的固定窗口自增
///
/// # 参数
/// - KEYS[1]: 计数键（已包含窗口起点）
/// - ARGV[1]: 窗口内最大请求数
/// - ARGV[2]: 窗口结束时间（Unix 毫秒），用于 PEXPIREAT
///
/// # 返回值
/// - array[0]: 是否允许 (1/0)
/// - array[1]: 操作后的计数
static FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local expire_at_ms = tonumber(ARGV[2])

local current = tonumber(redis.call('GET', key) or '0')
if current >= limit then
    return {0, current}
end

current = redis.call('INCR', key)

-- 首次写入或过期时间丢失时设置
if redis.call('PTTL', key) < 0 then
    redis.call('PEXPIREAT', key, expire_at_ms)
end

return {1, current}
"#;

/// Redis 计数存储
#[derive(Clone)]
pub struct RedisWindowStore {
    conn: ConnectionManager,
    script: Arc<Script>,
    key_prefix: String,
    retry: RetryPolicy,
}

impl RedisWindowStore {
    /// 创建新的计数存储
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Arc::new(Script::new(FIXED_WINDOW_SCRIPT)),
            key_prefix: "rl".to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// 设置键前缀
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// 设置重试策略
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn increment_and_check(
        &self,
        key: &WindowKey,
        limit: u64,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> AppResult<WindowCount> {
        let window = FixedWindow::containing(now, window_secs);
        let storage_key = key.storage_key(&self.key_prefix, window.start);
        let expire_at_ms = window.end.timestamp_millis();

        let values: Vec<i64> = with_retry(&self.retry, "window_increment", is_transient, || {
            let mut conn = self.conn.clone();
            let script = Arc::clone(&self.script);
            let storage_key = storage_key.clone();
            async move {
                let result: redis::RedisResult<Vec<i64>> = script
                    .key(&storage_key)
                    .arg(limit)
                    .arg(expire_at_ms)
                    .invoke_async(&mut conn)
                    .await;
                result
            }
        })
        .await
        .map_err(|e| AppError::store_unavailable(format!("Window script failed: {}", e)))?;

        let [admitted, count] = values[..] else {
            return Err(AppError::store_unavailable(format!(
                "Unexpected window script result length: {}",
                values.len()
            )));
        };

        debug!(
            key = %storage_key,
            admitted,
            count,
            limit,
            "Fixed window increment"
        );

        Ok(WindowCount {
            admitted: admitted == 1,
            count: count.max(0) as u64,
            window_start: window.start,
        })
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        check_connection(&mut conn).await
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
