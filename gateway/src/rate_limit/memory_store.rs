//! 进程内计数存储
//!
//! 仅适用于单实例部署和测试：多个网关实例可以共享同一个
//! `Arc<InMemoryWindowStore>`，但不同进程之间不共享。
//! 每个键的更新在 DashMap 分片锁内完成，因此检查与自增是原子的。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tollgate_errors::AppResult;
use tollgate_ports::{Clock, FixedWindow, WindowCount, WindowKey, WindowStore};
use tracing::debug;

use crate::shutdown::ShutdownController;

/// 单条计数记录
#[derive(Debug, Clone, Copy)]
struct WindowRecord {
    window_start: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    count: u64,
}

impl WindowRecord {
    fn fresh(window: FixedWindow) -> Self {
        Self {
            window_start: window.start,
            expires_at: window.end,
            count: 0,
        }
    }
}

/// 进程内计数存储
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    records: DashMap<String, WindowRecord>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前保存的记录数
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 回收已过期的记录，返回回收数量
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        before.saturating_sub(self.records.len())
    }

    fn record_key(key: &WindowKey) -> String {
        format!("{}:{}:{}", key.tier, key.endpoint, key.client_key)
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn increment_and_check(
        &self,
        key: &WindowKey,
        limit: u64,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> AppResult<WindowCount> {
        let window = FixedWindow::containing(now, window_secs);

        // 分片写锁在 entry 存活期间一直持有
        let mut entry = self
            .records
            .entry(Self::record_key(key))
            .or_insert_with(|| WindowRecord::fresh(window));

        // 过期或属于其他窗口的记录直接被新窗口取代
        if now >= entry.expires_at || entry.window_start != window.start {
            *entry = WindowRecord::fresh(window);
        }

        if entry.count >= limit {
            return Ok(WindowCount {
                admitted: false,
                count: entry.count,
                window_start: entry.window_start,
            });
        }

        entry.count += 1;
        Ok(WindowCount {
            admitted: true,
            count: entry.count,
            window_start: entry.window_start,
        })
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// 启动后台清理任务，收到关闭信号后退出
pub fn spawn_sweeper(
    store: Arc<InMemoryWindowStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: ShutdownController,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = store.purge_expired(clock.now());
                    if purged > 0 {
                        debug!(purged, remaining = store.len(), "Purged expired rate limit windows");
                    }
                }
                _ = shutdown.wait() => {
                    debug!("Window sweeper stopped");
                    break;
                }
            }
        }
    })
}
