//! 从配置装配运行时依赖

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use tokio::task::JoinHandle;
use tollgate_adapter_redis::{RedisWindowStore, RetryPolicy, create_connection_manager};
use tollgate_config::{StoreBackend, StoreConfig};
use tollgate_errors::{AppError, AppResult};
use tollgate_ports::{Clock, WindowStore};
use tracing::{info, warn};

use crate::rate_limit::{InMemoryWindowStore, spawn_sweeper};
use crate::shutdown::ShutdownController;

/// 构建好的计数存储及其后台任务
pub struct StoreHandle {
    pub store: Arc<dyn WindowStore>,
    /// 内存后端的清理任务
    pub sweeper: Option<JoinHandle<()>>,
}

impl StoreHandle {
    /// 等待后台任务退出
    ///
    /// 任务 panic 或被取消时记录告警，返回是否正常退出
    pub async fn join_sweeper(self) -> bool {
        let Some(sweeper) = self.sweeper else {
            return true;
        };
        match sweeper.await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Window store sweeper terminated abnormally");
                false
            }
        }
    }
}

/// 按配置构建计数存储
///
/// Redis 启动时连接失败直接返回错误，不以降级模式启动
pub async fn build_store(
    config: &StoreConfig,
    clock: Arc<dyn Clock>,
    shutdown: &ShutdownController,
) -> AppResult<StoreHandle> {
    match config.backend {
        StoreBackend::Memory => {
            let store = Arc::new(InMemoryWindowStore::new());
            let sweeper = spawn_sweeper(
                Arc::clone(&store),
                clock,
                Duration::from_secs(config.sweep_interval_secs.max(1)),
                shutdown.clone(),
            );
            info!(
                sweep_interval_secs = config.sweep_interval_secs,
                "Using in-memory window store (single instance only)"
            );
            Ok(StoreHandle {
                store,
                sweeper: Some(sweeper),
            })
        }
        StoreBackend::Redis => {
            let url = config
                .url
                .as_ref()
                .ok_or_else(|| AppError::config("store.url is required for the redis backend"))?;
            let conn = create_connection_manager(url.expose_secret()).await?;
            let retry = RetryPolicy::new(
                config.retry_attempts,
                Duration::from_millis(config.retry_delay_ms),
                Duration::from_millis(config.timeout_ms),
            );
            let store = RedisWindowStore::new(conn)
                .with_key_prefix(config.key_prefix.clone())
                .with_retry(retry);
            info!(key_prefix = %config.key_prefix, "Using Redis window store");
            Ok(StoreHandle {
                store: Arc::new(store),
                sweeper: None,
            })
        }
    }
}
