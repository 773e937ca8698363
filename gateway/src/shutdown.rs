//! Graceful Shutdown

use tokio::sync::watch;
use tracing::info;

/// Shutdown 控制器
///
/// 基于 watch 通道：触发后再订阅的等待者也能立即返回
#[derive(Clone)]
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        info!("Triggering shutdown");
        self.sender.send_replace(true);
    }

    /// 是否已触发关闭
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// 等待关闭信号
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // 发送端与 self 同生命周期，wait_for 不会因通道关闭而失败
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// 等待 Ctrl-C 或 SIGTERM
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
