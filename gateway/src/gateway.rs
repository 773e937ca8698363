//! 网关服务
//!
//! 显式构造、显式关闭。同一进程内的多个实例互不共享隐藏状态，
//! 唯一共享的是注入的计数存储

use std::sync::Arc;
use std::time::Duration;

use tollgate_config::{FailurePolicy, Settings};
use tollgate_errors::AppResult;
use tollgate_ports::{Clock, FixedWindow, SystemClock, WindowKey, WindowStore};
use tollgate_telemetry::HealthStatus;
use tracing::{error, warn};

use crate::metrics::record_decision;
use crate::rate_limit::{
    ClientIdentity, Decision, DegradedAdmission, DenyReason, IdentityResolver, RateLimiter,
    TierTable, decide,
};
use crate::security::SecurityPolicy;
use crate::shutdown::ShutdownController;

/// 构造网关所需的全部依赖
pub struct GatewayOptions {
    pub store: Arc<dyn WindowStore>,
    pub clock: Arc<dyn Clock>,
    pub resolver: IdentityResolver,
    pub tiers: TierTable,
    pub security: SecurityPolicy,
    pub failure_policy: FailurePolicy,
    pub store_timeout: Duration,
    pub shutdown: ShutdownController,
}

impl GatewayOptions {
    /// 从已校验的配置构建，存储由调用方提供
    pub fn from_settings(settings: &Settings, store: Arc<dyn WindowStore>) -> AppResult<Self> {
        Ok(Self {
            store,
            clock: Arc::new(SystemClock),
            resolver: IdentityResolver::from_config(&settings.rate_limit)?,
            tiers: TierTable::from_config(&settings.rate_limit)?,
            security: SecurityPolicy::from_config(&settings.security)?,
            failure_policy: settings.rate_limit.failure_policy,
            store_timeout: Duration::from_millis(settings.store.timeout_ms),
            shutdown: ShutdownController::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownController) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// 网关服务
pub struct Gateway {
    resolver: IdentityResolver,
    tiers: TierTable,
    security: SecurityPolicy,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    failure_policy: FailurePolicy,
    shutdown: ShutdownController,
}

impl Gateway {
    pub fn init(options: GatewayOptions) -> Arc<Self> {
        Arc::new(Self {
            resolver: options.resolver,
            tiers: options.tiers,
            security: options.security,
            limiter: RateLimiter::new(options.store, options.store_timeout),
            clock: options.clock,
            failure_policy: options.failure_policy,
            shutdown: options.shutdown,
        })
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn security(&self) -> &SecurityPolicy {
        &self.security
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// 通知后台任务退出
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// 配额检查
    ///
    /// 等级解析 → 原子计数 → 判定；存储故障按失败策略转换为降级或拒绝
    pub async fn check_quota(&self, identity: &ClientIdentity, endpoint: &str) -> Decision {
        let tier = self.tiers.resolve(identity, endpoint).clone();
        let now = self.clock.now();
        let key = WindowKey::new(identity.key.clone(), endpoint, tier.name.clone());

        let decision = match self.limiter.increment(&key, &tier, now).await {
            Ok(count) => {
                let rate = decide(&count, &tier, now);
                if rate.allowed {
                    Decision::Admitted(rate)
                } else {
                    Decision::Denied(DenyReason::QuotaExceeded(rate))
                }
            }
            Err(e) => {
                let reason = e.to_string();
                match self.failure_policy {
                    FailurePolicy::Open => {
                        warn!(
                            degraded = true,
                            client = %identity.key,
                            endpoint,
                            tier = %tier.name,
                            error = %reason,
                            "Window store unavailable, admitting without quota enforcement"
                        );
                        Decision::Degraded(DegradedAdmission {
                            reset_at: FixedWindow::containing(now, tier.window_secs).end,
                            tier,
                            reason,
                        })
                    }
                    FailurePolicy::Closed => {
                        error!(
                            client = %identity.key,
                            endpoint,
                            tier = %tier.name,
                            error = %reason,
                            "Window store unavailable, rejecting request"
                        );
                        Decision::Denied(DenyReason::StoreUnavailable { tier, reason })
                    }
                }
            }
        };

        record_decision(decision.outcome(), decision.tier_name());
        decision
    }

    /// 就绪检查：计数存储可达
    pub async fn readiness(&self) -> HealthStatus {
        let mut status = HealthStatus::new();
        let backend = self.limiter.store().backend();
        match self.limiter.ping().await {
            Ok(()) => status.add_check("window_store", true, Some(backend.to_string())),
            Err(e) => {
                warn!(backend, error = %e, "Window store readiness check failed");
                status.add_check("window_store", false, Some(format!("{} unreachable", backend)));
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{InMemoryWindowStore, IdentitySource};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use mockall::mock;
    use tollgate_errors::AppError;
    use tollgate_ports::{ManualClock, WindowCount};

    mock! {
        Store {}

        #[async_trait]
        impl WindowStore for Store {
            async fn increment_and_check(
                &self,
                key: &WindowKey,
                limit: u64,
                window_secs: u64,
                now: DateTime<Utc>,
            ) -> AppResult<WindowCount>;
            async fn ping(&self) -> AppResult<()>;
            fn backend(&self) -> &'static str;
        }
    }

    fn failing_store() -> MockStore {
        let mut store = MockStore::new();
        store
            .expect_increment_and_check()
            .returning(|_, _, _, _| Err(AppError::store_unavailable("connection refused")));
        store
            .expect_ping()
            .returning(|| Err(AppError::store_unavailable("connection refused")));
        store.expect_backend().return_const("mock");
        store
    }

    fn settings(policy: FailurePolicy) -> Settings {
        let mut settings = Settings::default();
        settings.rate_limit.failure_policy = policy;
        settings.rate_limit.tiers[0].limit = 2;
        settings
    }

    fn gateway(store: Arc<dyn WindowStore>, policy: FailurePolicy) -> Arc<Gateway> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_secs(1_700_000_045));
        Gateway::init(
            GatewayOptions::from_settings(&settings(policy), store)
                .unwrap()
                .with_clock(clock),
        )
    }

    fn anonymous() -> ClientIdentity {
        ClientIdentity {
            key: "ip:203.0.113.9".to_string(),
            tier: None,
            source: IdentitySource::Peer,
        }
    }

    #[tokio::test]
    async fn test_admit_then_deny() {
        let gateway = gateway(Arc::new(InMemoryWindowStore::new()), FailurePolicy::Open);

        let first = gateway.check_quota(&anonymous(), "/api/tools/x").await;
        let Decision::Admitted(rate) = first else {
            panic!("expected admission, got {:?}", first);
        };
        assert_eq!(rate.remaining, 1);
        assert_eq!(rate.retry_after_secs, 55);

        gateway.check_quota(&anonymous(), "/api/tools/x").await;
        let third = gateway.check_quota(&anonymous(), "/api/tools/x").await;
        assert_eq!(third.outcome(), "rate_limited");
    }

    #[tokio::test]
    async fn test_fail_open_degrades() {
        let gateway = gateway(Arc::new(failing_store()), FailurePolicy::Open);
        let decision = gateway.check_quota(&anonymous(), "/api/tools/x").await;

        let Decision::Degraded(admission) = decision else {
            panic!("expected degraded admission, got {:?}", decision);
        };
        assert_eq!(admission.tier.name, "anonymous");
        assert_eq!(admission.reset_at.timestamp(), 1_700_000_100);
    }

    #[tokio::test]
    async fn test_fail_closed_denies() {
        let gateway = gateway(Arc::new(failing_store()), FailurePolicy::Closed);
        let decision = gateway.check_quota(&anonymous(), "/api/tools/x").await;
        assert_eq!(decision.outcome(), "store_unavailable");
        assert!(!decision.is_admitted());
    }

    #[tokio::test]
    async fn test_readiness_reflects_store() {
        let healthy = gateway(Arc::new(InMemoryWindowStore::new()), FailurePolicy::Open);
        assert!(healthy.readiness().await.healthy);

        let unhealthy = gateway(Arc::new(failing_store()), FailurePolicy::Open);
        let status = unhealthy.readiness().await;
        assert!(!status.healthy);
        assert_eq!(status.checks[0].message.as_deref(), Some("mock unreachable"));
    }

    #[tokio::test]
    async fn test_instances_do_not_share_hidden_state() {
        let a = gateway(Arc::new(InMemoryWindowStore::new()), FailurePolicy::Open);
        let b = gateway(Arc::new(InMemoryWindowStore::new()), FailurePolicy::Open);

        a.check_quota(&anonymous(), "/api/tools/x").await;
        a.check_quota(&anonymous(), "/api/tools/x").await;
        assert_eq!(a.check_quota(&anonymous(), "/api/tools/x").await.outcome(), "rate_limited");
        assert_eq!(b.check_quota(&anonymous(), "/api/tools/x").await.outcome(), "admitted");
    }

    #[tokio::test]
    async fn test_shutdown_signals_controller() {
        let gateway = gateway(Arc::new(InMemoryWindowStore::new()), FailurePolicy::Open);
        assert!(!gateway.shutdown_controller().is_shutdown());
        gateway.shutdown();
        assert!(gateway.shutdown_controller().is_shutdown());
    }
}
