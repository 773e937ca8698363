//! Tollgate API Gateway

use std::net::SocketAddr;
use std::sync::Arc;

use tollgate_config::Settings;
use tollgate_gateway::config::build_store;
use tollgate_gateway::routing;
use tollgate_gateway::shutdown::{ShutdownController, wait_for_signal};
use tollgate_gateway::upstream::UpstreamClient;
use tollgate_gateway::{Gateway, GatewayOptions};
use tollgate_ports::{Clock, SystemClock};
use tollgate_telemetry::{init_metrics, init_tracing, init_tracing_json};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // 加载配置
    let settings = Settings::load("config")?;

    // 初始化 tracing
    if settings.telemetry.json {
        init_tracing_json(&settings.telemetry.log_level)?;
    } else {
        init_tracing(&settings.telemetry.log_level)?;
    }

    let metrics = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
            None
        }
    };

    // 计数存储
    let shutdown = ShutdownController::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = build_store(&settings.store, Arc::clone(&clock), &shutdown).await?;

    let gateway = Gateway::init(
        GatewayOptions::from_settings(&settings, Arc::clone(&store.store))?
            .with_clock(clock)
            .with_shutdown(shutdown.clone()),
    );
    let upstream = Arc::new(UpstreamClient::from_config(&settings.upstream)?);

    let app = routing::app(Arc::clone(&gateway), upstream, metrics);

    // 启动服务器
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    info!(
        %addr,
        env = %settings.app_env,
        backend = store.store.backend(),
        failure_policy = ?settings.rate_limit.failure_policy,
        "Starting gateway"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        wait_for_signal().await;
        gateway.shutdown();
    })
    .await?;

    store.join_sweeper().await;
    info!("Gateway stopped");

    Ok(())
}
