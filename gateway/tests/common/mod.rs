//! 集成测试公共工具

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Router, middleware};
use secrecy::Secret;
use tollgate_config::{ApiKeySettings, FailurePolicy, Settings, TierSettings};
use tollgate_gateway::{Gateway, GatewayOptions, gateway_middleware};
use tollgate_ports::{Clock, ManualClock, WindowStore};
use tower::ServiceExt;

pub const ALLOWED_ORIGIN: &str = "https://careers.example.com";
pub const PARTNER_KEY: &str = "pk_live_partner_7f3a";
pub const ENDPOINT: &str = "/api/tools/cover-letter";
/// 对齐到分钟后的第 5 秒
pub const START_SECS: i64 = 1_700_000_045;

pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.security.allowed_origins = vec![ALLOWED_ORIGIN.to_string()];
    settings.security.max_body_bytes = 1024;
    settings.rate_limit.tiers = vec![
        TierSettings {
            name: "anonymous".to_string(),
            limit: 4,
            window_secs: 60,
        },
        TierSettings {
            name: "partner".to_string(),
            limit: 8,
            window_secs: 60,
        },
    ];
    settings.rate_limit.api_keys = vec![ApiKeySettings {
        key: Secret::new(PARTNER_KEY.to_string()),
        tier: "partner".to_string(),
    }];
    settings
}

pub fn settings_with_policy(policy: FailurePolicy) -> Settings {
    let mut settings = settings();
    settings.rate_limit.failure_policy = policy;
    settings
}

/// 挂载了网关中间件的测试应用
pub struct TestApp {
    pub router: Router,
    pub gateway: Arc<Gateway>,
    pub clock: Arc<ManualClock>,
    /// 下游处理器被调用的次数
    pub hits: Arc<AtomicUsize>,
}

impl TestApp {
    pub fn new(store: Arc<dyn WindowStore>, settings: &Settings) -> Self {
        Self::with_clock(store, settings, Arc::new(ManualClock::at_secs(START_SECS)))
    }

    pub fn with_clock(store: Arc<dyn WindowStore>, settings: &Settings, clock: Arc<ManualClock>) -> Self {
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let gateway = Gateway::init(
            GatewayOptions::from_settings(settings, store)
                .expect("valid test settings")
                .with_clock(dyn_clock),
        );

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handler = post(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/json")],
                    r#"{"result":"ok"}"#,
                )
                    .into_response()
            }
        });
        let router = Router::new()
            .route("/api/tools/{tool}", handler.clone())
            .route("/api/tools/{tool}/", handler)
            .layer(middleware::from_fn_with_state(
                Arc::clone(&gateway),
                gateway_middleware,
            ));

        Self {
            router,
            gateway,
            clock,
            hits,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// 构造工具请求
pub struct ToolRequest {
    peer: SocketAddr,
    origin: Option<String>,
    api_key: Option<String>,
    endpoint: String,
    body: String,
}

impl ToolRequest {
    pub fn from_ip(ip: &str) -> Self {
        Self {
            peer: format!("{}:50000", ip).parse().unwrap(),
            origin: Some(ALLOWED_ORIGIN.to_string()),
            api_key: None,
            endpoint: ENDPOINT.to_string(),
            body: r#"{"jobTitle":"Engineer"}"#.to_string(),
        }
    }

    pub fn origin(mut self, origin: Option<&str>) -> Self {
        self.origin = origin.map(String::from);
        self
    }

    pub fn api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(self.endpoint)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(origin) = self.origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        if let Some(key) = self.api_key {
            builder = builder.header("x-api-key", key);
        }
        let mut request = builder.body(Body::from(self.body)).unwrap();
        request.extensions_mut().insert(ConnectInfo(self.peer));
        request
    }
}

pub fn header_str<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

pub fn remaining(response: &Response<Body>) -> u64 {
    header_str(response, "x-ratelimit-remaining")
        .expect("remaining header")
        .parse()
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
