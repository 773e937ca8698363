//! 配额行为测试
//!
//! 覆盖：
//! - 并发下恰好放行 L 个请求
//! - 窗口重置
//! - 剩余配额单调不增
//! - Retry-After 正确性
//! - 等级互相独立
//! - 多个网关实例共享同一存储

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, TimeZone, Utc};
use common::*;
use tollgate_errors::AppResult;
use tollgate_gateway::rate_limit::InMemoryWindowStore;
use tollgate_ports::{WindowCount, WindowKey, WindowStore};

/// 在真正的原子操作之前注入不同的延迟
struct JitterStore {
    inner: InMemoryWindowStore,
    calls: AtomicU64,
}

impl JitterStore {
    fn new() -> Self {
        Self {
            inner: InMemoryWindowStore::new(),
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl WindowStore for JitterStore {
    async fn increment_and_check(
        &self,
        key: &WindowKey,
        limit: u64,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> AppResult<WindowCount> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis((n * 7) % 13)).await;
        self.inner
            .increment_and_check(key, limit, window_secs, now)
            .await
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "jitter"
    }
}

async fn fire_concurrently(app: &TestApp, n: usize) -> (usize, usize) {
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let router = app.router.clone();
            tokio::spawn(async move {
                use tower::ServiceExt;
                router
                    .oneshot(ToolRequest::from_ip("203.0.113.9").build())
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();

    let mut ok = 0;
    let mut limited = 0;
    for status in futures::future::join_all(handles).await {
        match status.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {}", other),
        }
    }
    (ok, limited)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_admit_exactly_limit() {
    let app = TestApp::new(Arc::new(InMemoryWindowStore::new()), &settings());

    let (ok, limited) = fire_concurrently(&app, 10).await;

    assert_eq!(ok, 4);
    assert_eq!(limited, 6);
    assert_eq!(app.hits(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_with_store_jitter() {
    let app = TestApp::new(Arc::new(JitterStore::new()), &settings());

    let (ok, limited) = fire_concurrently(&app, 50).await;

    assert_eq!(ok, 4);
    assert_eq!(limited, 46);
}

#[tokio::test]
async fn test_window_reset() {
    let app = TestApp::new(Arc::new(InMemoryWindowStore::new()), &settings());

    for _ in 0..4 {
        let response = app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // 窗口 [..040, ..100)，推进到下一个窗口
    app.clock.advance_secs(60);
    let response = app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(remaining(&response), 3);
    assert_eq!(
        header_str(&response, "x-ratelimit-reset"),
        Some("2023-11-14T22:16:00Z")
    );
}

#[tokio::test]
async fn test_window_boundary_is_exclusive() {
    let app = TestApp::new(Arc::new(InMemoryWindowStore::new()), &settings());

    for _ in 0..4 {
        app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
    }

    // 窗口结束前 1ms 仍属于旧窗口
    app.clock.advance_millis(54_999);
    let response = app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&response, "retry-after"), Some("1"));

    app.clock.advance_millis(1);
    let response = app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_remaining_is_monotonic_within_window() {
    let app = TestApp::new(Arc::new(InMemoryWindowStore::new()), &settings());

    let mut seen = Vec::new();
    for _ in 0..6 {
        let response = app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
        seen.push(remaining(&response));
        app.clock.advance_secs(5);
    }

    assert_eq!(seen, vec![3, 2, 1, 0, 0, 0]);
    assert!(seen.windows(2).all(|pair| pair[1] <= pair[0]));
}

#[tokio::test]
async fn test_retry_after_matches_reset() {
    let app = TestApp::new(Arc::new(InMemoryWindowStore::new()), &settings());
    app.clock.advance_millis(250);

    for _ in 0..4 {
        app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
    }
    let response = app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // now = ..045.250，reset = ..100.000 → 54.75s 向上取整
    assert_eq!(header_str(&response, "retry-after"), Some("55"));
    let reset_header = header_str(&response, "x-ratelimit-reset").unwrap().to_string();

    let body = json_body(response).await;
    assert_eq!(body["error"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(body["tier"], "anonymous");
    assert_eq!(body["retryAfter"], 55);
    assert_eq!(body["resetTime"], reset_header.as_str());

    let reset: DateTime<Utc> = reset_header.parse().unwrap();
    let now = Utc.timestamp_millis_opt(START_SECS * 1000 + 250).unwrap();
    let exact = (reset - now).num_milliseconds();
    assert!(exact >= 0);
    assert!(55 * 1000 - exact < 1000);
}

#[tokio::test]
async fn test_tiers_are_limited_independently() {
    let app = TestApp::new(Arc::new(InMemoryWindowStore::new()), &settings());

    for _ in 0..4 {
        app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
    }
    let anonymous = app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
    assert_eq!(anonymous.status(), StatusCode::TOO_MANY_REQUESTS);

    // 同一网络地址但携带合作方 key：独立计数，按合作方等级限额
    let partner = app
        .send(ToolRequest::from_ip("203.0.113.9").api_key(PARTNER_KEY).build())
        .await;
    assert_eq!(partner.status(), StatusCode::OK);
    assert_eq!(header_str(&partner, "x-ratelimit-limit"), Some("8"));
    assert_eq!(remaining(&partner), 7);

    for _ in 0..7 {
        let response = app
            .send(ToolRequest::from_ip("198.51.100.7").api_key(PARTNER_KEY).build())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let partner = app
        .send(ToolRequest::from_ip("198.51.100.7").api_key(PARTNER_KEY).build())
        .await;
    assert_eq!(partner.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(partner).await["tier"], "partner");
}

#[tokio::test]
async fn test_clients_and_endpoints_are_independent() {
    let app = TestApp::new(Arc::new(InMemoryWindowStore::new()), &settings());

    for _ in 0..4 {
        app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
    }

    let other_client = app.send(ToolRequest::from_ip("203.0.113.10").build()).await;
    assert_eq!(other_client.status(), StatusCode::OK);
    assert_eq!(remaining(&other_client), 3);

    let other_endpoint = app
        .send(
            ToolRequest::from_ip("203.0.113.9")
                .endpoint("/api/tools/salary-estimate")
                .build(),
        )
        .await;
    assert_eq!(other_endpoint.status(), StatusCode::OK);
    assert_eq!(remaining(&other_endpoint), 3);
}

#[tokio::test]
async fn test_trailing_slash_shares_counter() {
    let app = TestApp::new(Arc::new(InMemoryWindowStore::new()), &settings());

    let response = app.send(ToolRequest::from_ip("203.0.113.9").build()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .send(
            ToolRequest::from_ip("203.0.113.9")
                .endpoint("/api/tools/cover-letter/")
                .build(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(remaining(&response), 2);
    assert_eq!(app.hits(), 2);
}

#[tokio::test]
async fn test_long_endpoints_with_shared_prefix_are_counted_separately() {
    let app = TestApp::new(Arc::new(InMemoryWindowStore::new()), &settings());
    let prefix = format!("/api/tools/{}", "a".repeat(130));
    let first = format!("{}-one", prefix);
    let second = format!("{}-two", prefix);

    for _ in 0..4 {
        let response = app
            .send(ToolRequest::from_ip("203.0.113.9").endpoint(&first).build())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let exhausted = app
        .send(ToolRequest::from_ip("203.0.113.9").endpoint(&first).build())
        .await;
    assert_eq!(exhausted.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = app
        .send(ToolRequest::from_ip("203.0.113.9").endpoint(&second).build())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(remaining(&response), 3);
}

#[tokio::test]
async fn test_oversized_window_does_not_panic() {
    let mut settings = settings();
    settings.rate_limit.tiers[0].window_secs = 1 << 60;
    assert!(settings.validate().is_err());

    // 即使绕过配置校验，计数与判定也不会溢出
    let store = Arc::new(InMemoryWindowStore::new());
    let now = Utc.timestamp_opt(START_SECS, 0).unwrap();
    let key = WindowKey::new("ip:203.0.113.9", ENDPOINT, "anonymous");
    let count = store
        .increment_and_check(&key, 4, 1 << 60, now)
        .await
        .unwrap();
    assert!(count.admitted);
    assert!(count.window_start <= now);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_instances_sharing_a_store_enforce_one_limit() {
    let store: Arc<InMemoryWindowStore> = Arc::new(InMemoryWindowStore::new());
    let a = TestApp::new(store.clone(), &settings());
    let b = TestApp::new(store, &settings());

    let mut handles = Vec::new();
    for i in 0..10 {
        let router = if i % 2 == 0 {
            a.router.clone()
        } else {
            b.router.clone()
        };
        handles.push(tokio::spawn(async move {
            use tower::ServiceExt;
            router
                .oneshot(ToolRequest::from_ip("203.0.113.9").build())
                .await
                .unwrap()
                .status()
        }));
    }

    let statuses: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let ok = statuses.iter().filter(|s| **s == StatusCode::OK).count();

    assert_eq!(ok, 4);
    assert_eq!(a.hits() + b.hits(), 4);
}
