//! End-to-end tests of the middleware stack through the router.

use axum::body::{Body, Bytes};
use futures_util::stream;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

use edge_guard::cache::ResilientCache;
use edge_guard::config::{RateLimitRule, RouteRateLimit};
use edge_guard::http::build_router;
use edge_guard::Services;

mod common;
use common::{json_body, request_from, services, test_config, ADMIN_KEY};

async fn guarded(
    dir: &tempfile::TempDir,
    tweak: impl FnOnce(&mut edge_guard::GuardConfig),
) -> (Services, Router) {
    let mut config = test_config(dir);
    tweak(&mut config);
    let services = services(config, Arc::new(ResilientCache::degraded())).await;
    let router = build_router(&services);
    (services, router)
}

fn get(path: &str) -> axum::http::request::Builder {
    Request::builder().method(Method::GET).uri(path)
}

async fn csrf_token(app: &Router, peer: &str) -> String {
    let issued = app
        .clone()
        .oneshot(request_from(peer, get("/api/csrf-token"), Body::empty()))
        .await
        .unwrap();
    json_body(issued).await["data"]["csrf_token"]
        .as_str()
        .unwrap()
        .to_string()
}

fn post(path: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
}

#[tokio::test]
async fn test_health_reports_degraded_cache() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, app) = guarded(&dir, |_| {}).await;

    let response = app
        .oneshot(request_from("10.1.0.1", get("/health"), Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(json_body(response).await, json!({"status": "ok", "cache": "degraded"}));
}

#[tokio::test]
async fn test_rate_limit_headers_then_429() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, app) = guarded(&dir, |c| {
        c.rate_limit.default = RateLimitRule {
            requests: 3,
            window_seconds: 60,
            block_duration_seconds: 120,
        };
    })
    .await;

    for expected_remaining in ["2", "1", "0"] {
        let response = app
            .clone()
            .oneshot(request_from("10.1.0.2", get("/health"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(response.headers()["x-ratelimit-remaining"], expected_remaining);
    }

    let response = app
        .clone()
        .oneshot(request_from("10.1.0.2", get("/health"), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "120");
    let body = json_body(response).await;
    assert_eq!(body["code"], 429);

    // Another client is unaffected.
    let response = app
        .oneshot(request_from("10.1.0.3", get("/health"), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_route_specific_limit() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, app) = guarded(&dir, |c| {
        c.rate_limit.routes.push(RouteRateLimit {
            path_prefix: "/api/csrf-token".into(),
            rule: RateLimitRule {
                requests: 1,
                window_seconds: 60,
                block_duration_seconds: 30,
            },
        });
    })
    .await;

    let first = app
        .clone()
        .oneshot(request_from("10.1.0.4", get("/api/csrf-token"), Body::empty()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(request_from("10.1.0.4", get("/api/csrf-token"), Body::empty()))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_access_lists() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, app) = guarded(&dir, |c| {
        c.rate_limit.default.requests = 1;
        c.rate_limit.whitelist = vec!["10.2.0.1".into()];
        c.rate_limit.blacklist = vec!["10.2.0.66".into()];
    })
    .await;

    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(request_from("10.2.0.1", get("/health"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }

    let response = app
        .oneshot(request_from("10.2.0.66", get("/health"), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_csrf_protects_mutating_requests() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, app) = guarded(&dir, |_| {}).await;

    let response = app
        .clone()
        .oneshot(request_from("10.3.0.1", post("/api/echo"), Body::from(r#"{"a":1}"#)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["message"], "CSRF token missing");

    let response = app
        .clone()
        .oneshot(request_from(
            "10.3.0.1",
            post("/api/echo").header("x-csrf-token", "forged"),
            Body::from(r#"{"a":1}"#),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let issued = app
        .clone()
        .oneshot(request_from("10.3.0.1", get("/api/csrf-token"), Body::empty()))
        .await
        .unwrap();
    let issued = json_body(issued).await;
    assert_eq!(issued["code"], 200);
    assert_eq!(issued["data"]["expires_in"], 3600);
    let token = issued["data"]["csrf_token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request_from(
            "10.3.0.1",
            post("/api/echo").header("x-csrf-token", &token),
            Body::from(r#"{"a":1}"#),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"], json!({"a": 1}));

    // Query parameter transport works too, and the token is reusable.
    let response = app
        .oneshot(request_from(
            "10.3.0.1",
            post(&format!("/api/echo?csrf_token={token}")),
            Body::from(r#"{"b":2}"#),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bearer_session_survives_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let (services, app) = guarded(&dir, |_| {}).await;

    let response = app
        .clone()
        .oneshot(request_from("10.4.0.1", get("/api/session"), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["code"], 401);

    let token = services.verifier.issue("alice").unwrap();
    let authed = |t: &str| get("/api/session").header(header::AUTHORIZATION, format!("Bearer {t}"));

    let response = app
        .clone()
        .oneshot(request_from("10.4.0.1", authed(&token), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["subject"], "alice");

    services.rotator.rotate(true, false).unwrap();

    let response = app
        .oneshot(request_from("10.4.0.1", authed(&token), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_requires_key() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, app) = guarded(&dir, |_| {}).await;

    let response = app
        .clone()
        .oneshot(request_from("10.5.0.1", get("/admin/status"), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(request_from(
            "10.5.0.1",
            get("/admin/status").header(header::AUTHORIZATION, format!("Bearer {ADMIN_KEY}")),
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["cache"], "degraded");
    assert_eq!(body["data"]["secrets"]["using_default_secret"], false);
    assert!(!body.to_string().contains("current_secret"));
}

#[tokio::test]
async fn test_admin_unblock_and_rotate() {
    let dir = tempfile::tempdir().unwrap();
    let (services, app) = guarded(&dir, |c| {
        c.rate_limit.default.requests = 1;
        c.rate_limit.whitelist = vec!["10.6.0.1".into()];
    })
    .await;
    let admin = |builder: axum::http::request::Builder| {
        builder.header(header::AUTHORIZATION, format!("Bearer {ADMIN_KEY}"))
    };

    for _ in 0..2 {
        let _ = app
            .clone()
            .oneshot(request_from("10.6.0.9", get("/health"), Body::empty()))
            .await
            .unwrap();
    }
    assert!(services.limiter.client_state("10.6.0.9").unwrap().blocked_until.is_some());

    let response = app
        .clone()
        .oneshot(request_from(
            "10.6.0.1",
            admin(post("/admin/clients/10.6.0.9/unblock")),
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(services.limiter.client_state("10.6.0.9").unwrap().blocked_until.is_none());

    let rotate = |force: bool| {
        request_from(
            "10.6.0.1",
            admin(post(&format!("/admin/secrets/rotate?force={force}"))),
            Body::empty(),
        )
    };

    let response = app.clone().oneshot(rotate(true)).await.unwrap();
    assert_eq!(json_body(response).await["data"]["status"], "rotated");

    let response = app.clone().oneshot(rotate(false)).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "skipped");

    let response = app
        .oneshot(request_from("10.6.0.1", admin(get("/admin/secrets")), Body::empty()))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["data"]["transition_active"], true);
}

#[tokio::test]
async fn test_admin_disabled_is_not_routed() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, app) = guarded(&dir, |c| c.admin.enabled = false).await;

    let response = app
        .oneshot(request_from(
            "10.7.0.1",
            get("/admin/status").header(header::AUTHORIZATION, format!("Bearer {ADMIN_KEY}")),
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_client_disconnect_maps_to_499() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, app) = guarded(&dir, |_| {}).await;
    let token = csrf_token(&app, "10.8.0.1").await;

    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from_static(b"{\"a\":")),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset")),
    ];
    let response = app
        .oneshot(request_from(
            "10.8.0.1",
            post("/api/echo").header("x-csrf-token", &token),
            Body::from_stream(stream::iter(chunks)),
        ))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 499);
}

#[tokio::test]
async fn test_oversized_chunked_body_is_413() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, app) = guarded(&dir, |_| {}).await;
    let token = csrf_token(&app, "10.8.0.2").await;

    // 17 × 64 KiB, no Content-Length.
    let chunks: Vec<Result<Bytes, std::io::Error>> =
        (0..17).map(|_| Ok(Bytes::from(vec![b' '; 64 * 1024]))).collect();
    let request = request_from(
        "10.8.0.2",
        post("/api/echo").header("x-csrf-token", &token),
        Body::from_stream(stream::iter(chunks)),
    );
    assert!(!request.headers().contains_key(header::CONTENT_LENGTH));

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(response).await["code"], 413);
}
