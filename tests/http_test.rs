// SPDX-License-Identifier: PMPL-1.0-or-later
//! HTTP-level tests: identity derivation from the connection and headers

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use graphql_rate_limit::{
    build_schema,
    config::Config,
    handlers::{router, AppState},
    RateLimiter,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    let config = Config::default();
    let schema = build_schema(&config, Arc::new(RateLimiter::new())).unwrap();
    router(Arc::new(AppState { schema, config }))
}

fn app_for_peer(peer: [u8; 4]) -> Router {
    app().layer(MockConnectInfo(SocketAddr::from((peer, 40000))))
}

async fn post_query(app: &Router, query: &str, credential: Option<&str>) -> Value {
    let mut request = Request::post("/graphql").header("content-type", "application/json");
    if let Some(credential) = credential {
        request = request.header("authorization", credential);
    }
    let body = serde_json::json!({ "query": query }).to_string();

    let response = app
        .clone()
        .oneshot(request.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_same_connection_is_limited_as_field_error() {
    let app = app_for_peer([198, 51, 100, 1]);

    let first = post_query(&app, "{ quote }", None).await;
    assert!(first.get("errors").is_none());
    assert!(first["data"]["quote"].is_string());

    let second = post_query(&app, "{ quote }", None).await;
    assert_eq!(
        second["errors"][0]["message"],
        "Too many requests, please try again in 15 seconds."
    );
    assert_eq!(second["errors"][0]["extensions"]["code"], "RATE_LIMITED");
    assert!(second["data"]["quote"].is_null());
}

#[tokio::test]
async fn test_credentials_separate_callers_on_one_address() {
    let app = app_for_peer([198, 51, 100, 2]);

    let a = post_query(&app, "{ quote }", Some("Bearer a")).await;
    let b = post_query(&app, "{ quote }", Some("Bearer b")).await;
    assert!(a.get("errors").is_none());
    assert!(b.get("errors").is_none());

    let a_again = post_query(&app, "{ quote }", Some("Bearer a")).await;
    assert!(a_again.get("errors").is_some());
}

#[tokio::test]
async fn test_missing_connect_info_falls_back_to_empty_address() {
    let app = app();

    let first = post_query(&app, "{ quote }", None).await;
    assert!(first.get("errors").is_none());
    assert!(first["data"]["quote"].is_string());

    let second = post_query(&app, "{ quote }", None).await;
    assert_eq!(second["errors"][0]["extensions"]["code"], "RATE_LIMITED");

    let other = post_query(&app, "{ quote }", Some("Bearer other")).await;
    assert!(other.get("errors").is_none());
}

#[tokio::test]
async fn test_health() {
    let app = app_for_peer([127, 0, 0, 1]);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "graphql-rate-limit");
}
