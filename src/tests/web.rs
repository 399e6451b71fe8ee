use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::app::AppService;
use crate::config::Config;
use crate::web::router;

use super::support::{english_records, english_service, hindi_service, write_catalog};

fn app_with(services: Vec<crate::semantic::SearchService>) -> Router {
    router(Arc::new(AppService::with_services(Config::default(), services)))
}

fn test_router(dir: &std::path::Path) -> Router {
    let (english, _) = english_service(dir);
    app_with(vec![english, hindi_service(dir)])
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health() {
    let tmp = tempfile::tempdir().unwrap();
    let (status, body) = send(test_router(tmp.path()), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_json() {
    let tmp = tempfile::tempdir().unwrap();
    let (status, body) = send(
        test_router(tmp.path()),
        post_json(
            "/search",
            json!({"query": "software company", "show_metrics": true}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["id"], "software");
    assert_eq!(body["results"][0]["class"], "6201");
    assert_eq!(body["results"][0]["rank"], 1);
    assert_eq!(body["results"][0]["similarity_percent"], 100.0);
    assert_eq!(body["metrics"]["results_count"], 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_form() {
    let tmp = tempfile::tempdir().unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/search")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(
            "query=bread+rice&result_count=1&search_mode=relaxed&show_metrics=false",
        ))
        .unwrap();

    let (status, body) = send(test_router(tmp.path()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert!(body.get("metrics").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_validation_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_router(tmp.path());

    let cases = [
        json!({"query": "  "}),
        json!({"query": "bread", "result_count": 0}),
        json!({"query": "bread", "result_count": 500}),
        json!({"query": "bread", "search_mode": "fuzzy"}),
        json!({"query": "bread", "language": "french"}),
        json!({"result_count": 5}),
    ];

    for payload in cases {
        let (status, body) = send(app.clone(), post_json("/search", payload.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{payload}");
        assert!(body["error"].is_string(), "{payload}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unconfigured_language() {
    let tmp = tempfile::tempdir().unwrap();
    let (english, _) = english_service(tmp.path());
    let app = app_with(vec![english]);

    let (status, body) = send(
        app.clone(),
        post_json("/search", json!({"query": "धान", "language": "hindi"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("hindi"));

    let (status, _) = send(app, post_json("/hindi/search", json!({"query": "धान"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hindi_search() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_router(tmp.path());

    let (status, body) = send(
        app.clone(),
        post_json("/hindi/search", json!({"query": "बेकरी"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["id"], "h-bread");

    let (status, body) = send(
        app,
        post_json("/search", json!({"query": "चावल", "language": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["id"], "h-rice");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_index_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let (english, _) = english_service(tmp.path());
    write_catalog(&english.settings().catalog_path, &english_records(false));
    let app = app_with(vec![english]);

    let (status, body) = send(app.clone(), post_json("/search", json!({"query": "bread"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());

    let (status, _) = send(app, get("/get-index-stats")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_admin_endpoints() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_router(tmp.path());

    let (status, body) = send(app.clone(), post_empty("/rebuild-index?language=hindi")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body["time_taken"].is_number());

    let (status, body) = send(app.clone(), get("/get-index-stats?language=hindi")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vector_count"], 2);
    assert_eq!(body["language"], "hindi");
    assert_eq!(body["index_file_exists"], true);

    let (status, body) = send(app.clone(), post_empty("/clear-embedding-cache")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, _) = send(app, get("/get-index-stats?language=klingon")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ui_redirects_to_root() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_router(tmp.path());

    let response = app.clone().oneshot(get("/ui")).await.unwrap();
    assert!(response.status().is_redirection());
    assert_eq!(response.headers()[header::LOCATION], "/");

    let (status, body) = send(app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["languages"], json!(["english", "hindi"]));
}
