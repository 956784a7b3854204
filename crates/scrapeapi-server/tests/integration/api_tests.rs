use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use scrapeapi_core::job::GraphKind;
use scrapeapi_core::telemetry::Phase;
use scrapeapi_core::testutil::MockEngine;

use crate::integration::common::{
    get_json, post_json, send, setup_test_app, setup_test_app_with_cap, wait_for_terminal,
};

fn engine() -> MockEngine {
    MockEngine::new(json!({"title": "Example Domain"}))
}

#[tokio::test]
async fn health_returns_ok() {
    let app = setup_test_app(engine());

    let (status, body) = get_json(&app.router, "/v1/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn submit_returns_queued_snapshot_then_completes() {
    let app = setup_test_app(engine());

    let (status, job) = post_json(
        &app.router,
        "/v1/scrape",
        json!({
            "graph": "smart",
            "user_prompt": "Extract the page title",
            "website_url": "https://example.com"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "queued");
    assert_eq!(job["graph"], "smart");
    assert_eq!(job["user_prompt"], "Extract the page title");
    assert_eq!(job["website_url"], "https://example.com");
    assert!(job["result"].is_null());
    assert_eq!(job["error"], "");

    let request_id = job["request_id"].as_str().unwrap();
    let done = wait_for_terminal(&app.router, request_id).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["request_id"], request_id);
    assert_eq!(done["result"]["data"], json!({"title": "Example Domain"}));
    assert_eq!(done["result"]["schema_validation"]["ok"], true);
    assert_eq!(done["error"], "");

    let builds = app.engine.builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].sources, vec!["https://example.com".to_string()]);
}

#[tokio::test]
async fn inline_html_is_materialized_for_the_engine() {
    let app = setup_test_app(engine());
    let html = "<html><body><h1>Inline</h1></body></html>";

    let (status, job) = post_json(
        &app.router,
        "/v1/scrape",
        json!({"graph": "smart", "user_prompt": "heading", "website_html": html}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(job["website_url"].is_null());

    let done = wait_for_terminal(&app.router, job["request_id"].as_str().unwrap()).await;
    assert_eq!(done["status"], "completed");

    let build = &app.engine.builds()[0];
    assert_eq!(build.source_contents.as_deref(), Some(html));
    assert!(!std::path::Path::new(&build.sources[0]).exists());
}

#[tokio::test]
async fn multi_and_search_graphs_are_accepted() {
    let app = setup_test_app(engine());

    let (status, multi) = post_json(
        &app.router,
        "/v1/scrape",
        json!({
            "graph": "multi",
            "user_prompt": "Compare prices",
            "sources": ["https://a.example", "https://b.example"]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(multi["sources"], json!(["https://a.example", "https://b.example"]));

    let (status, search) = post_json(
        &app.router,
        "/v1/scrape",
        json!({"graph": "search", "user_prompt": "rust release", "search_query": "rust 1.90", "max_results": 2}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    wait_for_terminal(&app.router, multi["request_id"].as_str().unwrap()).await;
    wait_for_terminal(&app.router, search["request_id"].as_str().unwrap()).await;

    let builds = app.engine.builds();
    let search_build = builds.iter().find(|b| b.kind == GraphKind::Search).unwrap();
    assert_eq!(search_build.sources, vec!["rust 1.90".to_string()]);
    assert_eq!(search_build.config.max_results(), Some(2));
}

#[tokio::test]
async fn smart_without_source_is_rejected() {
    let app = setup_test_app(engine());

    let (status, body) = post_json(
        &app.router,
        "/v1/scrape",
        json!({"graph": "smart", "user_prompt": "anything"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
    assert!(!body["detail"].as_str().unwrap().is_empty());
    assert!(app.engine.builds().is_empty());
}

#[tokio::test]
async fn multi_with_empty_sources_is_rejected() {
    let app = setup_test_app(engine());

    let (status, body) = post_json(
        &app.router,
        "/v1/scrape",
        json!({"graph": "multi", "user_prompt": "anything", "sources": []}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn malformed_schema_is_rejected() {
    let app = setup_test_app(engine());

    let (status, body) = post_json(
        &app.router,
        "/v1/scrape",
        json!({
            "graph": "smart",
            "user_prompt": "anything",
            "website_url": "https://example.com",
            "output_schema": {"type": "nonsense", "properties": {}}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "schema_error");
    assert!(body["message"].as_str().unwrap().starts_with("Invalid JSON Schema"));

    let phases = app.telemetry.phases();
    assert_eq!(phases, vec![Phase::Received, Phase::Rejected]);
}

#[tokio::test]
async fn unconvertible_schema_is_rejected() {
    let app = setup_test_app(engine());

    let (status, body) = post_json(
        &app.router,
        "/v1/scrape",
        json!({
            "graph": "smart",
            "user_prompt": "anything",
            "website_url": "https://example.com",
            "output_schema": {"type": "object", "not": {}}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "schema_error");
    assert!(
        body["detail"]
            .as_str()
            .unwrap()
            .starts_with("JSON Schema cannot be converted")
    );
    assert!(app.engine.builds().is_empty());
}

#[tokio::test]
async fn polling_sees_statuses_in_order() {
    let app = setup_test_app(engine().with_delay(Duration::from_millis(300)));

    let (status, job) = post_json(
        &app.router,
        "/v1/scrape",
        json!({"graph": "smart", "user_prompt": "title", "website_url": "https://example.com"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let request_id = job["request_id"].as_str().unwrap().to_string();

    let rank = |status: &str| match status {
        "queued" => 0,
        "running" => 1,
        "completed" | "failed" => 2,
        other => panic!("unexpected status {other}"),
    };

    let mut observed = vec![job["status"].as_str().unwrap().to_string()];
    for _ in 0..250 {
        let (status, snapshot) = get_json(&app.router, &format!("/v1/scrape/{request_id}")).await;
        assert_eq!(status, StatusCode::OK);
        let current = snapshot["status"].as_str().unwrap().to_string();
        if observed.last() != Some(&current) {
            observed.push(current.clone());
        }
        if rank(&current) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(observed.first().map(String::as_str), Some("queued"));
    assert!(observed.iter().any(|s| s == "running"), "{observed:?}");
    assert_eq!(observed.last().map(String::as_str), Some("completed"));
    assert!(
        observed.windows(2).all(|w| rank(&w[0]) < rank(&w[1])),
        "statuses went backwards: {observed:?}"
    );
}

#[tokio::test]
async fn unknown_graph_and_missing_prompt_are_unprocessable() {
    let app = setup_test_app(engine());

    let (status, _) = post_json(
        &app.router,
        "/v1/scrape",
        json!({"graph": "omni", "user_prompt": "x", "website_url": "https://example.com"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = post_json(
        &app.router,
        "/v1/scrape",
        json!({"graph": "smart", "website_url": "https://example.com"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_request_id_returns_404() {
    let app = setup_test_app(engine());

    let (status, body) = get_json(&app.router, "/v1/scrape/does-not-exist").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    assert!(body["detail"].as_str().unwrap().contains("request_id not found"));
}

#[tokio::test]
async fn smartscraper_alias_forces_smart_graph() {
    let app = setup_test_app(engine());

    let (status, job) = post_json(
        &app.router,
        "/v1/smartscraper",
        json!({"graph": "multi", "user_prompt": "title", "website_url": "https://example.com"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["graph"], "smart");

    let request_id = job["request_id"].as_str().unwrap();
    wait_for_terminal(&app.router, request_id).await;

    let (status, polled) = get_json(&app.router, &format!("/v1/smartscraper/{request_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(polled["status"], "completed");
}

#[tokio::test]
async fn schema_mismatch_completes_with_validation_error() {
    let app = setup_test_app(MockEngine::new(json!({"name": 42})));

    let (status, job) = post_json(
        &app.router,
        "/v1/scrape",
        json!({
            "graph": "smart",
            "user_prompt": "title",
            "website_url": "https://example.com",
            "output_schema": {
                "type": "object",
                "properties": {"title": {"type": "string"}},
                "required": ["title"]
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let done = wait_for_terminal(&app.router, job["request_id"].as_str().unwrap()).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["result"]["data"], json!({"name": 42}));
    assert_eq!(done["result"]["schema_validation"]["ok"], false);
    assert!(done["result"]["schema_validation"]["error"].is_string());
    assert_eq!(done["error"], "");
}

#[tokio::test]
async fn engine_failure_is_reported_through_polling() {
    let app = setup_test_app(engine().with_run_error("page unreachable"));

    let (status, job) = post_json(
        &app.router,
        "/v1/scrape",
        json!({"graph": "smart", "user_prompt": "title", "website_url": "https://example.com"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let done = wait_for_terminal(&app.router, job["request_id"].as_str().unwrap()).await;
    assert_eq!(done["status"], "failed");
    assert!(done["result"].is_null());
    assert!(done["error"].as_str().unwrap().contains("page unreachable"));
}

#[tokio::test]
async fn slow_job_times_out() {
    let app = setup_test_app(engine().with_delay(Duration::from_secs(3)));

    let (_, job) = post_json(
        &app.router,
        "/v1/scrape",
        json!({
            "graph": "smart",
            "user_prompt": "title",
            "website_url": "https://example.com",
            "timeout_sec": 1
        }),
    )
    .await;

    let done = wait_for_terminal(&app.router, job["request_id"].as_str().unwrap()).await;
    assert_eq!(done["status"], "failed");
    assert!(done["error"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn request_config_reaches_the_engine() {
    let app = setup_test_app(engine());

    let (_, job) = post_json(
        &app.router,
        "/v1/scrape",
        json!({
            "graph": "smart",
            "user_prompt": "title",
            "website_url": "https://example.com",
            "llm": {"model": "openai/gpt-4o", "temperature": 0.3},
            "headless": false,
            "additional_config": {"verbose": false}
        }),
    )
    .await;
    wait_for_terminal(&app.router, job["request_id"].as_str().unwrap()).await;

    let config = &app.engine.builds()[0].config;
    assert_eq!(config.model(), "openai/gpt-4o");
    assert!(!config.headless());
    assert!(!config.verbose());
}

#[tokio::test]
async fn admission_cap_returns_503() {
    let app = setup_test_app_with_cap(engine().with_delay(Duration::from_millis(500)), Some(1));
    let body = json!({"graph": "smart", "user_prompt": "title", "website_url": "https://example.com"});

    let (status, first) = post_json(&app.router, "/v1/scrape", body.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, rejected) = post_json(&app.router, "/v1/scrape", body.clone()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(rejected["error"], "overloaded");

    wait_for_terminal(&app.router, first["request_id"].as_str().unwrap()).await;
    let (status, _) = post_json(&app.router, "/v1/scrape", body).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn http_requests_are_recorded_by_route() {
    let app = setup_test_app(engine());

    get_json(&app.router, "/v1/health").await;
    get_json(&app.router, "/v1/scrape/missing").await;

    let http = app.telemetry.http.lock().unwrap().clone();
    assert!(http.contains(&("GET".to_string(), "/v1/health".to_string(), 200)));
    assert!(http.contains(&(
        "GET".to_string(),
        "/v1/scrape/{request_id}".to_string(),
        404
    )));
}

#[tokio::test]
async fn metrics_endpoint_is_empty_without_exporter() {
    let app = setup_test_app(engine());

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = setup_test_app(engine());

    let (status, doc) = send(
        &app.router,
        Request::get("/api-docs/openapi.json").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/v1/scrape"].is_object());
}
