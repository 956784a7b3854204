use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use scrapeapi_core::testutil::{MockEngine, RecordingTelemetry};
use scrapeapi_core::{JobExecutor, JobStore, ScrapeService};
use scrapeapi_server::routes;
use scrapeapi_server::state::AppState;
use scrapeapi_server::telemetry::TelemetryHandle;

pub struct TestApp {
    pub router: Router,
    pub engine: MockEngine,
    pub telemetry: RecordingTelemetry,
}

/// Router over a fresh store, backed by `engine`.
pub fn setup_test_app(engine: MockEngine) -> TestApp {
    setup_test_app_with_cap(engine, None)
}

pub fn setup_test_app_with_cap(engine: MockEngine, max_in_flight: Option<usize>) -> TestApp {
    let telemetry = RecordingTelemetry::new();
    let executor = JobExecutor::new(JobStore::new(), Arc::new(engine.clone()))
        .with_telemetry(Arc::new(telemetry.clone()));
    let service = ScrapeService::new(executor).with_max_in_flight(max_in_flight);

    let handle = TelemetryHandle {
        recorder: Arc::new(telemetry.clone()),
        prometheus: None,
    };
    let state = Arc::new(AppState::new(service, handle));

    TestApp {
        router: routes::router(state),
        engine,
        telemetry,
    }
}

pub async fn post_json(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::post(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    send(router, request).await
}

pub async fn get_json(router: &Router, path: &str) -> (StatusCode, Value) {
    send(router, Request::get(path).body(Body::empty()).unwrap()).await
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Poll until the job reaches `completed` or `failed`.
pub async fn wait_for_terminal(router: &Router, request_id: &str) -> Value {
    for _ in 0..250 {
        let (status, job) = get_json(router, &format!("/v1/scrape/{request_id}")).await;
        assert_eq!(status, StatusCode::OK);
        if job["status"] == "completed" || job["status"] == "failed" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {request_id} did not finish");
}
