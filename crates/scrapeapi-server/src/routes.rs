use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{MatchedPath, Path, Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tracing::Instrument;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use scrapeapi_core::job::ScrapeRequest;

use crate::dto::{HealthResponse, JobResponse, ScrapeRequestBody, SmartScraperBody};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

pub const TRACE_ID_HEADER: &str = "x-trace-id";
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/health", get(health))
        .route("/v1/scrape", post(start_scrape))
        .route("/v1/scrape/{request_id}", get(get_scrape))
        .route("/v1/smartscraper", post(start_smartscraper))
        .route("/v1/smartscraper/{request_id}", get(get_scrape))
        .route("/metrics", get(metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_http));

    api.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

async fn track_http(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    state.recorder().http_request(
        &method,
        &route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/scrape",
    request_body = ScrapeRequestBody,
    params(
        ("X-Trace-ID" = Option<String>, Header, description = "Correlation id recorded on the job's log span")
    ),
    responses(
        (status = 200, description = "Job queued", body = JobResponse),
        (status = 400, description = "Invalid schema or missing sources", body = crate::dto::ErrorResponse),
        (status = 422, description = "Malformed body"),
        (status = 503, description = "Too many jobs in flight", body = crate::dto::ErrorResponse),
    ),
    tag = "scrape"
)]
pub async fn start_scrape(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<ScrapeRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    submit(&state, &headers, body.into()).await
}

#[utoipa::path(
    post,
    path = "/v1/smartscraper",
    request_body = SmartScraperBody,
    responses(
        (status = 200, description = "Job queued with the smart graph", body = JobResponse),
        (status = 400, description = "Invalid schema or missing source", body = crate::dto::ErrorResponse),
        (status = 503, description = "Too many jobs in flight", body = crate::dto::ErrorResponse),
    ),
    tag = "scrape"
)]
pub async fn start_smartscraper(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<SmartScraperBody>,
) -> Result<impl IntoResponse, ApiError> {
    submit(&state, &headers, body.into()).await
}

async fn submit(
    state: &AppState,
    headers: &HeaderMap,
    request: ScrapeRequest,
) -> Result<axum::Json<JobResponse>, ApiError> {
    let trace_id = headers
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    let span = tracing::info_span!("submit", trace_id = %trace_id, graph = %request.graph);

    let job = state.service.submit(request).instrument(span).await?;
    Ok(axum::Json(JobResponse::from(job)))
}

#[utoipa::path(
    get,
    path = "/v1/scrape/{request_id}",
    params(
        ("request_id" = String, Path, description = "Identifier returned at submission")
    ),
    responses(
        (status = 200, description = "Current job snapshot", body = JobResponse),
        (status = 404, description = "Unknown request id", body = crate::dto::ErrorResponse),
    ),
    tag = "scrape"
)]
pub async fn get_scrape(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.service.poll(&request_id).await?;
    Ok(axum::Json(JobResponse::from(job)))
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health() -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Prometheus text exposition; empty when no exporter is installed", body = String, content_type = "text/plain"),
    ),
    tag = "system"
)]
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.telemetry.render(),
    )
}
