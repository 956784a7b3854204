use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use scrapeapi_core::{JobExecutor, JobStore, ScrapeService};
use scrapeapi_engine::{EngineSettings, LlmEngine};
use scrapeapi_server::config::ServerConfig;
use scrapeapi_server::routes;
use scrapeapi_server::state::AppState;
use scrapeapi_server::telemetry::{self, TelemetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_logging()?;

    let config = ServerConfig::from_env()?;
    let telemetry = telemetry::install(&TelemetryConfig::from_env());

    let engine = LlmEngine::new(EngineSettings::from_env().allow_private_urls(config.allow_private_urls))?;
    let executor = JobExecutor::new(JobStore::new(), Arc::new(engine))
        .with_telemetry(telemetry.recorder.clone());
    let service = ScrapeService::new(executor).with_max_in_flight(config.max_in_flight);

    let state = Arc::new(AppState::new(service.clone(), telemetry));

    let app = routes::router(state)
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.addr();
    tracing::info!(
        max_in_flight = ?config.max_in_flight,
        "Starting server on {addr}"
    );
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let pending = service.in_flight();
    if pending > 0 {
        tracing::info!(pending, "Waiting for running jobs");
    }
    if !service.shutdown(config.shutdown_grace).await {
        tracing::warn!(
            pending = service.in_flight(),
            "Shutdown grace period elapsed with jobs still running"
        );
    }

    Ok(())
}

/// `RUST_LOG` filters; `LOG_FORMAT=json` switches to JSON lines.
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("scrapeapi=info".parse()?);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
