use std::sync::Arc;

use scrapeapi_core::ScrapeService;
use scrapeapi_core::telemetry::Telemetry;

use crate::telemetry::TelemetryHandle;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub service: ScrapeService,
    pub telemetry: TelemetryHandle,
}

impl AppState {
    pub fn new(service: ScrapeService, telemetry: TelemetryHandle) -> Self {
        Self { service, telemetry }
    }

    pub fn recorder(&self) -> &Arc<dyn Telemetry> {
        &self.telemetry.recorder
    }
}
