//! Metrics exporter installation.
//!
//! Telemetry is optional: when it is disabled or the recorder cannot be
//! installed, the server runs with [`NoopTelemetry`] and `/metrics` serves an
//! empty body.

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use scrapeapi_core::telemetry::{MetricsTelemetry, NoopTelemetry, Telemetry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterKind {
    Disabled,
    /// Scraped from `GET /metrics`.
    Prometheus,
    /// Snapshot written to the log every export interval.
    Log,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub exporter: ExporterKind,
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub export_interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exporter: ExporterKind::Disabled,
            service_name: "scrapeapi".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            export_interval: Duration::from_millis(10_000),
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unreadable values are logged and replaced by their defaults, so a bad
    /// `OTEL_*` variable never keeps the server from starting.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let exporter = match get("OTEL_EXPORTER_TYPE").map(|v| v.to_lowercase()) {
            None => ExporterKind::Disabled,
            Some(kind) => match kind.as_str() {
                "prometheus" => ExporterKind::Prometheus,
                "log" | "console" => ExporterKind::Log,
                "none" => ExporterKind::Disabled,
                other => {
                    tracing::warn!(
                        exporter = other,
                        "Unsupported OTEL_EXPORTER_TYPE (expected prometheus or log), telemetry disabled"
                    );
                    ExporterKind::Disabled
                }
            },
        };

        let export_interval = match get("OTEL_METRIC_EXPORT_INTERVAL").map(|v| v.parse::<u64>()) {
            None => defaults.export_interval,
            Some(Ok(ms)) => Duration::from_millis(ms.max(1)),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Invalid OTEL_METRIC_EXPORT_INTERVAL, using the default");
                defaults.export_interval
            }
        };

        Self {
            enabled: get("OTEL_ENABLED").is_none_or(|v| v.eq_ignore_ascii_case("true")),
            exporter,
            service_name: get("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            service_version: get("OTEL_SERVICE_VERSION").unwrap_or(defaults.service_version),
            environment: get("OTEL_ENVIRONMENT").unwrap_or(defaults.environment),
            export_interval,
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.exporter != ExporterKind::Disabled
    }
}

/// What the rest of the server uses: a recorder and, when installed, the
/// Prometheus render handle.
#[derive(Clone)]
pub struct TelemetryHandle {
    pub recorder: Arc<dyn Telemetry>,
    pub prometheus: Option<PrometheusHandle>,
}

impl TelemetryHandle {
    pub fn noop() -> Self {
        Self {
            recorder: Arc::new(NoopTelemetry),
            prometheus: None,
        }
    }

    /// Prometheus text exposition, or an empty string when no exporter runs.
    pub fn render(&self) -> String {
        self.prometheus
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }
}

/// Install the global metrics recorder. Must run inside a Tokio runtime.
///
/// Never fails: any problem is logged and yields a no-op handle.
pub fn install(config: &TelemetryConfig) -> TelemetryHandle {
    if !config.is_active() {
        tracing::info!("Telemetry disabled");
        return TelemetryHandle::noop();
    }

    let builder = PrometheusBuilder::new()
        .add_global_label("service_name", config.service_name.clone())
        .add_global_label("service_version", config.service_version.clone())
        .add_global_label("deployment_environment", config.environment.clone());

    let handle = match builder.install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install metrics recorder, telemetry disabled");
            return TelemetryHandle::noop();
        }
    };
    MetricsTelemetry::describe();

    let exporter = config.exporter;
    let interval = config.export_interval;
    let upkeep = handle.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            upkeep.run_upkeep();
            if exporter == ExporterKind::Log {
                tracing::info!(snapshot = %upkeep.render(), "Metrics snapshot");
            }
        }
    });

    tracing::info!(
        exporter = ?config.exporter,
        service = %config.service_name,
        environment = %config.environment,
        "Telemetry initialized"
    );

    TelemetryHandle {
        recorder: Arc::new(MetricsTelemetry),
        prometheus: Some(handle),
    }
}
