//! Instrumentation seam.
//!
//! Every call site depends on [`Telemetry`]; the default [`NoopTelemetry`]
//! records nothing. [`MetricsTelemetry`] forwards to the `metrics` facade,
//! which is itself a no-op until the process installs a recorder, so a
//! missing or broken exporter never affects request handling.

use std::fmt;

use crate::job::GraphKind;

/// Lifecycle phase a request counter is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    Rejected,
    Queued,
    Running,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Received => "received",
            Phase::Rejected => "rejected",
            Phase::Queued => "queued",
            Phase::Running => "running",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome a job duration is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
        }
    }
}

/// Schema check outcome. `Rejected` is a submission whose schema document
/// failed validation or conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaOutcome {
    Valid,
    Mismatch,
    Rejected,
}

impl SchemaOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaOutcome::Valid => "valid",
            SchemaOutcome::Mismatch => "mismatch",
            SchemaOutcome::Rejected => "rejected",
        }
    }
}

/// Recording interface for counters, histograms, and the queue gauge.
///
/// All methods default to doing nothing.
pub trait Telemetry: Send + Sync {
    fn request(&self, kind: GraphKind, phase: Phase) {
        let _ = (kind, phase);
    }

    /// End-to-end job execution time, from dequeue to terminal state.
    fn job_duration(&self, kind: GraphKind, outcome: Outcome, secs: f64) {
        let _ = (kind, outcome, secs);
    }

    fn schema_validation(&self, outcome: SchemaOutcome) {
        let _ = outcome;
    }

    /// +1 on enqueue, -1 on dequeue-to-running.
    fn queue_depth(&self, delta: i64) {
        let _ = delta;
    }

    fn http_request(&self, method: &str, route: &str, status: u16, secs: f64) {
        let _ = (method, route, status, secs);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {}

/// Telemetry backed by the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsTelemetry;

impl MetricsTelemetry {
    pub const REQUESTS: &'static str = "scrapeapi_requests_total";
    pub const SCRAPING_OPERATIONS: &'static str = "scrapeapi_scraping_operations_total";
    pub const SCRAPING_DURATION: &'static str = "scrapeapi_scraping_duration_seconds";
    pub const SCHEMA_VALIDATIONS: &'static str = "scrapeapi_schema_validations_total";
    pub const QUEUE_SIZE: &'static str = "scrapeapi_queue_size";
    pub const HTTP_REQUEST_DURATION: &'static str = "scrapeapi_request_duration_seconds";

    /// Register descriptions with the installed recorder.
    pub fn describe() {
        metrics::describe_counter!(Self::REQUESTS, "Scrape requests by graph kind and lifecycle phase");
        metrics::describe_counter!(Self::SCRAPING_OPERATIONS, "Finished scraping operations by outcome");
        metrics::describe_histogram!(
            Self::SCRAPING_DURATION,
            metrics::Unit::Seconds,
            "Job execution duration from dequeue to terminal state"
        );
        metrics::describe_counter!(Self::SCHEMA_VALIDATIONS, "Schema validations by outcome");
        metrics::describe_gauge!(Self::QUEUE_SIZE, "Jobs accepted but not yet running");
        metrics::describe_histogram!(
            Self::HTTP_REQUEST_DURATION,
            metrics::Unit::Seconds,
            "HTTP request duration"
        );
    }
}

impl Telemetry for MetricsTelemetry {
    fn request(&self, kind: GraphKind, phase: Phase) {
        metrics::counter!(Self::REQUESTS, "graph" => kind.as_str(), "phase" => phase.as_str())
            .increment(1);
    }

    fn job_duration(&self, kind: GraphKind, outcome: Outcome, secs: f64) {
        metrics::counter!(
            Self::SCRAPING_OPERATIONS,
            "graph" => kind.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        metrics::histogram!(
            Self::SCRAPING_DURATION,
            "graph" => kind.as_str(),
            "outcome" => outcome.as_str()
        )
        .record(secs);
    }

    fn schema_validation(&self, outcome: SchemaOutcome) {
        metrics::counter!(Self::SCHEMA_VALIDATIONS, "outcome" => outcome.as_str()).increment(1);
    }

    fn queue_depth(&self, delta: i64) {
        let gauge = metrics::gauge!(Self::QUEUE_SIZE);
        if delta >= 0 {
            gauge.increment(delta as f64);
        } else {
            gauge.decrement(delta.unsigned_abs() as f64);
        }
    }

    fn http_request(&self, method: &str, route: &str, status: u16, secs: f64) {
        metrics::histogram!(
            Self::HTTP_REQUEST_DURATION,
            "method" => method.to_string(),
            "route" => route.to_string(),
            "status" => status.to_string()
        )
        .record(secs);
    }
}
