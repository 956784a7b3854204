use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::Instrument;

use crate::config::RuntimeConfig;
use crate::error::AppError;
use crate::graph::build_graph;
use crate::job::{GraphKind, JobResult, ScrapeRequest};
use crate::schema::{self, OutputShape};
use crate::store::JobStore;
use crate::telemetry::{NoopTelemetry, Outcome, Phase, SchemaOutcome, Telemetry};
use crate::traits::GraphEngine;

/// Job lifecycle events, for monitoring and logging.
#[derive(Debug, Clone)]
pub enum JobEvent<'a> {
    Queued {
        request_id: &'a str,
        graph: GraphKind,
    },
    Started {
        request_id: &'a str,
        graph: GraphKind,
    },
    Completed {
        request_id: &'a str,
        elapsed: Duration,
        schema_ok: bool,
    },
    Failed {
        request_id: &'a str,
        error: &'a str,
        timed_out: bool,
    },
}

/// Trait for receiving job events (decoupled logging).
pub trait JobReporter: Send + Sync {
    fn report(&self, event: JobEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingJobReporter;

impl JobReporter for TracingJobReporter {
    fn report(&self, event: JobEvent<'_>) {
        match event {
            JobEvent::Queued { request_id, graph } => {
                tracing::info!(%request_id, %graph, "Job queued");
            }
            JobEvent::Started { request_id, graph } => {
                tracing::info!(%request_id, %graph, "Job started");
            }
            JobEvent::Completed {
                request_id,
                elapsed,
                schema_ok,
            } => {
                tracing::info!(
                    %request_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    %schema_ok,
                    "Job completed"
                );
            }
            JobEvent::Failed {
                request_id,
                error,
                timed_out,
            } => {
                tracing::warn!(%request_id, %error, %timed_out, "Job failed");
            }
        }
    }
}

/// Drives one accepted job from `queued` to a terminal state.
pub struct JobExecutor {
    store: JobStore,
    engine: Arc<dyn GraphEngine>,
    telemetry: Arc<dyn Telemetry>,
    reporter: Arc<dyn JobReporter>,
}

impl JobExecutor {
    pub fn new(store: JobStore, engine: Arc<dyn GraphEngine>) -> Self {
        Self {
            store,
            engine,
            telemetry: Arc::new(NoopTelemetry),
            reporter: Arc::new(TracingJobReporter),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn JobReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn telemetry(&self) -> &dyn Telemetry {
        self.telemetry.as_ref()
    }

    pub fn reporter(&self) -> &dyn JobReporter {
        self.reporter.as_ref()
    }

    /// Run the job to completion.
    ///
    /// Never returns an error: every failure, including a panic inside the
    /// engine and a timeout, ends as a `failed` record in the store.
    pub async fn execute(&self, request_id: &str, request: ScrapeRequest, shape: OutputShape) {
        let span = tracing::info_span!("scrape_job", %request_id, graph = %request.graph);
        self.drive(request_id, request, shape).instrument(span).await;
    }

    async fn drive(&self, request_id: &str, request: ScrapeRequest, shape: OutputShape) {
        let kind = request.graph;

        if let Err(e) = self.store.mutate(request_id, |job| job.start()).await {
            tracing::error!(error = %e, "Failed to mark job running");
            return;
        }
        self.telemetry.queue_depth(-1);
        self.telemetry.request(kind, Phase::Running);
        self.reporter.report(JobEvent::Started {
            request_id,
            graph: kind,
        });

        let started = Instant::now();
        let outcome = self.produce(&request, &shape).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(data) => {
                let validation = schema::check(&data, &shape);
                if shape.is_strict() {
                    self.telemetry.schema_validation(if validation.ok {
                        SchemaOutcome::Valid
                    } else {
                        SchemaOutcome::Mismatch
                    });
                }
                if let Some(detail) = &validation.error {
                    tracing::warn!(%detail, "Result does not match output schema");
                }
                let schema_ok = validation.ok;
                let result = JobResult {
                    data,
                    schema_validation: validation,
                };

                if let Err(e) = self.store.mutate(request_id, |job| job.complete(result)).await {
                    tracing::error!(error = %e, "Failed to mark job completed");
                    return;
                }
                self.telemetry.request(kind, Phase::Completed);
                self.telemetry
                    .job_duration(kind, Outcome::Success, elapsed.as_secs_f64());
                self.reporter.report(JobEvent::Completed {
                    request_id,
                    elapsed,
                    schema_ok,
                });
            }
            Err(e) => {
                let timed_out = matches!(e, AppError::Timeout(_));
                let message = e.to_string();
                tracing::error!(error = ?e, "Job execution failed");

                if let Err(e) = self
                    .store
                    .mutate(request_id, |job| job.fail(message.as_str()))
                    .await
                {
                    tracing::error!(error = %e, "Failed to mark job failed");
                    return;
                }
                let outcome = if timed_out {
                    Outcome::Timeout
                } else {
                    Outcome::Failure
                };
                self.telemetry.request(kind, Phase::Failed);
                self.telemetry
                    .job_duration(kind, outcome, elapsed.as_secs_f64());
                self.reporter.report(JobEvent::Failed {
                    request_id,
                    error: &message,
                    timed_out,
                });
            }
        }
    }

    /// Assemble config, build the graph, and run it on a blocking thread
    /// under the request's timeout.
    async fn produce(&self, request: &ScrapeRequest, shape: &OutputShape) -> Result<Value, AppError> {
        let config = RuntimeConfig::assemble(request);
        tracing::debug!(
            layers = ?config.layers(),
            model = config.model(),
            headless = config.headless(),
            "Assembled runtime config"
        );

        let graph = {
            let _build = tracing::info_span!("build_graph").entered();
            build_graph(self.engine.as_ref(), request, &config, shape)?
        };

        let timeout = request.timeout();
        let run_span = tracing::info_span!("run_graph", timeout_secs = timeout.as_secs());
        // On timeout the blocking task is abandoned, not killed. It still owns
        // the graph, so any inline HTML file is removed once it returns.
        let handle = tokio::task::spawn_blocking(move || run_span.in_scope(|| graph.run()));

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(AppError::EngineError(format!(
                "graph execution aborted: {join_error}"
            ))),
            Err(_) => Err(AppError::Timeout(timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::job::{JobRecord, JobStatus};
    use crate::testutil::{MockEngine, MockReporter, RecordingTelemetry};

    struct Harness {
        executor: JobExecutor,
        telemetry: RecordingTelemetry,
        reporter: MockReporter,
    }

    fn harness(engine: MockEngine) -> Harness {
        let telemetry = RecordingTelemetry::new();
        let reporter = MockReporter::new();
        let executor = JobExecutor::new(JobStore::new(), Arc::new(engine))
            .with_telemetry(Arc::new(telemetry.clone()))
            .with_reporter(Arc::new(reporter.clone()));
        Harness {
            executor,
            telemetry,
            reporter,
        }
    }

    async fn enqueue(executor: &JobExecutor, request: &ScrapeRequest) -> String {
        let record = JobRecord::queued(request);
        let id = record.request_id.clone();
        executor.store().create(record).await.unwrap();
        id
    }

    fn smart() -> ScrapeRequest {
        ScrapeRequest::new(GraphKind::Smart, "title").with_url("https://example.com")
    }

    #[tokio::test]
    async fn completes_with_engine_output() {
        let h = harness(MockEngine::new(json!({"title": "Example"})));
        let req = smart();
        let id = enqueue(&h.executor, &req).await;

        h.executor.execute(&id, req, OutputShape::Free).await;

        let job = h.executor.store().get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let result = job.result.unwrap();
        assert_eq!(result.data["title"], "Example");
        assert!(result.schema_validation.ok);
        assert!(job.error.is_empty());
        assert_eq!(h.reporter.labels(), vec!["Started", "Completed"]);
        assert_eq!(h.telemetry.outcomes(), vec![Outcome::Success]);
        // Free shapes are not counted as schema validations.
        assert!(h.telemetry.schema_checks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn schema_mismatch_still_completes() {
        let h = harness(MockEngine::new(json!({"title": 42})));
        let shape = schema::validate_and_convert(Some(&json!({
            "type": "object",
            "properties": {"title": {"type": "string"}},
            "required": ["title"]
        })))
        .unwrap();
        let req = smart();
        let id = enqueue(&h.executor, &req).await;

        h.executor.execute(&id, req, shape).await;

        let job = h.executor.store().get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_empty());
        let validation = job.result.unwrap().schema_validation;
        assert!(!validation.ok);
        assert!(!validation.error.unwrap().is_empty());
        assert_eq!(
            *h.telemetry.schema_checks.lock().unwrap(),
            vec![SchemaOutcome::Mismatch]
        );
    }

    #[tokio::test]
    async fn build_error_fails_without_running() {
        let h = harness(MockEngine::new(json!({})).with_build_error("model not supported"));
        let req = smart();
        let id = enqueue(&h.executor, &req).await;

        h.executor.execute(&id, req, OutputShape::Free).await;

        let job = h.executor.store().get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.contains("model not supported"));
        assert!(job.result.is_none());
        assert_eq!(h.telemetry.outcomes(), vec![Outcome::Failure]);
    }

    #[tokio::test]
    async fn run_error_is_stringified() {
        let h = harness(MockEngine::new(json!({})).with_run_error("page returned 503"));
        let req = smart();
        let id = enqueue(&h.executor, &req).await;

        h.executor.execute(&id, req, OutputShape::Free).await;

        let job = h.executor.store().get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.contains("page returned 503"));
    }

    #[tokio::test]
    async fn panic_in_engine_becomes_failure() {
        let h = harness(MockEngine::new(json!({})).panicking());
        let req = smart();
        let id = enqueue(&h.executor, &req).await;

        h.executor.execute(&id, req, OutputShape::Free).await;

        let job = h.executor.store().get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.contains("aborted"));
        assert_eq!(h.reporter.labels(), vec!["Started", "Failed"]);
    }

    #[tokio::test]
    async fn timeout_fails_job_promptly() {
        let h = harness(MockEngine::new(json!({})).with_delay(Duration::from_secs(3)));
        let req = smart().with_timeout_secs(1);
        let id = enqueue(&h.executor, &req).await;

        let started = Instant::now();
        h.executor.execute(&id, req, OutputShape::Free).await;
        assert!(started.elapsed() < Duration::from_millis(2500));

        let job = h.executor.store().get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.contains("timed out"));
        assert_eq!(h.telemetry.outcomes(), vec![Outcome::Timeout]);
    }

    #[tokio::test]
    async fn config_overrides_reach_engine() {
        let engine = MockEngine::new(json!({}));
        let h = harness(engine.clone());
        let mut req = smart();
        req.llm = Some(
            json!({"temperature": 0.7})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let id = enqueue(&h.executor, &req).await;

        h.executor.execute(&id, req, OutputShape::Free).await;

        let call = engine.builds().remove(0);
        assert_eq!(call.config.temperature(), 0.7);
        assert!(call.config.headless());
    }

    #[tokio::test]
    async fn unknown_job_is_left_alone() {
        let h = harness(MockEngine::new(json!({})));
        h.executor
            .execute("missing", smart(), OutputShape::Free)
            .await;
        assert!(h.executor.store().is_empty().await);
        assert!(h.reporter.labels().is_empty());
    }
}
