use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::error::AppError;
use crate::executor::{JobEvent, JobExecutor};
use crate::graph::validate_sources;
use crate::job::{JobRecord, ScrapeRequest};
use crate::schema;
use crate::store::JobStore;
use crate::telemetry::{Phase, SchemaOutcome};

/// Submission and polling entry point.
///
/// `submit` validates synchronously, records the job as `queued`, and hands
/// execution to a tracked background task. It never waits for the job.
#[derive(Clone)]
pub struct ScrapeService {
    executor: Arc<JobExecutor>,
    tracker: TaskTracker,
    max_in_flight: Option<usize>,
}

impl ScrapeService {
    pub fn new(executor: JobExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            tracker: TaskTracker::new(),
            max_in_flight: None,
        }
    }

    /// Cap the number of queued plus running jobs. `None` means unbounded.
    pub fn with_max_in_flight(mut self, limit: Option<usize>) -> Self {
        self.max_in_flight = limit.filter(|n| *n > 0);
        self
    }

    pub fn store(&self) -> &JobStore {
        self.executor.store()
    }

    /// Validate and enqueue a request. Returns the `queued` snapshot.
    ///
    /// Client errors are returned before any record exists.
    pub async fn submit(&self, request: ScrapeRequest) -> Result<JobRecord, AppError> {
        let telemetry = self.executor.telemetry();
        let kind = request.graph;
        telemetry.request(kind, Phase::Received);

        let shape = match schema::validate_and_convert(request.output_schema.as_ref())
            .and_then(|shape| validate_sources(&request).map(|()| shape))
        {
            Ok(shape) => shape,
            Err(e) => {
                if matches!(e, AppError::InvalidSchema(_) | AppError::SchemaConversion(_)) {
                    telemetry.schema_validation(SchemaOutcome::Rejected);
                }
                telemetry.request(kind, Phase::Rejected);
                tracing::info!(graph = %kind, error = %e, "Rejected scrape request");
                return Err(e);
            }
        };

        let record = JobRecord::queued(&request);
        let snapshot = record.clone();
        let created = match self.max_in_flight {
            Some(limit) => self.store().create_within(record, limit).await,
            None => self.store().create(record).await,
        };
        if let Err(e) = created {
            telemetry.request(kind, Phase::Rejected);
            return Err(e);
        }

        telemetry.request(kind, Phase::Queued);
        telemetry.queue_depth(1);
        self.executor.reporter().report(JobEvent::Queued {
            request_id: &snapshot.request_id,
            graph: kind,
        });

        let executor = Arc::clone(&self.executor);
        let request_id = snapshot.request_id.clone();
        self.tracker.spawn(
            async move {
                executor.execute(&request_id, request, shape).await;
            }
            .in_current_span(),
        );

        Ok(snapshot)
    }

    /// Current snapshot of a job.
    pub async fn poll(&self, request_id: &str) -> Result<JobRecord, AppError> {
        self.store().get(request_id).await
    }

    /// Number of background jobs still being driven.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait up to `grace` for background jobs to settle. Returns `true` when
    /// every job finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(grace, self.tracker.wait()).await.is_ok()
    }
}
