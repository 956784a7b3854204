pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod job;
pub mod schema;
pub mod scrape;
pub mod store;
pub mod telemetry;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::{ConfigLayer, RuntimeConfig};
pub use error::AppError;
pub use executor::{JobEvent, JobExecutor, JobReporter, TracingJobReporter};
pub use graph::{BuiltGraph, build_graph};
pub use job::{GraphKind, JobRecord, JobResult, JobStatus, SchemaValidation, ScrapeRequest};
pub use schema::{OutputShape, ShapeType, StrictSchema, validate_and_convert};
pub use scrape::ScrapeService;
pub use store::JobStore;
pub use telemetry::{MetricsTelemetry, NoopTelemetry, Telemetry};
pub use traits::{GraphEngine, RunnableGraph};
