//! Test utilities: handwritten mocks of the engine, telemetry, and reporter
//! seams.
//!
//! All mocks share state through `Arc<Mutex<_>>` so clones handed to the
//! service still let the test assert on what was recorded.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::error::AppError;
use crate::executor::{JobEvent, JobReporter};
use crate::job::GraphKind;
use crate::schema::OutputShape;
use crate::telemetry::{Outcome, Phase, SchemaOutcome, Telemetry};
use crate::traits::{GraphEngine, RunnableGraph};

// ---------------------------------------------------------------------------
// MockEngine
// ---------------------------------------------------------------------------

/// One recorded `GraphEngine` call.
#[derive(Debug, Clone)]
pub struct BuildCall {
    pub kind: GraphKind,
    pub prompt: String,
    /// URL, file path, or search query, depending on the graph.
    pub sources: Vec<String>,
    pub config: RuntimeConfig,
    pub shape_label: &'static str,
    /// Contents of `sources[0]` when it names an existing local file, read at
    /// build time so tests can inspect materialized inline HTML.
    pub source_contents: Option<String>,
}

#[derive(Clone)]
enum Behavior {
    Return(Result<Value, String>),
    Panic,
}

/// Engine whose graphs return a fixed value after an optional delay.
#[derive(Clone)]
pub struct MockEngine {
    behavior: Arc<Mutex<Behavior>>,
    delay: Arc<Mutex<Duration>>,
    build_error: Arc<Mutex<Option<String>>>,
    builds: Arc<Mutex<Vec<BuildCall>>>,
}

impl MockEngine {
    pub fn new(data: Value) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(Behavior::Return(Ok(data)))),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
            build_error: Arc::new(Mutex::new(None)),
            builds: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Graphs sleep for `delay` before returning.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    /// Every build fails with an engine error carrying `message`.
    pub fn with_build_error(self, message: &str) -> Self {
        *self.build_error.lock().unwrap() = Some(message.to_string());
        self
    }

    /// Graphs build fine but fail when run.
    pub fn with_run_error(self, message: &str) -> Self {
        *self.behavior.lock().unwrap() = Behavior::Return(Err(message.to_string()));
        self
    }

    /// Graphs panic when run.
    pub fn panicking(self) -> Self {
        *self.behavior.lock().unwrap() = Behavior::Panic;
        self
    }

    pub fn builds(&self) -> Vec<BuildCall> {
        self.builds.lock().unwrap().clone()
    }

    fn record(
        &self,
        kind: GraphKind,
        prompt: &str,
        sources: Vec<String>,
        config: &RuntimeConfig,
        shape: &OutputShape,
    ) -> Result<Box<dyn RunnableGraph>, AppError> {
        let source_contents = sources
            .first()
            .filter(|s| Path::new(s.as_str()).is_file())
            .and_then(|s| std::fs::read_to_string(s).ok());
        self.builds.lock().unwrap().push(BuildCall {
            kind,
            prompt: prompt.to_string(),
            sources,
            config: config.clone(),
            shape_label: shape.label(),
            source_contents,
        });

        if let Some(message) = self.build_error.lock().unwrap().clone() {
            return Err(AppError::EngineError(message));
        }
        Ok(Box::new(MockGraph {
            behavior: self.behavior.lock().unwrap().clone(),
            delay: *self.delay.lock().unwrap(),
        }))
    }
}

impl GraphEngine for MockEngine {
    fn smart(
        &self,
        prompt: &str,
        source: &str,
        config: &RuntimeConfig,
        shape: &OutputShape,
    ) -> Result<Box<dyn RunnableGraph>, AppError> {
        self.record(GraphKind::Smart, prompt, vec![source.to_string()], config, shape)
    }

    fn multi(
        &self,
        prompt: &str,
        sources: &[String],
        config: &RuntimeConfig,
        shape: &OutputShape,
    ) -> Result<Box<dyn RunnableGraph>, AppError> {
        self.record(GraphKind::Multi, prompt, sources.to_vec(), config, shape)
    }

    fn search(
        &self,
        prompt: &str,
        query: Option<&str>,
        config: &RuntimeConfig,
        shape: &OutputShape,
    ) -> Result<Box<dyn RunnableGraph>, AppError> {
        let query = query.unwrap_or(prompt).to_string();
        self.record(GraphKind::Search, prompt, vec![query], config, shape)
    }
}

/// Graph produced by [`MockEngine`]. Blocks the calling thread for its delay.
pub struct MockGraph {
    behavior: Behavior,
    delay: Duration,
}

impl RunnableGraph for MockGraph {
    fn run(self: Box<Self>) -> Result<Value, AppError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.behavior {
            Behavior::Return(Ok(value)) => Ok(value),
            Behavior::Return(Err(message)) => Err(AppError::EngineError(message)),
            Behavior::Panic => panic!("mock graph panicked"),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingTelemetry
// ---------------------------------------------------------------------------

/// Telemetry that keeps every recorded value.
#[derive(Clone, Default)]
pub struct RecordingTelemetry {
    pub requests: Arc<Mutex<Vec<(GraphKind, Phase)>>>,
    pub durations: Arc<Mutex<Vec<(GraphKind, Outcome, f64)>>>,
    pub schema_checks: Arc<Mutex<Vec<SchemaOutcome>>>,
    pub queue_deltas: Arc<Mutex<Vec<i64>>>,
    pub http: Arc<Mutex<Vec<(String, String, u16)>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.requests.lock().unwrap().iter().map(|(_, p)| *p).collect()
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.durations.lock().unwrap().iter().map(|(_, o, _)| *o).collect()
    }

    /// Net queue depth: sum of all recorded deltas.
    pub fn queue_depth(&self) -> i64 {
        self.queue_deltas.lock().unwrap().iter().sum()
    }
}

impl Telemetry for RecordingTelemetry {
    fn request(&self, kind: GraphKind, phase: Phase) {
        self.requests.lock().unwrap().push((kind, phase));
    }

    fn job_duration(&self, kind: GraphKind, outcome: Outcome, secs: f64) {
        self.durations.lock().unwrap().push((kind, outcome, secs));
    }

    fn schema_validation(&self, outcome: SchemaOutcome) {
        self.schema_checks.lock().unwrap().push(outcome);
    }

    fn queue_depth(&self, delta: i64) {
        self.queue_deltas.lock().unwrap().push(delta);
    }

    fn http_request(&self, method: &str, route: &str, status: u16, _secs: f64) {
        self.http
            .lock()
            .unwrap()
            .push((method.to_string(), route.to_string(), status));
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Job reporter that records event labels.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl JobReporter for MockReporter {
    fn report(&self, event: JobEvent<'_>) {
        let label = match &event {
            JobEvent::Queued { .. } => "Queued",
            JobEvent::Started { .. } => "Started",
            JobEvent::Completed { .. } => "Completed",
            JobEvent::Failed { .. } => "Failed",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}
