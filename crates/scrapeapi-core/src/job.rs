use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;

/// Server-side run timeout used when a request omits one or sends a non-positive value.
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

/// Which extraction strategy a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphKind {
    /// One source: URL, inline HTML, or the first listed source.
    Smart,
    /// Every entry of an explicit source list.
    Multi,
    /// Web search driven by the prompt.
    Search,
}

impl GraphKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphKind::Smart => "smart",
            GraphKind::Multi => "multi",
            GraphKind::Search => "search",
        }
    }
}

impl fmt::Display for GraphKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smart" => Ok(GraphKind::Smart),
            "multi" => Ok(GraphKind::Multi),
            "search" => Ok(GraphKind::Search),
            other => Err(AppError::InvalidRequest(format!("Unsupported graph: {other}"))),
        }
    }
}

/// Status of a job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Legal edges: queued → running → {completed, failed}.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {s}")),
        }
    }
}

/// Outcome of checking a result against the declared output schema.
///
/// Serializes as `{"ok": true}` or `{"ok": false, "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaValidation {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SchemaValidation {
    pub fn passed() -> Self {
        Self { ok: true, error: None }
    }

    pub fn mismatch(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(detail.into()),
        }
    }
}

/// Payload of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub data: Value,
    pub schema_validation: SchemaValidation,
}

/// One accepted scrape request plus its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub request_id: String,
    pub status: JobStatus,
    pub graph: GraphKind,
    pub user_prompt: String,
    pub website_url: Option<String>,
    pub sources: Option<Vec<String>>,
    pub result: Option<JobResult>,
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A fresh `queued` record with a newly generated request id.
    pub fn queued(request: &ScrapeRequest) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            graph: request.graph,
            user_prompt: request.user_prompt.clone(),
            website_url: request.website_url.clone(),
            sources: request.sources.clone(),
            result: None,
            error: String::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) -> Result<(), AppError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, result: JobResult) -> Result<(), AppError> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Marks the job failed. An empty message is replaced so that `error`
    /// stays non-empty for every failed job.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), AppError> {
        self.transition(JobStatus::Failed)?;
        let error = error.into();
        self.error = if error.trim().is_empty() {
            "job failed without an error message".to_string()
        } else {
            error
        };
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::Internal(format!(
                "illegal transition {} -> {} for job {}",
                self.status, next, self.request_id
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// A scrape submission as accepted by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub graph: GraphKind,
    pub user_prompt: String,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub website_html: Option<String>,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default)]
    pub max_results: Option<u32>,
    /// JSON Schema document, or an advisory example of the desired shape.
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub llm: Option<Map<String, Value>>,
    #[serde(default)]
    pub headless: Option<bool>,
    #[serde(default)]
    pub loader_kwargs: Option<Map<String, Value>>,
    #[serde(default)]
    pub verbose: Option<bool>,
    #[serde(default)]
    pub additional_config: Option<Map<String, Value>>,
    #[serde(default)]
    pub timeout_sec: Option<i64>,
}

impl ScrapeRequest {
    pub fn new(graph: GraphKind, user_prompt: impl Into<String>) -> Self {
        Self {
            graph,
            user_prompt: user_prompt.into(),
            website_url: None,
            website_html: None,
            sources: None,
            search_query: None,
            max_results: None,
            output_schema: None,
            llm: None,
            headless: None,
            loader_kwargs: None,
            verbose: None,
            additional_config: None,
            timeout_sec: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.website_url = Some(url.into());
        self
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.website_html = Some(html.into());
        self
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_timeout_secs(mut self, secs: i64) -> Self {
        self.timeout_sec = Some(secs);
        self
    }

    /// Run timeout; absent or non-positive values fall back to 180 seconds.
    pub fn timeout(&self) -> Duration {
        match self.timeout_sec {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
            _ => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}
