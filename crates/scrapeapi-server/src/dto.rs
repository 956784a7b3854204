use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use scrapeapi_core::job::{GraphKind, JobRecord, JobResult, ScrapeRequest};

// ---------------------------------------------------------------------------
// Scrape submission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GraphParam {
    Smart,
    Multi,
    Search,
}

impl From<GraphParam> for GraphKind {
    fn from(graph: GraphParam) -> Self {
        match graph {
            GraphParam::Smart => GraphKind::Smart,
            GraphParam::Multi => GraphKind::Multi,
            GraphParam::Search => GraphKind::Search,
        }
    }
}

/// Everything a submission carries apart from the graph selector.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct ScrapeFields {
    /// Natural-language extraction instruction.
    pub user_prompt: String,
    pub website_url: Option<String>,
    /// Raw HTML, used when no `website_url` is given.
    pub website_html: Option<String>,
    pub sources: Option<Vec<String>>,
    /// Search graph only. Defaults to `user_prompt`.
    pub search_query: Option<String>,
    pub max_results: Option<u32>,
    /// JSON Schema document, or an advisory example of the desired shape.
    #[schema(value_type = Object)]
    pub output_schema: Option<Value>,
    #[schema(value_type = Object)]
    pub llm: Option<Map<String, Value>>,
    pub headless: Option<bool>,
    #[schema(value_type = Object)]
    pub loader_kwargs: Option<Map<String, Value>>,
    pub verbose: Option<bool>,
    /// Top-level config keys applied last.
    #[schema(value_type = Object)]
    pub additional_config: Option<Map<String, Value>>,
    /// Seconds; absent or non-positive means 180.
    pub timeout_sec: Option<i64>,
}

impl ScrapeFields {
    fn into_request(self, graph: GraphKind) -> ScrapeRequest {
        ScrapeRequest {
            graph,
            user_prompt: self.user_prompt,
            website_url: self.website_url,
            website_html: self.website_html,
            sources: self.sources,
            search_query: self.search_query,
            max_results: self.max_results,
            output_schema: self.output_schema,
            llm: self.llm,
            headless: self.headless,
            loader_kwargs: self.loader_kwargs,
            verbose: self.verbose,
            additional_config: self.additional_config,
            timeout_sec: self.timeout_sec,
        }
    }
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct ScrapeRequestBody {
    pub graph: GraphParam,
    #[serde(flatten)]
    pub fields: ScrapeFields,
}

impl From<ScrapeRequestBody> for ScrapeRequest {
    fn from(body: ScrapeRequestBody) -> Self {
        body.fields.into_request(body.graph.into())
    }
}

/// Legacy body: `graph` may be omitted and is always forced to `smart`.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct SmartScraperBody {
    pub graph: Option<GraphParam>,
    #[serde(flatten)]
    pub fields: ScrapeFields,
}

impl From<SmartScraperBody> for ScrapeRequest {
    fn from(body: SmartScraperBody) -> Self {
        body.fields.into_request(GraphKind::Smart)
    }
}

// ---------------------------------------------------------------------------
// Job snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub request_id: String,
    /// queued, running, completed or failed.
    pub status: String,
    pub graph: String,
    pub user_prompt: String,
    pub website_url: Option<String>,
    pub sources: Option<Vec<String>>,
    /// `{data, schema_validation}` once completed, otherwise null.
    #[schema(value_type = Object)]
    pub result: Option<JobResult>,
    /// Empty unless the job failed.
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for JobResponse {
    fn from(job: JobRecord) -> Self {
        Self {
            request_id: job.request_id,
            status: job.status.to_string(),
            graph: job.graph.to_string(),
            user_prompt: job.user_prompt,
            website_url: job.website_url,
            sources: job.sources,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub detail: String,
}
