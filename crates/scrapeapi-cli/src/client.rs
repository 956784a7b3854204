use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const TRACE_ID_HEADER: &str = "X-Trace-ID";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-200 answer from the API. `message` is the error body's `detail` when present.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Scraping failed: {0}")]
    JobFailed(String),

    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    #[error("Gave up waiting for job {request_id} after {waited:?}")]
    WaitTimeout { request_id: String, waited: Duration },
}

/// Submission body for `POST /v1/scrape`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeRequest {
    pub graph: String,
    pub user_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<i64>,
}

/// Job snapshot as returned by submit and poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub request_id: String,
    pub status: String,
    pub graph: String,
    pub user_prompt: String,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: String,
}

impl ScrapeResponse {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "failed")
    }
}

/// Thin client over the scrapeapi HTTP surface.
#[derive(Clone)]
pub struct ScrapeApiClient {
    http: reqwest::Client,
    base: Url,
    trace_id: Option<String>,
}

impl ScrapeApiClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let mut base =
            Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!(
                "{base_url}: scheme must be http or https"
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("scrapeapi-cli/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base,
            trace_id: None,
        })
    }

    /// Sent as `X-Trace-ID` on every request.
    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(format!("{path}: {e}")))
    }

    fn traced(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.trace_id {
            Some(id) => builder.header(TRACE_ID_HEADER, id),
            None => builder,
        }
    }

    pub async fn health(&self) -> Result<Value, ClientError> {
        let response = self
            .traced(self.http.get(self.endpoint("v1/health")?))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn start_scrape(&self, request: &ScrapeRequest) -> Result<ScrapeResponse, ClientError> {
        let response = self
            .traced(self.http.post(self.endpoint("v1/scrape")?))
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn get_scrape(&self, request_id: &str) -> Result<ScrapeResponse, ClientError> {
        let response = self
            .traced(self.http.get(self.endpoint(&format!("v1/scrape/{request_id}"))?))
            .send()
            .await?;
        decode(response).await
    }

    /// Poll every `interval` until the job is terminal.
    ///
    /// A `failed` job is returned as [`ClientError::JobFailed`]. With
    /// `deadline` set, waiting longer than that is an error too.
    pub async fn wait_for_completion(
        &self,
        request_id: &str,
        interval: Duration,
        deadline: Option<Duration>,
    ) -> Result<ScrapeResponse, ClientError> {
        let started = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let job = self.get_scrape(request_id).await?;
            match job.status.as_str() {
                "completed" => return Ok(job),
                "failed" => return Err(ClientError::JobFailed(job.error)),
                "queued" | "running" => {
                    tracing::debug!(request_id, status = %job.status, "Job still pending");
                }
                other => return Err(ClientError::UnknownStatus(other.to_string())),
            }

            if let Some(limit) = deadline
                && started.elapsed() >= limit
            {
                return Err(ClientError::WaitTimeout {
                    request_id: request_id.to_string(),
                    waited: started.elapsed(),
                });
            }
        }
    }

    /// Submit, then wait for the terminal snapshot.
    pub async fn scrape_and_wait(
        &self,
        request: &ScrapeRequest,
        interval: Duration,
        deadline: Option<Duration>,
    ) -> Result<ScrapeResponse, ClientError> {
        let job = self.start_scrape(request).await?;
        tracing::info!(request_id = %job.request_id, graph = %job.graph, "Job queued");
        self.wait_for_completion(&job.request_id, interval, deadline)
            .await
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("unknown").to_string()
            } else {
                body
            }
        });
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
