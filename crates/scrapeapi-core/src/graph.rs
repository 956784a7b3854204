use std::io::Write;

use serde_json::Value;
use tempfile::NamedTempFile;

use crate::config::RuntimeConfig;
use crate::error::AppError;
use crate::job::{GraphKind, ScrapeRequest};
use crate::schema::OutputShape;
use crate::traits::{GraphEngine, RunnableGraph};

/// Where a single-source graph reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmartSource<'a> {
    Url(&'a str),
    Html(&'a str),
    Listed(&'a str),
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn listed_sources(request: &ScrapeRequest) -> Option<&[String]> {
    request.sources.as_deref().filter(|s| !s.is_empty())
}

/// Resolve the single source of a `smart` graph: explicit URL, then inline
/// HTML, then the first listed source.
pub fn resolve_smart_source(request: &ScrapeRequest) -> Result<SmartSource<'_>, AppError> {
    if let Some(url) = non_empty(&request.website_url) {
        return Ok(SmartSource::Url(url));
    }
    if let Some(html) = non_empty(&request.website_html) {
        return Ok(SmartSource::Html(html));
    }
    if let Some(first) = listed_sources(request).and_then(|s| s.first()) {
        return Ok(SmartSource::Listed(first));
    }
    Err(AppError::InvalidRequest(
        "smart graph requires website_url or website_html or sources[0]".to_string(),
    ))
}

/// Submission-time source check: the same rules the builder applies, without
/// touching the filesystem.
pub fn validate_sources(request: &ScrapeRequest) -> Result<(), AppError> {
    match request.graph {
        GraphKind::Smart => resolve_smart_source(request).map(|_| ()),
        GraphKind::Multi => listed_sources(request).map(|_| ()).ok_or_else(|| {
            AppError::InvalidRequest("multi graph requires sources: [url, ...]".to_string())
        }),
        GraphKind::Search => Ok(()),
    }
}

/// A graph ready to run, plus whatever it needs to stay alive while running.
///
/// Inline HTML is materialized to a temporary file; the file is removed when
/// the run finishes (or when the graph is dropped without running).
pub struct BuiltGraph {
    kind: GraphKind,
    runnable: Box<dyn RunnableGraph>,
    html_file: Option<NamedTempFile>,
}

impl BuiltGraph {
    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    pub fn run(self) -> Result<Value, AppError> {
        let BuiltGraph {
            runnable,
            html_file,
            ..
        } = self;
        let result = runnable.run();
        if let Some(file) = html_file {
            if let Err(e) = file.close() {
                tracing::warn!(error = %e, "Failed to remove inline HTML file");
            }
        }
        result
    }
}

/// Translate a request into a runnable graph on `engine`.
pub fn build_graph(
    engine: &dyn GraphEngine,
    request: &ScrapeRequest,
    config: &RuntimeConfig,
    shape: &OutputShape,
) -> Result<BuiltGraph, AppError> {
    let prompt = request.user_prompt.as_str();

    match request.graph {
        GraphKind::Smart => {
            let (source, html_file) = match resolve_smart_source(request)? {
                SmartSource::Url(url) => (url.to_string(), None),
                SmartSource::Html(html) => {
                    let file = materialize_html(html)?;
                    (file.path().to_string_lossy().into_owned(), Some(file))
                }
                SmartSource::Listed(source) => (source.to_string(), None),
            };
            tracing::debug!(%source, shape = shape.label(), "Building smart graph");
            let runnable = engine.smart(prompt, &source, config, shape)?;
            Ok(BuiltGraph {
                kind: GraphKind::Smart,
                runnable,
                html_file,
            })
        }
        GraphKind::Multi => {
            let sources = listed_sources(request).ok_or_else(|| {
                AppError::InvalidRequest("multi graph requires sources list".to_string())
            })?;
            tracing::debug!(sources = sources.len(), shape = shape.label(), "Building multi graph");
            let runnable = engine.multi(prompt, sources, config, shape)?;
            Ok(BuiltGraph {
                kind: GraphKind::Multi,
                runnable,
                html_file: None,
            })
        }
        GraphKind::Search => {
            let query = non_empty(&request.search_query);
            tracing::debug!(?query, shape = shape.label(), "Building search graph");
            let runnable = engine.search(prompt, query, config, shape)?;
            Ok(BuiltGraph {
                kind: GraphKind::Search,
                runnable,
                html_file: None,
            })
        }
    }
}

fn materialize_html(html: &str) -> Result<NamedTempFile, AppError> {
    let mut file = tempfile::Builder::new()
        .prefix("scrapeapi-")
        .suffix(".html")
        .tempfile()?;
    file.write_all(html.as_bytes())?;
    file.flush()?;
    Ok(file)
}
