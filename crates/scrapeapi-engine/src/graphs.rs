//! The three extraction graphs.
//!
//! Each graph is a synchronous [`RunnableGraph`] wrapping an async pipeline.
//! `run` is called on a blocking thread, so it drives the pipeline with the
//! runtime handle captured when the graph was built.

use std::sync::Arc;
use std::time::Duration;

use scrapeapi_core::config::RuntimeConfig;
use scrapeapi_core::error::AppError;
use scrapeapi_core::schema::OutputShape;
use scrapeapi_core::traits::RunnableGraph;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::task::JoinSet;

use crate::cleaner::{HtmdCleaner, fit_to_budget};
use crate::llm::ChatClient;
use crate::loader::PageLoader;
use crate::search::{DEFAULT_MAX_RESULTS, SearchClient};

/// Load → clean → extract, shared by every graph of one job.
pub struct Pipeline {
    loader: PageLoader,
    cleaner: HtmdCleaner,
    chat: ChatClient,
    load_timeout: Duration,
    headless: bool,
    verbose: bool,
    model_tokens: Option<u64>,
}

impl Pipeline {
    pub fn new(loader: PageLoader, chat: ChatClient, config: &RuntimeConfig) -> Self {
        Self {
            loader,
            cleaner: HtmdCleaner::new(),
            chat,
            load_timeout: config.loader_timeout(),
            headless: config.headless(),
            verbose: config.verbose(),
            model_tokens: config.model_tokens(),
        }
    }

    /// Answer `prompt` from a single source.
    pub async fn answer(&self, prompt: &str, source: &str, shape: &OutputShape) -> Result<Value, AppError> {
        let html = self
            .loader
            .load(source, self.load_timeout, self.headless)
            .await?;
        let markdown = self.cleaner.clean(&html)?;
        let content = fit_to_budget(&markdown, self.model_tokens);
        if self.verbose {
            tracing::info!(%source, html_bytes = html.len(), markdown_bytes = content.len(), "Page loaded");
        } else {
            tracing::debug!(%source, html_bytes = html.len(), markdown_bytes = content.len(), "Page loaded");
        }
        self.chat.extract(prompt, content, shape).await
    }

    /// Answer from every source concurrently, then merge.
    ///
    /// Sources that fail are logged and skipped; the call fails only when
    /// every source failed.
    pub async fn answer_all(
        self: &Arc<Self>,
        prompt: &str,
        sources: &[String],
        shape: &OutputShape,
    ) -> Result<Value, AppError> {
        let mut tasks = JoinSet::new();
        for (index, source) in sources.iter().enumerate() {
            let pipeline = Arc::clone(self);
            let prompt = prompt.to_string();
            let source = source.clone();
            let shape = shape.clone();
            tasks.spawn(async move {
                let answer = pipeline.answer(&prompt, &source, &shape).await;
                (index, source, answer)
            });
        }

        let mut answers: Vec<(usize, Value)> = Vec::new();
        let mut first_error: Option<AppError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(answer))) => answers.push((index, answer)),
                Ok((_, source, Err(e))) => {
                    tracing::warn!(%source, error = %e, "Source failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Source task aborted");
                    if first_error.is_none() {
                        first_error = Some(AppError::EngineError(e.to_string()));
                    }
                }
            }
        }

        answers.sort_by_key(|(index, _)| *index);
        let mut answers: Vec<Value> = answers.into_iter().map(|(_, a)| a).collect();
        match answers.len() {
            0 => Err(first_error
                .unwrap_or_else(|| AppError::EngineError("no sources to answer from".to_string()))),
            1 => Ok(answers.remove(0)),
            _ => self.chat.merge(prompt, &answers, shape).await,
        }
    }
}

/// Single-source extraction.
pub struct SmartGraph {
    pipeline: Arc<Pipeline>,
    handle: Handle,
    prompt: String,
    source: String,
    shape: OutputShape,
}

impl SmartGraph {
    pub fn new(pipeline: Arc<Pipeline>, handle: Handle, prompt: &str, source: &str, shape: &OutputShape) -> Self {
        Self {
            pipeline,
            handle,
            prompt: prompt.to_string(),
            source: source.to_string(),
            shape: shape.clone(),
        }
    }
}

impl RunnableGraph for SmartGraph {
    fn run(self: Box<Self>) -> Result<Value, AppError> {
        let graph = *self;
        graph.handle.block_on(
            graph
                .pipeline
                .answer(&graph.prompt, &graph.source, &graph.shape),
        )
    }
}

/// Extraction over a list of sources, merged into one answer.
pub struct MultiGraph {
    pipeline: Arc<Pipeline>,
    handle: Handle,
    prompt: String,
    sources: Vec<String>,
    shape: OutputShape,
}

impl MultiGraph {
    pub fn new(
        pipeline: Arc<Pipeline>,
        handle: Handle,
        prompt: &str,
        sources: &[String],
        shape: &OutputShape,
    ) -> Self {
        Self {
            pipeline,
            handle,
            prompt: prompt.to_string(),
            sources: sources.to_vec(),
            shape: shape.clone(),
        }
    }
}

impl RunnableGraph for MultiGraph {
    fn run(self: Box<Self>) -> Result<Value, AppError> {
        let graph = *self;
        graph.handle.block_on(
            graph
                .pipeline
                .answer_all(&graph.prompt, &graph.sources, &graph.shape),
        )
    }
}

/// Search, then extract from the top results.
pub struct SearchGraph {
    pipeline: Arc<Pipeline>,
    search: SearchClient,
    handle: Handle,
    prompt: String,
    query: String,
    max_results: usize,
    shape: OutputShape,
}

impl SearchGraph {
    pub fn new(
        pipeline: Arc<Pipeline>,
        search: SearchClient,
        handle: Handle,
        prompt: &str,
        query: &str,
        max_results: Option<usize>,
        shape: &OutputShape,
    ) -> Self {
        Self {
            pipeline,
            search,
            handle,
            prompt: prompt.to_string(),
            query: query.to_string(),
            max_results: max_results.filter(|n| *n > 0).unwrap_or(DEFAULT_MAX_RESULTS),
            shape: shape.clone(),
        }
    }

    async fn execute(&self) -> Result<Value, AppError> {
        let links = self
            .search
            .search(&self.query, self.max_results, self.pipeline.load_timeout)
            .await?;
        tracing::info!(results = links.len(), "Search finished");
        let answer = self
            .pipeline
            .answer_all(&self.prompt, &links, &self.shape)
            .await?;
        Ok(with_sources(answer, links))
    }
}

impl RunnableGraph for SearchGraph {
    fn run(self: Box<Self>) -> Result<Value, AppError> {
        let handle = self.handle.clone();
        handle.block_on(self.execute())
    }
}

/// Attach the consulted URLs. Non-object answers are wrapped.
fn with_sources(answer: Value, links: Vec<String>) -> Value {
    let links = Value::from(links);
    match answer {
        Value::Object(mut map) => {
            map.insert("sources".to_string(), links);
            Value::Object(map)
        }
        other => {
            let mut map = Map::new();
            map.insert("answer".to_string(), other);
            map.insert("sources".to_string(), links);
            Value::Object(map)
        }
    }
}
