use std::sync::Arc;

use scrapeapi_core::config::RuntimeConfig;
use scrapeapi_core::error::AppError;
use scrapeapi_core::schema::OutputShape;
use scrapeapi_core::traits::{GraphEngine, RunnableGraph};
use tokio::runtime::Handle;

use crate::graphs::{MultiGraph, Pipeline, SearchGraph, SmartGraph};
use crate::llm::{ChatClient, ChatSettings, DEFAULT_API_BASE};
use crate::loader::PageLoader;
use crate::search::{DEFAULT_SEARCH_ENDPOINT, SearchClient};

/// Process-level engine settings.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// Used when a request's `llm` map carries no `api_key`.
    pub api_key: Option<String>,
    /// Used when a request's `llm` map carries no `api_base`.
    pub api_base: Option<String>,
    pub allow_private_urls: bool,
    pub search_endpoint: Option<String>,
}

impl EngineSettings {
    /// `OPENAI_API_KEY` and `OPENAI_API_BASE`; empty values count as unset.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            api_key: var("OPENAI_API_KEY"),
            api_base: var("OPENAI_API_BASE"),
            allow_private_urls: false,
            search_endpoint: None,
        }
    }

    pub fn allow_private_urls(mut self, allow: bool) -> Self {
        self.allow_private_urls = allow;
        self
    }
}

/// [`GraphEngine`] backed by an OpenAI-compatible chat endpoint.
pub struct LlmEngine {
    settings: EngineSettings,
    loader: PageLoader,
    search: SearchClient,
    handle: Handle,
}

impl LlmEngine {
    /// Must be called from inside a Tokio runtime; graphs run on its handle.
    pub fn new(settings: EngineSettings) -> Result<Self, AppError> {
        let handle = Handle::try_current()
            .map_err(|e| AppError::ConfigError(format!("engine needs a Tokio runtime: {e}")))?;

        let mut loader = PageLoader::new()?;
        if settings.allow_private_urls {
            tracing::warn!("SSRF protection disabled for page loading");
            loader = loader.allow_private_urls();
        }
        let search = SearchClient::with_endpoint(
            loader.client().clone(),
            settings
                .search_endpoint
                .as_deref()
                .unwrap_or(DEFAULT_SEARCH_ENDPOINT),
        );

        Ok(Self {
            settings,
            loader,
            search,
            handle,
        })
    }

    fn pipeline(&self, config: &RuntimeConfig) -> Result<Arc<Pipeline>, AppError> {
        let chat = ChatSettings::from_config(
            config,
            self.settings.api_key.as_deref(),
            self.settings.api_base.as_deref(),
        );
        // Self-hosted endpoints often need no key; the hosted default does.
        if chat.api_key.is_none() && chat.api_base == DEFAULT_API_BASE {
            return Err(AppError::EngineError(format!(
                "no API key configured for model '{}'; set llm.api_key or OPENAI_API_KEY",
                config.model()
            )));
        }
        let chat = ChatClient::new(self.loader.client().clone(), chat);
        Ok(Arc::new(Pipeline::new(self.loader.clone(), chat, config)))
    }
}

impl GraphEngine for LlmEngine {
    fn smart(
        &self,
        prompt: &str,
        source: &str,
        config: &RuntimeConfig,
        shape: &OutputShape,
    ) -> Result<Box<dyn RunnableGraph>, AppError> {
        let pipeline = self.pipeline(config)?;
        Ok(Box::new(SmartGraph::new(
            pipeline,
            self.handle.clone(),
            prompt,
            source,
            shape,
        )))
    }

    fn multi(
        &self,
        prompt: &str,
        sources: &[String],
        config: &RuntimeConfig,
        shape: &OutputShape,
    ) -> Result<Box<dyn RunnableGraph>, AppError> {
        let pipeline = self.pipeline(config)?;
        Ok(Box::new(MultiGraph::new(
            pipeline,
            self.handle.clone(),
            prompt,
            sources,
            shape,
        )))
    }

    fn search(
        &self,
        prompt: &str,
        query: Option<&str>,
        config: &RuntimeConfig,
        shape: &OutputShape,
    ) -> Result<Box<dyn RunnableGraph>, AppError> {
        let pipeline = self.pipeline(config)?;
        Ok(Box::new(SearchGraph::new(
            pipeline,
            self.search.clone(),
            self.handle.clone(),
            prompt,
            query.unwrap_or(prompt),
            config.max_results(),
            shape,
        )))
    }
}

#[cfg(test)]
mod tests {
    use scrapeapi_core::job::{GraphKind, ScrapeRequest};
    use serde_json::json;

    use super::*;

    fn config(llm: serde_json::Value) -> RuntimeConfig {
        let mut req = ScrapeRequest::new(GraphKind::Smart, "q");
        req.llm = llm.as_object().cloned();
        RuntimeConfig::assemble(&req)
    }

    #[tokio::test]
    async fn hosted_default_requires_key() {
        let engine = LlmEngine::new(EngineSettings::default()).unwrap();
        let err = match engine.smart("q", "https://example.com", &config(json!({})), &OutputShape::Free) {
            Err(e) => e,
            Ok(_) => panic!("expected missing key error"),
        };
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn self_hosted_endpoint_needs_no_key() {
        let engine = LlmEngine::new(EngineSettings::default()).unwrap();
        let config = config(json!({"model": "ollama/llama3", "api_base": "http://localhost:11434/v1"}));
        assert!(engine.multi("q", &["https://a.example".to_string()], &config, &OutputShape::Free).is_ok());
        assert!(engine.search("q", None, &config, &OutputShape::Free).is_ok());
    }

    #[tokio::test]
    async fn fallback_key_satisfies_hosted_default() {
        let settings = EngineSettings {
            api_key: Some("sk-env".to_string()),
            ..EngineSettings::default()
        };
        let engine = LlmEngine::new(settings).unwrap();
        assert!(engine.smart("q", "https://example.com", &config(json!({})), &OutputShape::Free).is_ok());
    }

    #[test]
    fn needs_runtime() {
        assert!(matches!(
            LlmEngine::new(EngineSettings::default()),
            Err(AppError::ConfigError(_))
        ));
    }
}
