use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value, json};

use crate::job::ScrapeRequest;

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_LOADER_TIMEOUT_MS: u64 = 30_000;

/// One override layer of the runtime configuration, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    Defaults,
    Llm,
    Headless,
    LoaderKwargs,
    Verbose,
    MaxResults,
    Additional,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigLayer::Defaults => "defaults",
            ConfigLayer::Llm => "llm",
            ConfigLayer::Headless => "headless",
            ConfigLayer::LoaderKwargs => "loader_kwargs",
            ConfigLayer::Verbose => "verbose",
            ConfigLayer::MaxResults => "max_results",
            ConfigLayer::Additional => "additional_config",
        };
        f.write_str(name)
    }
}

/// Per-job engine configuration.
///
/// Built fresh for every job by overlaying the request's settings on the
/// defaults. Later layers win; `additional_config` goes last and may replace
/// any key, including ones set by earlier layers or unknown to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    values: Map<String, Value>,
    layers: Vec<ConfigLayer>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let mut values = Map::new();
        values.insert(
            "llm".to_string(),
            json!({"model": DEFAULT_MODEL, "temperature": 0.0}),
        );
        values.insert("headless".to_string(), Value::Bool(true));
        values.insert("verbose".to_string(), Value::Bool(true));
        values.insert(
            "loader_kwargs".to_string(),
            json!({"timeout": DEFAULT_LOADER_TIMEOUT_MS}),
        );
        Self {
            values,
            layers: vec![ConfigLayer::Defaults],
        }
    }
}

impl RuntimeConfig {
    /// Assemble the merged configuration for `request`.
    pub fn assemble(request: &ScrapeRequest) -> Self {
        let mut config = Self::default();
        if let Some(llm) = &request.llm {
            config.merge_object(ConfigLayer::Llm, "llm", llm);
        }
        if let Some(headless) = request.headless {
            config.set(ConfigLayer::Headless, "headless", Value::Bool(headless));
        }
        if let Some(loader_kwargs) = &request.loader_kwargs {
            config.merge_object(ConfigLayer::LoaderKwargs, "loader_kwargs", loader_kwargs);
        }
        if let Some(verbose) = request.verbose {
            config.set(ConfigLayer::Verbose, "verbose", Value::Bool(verbose));
        }
        if let Some(max_results) = request.max_results {
            config.set(ConfigLayer::MaxResults, "max_results", Value::from(max_results));
        }
        if let Some(additional) = &request.additional_config {
            config.extend(ConfigLayer::Additional, additional);
        }
        config
    }

    /// Merge `overrides` key-by-key into the object at `key`.
    pub fn merge_object(&mut self, layer: ConfigLayer, key: &str, overrides: &Map<String, Value>) {
        let slot = self
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(target) = slot {
            for (k, v) in overrides {
                target.insert(k.clone(), v.clone());
            }
        }
        self.layers.push(layer);
    }

    pub fn set(&mut self, layer: ConfigLayer, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
        self.layers.push(layer);
    }

    /// Insert every top-level key of `overrides`, replacing whole values.
    pub fn extend(&mut self, layer: ConfigLayer, overrides: &Map<String, Value>) {
        for (k, v) in overrides {
            self.values.insert(k.clone(), v.clone());
        }
        self.layers.push(layer);
    }

    /// Layers applied so far, in order.
    pub fn layers(&self) -> &[ConfigLayer] {
        &self.layers
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    fn llm(&self, key: &str) -> Option<&Value> {
        self.values.get("llm").and_then(|llm| llm.get(key))
    }

    pub fn model(&self) -> &str {
        self.llm("model")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MODEL)
    }

    pub fn temperature(&self) -> f64 {
        self.llm("temperature").and_then(Value::as_f64).unwrap_or(0.0)
    }

    pub fn api_key(&self) -> Option<&str> {
        self.llm("api_key").and_then(Value::as_str)
    }

    pub fn api_base(&self) -> Option<&str> {
        self.llm("api_base")
            .or_else(|| self.llm("base_url"))
            .and_then(Value::as_str)
    }

    /// Context budget in tokens, when the caller set `llm.model_tokens`.
    pub fn model_tokens(&self) -> Option<u64> {
        self.llm("model_tokens").and_then(Value::as_u64)
    }

    pub fn headless(&self) -> bool {
        self.values
            .get("headless")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn verbose(&self) -> bool {
        self.values
            .get("verbose")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Page-load timeout (`loader_kwargs.timeout`, milliseconds).
    pub fn loader_timeout(&self) -> Duration {
        let ms = self
            .values
            .get("loader_kwargs")
            .and_then(|l| l.get("timeout"))
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_LOADER_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    pub fn max_results(&self) -> Option<usize> {
        self.values
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    }
}
