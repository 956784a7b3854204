use std::time::Duration;

use reqwest::Client;
use scrapeapi_core::config::RuntimeConfig;
use scrapeapi_core::error::AppError;
use scrapeapi_core::schema::OutputShape;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);

const EXTRACT_SYSTEM_PROMPT: &str = "You are a website scraper. You have been given the content of a web page \
and a question about it. Answer using only information present in the content. \
Respond ONLY with a single valid JSON object. Do not include explanations.";

const MERGE_SYSTEM_PROMPT: &str = "You are merging answers that were extracted independently from several web pages. \
Combine them into one JSON object that answers the question, removing duplicates and keeping every distinct fact. \
Respond ONLY with a single valid JSON object. Do not include explanations.";

/// Connection settings for an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
}

impl ChatSettings {
    /// Read model settings from the job config, falling back to the given
    /// process-level credentials.
    ///
    /// The fallback key is only paired with the fallback (or default) base
    /// URL. A job pointing `api_base` elsewhere must carry its own key.
    pub fn from_config(
        config: &RuntimeConfig,
        fallback_key: Option<&str>,
        fallback_base: Option<&str>,
    ) -> Self {
        let server_base = fallback_base
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        let api_base = config
            .api_base()
            .map_or(server_base, |base| base.trim_end_matches('/'));

        let api_key = match config.api_key() {
            Some(key) => Some(key),
            None if api_base == server_base => fallback_key,
            None => {
                tracing::debug!(%api_base, "Custom api_base without api_key, sending no credentials");
                None
            }
        };

        Self {
            api_base: api_base.to_string(),
            api_key: api_key.map(str::to_string),
            model: model_name(config.model()).to_string(),
            temperature: config.temperature(),
        }
    }
}

/// Strip a `provider/` routing prefix (`openai/gpt-4o-mini` → `gpt-4o-mini`).
pub fn model_name(model: &str) -> &str {
    model.split_once('/').map_or(model, |(_, name)| name)
}

/// OpenAI-compatible chat client for JSON extraction.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    settings: ChatSettings,
}

impl ChatClient {
    pub fn new(client: Client, settings: ChatSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Answer `prompt` from one page's content.
    pub async fn extract(&self, prompt: &str, content: &str, shape: &OutputShape) -> Result<Value, AppError> {
        let user = format!(
            "{}\n\nQuestion: {prompt}\n\nWebsite content:\n{content}",
            shape_instructions(shape)
        );
        self.complete(EXTRACT_SYSTEM_PROMPT, user, shape).await
    }

    /// Merge per-source answers into one.
    pub async fn merge(&self, prompt: &str, answers: &[Value], shape: &OutputShape) -> Result<Value, AppError> {
        let rendered = answers
            .iter()
            .enumerate()
            .map(|(i, answer)| format!("Answer {}:\n{answer}", i + 1))
            .collect::<Vec<_>>()
            .join("\n\n");
        let user = format!(
            "{}\n\nQuestion: {prompt}\n\nAnswers to merge:\n{rendered}",
            shape_instructions(shape)
        );
        self.complete(MERGE_SYSTEM_PROMPT, user, shape).await
    }

    async fn complete(&self, system: &str, user: String, shape: &OutputShape) -> Result<Value, AppError> {
        let url = format!("{}/chat/completions", self.settings.api_base);
        let request = ChatRequest {
            model: &self.settings.model,
            temperature: self.settings.temperature,
            messages: vec![
                Message {
                    role: "system",
                    content: system.to_string(),
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            response_format: response_format(shape),
        };

        let mut builder = self.client.post(&url).timeout(DEFAULT_LLM_TIMEOUT).json(&request);
        if let Some(key) = &self.settings.api_key {
            builder = builder.bearer_auth(key);
        }

        tracing::debug!(model = %self.settings.model, "Calling chat completions");
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::LlmError {
                    message: format!("request timed out after {}s", DEFAULT_LLM_TIMEOUT.as_secs()),
                    status_code: 504,
                }
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));
            return Err(AppError::LlmError {
                message,
                status_code,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse LLM response: {e}")))?;

        let content = chat
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from LLM".to_string(),
                status_code: 200,
            })?;

        parse_json_answer(content)
    }
}

fn shape_instructions(shape: &OutputShape) -> String {
    match shape {
        OutputShape::Free => "Choose a sensible JSON structure for the answer.".to_string(),
        OutputShape::Advisory(example) => {
            format!("Shape the answer like this example:\n{example}")
        }
        OutputShape::Strict(schema) => format!(
            "The answer must match this JSON schema:\n{}\nField summary: {}",
            schema.document(),
            schema.shape().signature()
        ),
    }
}

fn response_format(shape: &OutputShape) -> ResponseFormat {
    match shape {
        OutputShape::Strict(schema) => ResponseFormat {
            kind: "json_schema",
            json_schema: Some(JsonSchemaFormat {
                name: "extraction",
                // User schemas rarely meet strict mode's closed-object rules.
                strict: false,
                schema: schema.document().clone(),
            }),
        },
        OutputShape::Free | OutputShape::Advisory(_) => ResponseFormat {
            kind: "json_object",
            json_schema: None,
        },
    }
}

/// Parse the model's answer, tolerating a surrounding Markdown code fence.
pub fn parse_json_answer(raw: &str) -> Result<Value, AppError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body).map_err(|e| AppError::LlmError {
        message: format!("LLM returned invalid JSON: {e}. Raw: {raw}"),
        status_code: 200,
    })
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_schema: Option<JsonSchemaFormat>,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}
