use thiserror::Error;

/// Application-wide error types for scrapeapi.
#[derive(Error, Debug)]
pub enum AppError {
    /// The output schema document failed the draft-7 meta-schema check.
    #[error(
        "Invalid JSON Schema: {0}. Please provide a valid JSON Schema object with proper 'type' and 'properties' fields."
    )]
    InvalidSchema(String),

    /// The output schema is well-formed but cannot become a structured output type.
    #[error(
        "JSON Schema cannot be converted to a structured output type: {0}. Please ensure your schema uses supported JSON Schema features."
    )]
    SchemaConversion(String),

    /// The submission is missing something the requested graph needs.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Admission cap reached; no record was created.
    #[error("Too many jobs in flight (limit {0}), retry later")]
    Overloaded(usize),

    /// The graph run exceeded the job's timeout.
    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    /// The extraction engine failed while building or running a graph.
    #[error("Engine error: {0}")]
    EngineError(String),

    /// HTTP request failed (loading a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// LLM API call failed.
    #[error("LLM error (HTTP {status_code}): {message}")]
    LlmError { message: String, status_code: u16 },

    /// HTML-to-Markdown conversion failed.
    #[error("Cleaner error: {0}")]
    CleanerError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Broken internal invariant (e.g. an illegal job transition).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true if the caller is at fault and the request should be
    /// rejected with a 4xx status.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidSchema(_)
                | AppError::SchemaConversion(_)
                | AppError::InvalidRequest(_)
                | AppError::NotFound(_)
        )
    }

    /// Short machine-readable kind, used as the `error` field of API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidSchema(_) | AppError::SchemaConversion(_) => "schema_error",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::NotFound(_) => "not_found",
            AppError::Overloaded(_) => "overloaded",
            AppError::Timeout(_) => "timeout",
            AppError::EngineError(_) => "engine_error",
            AppError::HttpError(_) | AppError::NetworkError(_) => "fetch_error",
            AppError::LlmError { .. } => "llm_error",
            AppError::CleanerError(_) => "cleaner_error",
            AppError::Io(_) => "io_error",
            AppError::SerializationError(_) => "serialization_error",
            AppError::ConfigError(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}
