use std::sync::Arc;

use htmd::HtmlToMarkdown;
use scrapeapi_core::error::AppError;

/// Rough characters-per-token ratio used to size page content.
const CHARS_PER_TOKEN: u64 = 4;

/// Context budget assumed when the request sets no `llm.model_tokens`.
pub const DEFAULT_MODEL_TOKENS: u64 = 128_000;

/// Tokens held back for the instructions and the answer.
const RESERVED_TOKENS: u64 = 4_000;

/// HTML-to-Markdown cleaner.
///
/// Non-content elements (script, style, nav, ...) are dropped so the page
/// costs as few tokens as possible.
#[derive(Clone)]
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl HtmdCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "aside", "noscript", "iframe", "svg",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    pub fn clean(&self, html: &str) -> Result<String, AppError> {
        self.converter
            .convert(html)
            .map(|md| md.trim().to_string())
            .map_err(|e| AppError::CleanerError(e.to_string()))
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}

/// Cut `markdown` down to what fits in a model with `model_tokens` of context.
pub fn fit_to_budget(markdown: &str, model_tokens: Option<u64>) -> &str {
    let tokens = model_tokens
        .unwrap_or(DEFAULT_MODEL_TOKENS)
        .saturating_sub(RESERVED_TOKENS)
        .max(256);
    let limit = usize::try_from(tokens.saturating_mul(CHARS_PER_TOKEN)).unwrap_or(usize::MAX);
    if markdown.len() <= limit {
        return markdown;
    }
    let mut end = limit;
    while !markdown.is_char_boundary(end) {
        end -= 1;
    }
    tracing::debug!(from = markdown.len(), to = end, "Truncated page content");
    &markdown[..end]
}
