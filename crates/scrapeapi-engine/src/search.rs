use std::time::Duration;

use reqwest::Client;
use scraper::{Html, Selector};
use scrapeapi_core::error::AppError;
use url::Url;

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
pub const DEFAULT_MAX_RESULTS: usize = 3;

/// Web search over the DuckDuckGo HTML endpoint.
#[derive(Clone)]
pub struct SearchClient {
    client: Client,
    endpoint: String,
}

impl SearchClient {
    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, DEFAULT_SEARCH_ENDPOINT)
    }

    pub fn with_endpoint(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    fn query_url(&self, query: &str) -> Result<Url, AppError> {
        Url::parse_with_params(&self.endpoint, [("q", query)])
            .map_err(|e| AppError::ConfigError(format!("Invalid search endpoint '{}': {e}", self.endpoint)))
    }

    /// Up to `max_results` distinct result URLs for `query`.
    pub async fn search(&self, query: &str, max_results: usize, timeout: Duration) -> Result<Vec<String>, AppError> {
        tracing::debug!(%query, max_results, "Searching");
        let url = self.query_url(query)?;
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AppError::NetworkError(format!("Search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "Search endpoint returned HTTP {}",
                status.as_u16()
            )));
        }
        let html = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read search results: {e}")))?;

        let links = parse_results(&html, max_results);
        if links.is_empty() {
            return Err(AppError::EngineError(format!(
                "search returned no results for '{query}'"
            )));
        }
        Ok(links)
    }
}

/// Extract result links from a DuckDuckGo HTML results page.
pub fn parse_results(html: &str, max_results: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a.result__a") else {
        return Vec::new();
    };

    let mut links: Vec<String> = Vec::new();
    for href in document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
    {
        if links.len() >= max_results {
            break;
        }
        if let Some(link) = resolve_link(href) {
            if !links.contains(&link) {
                links.push(link);
            }
        }
    }
    links
}

/// Unwrap DuckDuckGo redirect links (`//duckduckgo.com/l/?uddg=<target>`).
fn resolve_link(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;

    let target = if url.path().starts_with("/l/") {
        let (_, target) = url.query_pairs().find(|(k, _)| k == "uddg")?;
        Url::parse(&target).ok()?
    } else {
        url
    };

    match target.scheme() {
        "http" | "https" => Some(target.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS: &str = r#"
        <html><body>
          <div class="result">
            <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=abc">Rust</a>
          </div>
          <div class="result">
            <a class="result__a" href="https://docs.rs/axum">axum</a>
          </div>
          <div class="result">
            <a class="result__a" href="https://docs.rs/axum">axum again</a>
          </div>
          <div class="result">
            <a class="result__a" href="javascript:void(0)">ad</a>
          </div>
          <div class="result">
            <a class="result__a" href="https://tokio.rs/">tokio</a>
          </div>
          <a class="result__snippet" href="https://ignored.example">snippet</a>
        </body></html>
    "#;

    #[test]
    fn decodes_redirects_and_dedupes() {
        let links = parse_results(RESULTS, 10);
        assert_eq!(
            links,
            vec![
                "https://www.rust-lang.org/".to_string(),
                "https://docs.rs/axum".to_string(),
                "https://tokio.rs/".to_string(),
            ]
        );
    }

    #[test]
    fn respects_max_results() {
        assert_eq!(parse_results(RESULTS, 2).len(), 2);
        assert!(parse_results(RESULTS, 0).is_empty());
    }

    #[test]
    fn query_is_url_encoded() {
        let search = SearchClient::new(Client::new());
        let url = search.query_url("rust & tokio").unwrap();
        assert_eq!(url.host_str(), Some("html.duckduckgo.com"));
        assert_eq!(url.path(), "/html/");
        let (key, value) = url.query_pairs().next().unwrap();
        assert_eq!(key, "q");
        assert_eq!(value, "rust & tokio");
    }

    #[test]
    fn bad_endpoint_is_config_error() {
        let search = SearchClient::with_endpoint(Client::new(), "not a url");
        assert!(matches!(search.query_url("x"), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn empty_page_has_no_results() {
        assert!(parse_results("<html></html>", 3).is_empty());
    }
}
