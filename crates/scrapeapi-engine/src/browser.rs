use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use scrapeapi_core::error::AppError;
use tokio::sync::OnceCell;

/// Headless Chromium renderer for JavaScript-heavy pages.
///
/// The browser process is launched on first use and shared by every clone;
/// each render opens a tab, reads the DOM, and closes the tab.
#[derive(Clone, Default)]
pub struct BrowserLoader {
    browser: Arc<OnceCell<Arc<Browser>>>,
}

impl BrowserLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn render(&self, url: &str, timeout: Duration) -> Result<String, AppError> {
        let browser = self.browser.get_or_try_init(launch).await?;

        let rendered = tokio::time::timeout(timeout, async {
            let page = browser
                .new_page(url)
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to navigate to {url}: {e}")))?;

            page.find_element("body")
                .await
                .map_err(|e| AppError::HttpError(format!("Page did not render body: {e}")))?;

            let html = page
                .content()
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to read page content: {e}")))?;

            if let Err(e) = page.close().await {
                tracing::debug!(error = %e, "Failed to close browser tab");
            }
            Ok::<String, AppError>(html)
        })
        .await;

        rendered.unwrap_or_else(|_| {
            Err(AppError::HttpError(format!(
                "Rendering {url} timed out after {}s",
                timeout.as_secs()
            )))
        })
    }
}

async fn launch() -> Result<Arc<Browser>, AppError> {
    let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();
    if let Some(bin) = chrome_binary() {
        tracing::info!(path = %bin.display(), "Using Chrome binary");
        builder = builder.chrome_executable(bin);
    }

    let config = builder
        .arg("--headless=new")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--no-first-run")
        .build()
        .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| AppError::EngineError(format!("Failed to launch browser: {e}")))?;

    // The CDP handler has to be polled for the connection to make progress.
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::warn!(error = %e, "Browser CDP handler error");
                break;
            }
        }
    });

    Ok(Arc::new(browser))
}

/// `CHROME_BIN`, then the usual install locations. `None` lets chromiumoxide
/// search on its own.
fn chrome_binary() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}
