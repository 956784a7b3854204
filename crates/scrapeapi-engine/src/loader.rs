use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, header, redirect};
use scrapeapi_core::error::AppError;
use url::Url;

#[cfg(feature = "browser")]
use crate::browser::BrowserLoader;

const USER_AGENT: &str = "scrapeapi/0.1 (+https://github.com/scrapeapi)";
const MAX_REDIRECTS: usize = 10;

/// A graph source after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Remote(Url),
    Local(PathBuf),
}

impl Source {
    /// Classify `raw` as an http(s) URL, a `file://` URL, or a bare path.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::InvalidRequest("empty source".to_string()));
        }
        match Url::parse(raw) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(Source::Remote(url)),
                "file" => url
                    .to_file_path()
                    .map(Source::Local)
                    .map_err(|()| AppError::InvalidRequest(format!("Invalid file URL: {raw}"))),
                scheme => Err(AppError::InvalidRequest(format!(
                    "Source scheme '{scheme}' is not supported (http, https, file)"
                ))),
            },
            // No scheme: a filesystem path.
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Source::Local(PathBuf::from(raw))),
            Err(e) => Err(AppError::InvalidRequest(format!("Invalid source '{raw}': {e}"))),
        }
    }
}

/// Loads page HTML from the network or the local filesystem.
///
/// With SSRF protection on (the default), remote hosts that resolve to
/// private or reserved addresses are refused, and local reads are confined
/// to the system temp directory where inline HTML is materialized.
#[derive(Clone)]
pub struct PageLoader {
    client: Client,
    /// Never follows redirects itself; [`PageLoader::fetch`] checks every hop.
    page_client: Client,
    ssrf_protection: bool,
    #[cfg(feature = "browser")]
    browser: BrowserLoader,
}

impl PageLoader {
    pub fn new() -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;
        let page_client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            page_client,
            ssrf_protection: true,
            #[cfg(feature = "browser")]
            browser: BrowserLoader::new(),
        })
    }

    /// Disable SSRF protection and allow reading any local path.
    ///
    /// Only for deployments where every caller is trusted.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Load the HTML behind `source`.
    ///
    /// `headless` selects the rendering browser for remote pages when the
    /// `browser` feature is compiled in; otherwise pages are fetched as-is.
    pub async fn load(&self, source: &str, timeout: Duration, headless: bool) -> Result<String, AppError> {
        match Source::parse(source)? {
            Source::Local(path) => self.read_local(&path).await,
            Source::Remote(url) => {
                if self.ssrf_protection {
                    validate_remote(&url).await?;
                }
                if headless {
                    return self.render(&url, timeout).await;
                }
                self.fetch(&url, timeout).await
            }
        }
    }

    #[cfg(feature = "browser")]
    async fn render(&self, url: &Url, timeout: Duration) -> Result<String, AppError> {
        self.browser.render(url.as_str(), timeout).await
    }

    #[cfg(not(feature = "browser"))]
    async fn render(&self, url: &Url, timeout: Duration) -> Result<String, AppError> {
        self.fetch(url, timeout).await
    }

    /// GET `url`, following up to [`MAX_REDIRECTS`] redirects. Each redirect
    /// target goes through the SSRF check before it is requested.
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<String, AppError> {
        let mut current = url.clone();
        for hop in 0..=MAX_REDIRECTS {
            tracing::debug!(url = %current, hop, "Fetching page");
            let response = self
                .page_client
                .get(current.clone())
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        AppError::HttpError(format!(
                            "Loading {current} timed out after {}s",
                            timeout.as_secs()
                        ))
                    } else if e.is_connect() {
                        AppError::NetworkError(format!("Connection failed: {e}"))
                    } else {
                        AppError::HttpError(e.to_string())
                    }
                })?;

            let status = response.status();
            if status.is_redirection() {
                let next = redirect_target(&current, response.headers())?;
                if self.ssrf_protection {
                    validate_remote(&next).await?;
                }
                current = next;
                continue;
            }
            if !status.is_success() {
                return Err(AppError::HttpError(format!(
                    "HTTP {} for {}",
                    status.as_u16(),
                    current
                )));
            }

            return response
                .text()
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")));
        }

        Err(AppError::HttpError(format!(
            "Too many redirects loading {url}"
        )))
    }

    async fn read_local(&self, path: &Path) -> Result<String, AppError> {
        if self.ssrf_protection && !is_inside_temp_dir(path) {
            return Err(AppError::HttpError(format!(
                "Local source {} is outside the temp directory",
                path.display()
            )));
        }
        tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::HttpError(format!("Failed to read {}: {e}", path.display()))
        })
    }
}

/// Resolve a redirect's `Location` against the URL that answered it.
fn redirect_target(from: &Url, headers: &header::HeaderMap) -> Result<Url, AppError> {
    let location = headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::HttpError(format!("Redirect from {from} has no Location")))?;
    let next = from
        .join(location)
        .map_err(|e| AppError::HttpError(format!("Invalid redirect from {from} to '{location}': {e}")))?;
    match next.scheme() {
        "http" | "https" => Ok(next),
        scheme => Err(AppError::HttpError(format!(
            "Redirect from {from} to unsupported scheme '{scheme}'"
        ))),
    }
}

fn is_inside_temp_dir(path: &Path) -> bool {
    let Ok(temp) = std::env::temp_dir().canonicalize() else {
        return false;
    };
    path.canonicalize().is_ok_and(|p| p.starts_with(temp))
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Reject URLs whose host is, or resolves to, a private or reserved address.
async fn validate_remote(url: &Url) -> Result<(), AppError> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::HttpError("URL has no host".to_string()))?;

    // IPv6 literals come back bracketed from `host_str`.
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return if is_private_ip(ip) {
            Err(blocked(host, ip))
        } else {
            Ok(())
        };
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }
    match addrs.iter().map(|a| a.ip()).find(|ip| is_private_ip(*ip)) {
        Some(ip) => Err(blocked(host, ip)),
        None => Ok(()),
    }
}

fn blocked(host: &str, ip: IpAddr) -> AppError {
    AppError::HttpError(format!(
        "SSRF blocked: {host} resolves to private/reserved IP {ip}"
    ))
}

/// Private, loopback, link-local, CGN, documentation, and unspecified ranges.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || (a == 100 && (b & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFFC0) == 0xFE80
                || (first & 0xFE00) == 0xFC00
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Answers each connection with the next canned raw HTTP response.
    async fn fake_site(responses: Vec<String>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        Url::parse(&format!("http://{addr}/start")).unwrap()
    }

    fn redirect_to(location: &str) -> String {
        format!("HTTP/1.1 302 Found\r\nlocation: {location}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
    }

    fn page(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/html\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[test]
    fn classifies_sources() {
        assert!(matches!(
            Source::parse("https://example.com/a").unwrap(),
            Source::Remote(_)
        ));
        assert_eq!(
            Source::parse("/tmp/page.html").unwrap(),
            Source::Local(PathBuf::from("/tmp/page.html"))
        );
        assert_eq!(
            Source::parse("file:///tmp/page.html").unwrap(),
            Source::Local(PathBuf::from("/tmp/page.html"))
        );
        assert!(Source::parse("ftp://example.com/x").is_err());
        assert!(Source::parse("   ").is_err());
    }

    #[test]
    fn private_ranges() {
        for ip in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "100.64.0.1",
            "0.0.0.0",
            "::1",
            "fe80::1",
            "fd00::1",
            "::ffff:10.0.0.1",
        ] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip} should be private");
        }
        for ip in ["8.8.8.8", "1.1.1.1", "2606:4700:4700::1111"] {
            assert!(!is_private_ip(ip.parse().unwrap()), "{ip} should be public");
        }
    }

    #[tokio::test]
    async fn blocks_private_literals() {
        let loader = PageLoader::new().unwrap();
        let err = loader
            .load("http://169.254.169.254/latest/meta-data/", Duration::from_secs(1), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));

        let err = loader
            .load("http://[::1]:8080/", Duration::from_secs(1), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
    }

    #[test]
    fn resolves_redirect_locations() {
        let from = Url::parse("https://example.com/a/b").unwrap();
        let mut headers = header::HeaderMap::new();

        headers.insert(header::LOCATION, "/c".parse().unwrap());
        assert_eq!(redirect_target(&from, &headers).unwrap().as_str(), "https://example.com/c");

        headers.insert(header::LOCATION, "http://10.0.0.5/admin".parse().unwrap());
        assert_eq!(redirect_target(&from, &headers).unwrap().host_str(), Some("10.0.0.5"));

        headers.insert(header::LOCATION, "file:///etc/passwd".parse().unwrap());
        assert!(redirect_target(&from, &headers).is_err());

        assert!(redirect_target(&from, &header::HeaderMap::new()).is_err());
    }

    #[tokio::test]
    async fn redirect_into_private_range_is_blocked() {
        let start = fake_site(vec![redirect_to("http://10.0.0.5/admin")]).await;

        // `load` has already vetted the first hop; every later hop is checked here.
        let loader = PageLoader::new().unwrap();
        let err = loader.fetch(&start, Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"), "{err}");
    }

    #[tokio::test]
    async fn follows_redirects_when_private_urls_allowed() {
        let start = fake_site(vec![redirect_to("/landing"), page("<h1>Landed</h1>")]).await;

        let loader = PageLoader::new().unwrap().allow_private_urls();
        let html = loader.fetch(&start, Duration::from_secs(5)).await.unwrap();
        assert_eq!(html, "<h1>Landed</h1>");
    }

    #[tokio::test]
    async fn redirect_loops_give_up() {
        let start = fake_site(vec![redirect_to("/start"); MAX_REDIRECTS + 1]).await;

        let loader = PageLoader::new().unwrap().allow_private_urls();
        let err = loader.fetch(&start, Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("Too many redirects"), "{err}");
    }

    #[tokio::test]
    async fn reads_temp_files() {
        let mut file = tempfile::Builder::new().suffix(".html").tempfile().unwrap();
        file.write_all(b"<h1>Local</h1>").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let loader = PageLoader::new().unwrap();
        let html = loader.load(&path, Duration::from_secs(1), false).await.unwrap();
        assert_eq!(html, "<h1>Local</h1>");

        let url = Url::from_file_path(file.path()).unwrap();
        let html = loader.load(url.as_str(), Duration::from_secs(1), false).await.unwrap();
        assert_eq!(html, "<h1>Local</h1>");
    }

    #[tokio::test]
    async fn local_reads_outside_temp_need_opt_in() {
        let source = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");

        let guarded = PageLoader::new().unwrap();
        let err = guarded.load(source, Duration::from_secs(1), false).await.unwrap_err();
        assert!(err.to_string().contains("outside the temp directory"));

        let open = PageLoader::new().unwrap().allow_private_urls();
        let text = open.load(source, Duration::from_secs(1), false).await.unwrap();
        assert!(text.contains("scrapeapi-engine"));
    }
}
