use std::net::IpAddr;
use std::time::Duration;

use quarry_core::error::AppError;
use quarry_core::traits::Fetcher;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER};
use url::Url;

const BOT_USER_AGENT: &str = "Mozilla/5.0 (compatible; QuarryBot/0.3; +https://github.com/AndreaBozzo/Ares)";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Phrases that only show up on interstitial block pages.
const BLOCK_MARKERS: &[&str] = &[
    "access denied",
    "captcha",
    "are you a robot",
    "attention required",
    "verify you are human",
    "request unsuccessful. incapsula",
];

/// Pages longer than this are treated as real content even if they mention a marker.
const BLOCK_PAGE_MAX_CHARS: usize = 20_000;

/// How a [`ReqwestFetcher`] presents itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchProfile {
    /// Honest bot User-Agent and minimal headers.
    Basic,
    /// Desktop-browser headers, a Google referer, a cookie jar and a warm-up
    /// request to the site root before the target.
    Enhanced,
}

impl FetchProfile {
    pub fn default_timeout(self) -> Duration {
        match self {
            FetchProfile::Basic => Duration::from_secs(10),
            FetchProfile::Enhanced => Duration::from_secs(15),
        }
    }
}

/// HTTP fetcher using reqwest.
///
/// By default, SSRF protection is **enabled**: requests to private/reserved
/// IP ranges are blocked. Use [`allow_private_urls`](Self::allow_private_urls)
/// to disable this (e.g., for CLI usage where the user controls the machine).
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    profile: FetchProfile,
    timeout_secs: u64,
    ssrf_protection: bool,
}

impl ReqwestFetcher {
    pub fn new(profile: FetchProfile) -> Result<Self, AppError> {
        Self::with_timeout(profile, profile.default_timeout())
    }

    pub fn basic() -> Result<Self, AppError> {
        Self::new(FetchProfile::Basic)
    }

    pub fn enhanced() -> Result<Self, AppError> {
        Self::new(FetchProfile::Enhanced)
    }

    pub fn with_timeout(profile: FetchProfile, timeout: Duration) -> Result<Self, AppError> {
        let builder = match profile {
            FetchProfile::Basic => {
                let mut headers = HeaderMap::new();
                headers.insert(ACCEPT, HeaderValue::from_static("text/html,*/*;q=0.8"));
                Client::builder()
                    .user_agent(BOT_USER_AGENT)
                    .default_headers(headers)
            }
            FetchProfile::Enhanced => {
                let mut headers = HeaderMap::new();
                headers.insert(
                    ACCEPT,
                    HeaderValue::from_static(
                        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
                    ),
                );
                headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
                headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));
                headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
                Client::builder()
                    .user_agent(BROWSER_USER_AGENT)
                    .default_headers(headers)
                    .cookie_store(true)
            }
        };

        let client = builder
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            profile,
            timeout_secs: timeout.as_secs(),
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    ///
    /// Only use this for CLI usage where the user controls the machine.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    pub fn profile(&self) -> FetchProfile {
        self.profile
    }

    fn map_send_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::HttpError(e.to_string())
        }
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }
        let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;

        let response = self
            .client
            .get(parsed.as_str())
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AppError::RateLimitExceeded);
        }
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;

        if let Some(marker) = block_marker(&body) {
            return Err(AppError::Blocked(format!("'{marker}' page at {url}")));
        }

        Ok(body)
    }

    /// The enhanced profile visits the site root first so the cookie jar
    /// holds whatever session cookies the site hands out.
    fn warm_up_url(&self, url: &str) -> Option<String> {
        if self.profile != FetchProfile::Enhanced {
            return None;
        }
        let target = Url::parse(url).ok()?;
        let mut root = target.clone();
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);
        (root != target).then(|| root.to_string())
    }

    async fn warm_up(&self, url: &str) {
        if self.ssrf_protection && validate_url(url).await.is_err() {
            return;
        }
        match self.client.get(url).send().await {
            Ok(response) => {
                tracing::debug!(%url, status = %response.status(), "Warm-up request done");
            }
            Err(e) => tracing::debug!(%url, error = %e, "Warm-up request failed"),
        }
    }
}

/// Returns the marker if `body` looks like an interstitial block page.
pub fn block_marker(body: &str) -> Option<&'static str> {
    if body.len() > BLOCK_PAGE_MAX_CHARS {
        return None;
    }
    let lower = body.to_lowercase();
    BLOCK_MARKERS.iter().copied().find(|m| lower.contains(m))
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
pub(crate) async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::HttpError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::HttpError("URL has no host".to_string()))?;

    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::HttpError(format!(
                "SSRF blocked: {host} resolves to private/reserved IP"
            )));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    for socket_addr in &addrs {
        if is_private_ip(socket_addr.ip()) {
            return Err(AppError::HttpError(format!(
                "SSRF blocked: {host} resolves to private/reserved IP {}",
                socket_addr.ip()
            )));
        }
    }

    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // 169.254.0.0/16 (cloud metadata)
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80 // fe80::/10
                || (v6.segments()[0] & 0xFE00) == 0xFC00 // fc00::/7
                || match v6.to_ipv4_mapped() {
                    Some(v4) => is_private_ip(IpAddr::V4(v4)),
                    None => false,
                }
        }
    }
}
