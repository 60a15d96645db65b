//! Paid scraping proxies (ScrapingBee, ScrapFly).

use std::time::Duration;

use async_trait::async_trait;
use quarry_core::error::AppError;
use quarry_core::models::Tier;
use quarry_core::traits::{FetchedPage, Fetcher, TierContext, TierOutput, TierStrategy};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::fetcher::block_marker;

const SCRAPINGBEE_URL: &str = "https://app.scrapingbee.com/api/v1/";
const SCRAPFLY_URL: &str = "https://api.scrapfly.io/scrape";
const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(60);

/// Which paid provider a [`ProxyClient`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    ScrapingBee,
    ScrapFly,
}

impl ProxyKind {
    /// Provider name, also used as its circuit breaker key.
    pub fn name(self) -> &'static str {
        match self {
            ProxyKind::ScrapingBee => "scrapingbee",
            ProxyKind::ScrapFly => "scrapfly",
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            ProxyKind::ScrapingBee => SCRAPINGBEE_URL,
            ProxyKind::ScrapFly => SCRAPFLY_URL,
        }
    }
}

/// Client for one scraping-proxy API.
///
/// ScrapingBee renders JavaScript through a premium US proxy with ads
/// blocked and a 3 s settle wait. ScrapFly uses its anti-scraping
/// protection, rendering JavaScript only when asked.
#[derive(Clone)]
pub struct ProxyClient {
    kind: ProxyKind,
    client: Client,
    api_key: String,
    base_url: String,
    render_js: bool,
    timeout_secs: u64,
}

// ---- Provider response types ----

#[derive(Deserialize)]
struct ScrapFlyResponse {
    result: ScrapFlyResult,
}

#[derive(Deserialize)]
struct ScrapFlyResult {
    #[serde(default)]
    content: String,
    #[serde(default)]
    status_code: Option<u16>,
}

#[derive(Deserialize)]
struct ProviderMessage {
    message: String,
}

impl ProxyClient {
    pub fn new(kind: ProxyKind, api_key: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(DEFAULT_PROXY_TIMEOUT)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            kind,
            client,
            api_key: api_key.into(),
            base_url: kind.default_base_url().to_string(),
            render_js: kind == ProxyKind::ScrapingBee,
            timeout_secs: DEFAULT_PROXY_TIMEOUT.as_secs(),
        })
    }

    pub fn scrapingbee(api_key: impl Into<String>) -> Result<Self, AppError> {
        Self::new(ProxyKind::ScrapingBee, api_key)
    }

    pub fn scrapfly(api_key: impl Into<String>) -> Result<Self, AppError> {
        Self::new(ProxyKind::ScrapFly, api_key)
    }

    /// Point the client at a different endpoint (tests, self-hosted gateways).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_render_js(mut self, render_js: bool) -> Self {
        self.render_js = render_js;
        self
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn renders_js(&self) -> bool {
        self.render_js
    }

    fn request_url(&self, target: &str) -> Result<Url, AppError> {
        let render = if self.render_js { "true" } else { "false" };
        let params: Vec<(&str, &str)> = match self.kind {
            ProxyKind::ScrapingBee => vec![
                ("api_key", self.api_key.as_str()),
                ("url", target),
                ("render_js", render),
                ("premium_proxy", "true"),
                ("country_code", "us"),
                ("wait", "3000"),
                ("block_ads", "true"),
            ],
            ProxyKind::ScrapFly => vec![
                ("key", self.api_key.as_str()),
                ("url", target),
                ("asp", "true"),
                ("country", "us"),
                ("render_js", render),
            ],
        };
        Url::parse_with_params(&self.base_url, &params)
            .map_err(|e| AppError::ConfigError(format!("Invalid {} URL: {e}", self.kind.name())))
    }

    fn provider_error(&self, status_code: u16, body: &str) -> AppError {
        let message = serde_json::from_str::<ProviderMessage>(body)
            .map(|m| m.message)
            .unwrap_or_else(|_| body.chars().take(200).collect());
        AppError::ProviderError {
            provider: self.kind.name().to_string(),
            message,
            status_code,
            // 422 is a request validation error; resending will not help.
            retryable: status_code == 429 || status_code >= 500,
        }
    }
}

impl Fetcher for ProxyClient {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let request_url = self.request_url(url)?;

        let response = self
            .client
            .get(request_url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read proxy body: {e}")))?;

        if !(200..300).contains(&status) {
            return Err(self.provider_error(status, &body));
        }

        let html = match self.kind {
            ProxyKind::ScrapingBee => body,
            ProxyKind::ScrapFly => {
                let parsed: ScrapFlyResponse = serde_json::from_str(&body).map_err(|e| {
                    AppError::ParseError(format!("Unexpected ScrapFly response: {e}"))
                })?;
                if let Some(upstream) = parsed.result.status_code
                    && !(200..300).contains(&upstream)
                {
                    return Err(AppError::UpstreamStatus {
                        provider: self.kind.name().to_string(),
                        status: upstream,
                        url: url.to_string(),
                    });
                }
                parsed.result.content
            }
        };

        if let Some(marker) = block_marker(&html) {
            return Err(AppError::Blocked(format!(
                "'{marker}' page via {}",
                self.kind.name()
            )));
        }
        Ok(html)
    }
}

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Tier 4: each configured provider in turn, each behind its own breaker.
pub struct ProxyTier {
    providers: Vec<ProxyClient>,
}

impl ProxyTier {
    pub fn new(providers: Vec<ProxyClient>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl TierStrategy for ProxyTier {
    fn tier(&self) -> Tier {
        Tier::PaidProxy
    }

    fn breaker_keys(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.kind().name()).collect()
    }

    async fn fetch(&self, ctx: &TierContext<'_>) -> Result<TierOutput, AppError> {
        let url = ctx.request.url();
        let mut last_error = AppError::NotConfigured("no proxy provider configured".into());

        for (i, provider) in self.providers.iter().enumerate() {
            let name = provider.kind().name();
            let breaker = ctx.breakers.get(name);
            let attempt = breaker.call(|| async move {
                // The first provider uses the token the orchestrator already took.
                if i > 0 {
                    ctx.throttle(url).await;
                }
                provider.fetch(url).await
            });
            match attempt.await {
                Ok(markup) => {
                    return Ok(TierOutput {
                        pages: vec![FetchedPage::new(url, markup)],
                        provider: Some(name.to_string()),
                    });
                }
                Err(e) => {
                    let e = AppError::from(e);
                    tracing::debug!(provider = name, error = %e, "Proxy provider failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
