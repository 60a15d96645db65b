//! Search-assisted discovery through a web search API.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use quarry_core::error::AppError;
use quarry_core::models::{ExtractionRequest, Tier};
use quarry_core::traits::{TierContext, TierOutput, TierStrategy, WebSearch};
use quarry_core::util::host_key;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::tiers::FollowUp;

const GOOGLE_CSE_URL: &str = "https://www.googleapis.com/customsearch/v1";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const RESULTS_PER_QUERY: u8 = 5;

/// Breaker key for the search API.
pub const SEARCH_BREAKER: &str = "search";

/// Result URLs followed per request.
pub const MAX_SEARCH_RESULTS: usize = 3;

/// Google Custom Search JSON API client.
#[derive(Clone)]
pub struct GoogleSearch {
    client: Client,
    api_key: String,
    engine_id: String,
    base_url: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    link: String,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl GoogleSearch {
    pub fn new(api_key: impl Into<String>, engine_id: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            engine_id: engine_id.into(),
            base_url: GOOGLE_CSE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl WebSearch for GoogleSearch {
    async fn search(&self, query: &str) -> Result<Vec<String>, AppError> {
        let num = RESULTS_PER_QUERY.to_string();
        let url = Url::parse_with_params(
            &self.base_url,
            [
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ],
        )
        .map_err(|e| AppError::ConfigError(format!("Invalid search URL: {e}")))?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(SEARCH_TIMEOUT.as_secs())
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
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));
            return Err(AppError::ProviderError {
                provider: "google-search".into(),
                message,
                status_code,
                retryable: status_code == 429 || status_code >= 500,
            });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::ParseError(format!("Failed to parse search response: {e}")))?;
        Ok(parsed.items.into_iter().map(|i| i.link).collect())
    }
}

// ---------------------------------------------------------------------------
// Queries and filtering
// ---------------------------------------------------------------------------

/// Site-restricted queries, most specific first.
pub fn build_queries(request: &ExtractionRequest) -> Vec<String> {
    let subject = request.subject_phrase();
    if subject.is_empty() {
        return Vec::new();
    }
    let site = request.host();

    let mut queries = Vec::with_capacity(3);
    if let Some(author) = request.author() {
        queries.push(format!(r#"site:{site} "{subject}" "{author}""#));
    }
    queries.push(format!(r#"site:{site} "{subject}" review"#));
    queries.push(format!(r#"site:{site} "{subject}""#));
    queries
}

static NON_ARTICLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)/(search|category|categories|tag|tags|author|authors|feed|rss|page/\d+)(/|$)|\.(pdf|jpe?g|png|gif|webp|svg|mp4)$|[?&](s|q|page)=",
    )
    .expect("hardcoded regex pattern is valid")
});

/// True for URLs that can hold a single article.
pub fn is_article_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if parsed.path().trim_matches('/').is_empty() {
        return false;
    }
    let path_and_query = match parsed.query() {
        Some(q) => format!("{}?{q}", parsed.path()),
        None => parsed.path().to_string(),
    };
    !NON_ARTICLE_REGEX.is_match(&path_and_query)
}

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Tier 6: search the site for the subject and fetch the top results.
pub struct SearchDiscoveryTier<S> {
    search: S,
    follow_up: FollowUp,
}

impl<S: WebSearch> SearchDiscoveryTier<S> {
    pub fn new(search: S, follow_up: FollowUp) -> Self {
        Self { search, follow_up }
    }

    /// Run queries until enough distinct article URLs on the target host are found.
    async fn candidates(&self, ctx: &TierContext<'_>) -> Result<Vec<String>, AppError> {
        let request = ctx.request;
        let queries = build_queries(request);
        if queries.is_empty() {
            return Err(AppError::NotApplicable("no subject to search for".into()));
        }

        let breaker = ctx.breakers.get(SEARCH_BREAKER);
        let target = request.url().trim_end_matches('/');
        let mut found: Vec<String> = Vec::new();
        let mut last_error = None;

        for query in &queries {
            let results = match breaker.call(|| self.search.search(query)).await {
                Ok(results) => results,
                Err(e) => {
                    let e = AppError::from(e);
                    tracing::debug!(%query, error = %e, "Search query failed");
                    if matches!(e, AppError::CircuitOpen { .. }) {
                        return Err(e);
                    }
                    last_error = Some(e);
                    continue;
                }
            };
            tracing::debug!(%query, results = results.len(), "Search query done");

            for url in results {
                let on_site = host_key(&url).as_deref() == Some(request.host());
                if on_site
                    && is_article_url(&url)
                    && url.trim_end_matches('/') != target
                    && !found.contains(&url)
                {
                    found.push(url);
                }
            }
            if found.len() >= MAX_SEARCH_RESULTS {
                break;
            }
        }

        match (found.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            (true, None) => Err(AppError::NotApplicable("search found no article URLs".into())),
            _ => {
                found.truncate(MAX_SEARCH_RESULTS);
                Ok(found)
            }
        }
    }
}

#[async_trait]
impl<S: WebSearch + 'static> TierStrategy for SearchDiscoveryTier<S> {
    fn tier(&self) -> Tier {
        Tier::SearchDiscovery
    }

    fn breaker_keys(&self) -> Vec<&str> {
        vec![SEARCH_BREAKER]
    }

    async fn fetch(&self, ctx: &TierContext<'_>) -> Result<TierOutput, AppError> {
        let urls = self.candidates(ctx).await?;
        let pages = self.follow_up.fetch_all(ctx, &urls).await?;
        Ok(TierOutput {
            pages,
            provider: Some(SEARCH_BREAKER.to_string()),
        })
    }
}
