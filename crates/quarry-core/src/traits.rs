use std::future::Future;

use async_trait::async_trait;

use crate::circuit_breaker::BreakerRegistry;
use crate::error::AppError;
use crate::models::{ExtractedContent, ExtractionRequest, ExtractionResult, Tier};
use crate::rate_limit::RateLimiter;
use crate::sites::SiteProfile;
use crate::util::host_key;

/// Fetches raw markup from a URL.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Request to send before fetching `url` to set up a session, if any.
    ///
    /// Callers spend a rate-limit token on it like on any other request.
    fn warm_up_url(&self, _url: &str) -> Option<String> {
        None
    }

    /// Send the warm-up request. Failures are ignored.
    fn warm_up(&self, _url: &str) -> impl Future<Output = ()> + Send {
        async {}
    }
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Shared state a tier may use while fetching.
///
/// The orchestrator has already taken a rate-limit token for the target host
/// before calling [`TierStrategy::fetch`]. Tiers that reach further URLs
/// (hub links, search results, feeds) throttle those through [`Self::throttle`].
pub struct TierContext<'a> {
    pub request: &'a ExtractionRequest,
    pub site: Option<&'a SiteProfile>,
    pub limiter: &'a RateLimiter,
    pub breakers: &'a BreakerRegistry,
}

impl TierContext<'_> {
    /// Wait for a rate-limit token for the host of `url`.
    pub async fn throttle(&self, url: &str) {
        if let Some(host) = host_key(url) {
            self.limiter.acquire(&host).await;
        }
    }
}

/// One page of markup produced by a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub markup: String,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, markup: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            markup: markup.into(),
        }
    }
}

/// What a tier hands back: one page for direct fetches, several for discovery.
#[derive(Debug, Clone, Default)]
pub struct TierOutput {
    pub pages: Vec<FetchedPage>,
    /// Which upstream produced the pages, when the tier has several.
    pub provider: Option<String>,
}

impl TierOutput {
    pub fn single(page: FetchedPage) -> Self {
        Self {
            pages: vec![page],
            provider: None,
        }
    }

    pub fn markup_chars(&self) -> usize {
        self.pages.iter().map(|p| p.markup.chars().count()).sum()
    }
}

/// One rung of the escalation ladder.
#[async_trait]
pub trait TierStrategy: Send + Sync {
    fn tier(&self) -> Tier;

    /// Breakers guarding the paid services this tier calls.
    ///
    /// The orchestrator skips the tier without calling it when every listed
    /// breaker is open. An empty list means the tier is never gated.
    fn breaker_keys(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Retrieve markup for the request, or fail definitively.
    async fn fetch(&self, ctx: &TierContext<'_>) -> Result<TierOutput, AppError>;
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Turns raw markup into scored, gate-checked text candidates.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, markup: &str, request: &ExtractionRequest) -> ExtractedContent;
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Web search API: query string in, ranked URLs out.
pub trait WebSearch: Send + Sync + Clone {
    fn search(&self, query: &str) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;
}

/// Cache consulted before the first tier and filled after an accepted result.
pub trait ResultCache: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Option<ExtractionResult>> + Send;

    fn put(&self, key: &str, result: &ExtractionResult) -> impl Future<Output = ()> + Send;
}

/// A no-op cache for use when caching is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl ResultCache for NoCache {
    async fn get(&self, _key: &str) -> Option<ExtractionResult> {
        None
    }

    async fn put(&self, _key: &str, _result: &ExtractionResult) {}
}

/// Receives every finished result for audit and display.
pub trait ResultSink: Send + Sync {
    fn record(&self, result: &ExtractionResult) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op sink for use when persistence is not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    async fn record(&self, _result: &ExtractionResult) -> Result<(), AppError> {
        Ok(())
    }
}

/// Relevance/sentiment/summary scoring of accepted text.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Analysis {
    /// 0-10, how much the text is about the requested subject.
    pub relevance: u8,
    pub sentiment: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Available(Analysis),
    Unavailable { reason: String },
}

/// AI text-analysis service.
pub trait TextAnalyzer: Send + Sync + Clone {
    fn analyze(
        &self,
        text: &str,
        request: &ExtractionRequest,
    ) -> impl Future<Output = Result<AnalysisOutcome, AppError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_output_counts_markup_across_pages() {
        let output = TierOutput {
            pages: vec![
                FetchedPage::new("https://a.example/1", "<p>abc</p>"),
                FetchedPage::new("https://a.example/2", "é"),
            ],
            provider: None,
        };
        assert_eq!(output.markup_chars(), 11);
    }

    #[tokio::test]
    async fn no_cache_never_returns_anything() {
        assert!(NoCache.get("key").await.is_none());
    }
}
