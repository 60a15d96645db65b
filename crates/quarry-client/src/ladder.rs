//! Assembles the standard tier ladder from provider credentials.

use std::sync::Arc;

use quarry_core::error::AppError;
use quarry_core::models::Tier;
use quarry_core::traits::TierStrategy;

use crate::analysis::OpenAiAnalyzer;
use crate::discovery::IndexDiscoveryTier;
use crate::feed::FeedTier;
use crate::fetcher::ReqwestFetcher;
use crate::proxy::{ProxyClient, ProxyTier};
use crate::search::{GoogleSearch, SearchDiscoveryTier};
use crate::tiers::{FetcherTier, FollowUp};

/// Credentials and endpoints for the paid collaborators.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub scrapingbee_api_key: Option<String>,
    pub scrapfly_api_key: Option<String>,
    /// Ask ScrapFly to render JavaScript (ScrapingBee always does).
    pub scrapfly_render_js: bool,
    pub google_api_key: Option<String>,
    pub google_cse_id: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub openai_base_url: Option<String>,
}

impl ClientConfig {
    /// Read credentials from the environment.
    ///
    /// - `SCRAPINGBEE_API_KEY`, `SCRAPFLY_API_KEY`
    /// - `SCRAPFLY_RENDER_JS` (`true`/`1`/`yes`/`on`, defaults to off)
    /// - `GOOGLE_API_KEY` and `GOOGLE_CSE_ID` (both needed for search discovery)
    /// - `OPENAI_API_KEY`, `OPENAI_MODEL`, `OPENAI_BASE_URL`
    ///
    /// Blank values count as absent.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            scrapingbee_api_key: get("SCRAPINGBEE_API_KEY"),
            scrapfly_api_key: get("SCRAPFLY_API_KEY"),
            scrapfly_render_js: get("SCRAPFLY_RENDER_JS").is_some_and(|v| {
                matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
            }),
            google_api_key: get("GOOGLE_API_KEY"),
            google_cse_id: get("GOOGLE_CSE_ID"),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL"),
            openai_base_url: get("OPENAI_BASE_URL"),
        }
    }

    pub fn proxy_providers(&self) -> Result<Vec<ProxyClient>, AppError> {
        let mut providers = Vec::new();
        if let Some(key) = &self.scrapingbee_api_key {
            providers.push(ProxyClient::scrapingbee(key.as_str())?);
        }
        if let Some(key) = &self.scrapfly_api_key {
            let client =
                ProxyClient::scrapfly(key.as_str())?.with_render_js(self.scrapfly_render_js);
            providers.push(client);
        }
        Ok(providers)
    }

    pub fn web_search(&self) -> Result<Option<GoogleSearch>, AppError> {
        match (&self.google_api_key, &self.google_cse_id) {
            (Some(key), Some(cx)) => Ok(Some(GoogleSearch::new(key.as_str(), cx.as_str())?)),
            _ => Ok(None),
        }
    }

    /// The analysis client, when an API key is configured.
    pub fn analyzer(&self) -> Result<Option<OpenAiAnalyzer>, AppError> {
        let Some(key) = &self.openai_api_key else {
            return Ok(None);
        };
        let analyzer = match (&self.openai_model, &self.openai_base_url) {
            (None, None) => OpenAiAnalyzer::new(key)?,
            (model, base) => OpenAiAnalyzer::with_base_url(
                key,
                model.as_deref().unwrap_or("gpt-4o-mini"),
                base.as_deref().unwrap_or("https://api.openai.com/v1"),
            )?,
        };
        Ok(Some(analyzer))
    }
}

/// Every network tier the configuration allows, cheapest first.
///
/// The headless tier is not included; see [`headless_tier`].
pub fn standard_ladder(config: &ClientConfig) -> Result<Vec<Arc<dyn TierStrategy>>, AppError> {
    let follow_up = FollowUp::standard()?;
    let mut ladder: Vec<Arc<dyn TierStrategy>> = vec![
        Arc::new(FetcherTier::new(Tier::Basic, ReqwestFetcher::basic()?)),
        Arc::new(FetcherTier::new(Tier::Enhanced, ReqwestFetcher::enhanced()?)),
        Arc::new(FeedTier::new(ReqwestFetcher::basic()?)),
    ];

    let providers = config.proxy_providers()?;
    if providers.is_empty() {
        tracing::info!("No proxy credentials configured, proxy tier disabled");
    } else {
        ladder.push(Arc::new(ProxyTier::new(providers)));
    }

    ladder.push(Arc::new(IndexDiscoveryTier::new(follow_up.clone())));

    match config.web_search()? {
        Some(search) => ladder.push(Arc::new(SearchDiscoveryTier::new(search, follow_up))),
        None => tracing::info!("No search credentials configured, search discovery disabled"),
    }

    Ok(ladder)
}

/// Launch Chromium and wrap it as the headless tier.
#[cfg(feature = "browser")]
pub async fn headless_tier() -> Result<Arc<dyn TierStrategy>, AppError> {
    let browser = crate::browser_fetcher::BrowserFetcher::new().await?;
    Ok(Arc::new(FetcherTier::new(Tier::Headless, browser)))
}
