use async_trait::async_trait;
use quarry_core::error::AppError;
use quarry_core::models::Tier;
use quarry_core::traits::{FetchedPage, Fetcher, TierContext, TierOutput, TierStrategy};

use crate::fetcher::ReqwestFetcher;

/// A tier that fetches the request URL directly with one [`Fetcher`].
///
/// Used for the basic, enhanced and headless rungs.
pub struct FetcherTier<F> {
    tier: Tier,
    fetcher: F,
}

impl<F: Fetcher> FetcherTier<F> {
    pub fn new(tier: Tier, fetcher: F) -> Self {
        Self { tier, fetcher }
    }
}

#[async_trait]
impl<F: Fetcher + 'static> TierStrategy for FetcherTier<F> {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn fetch(&self, ctx: &TierContext<'_>) -> Result<TierOutput, AppError> {
        let url = ctx.request.url();
        let markup = fetch_held(&self.fetcher, ctx, url).await?;
        Ok(TierOutput::single(FetchedPage::new(url, markup)))
    }
}

/// Fetch `url` while holding one rate-limit token for its host.
///
/// A warm-up request spends the held token and the target waits for a new one.
pub(crate) async fn fetch_held<F: Fetcher>(
    fetcher: &F,
    ctx: &TierContext<'_>,
    url: &str,
) -> Result<String, AppError> {
    if let Some(warm_up) = fetcher.warm_up_url(url) {
        fetcher.warm_up(&warm_up).await;
        ctx.throttle(url).await;
    }
    fetcher.fetch(url).await
}

/// Basic-then-enhanced fetch used by the discovery tiers for the URLs they find.
#[derive(Clone)]
pub struct FollowUp {
    basic: ReqwestFetcher,
    enhanced: ReqwestFetcher,
}

impl FollowUp {
    pub fn new(basic: ReqwestFetcher, enhanced: ReqwestFetcher) -> Self {
        Self { basic, enhanced }
    }

    pub fn standard() -> Result<Self, AppError> {
        Ok(Self::new(ReqwestFetcher::basic()?, ReqwestFetcher::enhanced()?))
    }

    /// Fetch one discovered URL, throttled per host.
    pub async fn fetch(&self, ctx: &TierContext<'_>, url: &str) -> Result<String, AppError> {
        ctx.throttle(url).await;
        self.fetch_direct(ctx, url).await
    }

    /// Like [`Self::fetch`], but the first try spends a token the caller
    /// already holds for this host.
    pub async fn fetch_direct(&self, ctx: &TierContext<'_>, url: &str) -> Result<String, AppError> {
        match self.basic.fetch(url).await {
            Ok(markup) => Ok(markup),
            Err(e) => {
                tracing::debug!(%url, error = %e, "Basic follow-up failed, trying enhanced");
                ctx.throttle(url).await;
                fetch_held(&self.enhanced, ctx, url).await
            }
        }
    }

    /// Fetch each URL in order, keeping the pages that came back.
    ///
    /// Fails with the last error only when nothing could be fetched.
    pub async fn fetch_all(
        &self,
        ctx: &TierContext<'_>,
        urls: &[String],
    ) -> Result<Vec<FetchedPage>, AppError> {
        let mut pages = Vec::new();
        let mut last_error = None;
        for url in urls {
            match self.fetch(ctx, url).await {
                Ok(markup) => pages.push(FetchedPage::new(url.as_str(), markup)),
                Err(e) => {
                    tracing::debug!(%url, error = %e, "Discovered URL could not be fetched");
                    last_error = Some(e);
                }
            }
        }
        match (pages.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(pages),
        }
    }
}
