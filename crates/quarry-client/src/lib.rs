pub mod analysis;
#[cfg(feature = "browser")]
pub mod browser_fetcher;
pub mod discovery;
pub mod extractor;
pub mod feed;
pub mod fetcher;
pub mod ladder;
pub mod proxy;
pub mod search;
pub mod sink;
pub mod tiers;

#[cfg(test)]
pub(crate) mod testutil;

pub use analysis::OpenAiAnalyzer;
#[cfg(feature = "browser")]
pub use browser_fetcher::BrowserFetcher;
pub use discovery::IndexDiscoveryTier;
pub use extractor::HtmlExtractor;
pub use feed::FeedTier;
pub use fetcher::{FetchProfile, ReqwestFetcher};
#[cfg(feature = "browser")]
pub use ladder::headless_tier;
pub use ladder::{ClientConfig, standard_ladder};
pub use proxy::{ProxyClient, ProxyKind, ProxyTier};
pub use search::{GoogleSearch, SearchDiscoveryTier};
pub use sink::JsonlSink;
pub use tiers::{FetcherTier, FollowUp};
