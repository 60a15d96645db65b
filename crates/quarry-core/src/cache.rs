use std::time::Duration;

use moka::future::Cache;

use crate::models::ExtractionResult;
use crate::traits::ResultCache;

/// In-memory result cache with a time-to-live, backed by moka.
///
/// Stores only accepted results. Entries expire `ttl` after insertion, so a
/// re-published or corrected article is picked up on the next day's run.
#[derive(Clone)]
pub struct MokaResultCache {
    cache: Cache<String, ExtractionResult>,
}

impl MokaResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, 10_000)
    }

    pub fn with_capacity(ttl: Duration, max_entries: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl ResultCache for MokaResultCache {
    async fn get(&self, key: &str) -> Option<ExtractionResult> {
        self.cache.get(key).await
    }

    async fn put(&self, key: &str, result: &ExtractionResult) {
        if result.is_accepted() {
            self.cache.insert(key.to_string(), result.clone()).await;
        }
    }
}

/// Either a TTL cache or nothing, chosen at startup from configuration.
#[derive(Clone)]
pub enum ConfiguredCache {
    Disabled,
    Memory(MokaResultCache),
}

impl ConfiguredCache {
    pub fn from_ttl(ttl: Option<Duration>) -> Self {
        match ttl {
            Some(ttl) => ConfiguredCache::Memory(MokaResultCache::new(ttl)),
            None => ConfiguredCache::Disabled,
        }
    }
}

impl ResultCache for ConfiguredCache {
    async fn get(&self, key: &str) -> Option<ExtractionResult> {
        match self {
            ConfiguredCache::Disabled => None,
            ConfiguredCache::Memory(cache) => cache.get(key).await,
        }
    }

    async fn put(&self, key: &str, result: &ExtractionResult) {
        if let ConfiguredCache::Memory(cache) = self {
            cache.put(key, result).await;
        }
    }
}
