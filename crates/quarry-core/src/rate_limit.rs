//! Per-host token-bucket rate limiting shared by every acquisition.
//!
//! Each host key (see [`host_key`](crate::util::host_key)) owns one bucket,
//! created lazily on first use. Buckets refill lazily from elapsed time,
//! there is no background timer. Every bucket sits behind its own async
//! mutex, so a caller sleeping for `example.com` never delays a caller
//! targeting `example.org`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use quarry_core::rate_limit::{RateLimiter, RateSpec};
//!
//! # async fn run() {
//! let limiter = RateLimiter::new(RateSpec::new(1, Duration::from_secs(2)))
//!     .with_host_rate("youtube.com", RateSpec::new(10, Duration::from_secs(60)));
//!
//! limiter.acquire("example.com").await; // immediate
//! limiter.acquire("example.com").await; // waits ~2 s
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::util::host_matches;

/// `rate` requests per `per` period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSpec {
    pub rate: u32,
    pub per: Duration,
}

impl RateSpec {
    pub fn new(rate: u32, per: Duration) -> Self {
        Self { rate, per }
    }

    /// Smallest gap between two requests once the bucket is drained.
    pub fn min_interval(&self) -> Duration {
        self.per / self.rate.max(1)
    }

    fn tokens_per_sec(&self) -> f64 {
        f64::from(self.rate.max(1)) / self.per.as_secs_f64().max(f64::EPSILON)
    }
}

impl Default for RateSpec {
    /// One request every two seconds for hosts nobody configured.
    fn default() -> Self {
        Self::new(1, Duration::from_secs(2))
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.rate, self.per.as_secs_f64())
    }
}

impl FromStr for RateSpec {
    type Err = AppError;

    /// Parses `"rate/seconds"`, e.g. `"10/60"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            AppError::ConfigError(format!(
                "Invalid rate '{s}': expected 'requests/seconds' with both parts positive"
            ))
        };
        let (rate, per) = s.trim().split_once('/').ok_or_else(invalid)?;
        let rate: u32 = rate.trim().parse().map_err(|_| invalid())?;
        let per: f64 = per.trim().parse().map_err(|_| invalid())?;
        if rate == 0 || !per.is_finite() || per <= 0.0 {
            return Err(invalid());
        }
        Ok(Self::new(rate, Duration::from_secs_f64(per)))
    }
}

/// Token bucket for a single host.
#[derive(Debug)]
pub struct RateBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl RateBucket {
    /// A full bucket sized by `spec`.
    pub fn new(spec: RateSpec, now: Instant) -> Self {
        let capacity = f64::from(spec.rate.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: spec.tokens_per_sec(),
            last_refill: now,
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    pub fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let shortfall = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(shortfall / self.refill_per_sec))
        }
    }
}

/// Hosts with published request quotas, applied unless overridden.
const KNOWN_HOST_RATES: &[(&str, u32, u64)] =
    &[("youtube.com", 10, 60), ("openai.com", 400, 60)];

/// Process-wide registry of per-host buckets.
///
/// Starts with the built-in rates for known hosts. Later
/// [`with_host_rate`](Self::with_host_rate) calls replace them.
#[derive(Debug)]
pub struct RateLimiter {
    default_spec: RateSpec,
    host_specs: HashMap<String, RateSpec>,
    buckets: DashMap<String, Arc<Mutex<RateBucket>>>,
}

impl RateLimiter {
    pub fn new(default_spec: RateSpec) -> Self {
        let host_specs = KNOWN_HOST_RATES
            .iter()
            .map(|(host, rate, secs)| {
                (host.to_string(), RateSpec::new(*rate, Duration::from_secs(*secs)))
            })
            .collect();
        Self {
            default_spec,
            host_specs,
            buckets: DashMap::new(),
        }
    }

    /// Configure a custom rate for a host and all of its subdomains.
    pub fn with_host_rate(mut self, host: impl Into<String>, spec: RateSpec) -> Self {
        let host = host.into().to_ascii_lowercase();
        let host = host.trim_start_matches("www.").to_string();
        self.host_specs.insert(host, spec);
        self
    }

    pub fn with_host_rates(self, rates: impl IntoIterator<Item = (String, RateSpec)>) -> Self {
        rates
            .into_iter()
            .fold(self, |limiter, (host, spec)| limiter.with_host_rate(host, spec))
    }

    /// The rate that applies to `host`. The most specific configured domain wins.
    pub fn spec_for(&self, host: &str) -> RateSpec {
        self.host_specs
            .iter()
            .filter(|(domain, _)| host_matches(host, domain))
            .max_by_key(|(domain, _)| domain.len())
            .map(|(_, spec)| *spec)
            .unwrap_or(self.default_spec)
    }

    /// Block until a token for `host` is available, then consume it.
    pub async fn acquire(&self, host: &str) {
        let bucket = self.bucket(host);
        let mut bucket = bucket.lock().await;
        loop {
            match bucket.try_take(Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    tracing::debug!(
                        host = %host,
                        wait_ms = %wait.as_millis(),
                        "Rate limited, waiting for token"
                    );
                    // Holding the bucket lock queues later callers for this host only.
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Number of hosts with a live bucket.
    pub fn tracked_hosts(&self) -> usize {
        self.buckets.len()
    }

    fn bucket(&self, host: &str) -> Arc<Mutex<RateBucket>> {
        if let Some(existing) = self.buckets.get(host) {
            return Arc::clone(existing.value());
        }
        let spec = self.spec_for(host);
        let entry = self
            .buckets
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RateBucket::new(spec, Instant::now()))));
        Arc::clone(entry.value())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateSpec::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_spec_parses() {
        let spec: RateSpec = "10/60".parse().unwrap();
        assert_eq!(spec, RateSpec::new(10, Duration::from_secs(60)));
        assert_eq!(spec.min_interval(), Duration::from_secs(6));

        let spec: RateSpec = " 1 / 0.5 ".parse().unwrap();
        assert_eq!(spec.per, Duration::from_millis(500));

        assert!("0/2".parse::<RateSpec>().is_err());
        assert!("3/0".parse::<RateSpec>().is_err());
        assert!("fast".parse::<RateSpec>().is_err());
    }

    #[test]
    fn bucket_starts_full_and_never_exceeds_capacity() {
        let start = Instant::now();
        let mut bucket = RateBucket::new(RateSpec::new(3, Duration::from_secs(3)), start);
        assert_eq!(bucket.tokens(), 3.0);

        // A long idle period refills no further than capacity.
        let later = start + Duration::from_secs(3600);
        bucket.try_take(later).unwrap();
        assert!(bucket.tokens() <= bucket.capacity());
        assert_eq!(bucket.tokens(), 2.0);
    }

    #[test]
    fn bucket_reports_shortfall_instead_of_going_negative() {
        let start = Instant::now();
        let mut bucket = RateBucket::new(RateSpec::new(1, Duration::from_secs(2)), start);
        bucket.try_take(start).unwrap();

        let wait = bucket.try_take(start).unwrap_err();
        assert_eq!(wait, Duration::from_secs(2));
        assert!(bucket.tokens() >= 0.0);

        let half = start + Duration::from_secs(1);
        let wait = bucket.try_take(half).unwrap_err();
        assert!(wait <= Duration::from_secs(1));
        assert!(wait > Duration::from_millis(900));

        assert!(bucket.try_take(start + Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn most_specific_host_rate_wins() {
        let limiter = RateLimiter::default()
            .with_host_rate("example.com", RateSpec::new(5, Duration::from_secs(1)))
            .with_host_rate("www.news.example.com", RateSpec::new(1, Duration::from_secs(10)));

        assert_eq!(limiter.spec_for("example.com").rate, 5);
        assert_eq!(limiter.spec_for("shop.example.com").rate, 5);
        assert_eq!(limiter.spec_for("news.example.com").rate, 1);
        assert_eq!(limiter.spec_for("other.org"), RateSpec::default());
    }

    #[test]
    fn known_hosts_have_built_in_rates_that_can_be_overridden() {
        let limiter = RateLimiter::default();
        assert_eq!(
            limiter.spec_for("www.youtube.com"),
            RateSpec::new(10, Duration::from_secs(60))
        );
        assert_eq!(limiter.spec_for("api.openai.com").rate, 400);

        let limiter = limiter.with_host_rate("YouTube.com", RateSpec::new(2, Duration::from_secs(1)));
        assert_eq!(limiter.spec_for("m.youtube.com").rate, 2);
        assert_eq!(limiter.spec_for("openai.com").rate, 400);
    }

    #[tokio::test]
    async fn acquire_enforces_interval_on_same_host() {
        let limiter = RateLimiter::new(RateSpec::new(1, Duration::from_millis(100)));

        let start = Instant::now();
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;

        // First is free, the next two each wait one interval.
        assert!(start.elapsed() >= Duration::from_millis(190));
        assert_eq!(limiter.tracked_hosts(), 1);
    }

    #[tokio::test]
    async fn acquire_does_not_delay_different_hosts() {
        let limiter = RateLimiter::new(RateSpec::new(1, Duration::from_secs(5)));

        let start = Instant::now();
        limiter.acquire("a.example").await;
        limiter.acquire("b.example").await;
        limiter.acquire("c.example").await;

        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(limiter.tracked_hosts(), 3);
    }

    #[tokio::test]
    async fn slow_host_does_not_block_concurrent_callers_elsewhere() {
        let limiter = Arc::new(RateLimiter::new(RateSpec::new(1, Duration::from_secs(2))));
        limiter.acquire("slow.example").await;

        let blocked = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire("slow.example").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let start = Instant::now();
        limiter.acquire("fast.example").await;
        assert!(start.elapsed() < Duration::from_millis(100));

        blocked.abort();
    }

    #[tokio::test]
    async fn concurrent_callers_are_spaced_by_min_interval() {
        let limiter = Arc::new(RateLimiter::new(RateSpec::new(1, Duration::from_millis(50))));
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            let stamps = Arc::clone(&stamps);
            handles.push(tokio::spawn(async move {
                limiter.acquire("example.com").await;
                stamps.lock().unwrap().push(Instant::now());
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut stamps = stamps.lock().unwrap().clone();
        stamps.sort();
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(45));
        }
    }
}
