use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::AppError;
use crate::models::Tier;
use crate::quality::QualityConfig;
use crate::rate_limit::RateSpec;

/// Engine-wide settings shared by every acquisition.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tiers switched off for every request.
    pub disabled_tiers: BTreeSet<Tier>,
    pub tier_timeouts: HashMap<Tier, Duration>,
    pub quality: QualityConfig,
    pub default_rate: RateSpec,
    pub host_rates: HashMap<String, RateSpec>,
    pub breaker: CircuitBreakerConfig,
    /// Per-service breaker settings, keyed by service name.
    pub service_breakers: HashMap<String, CircuitBreakerConfig>,
    /// `None` disables the result cache.
    pub cache_ttl: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            disabled_tiers: BTreeSet::new(),
            tier_timeouts: HashMap::new(),
            quality: QualityConfig::default(),
            default_rate: RateSpec::default(),
            host_rates: HashMap::new(),
            breaker: CircuitBreakerConfig::default(),
            service_breakers: HashMap::new(),
            cache_ttl: Some(Duration::from_secs(24 * 3600)),
        }
    }
}

impl EngineConfig {
    /// Read configuration from environment variables.
    ///
    /// - `QUARRY_DISABLED_TIERS` (comma separated tier names or numbers)
    /// - `QUARRY_MIN_CONTENT_LENGTH` (defaults to 500)
    /// - `QUARRY_MAX_BOILERPLATE` (defaults to 3)
    /// - `QUARRY_BOILERPLATE_MARKERS` (comma separated, added to the defaults)
    /// - `QUARRY_DEFAULT_RATE` (`requests/seconds`, defaults to `1/2`)
    /// - `QUARRY_HOST_RATES` (`host=requests/seconds,...`, replaces the built-in
    ///   youtube.com and openai.com rates for the hosts it names)
    /// - `QUARRY_BREAKER_THRESHOLD` (defaults to 3)
    /// - `QUARRY_BREAKER_COOLDOWN_SECS` (defaults to 300)
    /// - `QUARRY_CACHE_TTL_HOURS` (0 disables caching, defaults to 24)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("QUARRY_DISABLED_TIERS") {
            config.disabled_tiers = parse_tier_list(&raw)?;
        }

        if let Some(raw) = lookup("QUARRY_MIN_CONTENT_LENGTH") {
            config.quality.min_length = parse_positive("QUARRY_MIN_CONTENT_LENGTH", &raw)?;
        }

        if let Some(raw) = lookup("QUARRY_MAX_BOILERPLATE") {
            config.quality.max_boilerplate = parse_positive("QUARRY_MAX_BOILERPLATE", &raw)?;
        }

        if let Some(raw) = lookup("QUARRY_BOILERPLATE_MARKERS") {
            config.quality.boilerplate_markers.extend(
                raw.split(',')
                    .map(|m| m.trim().to_lowercase())
                    .filter(|m| !m.is_empty()),
            );
        }

        if let Some(raw) = lookup("QUARRY_DEFAULT_RATE") {
            config.default_rate = raw.parse()?;
        }

        if let Some(raw) = lookup("QUARRY_HOST_RATES") {
            config.host_rates = parse_host_rates(&raw)?;
        }

        if let Some(raw) = lookup("QUARRY_BREAKER_THRESHOLD") {
            config.breaker.failure_threshold =
                parse_positive::<u32>("QUARRY_BREAKER_THRESHOLD", &raw)?;
        }

        if let Some(raw) = lookup("QUARRY_BREAKER_COOLDOWN_SECS") {
            config.breaker.recovery_timeout =
                Duration::from_secs(parse_positive("QUARRY_BREAKER_COOLDOWN_SECS", &raw)?);
        }

        if let Some(raw) = lookup("QUARRY_CACHE_TTL_HOURS") {
            let hours: u64 = raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid QUARRY_CACHE_TTL_HOURS '{raw}': must be a non-negative integer"
                ))
            })?;
            config.cache_ttl = (hours > 0).then(|| Duration::from_secs(hours * 3600));
        }

        Ok(config)
    }

    pub fn is_enabled(&self, tier: Tier) -> bool {
        !self.disabled_tiers.contains(&tier)
    }

    /// How long a single attempt at `tier` may run.
    pub fn timeout_for(&self, tier: Tier) -> Duration {
        if let Some(timeout) = self.tier_timeouts.get(&tier) {
            return *timeout;
        }
        Duration::from_secs(match tier {
            Tier::Basic => 10,
            Tier::Enhanced | Tier::Feed => 15,
            Tier::PaidProxy | Tier::SearchDiscovery => 60,
            Tier::IndexDiscovery | Tier::Headless => 45,
        })
    }
}

fn parse_positive<T>(name: &str, raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let parsed: T = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!("Invalid {name} '{raw}': must be a positive integer"))
    })?;
    if parsed == T::default() {
        return Err(AppError::ConfigError(format!("{name} must be at least 1")));
    }
    Ok(parsed)
}

fn parse_tier_list(raw: &str) -> Result<BTreeSet<Tier>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<Tier>)
        .collect()
}

/// Parses `host=rate/seconds` pairs separated by commas.
pub fn parse_host_rates(raw: &str) -> Result<HashMap<String, RateSpec>, AppError> {
    let mut rates = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (host, spec) = pair.split_once('=').ok_or_else(|| {
            AppError::ConfigError(format!(
                "Invalid host rate '{pair}': expected 'host=requests/seconds'"
            ))
        })?;
        let host = host.trim().to_ascii_lowercase();
        if host.is_empty() {
            return Err(AppError::ConfigError(format!(
                "Invalid host rate '{pair}': host is empty"
            )));
        }
        rates.insert(host, spec.parse()?);
    }
    Ok(rates)
}
