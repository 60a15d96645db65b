//! Per-site escalation hints, loaded once at startup.
//!
//! The directory is a CSV file with the header
//! `domain,start_tier,force_js,feed_url,rate,per`. Every column except
//! `domain` may be empty:
//!
//! ```text
//! domain,start_tier,force_js,feed_url,rate,per
//! motortrend.com,proxy,,,,
//! spa-heavy.example,,true,,,
//! blog.example,,,https://blog.example/feed.xml,1,5
//! ```

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;
use crate::models::Tier;
use crate::rate_limit::RateSpec;
use crate::util::host_matches;

/// Hints for one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteProfile {
    pub domain: String,
    /// Skip cheaper tiers known not to work for this site.
    pub start_tier: Option<Tier>,
    pub feed_url: Option<String>,
    pub rate: Option<RateSpec>,
}

impl SiteProfile {
    pub fn new(domain: impl Into<String>) -> Self {
        let domain: String = domain.into();
        Self {
            domain: normalize_domain(&domain),
            start_tier: None,
            feed_url: None,
            rate: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SiteRow {
    domain: String,
    #[serde(default)]
    start_tier: Option<String>,
    #[serde(default)]
    force_js: Option<String>,
    #[serde(default)]
    feed_url: Option<String>,
    #[serde(default)]
    rate: Option<u32>,
    #[serde(default)]
    per: Option<f64>,
}

impl SiteRow {
    fn into_profile(self, line: usize) -> Result<SiteProfile, AppError> {
        let mut profile = SiteProfile::new(&self.domain);
        if profile.domain.is_empty() {
            return Err(AppError::ConfigError(format!(
                "Site directory line {line}: domain is empty"
            )));
        }

        let forced = self.force_js.as_deref().is_some_and(is_truthy);
        profile.start_tier = match non_empty(self.start_tier) {
            _ if forced => Some(Tier::Headless),
            Some(raw) => Some(raw.parse().map_err(|e| {
                AppError::ConfigError(format!("Site directory line {line}: {e}"))
            })?),
            None => None,
        };

        profile.feed_url = non_empty(self.feed_url);

        profile.rate = match (self.rate, self.per) {
            (None, None) => None,
            (Some(rate), Some(per)) if rate > 0 && per.is_finite() && per > 0.0 => {
                Some(RateSpec::new(rate, Duration::from_secs_f64(per)))
            }
            _ => {
                return Err(AppError::ConfigError(format!(
                    "Site directory line {line}: rate and per must both be positive"
                )));
            }
        };

        Ok(profile)
    }
}

/// Immutable lookup of [`SiteProfile`]s by host.
#[derive(Debug, Clone, Default)]
pub struct SiteDirectory {
    profiles: HashMap<String, SiteProfile>,
}

impl SiteDirectory {
    pub fn new(profiles: impl IntoIterator<Item = SiteProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.domain.clone(), p))
                .collect(),
        }
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, AppError> {
        let file = std::fs::File::open(path).map_err(|e| {
            AppError::ConfigError(format!(
                "Failed to open site directory {}: {e}",
                path.display()
            ))
        })?;
        Self::from_csv_reader(file)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, AppError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut profiles = Vec::new();
        for (index, row) in csv_reader.deserialize::<SiteRow>().enumerate() {
            // Header is line 1.
            let line = index + 2;
            let row = row.map_err(|e| {
                AppError::ConfigError(format!("Site directory line {line}: {e}"))
            })?;
            profiles.push(row.into_profile(line)?);
        }

        tracing::debug!(sites = profiles.len(), "Loaded site directory");
        Ok(Self::new(profiles))
    }

    /// Profile for `host` or its closest configured parent domain.
    pub fn lookup(&self, host: &str) -> Option<&SiteProfile> {
        self.profiles
            .iter()
            .filter(|(domain, _)| host_matches(host, domain))
            .max_by_key(|(domain, _)| domain.len())
            .map(|(_, profile)| profile)
    }

    /// Custom per-host rates, for seeding the rate limiter.
    pub fn rates(&self) -> impl Iterator<Item = (String, RateSpec)> + '_ {
        self.profiles
            .values()
            .filter_map(|p| p.rate.map(|r| (p.domain.clone(), r)))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn normalize_domain(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    let without_scheme = lowered
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&lowered);
    let host = without_scheme.split('/').next().unwrap_or_default();
    host.trim_start_matches("www.").to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1"
    )
}
