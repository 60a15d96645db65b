use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::error::AppError;
use crate::quality::Rejection;
use crate::util::host_key;

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// One rung of the escalation ladder, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Basic = 1,
    Enhanced = 2,
    Feed = 3,
    PaidProxy = 4,
    IndexDiscovery = 5,
    SearchDiscovery = 6,
    Headless = 7,
}

impl Tier {
    pub const ALL: [Tier; 7] = [
        Tier::Basic,
        Tier::Enhanced,
        Tier::Feed,
        Tier::PaidProxy,
        Tier::IndexDiscovery,
        Tier::SearchDiscovery,
        Tier::Headless,
    ];

    /// The highest tier in the ladder.
    pub const MAX: Tier = Tier::Headless;

    /// Position in the ladder, starting at 1.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Enhanced => "enhanced",
            Tier::Feed => "feed",
            Tier::PaidProxy => "proxy",
            Tier::IndexDiscovery => "index",
            Tier::SearchDiscovery => "search",
            Tier::Headless => "headless",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.ordinal())
    }
}

impl TryFrom<u8> for Tier {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Tier::ALL
            .into_iter()
            .find(|t| t.ordinal() == value)
            .ok_or_else(|| {
                AppError::ConfigError(format!(
                    "Invalid tier {value}: must be between 1 and {}",
                    Tier::MAX.ordinal()
                ))
            })
    }
}

impl FromStr for Tier {
    type Err = AppError;

    /// Accepts either the tier name (`"proxy"`) or its ordinal (`"4"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return Tier::try_from(n);
        }
        Tier::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| AppError::ConfigError(format!("Unknown tier '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Inclusive window an article's publication date is expected to fall in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateWindow {
    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }
}

/// Immutable input to one acquisition run.
///
/// Built through [`ExtractionRequest::builder`], which validates the URL,
/// the tier ceiling and the date window up front.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRequest {
    id: Uuid,
    url: String,
    host: String,
    subject_tokens: Vec<String>,
    distractors: Vec<String>,
    author: Option<String>,
    window: Option<DateWindow>,
    max_tier: Tier,
    #[serde(skip)]
    deadline: Option<Duration>,
}

impl ExtractionRequest {
    pub fn builder(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            url: url.into(),
            subject_tokens: Vec::new(),
            distractors: Vec::new(),
            author: None,
            window: None,
            max_tier: None,
            deadline: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Rate-limiter key of the target URL.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn subject_tokens(&self) -> &[String] {
        &self.subject_tokens
    }

    /// Subject tokens joined into a single phrase, e.g. `"Mazda CX-5"`.
    pub fn subject_phrase(&self) -> String {
        self.subject_tokens.join(" ")
    }

    pub fn distractors(&self) -> &[String] {
        &self.distractors
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn window(&self) -> Option<&DateWindow> {
        self.window.as_ref()
    }

    pub fn max_tier(&self) -> Tier {
        self.max_tier
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Cache key over the fields that decide which article is acceptable.
    ///
    /// The tier ceiling is left out; callers compare it with the cached tier.
    pub fn cache_key(&self) -> String {
        let window = self
            .window
            .map(|w| {
                format!(
                    "{}..{}",
                    w.start.map(|d| d.timestamp()).unwrap_or(i64::MIN),
                    w.end.map(|d| d.timestamp()).unwrap_or(i64::MAX)
                )
            })
            .unwrap_or_default();
        compute_hash(&format!(
            "{}|{}|{}|{}|{}",
            self.url,
            self.subject_tokens.join(";").to_lowercase(),
            self.distractors.join(";").to_lowercase(),
            self.author.as_deref().unwrap_or_default().to_lowercase(),
            window
        ))
    }
}

/// Builder for [`ExtractionRequest`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    url: String,
    subject_tokens: Vec<String>,
    distractors: Vec<String>,
    author: Option<String>,
    window: Option<DateWindow>,
    max_tier: Option<u8>,
    deadline: Option<Duration>,
}

impl RequestBuilder {
    /// Add an expected subject token (brand, model, product name...).
    pub fn subject(mut self, token: impl Into<String>) -> Self {
        self.subject_tokens.push(token.into());
        self
    }

    pub fn subjects<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subject_tokens.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Add a plausible but unrelated subject whose dominance marks a page as off-topic.
    pub fn distractor(mut self, subject: impl Into<String>) -> Self {
        self.distractors.push(subject.into());
        self
    }

    pub fn distractors<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.distractors.extend(subjects.into_iter().map(Into::into));
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn published_between(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.window = if start.is_none() && end.is_none() {
            None
        } else {
            Some(DateWindow { start, end })
        };
        self
    }

    /// Highest tier (1-based) this request may escalate to.
    pub fn max_tier(mut self, tier: u8) -> Self {
        self.max_tier = Some(tier);
        self
    }

    /// Overall time budget for the run, across all tiers.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn build(self) -> Result<ExtractionRequest, AppError> {
        let parsed = Url::parse(self.url.trim())
            .map_err(|e| AppError::ConfigError(format!("Invalid URL '{}': {e}", self.url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::ConfigError(format!(
                "URL scheme '{}' is not supported (only http/https)",
                parsed.scheme()
            )));
        }
        let host = host_key(parsed.as_str())
            .ok_or_else(|| AppError::ConfigError(format!("URL '{}' has no host", self.url)))?;

        let max_tier = match self.max_tier {
            Some(n) => Tier::try_from(n)?,
            None => Tier::MAX,
        };

        if let Some(DateWindow {
            start: Some(start),
            end: Some(end),
        }) = self.window
            && start > end
        {
            return Err(AppError::ConfigError(format!(
                "Publication window starts after it ends ({start} > {end})"
            )));
        }

        if self.deadline.is_some_and(|d| d.is_zero()) {
            return Err(AppError::ConfigError("Deadline must be non-zero".into()));
        }

        Ok(ExtractionRequest {
            id: Uuid::new_v4(),
            url: parsed.to_string(),
            host,
            subject_tokens: clean_tokens(self.subject_tokens),
            distractors: clean_tokens(self.distractors),
            author: self
                .author
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            window: self.window,
            max_tier,
            deadline: self.deadline,
        })
    }
}

fn clean_tokens(tokens: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        let token = token.trim();
        if !token.is_empty() && !out.iter().any(|t| t.eq_ignore_ascii_case(token)) {
            out.push(token.to_string());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Attempts and candidates
// ---------------------------------------------------------------------------

/// Terminal outcome of a single tier attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    Success,
    HttpError,
    Timeout,
    RateLimited,
    CircuitOpen,
    /// The tier had nothing to try (no feed, not a hub page, no credentials).
    NotApplicable,
    Cancelled,
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchOutcome::Success => "success",
            FetchOutcome::HttpError => "http-error",
            FetchOutcome::Timeout => "timeout",
            FetchOutcome::RateLimited => "rate-limited",
            FetchOutcome::CircuitOpen => "circuit-open",
            FetchOutcome::NotApplicable => "not-applicable",
            FetchOutcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Provider- or transport-reported detail for a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub status_code: Option<u16>,
    pub message: String,
}

impl From<&AppError> for Diagnostic {
    fn from(e: &AppError) -> Self {
        Self {
            status_code: e.status_code(),
            message: e.to_string(),
        }
    }
}

/// Record of one tier tried for a request.
#[derive(Debug, Clone, Serialize)]
pub struct FetchAttempt {
    pub tier: Tier,
    pub duration_ms: u64,
    /// Characters of markup retrieved, summed over every page the tier returned.
    pub markup_chars: Option<usize>,
    pub outcome: FetchOutcome,
    /// Proxy service or feed URL that served the pages.
    pub provider: Option<String>,
    pub diagnostic: Option<Diagnostic>,
    /// Why the best candidate from this attempt was turned down, if it was.
    pub rejection: Option<String>,
}

/// Text produced by one extraction heuristic against one fetched page.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionCandidate {
    pub method: String,
    pub text: String,
    pub score: f64,
    pub passes_gate: bool,
    pub rejection: Option<Rejection>,
}

/// Everything the extractor learned from one page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub candidates: Vec<ExtractionCandidate>,
    pub title: Option<String>,
    pub byline: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

impl ExtractedContent {
    /// The highest-scoring candidate that passes the gate.
    pub fn accepted(&self) -> Option<&ExtractionCandidate> {
        self.candidates
            .iter()
            .filter(|c| c.passes_gate)
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }

    /// The best rejected candidate, for diagnostics.
    pub fn best_rejected(&self) -> Option<&ExtractionCandidate> {
        self.candidates
            .iter()
            .filter(|c| !c.passes_gate)
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

// ---------------------------------------------------------------------------
// Attribution
// ---------------------------------------------------------------------------

/// How confidently a byline ties the article to a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionStrength {
    Strong,
    Delegated,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribution {
    pub author: Option<String>,
    pub strength: AttributionStrength,
}

const WIRE_BYLINES: &[&str] = &[
    "ap",
    "associated press",
    "reuters",
    "afp",
    "agence france",
    "staff",
    "wire",
    "press release",
    "news service",
    "newsroom",
];

impl Attribution {
    pub fn unknown() -> Self {
        Self {
            author: None,
            strength: AttributionStrength::Unknown,
        }
    }

    /// Classify a discovered byline against the author the caller expects.
    ///
    /// A wire or staff byline is delegated. A named byline is strong when it
    /// matches the expected author, or when no author was expected at all.
    pub fn classify(byline: Option<&str>, expected: Option<&str>) -> Self {
        let Some(byline) = byline.map(str::trim).filter(|b| !b.is_empty()) else {
            return Self::unknown();
        };

        let normalized = normalize_name(byline);
        // Whole words only: "Stafford" is not "staff".
        let padded = format!(" {normalized} ");
        let is_wire = WIRE_BYLINES
            .iter()
            .any(|w| padded.contains(&format!(" {w} ")));

        let strength = if is_wire {
            AttributionStrength::Delegated
        } else {
            match expected {
                Some(expected) if names_match(&normalized, &normalize_name(expected)) => {
                    AttributionStrength::Strong
                }
                Some(_) => AttributionStrength::Delegated,
                None => AttributionStrength::Strong,
            }
        };

        Self {
            author: Some(byline.to_string()),
            strength,
        }
    }
}

fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    cleaned
        .strip_prefix("by ")
        .map(str::to_string)
        .unwrap_or(cleaned)
}

/// Every part of the expected name appears as a word of the byline.
fn names_match(byline: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let words: Vec<&str> = byline.split_whitespace().collect();
    expected.split_whitespace().all(|part| words.contains(&part))
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionStatus {
    Accepted,
    /// Every permitted tier was tried and none produced acceptable text.
    Exhausted,
    Cancelled,
}

/// The engine's answer to one [`ExtractionRequest`].
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub request_id: Uuid,
    pub url: String,
    pub status: AcquisitionStatus,
    pub text: Option<String>,
    /// URL the accepted text was actually read from (may differ after discovery).
    pub source_url: Option<String>,
    pub tier: Option<Tier>,
    pub method: Option<String>,
    pub score: Option<f64>,
    pub title: Option<String>,
    pub attribution: Attribution,
    pub published: Option<DateTime<Utc>>,
    /// False when a date window was requested but no publication date was found.
    pub date_verified: bool,
    pub attempts: Vec<FetchAttempt>,
    pub elapsed_ms: u64,
    pub from_cache: bool,
    pub completed_at: DateTime<Utc>,
}

impl ExtractionResult {
    /// A result with no text and no attempts, for `request` in `status`.
    pub fn empty(request: &ExtractionRequest, status: AcquisitionStatus) -> Self {
        Self {
            request_id: request.id(),
            url: request.url().to_string(),
            status,
            text: None,
            source_url: None,
            tier: None,
            method: None,
            score: None,
            title: None,
            attribution: Attribution::unknown(),
            published: None,
            date_verified: false,
            attempts: Vec::new(),
            elapsed_ms: 0,
            from_cache: false,
            completed_at: Utc::now(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == AcquisitionStatus::Accepted
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
