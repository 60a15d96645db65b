//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{ExtractedContent, ExtractionCandidate, ExtractionRequest, ExtractionResult, Tier};
use crate::quality::{QualityConfig, QualityGate};
use crate::report::{AcquisitionEvent, AcquisitionReporter};
use crate::traits::{
    ContentExtractor, FetchedPage, ResultSink, TierContext, TierOutput, TierStrategy,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// About 150 characters of navigation links.
pub fn nav_text() -> String {
    "Home | Reviews | News | Buyer's Guide | Rankings | Videos | Deals | Forums | \
     About Us | Contact | Advertise | Careers | Newsletter | Log in | Search"
        .to_string()
}

/// A 700+ character review that mentions the Mazda CX-5.
pub fn article_text() -> String {
    let mut text = String::from(
        "The 2024 Mazda CX-5 remains one of the most engaging compact crossovers on sale. ",
    );
    text.push_str(
        &"Its turbocharged engine pulls cleanly through the midrange and the steering \
          is accurate and well weighted on twisting back roads. "
            .repeat(5),
    );
    text
}

// ---------------------------------------------------------------------------
// MockTier
// ---------------------------------------------------------------------------

enum Script {
    Queue(Vec<Result<Vec<FetchedPage>, AppError>>),
    Repeat(String),
    FailWithStatus(u16),
    PanicOn { fragment: String, markup: String },
}

/// Tier with scripted responses. Pages with an empty URL take the request URL.
#[derive(Clone)]
pub struct MockTier {
    tier: Tier,
    breaker: Option<&'static str>,
    provider: Option<&'static str>,
    delay: Option<Duration>,
    script: Arc<Mutex<Script>>,
    calls: Arc<AtomicUsize>,
}

impl MockTier {
    fn with_script(tier: Tier, script: Script) -> Self {
        Self {
            tier,
            breaker: None,
            provider: None,
            delay: None,
            script: Arc::new(Mutex::new(script)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns `markup` once, then fails as not applicable.
    pub fn ok(tier: Tier, markup: &str) -> Self {
        Self::with_script(
            tier,
            Script::Queue(vec![Ok(vec![FetchedPage::new("", markup)])]),
        )
    }

    /// Returns `markup` on every call.
    pub fn repeating(tier: Tier, markup: &str) -> Self {
        Self::with_script(tier, Script::Repeat(markup.to_string()))
    }

    pub fn pages(tier: Tier, pages: Vec<FetchedPage>) -> Self {
        Self::with_script(tier, Script::Queue(vec![Ok(pages)]))
    }

    pub fn failing(tier: Tier, error: AppError) -> Self {
        Self::with_script(tier, Script::Queue(vec![Err(error)]))
    }

    /// Panics for URLs containing `fragment`, returns `markup` otherwise.
    pub fn panicking_on(tier: Tier, fragment: &str, markup: &str) -> Self {
        Self::with_script(
            tier,
            Script::PanicOn {
                fragment: fragment.to_string(),
                markup: markup.to_string(),
            },
        )
    }

    /// Fails with an HTTP status on every call.
    pub fn failing_repeatedly(tier: Tier, status: u16) -> Self {
        Self::with_script(tier, Script::FailWithStatus(status))
    }

    /// Route calls through the named breaker, like a paid-provider tier.
    pub fn with_breaker(mut self, key: &'static str) -> Self {
        self.breaker = Some(key);
        self
    }

    /// Report `name` as the provider behind every page.
    pub fn with_provider(mut self, name: &'static str) -> Self {
        self.provider = Some(name);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self, url: &str) -> Result<TierOutput, AppError> {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        let pages = match &mut *script {
            Script::Queue(queue) if queue.is_empty() => {
                return Err(AppError::NotApplicable("no scripted response".into()));
            }
            Script::Queue(queue) => queue.remove(0)?,
            Script::Repeat(markup) => vec![FetchedPage::new("", markup.clone())],
            Script::PanicOn { fragment, markup } => {
                assert!(!url.contains(fragment.as_str()), "scripted panic for {url}");
                vec![FetchedPage::new("", markup.clone())]
            }
            Script::FailWithStatus(status) => {
                return Err(AppError::HttpStatus {
                    status: *status,
                    url: url.to_string(),
                });
            }
        };
        let pages = pages
            .into_iter()
            .map(|p| {
                if p.url.is_empty() {
                    FetchedPage::new(url, p.markup)
                } else {
                    p
                }
            })
            .collect();
        Ok(TierOutput {
            pages,
            provider: self.provider.map(str::to_string),
        })
    }
}

#[async_trait]
impl TierStrategy for MockTier {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn breaker_keys(&self) -> Vec<&str> {
        self.breaker.into_iter().collect()
    }

    async fn fetch(&self, ctx: &TierContext<'_>) -> Result<TierOutput, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let url = ctx.request.url();
        match self.breaker {
            Some(key) => ctx
                .breakers
                .get(key)
                .call(|| async { self.next(url) })
                .await
                .map_err(AppError::from),
            None => self.next(url),
        }
    }
}

// ---------------------------------------------------------------------------
// PlainTextExtractor
// ---------------------------------------------------------------------------

/// Treats markup as plain text and runs it through a real quality gate.
#[derive(Clone, Default)]
pub struct PlainTextExtractor {
    gate: QualityGate,
    byline: Option<String>,
    published: Option<DateTime<Utc>>,
}

impl PlainTextExtractor {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            gate: QualityGate::new(config),
            ..Self::default()
        }
    }

    pub fn with_byline(mut self, byline: &str) -> Self {
        self.byline = Some(byline.to_string());
        self
    }

    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }
}

impl ContentExtractor for PlainTextExtractor {
    fn extract(&self, markup: &str, request: &ExtractionRequest) -> ExtractedContent {
        let verdict = self.gate.evaluate(markup, request, self.published);
        ExtractedContent {
            candidates: vec![ExtractionCandidate {
                method: "plain".into(),
                text: markup.to_string(),
                score: verdict.score,
                passes_gate: verdict.passes(),
                rejection: verdict.rejection,
            }],
            title: None,
            byline: self.byline.clone(),
            published: self.published,
        }
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockSink {
    pub recorded: Arc<Mutex<Vec<ExtractionResult>>>,
}

impl ResultSink for MockSink {
    async fn record(&self, result: &ExtractionResult) -> Result<(), AppError> {
        self.recorded.lock().unwrap().push(result.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Records a short line per tier-level event.
#[derive(Default)]
pub struct RecordingReporter {
    pub events: Mutex<Vec<String>>,
}

impl AcquisitionReporter for RecordingReporter {
    fn report(&self, event: AcquisitionEvent<'_>) {
        let line = match event {
            AcquisitionEvent::TierStarted { tier, .. } => format!("started {tier}"),
            AcquisitionEvent::TierSkipped { tier, .. } => format!("skipped {tier}"),
            AcquisitionEvent::TierFailed { tier, .. } => format!("failed {tier}"),
            AcquisitionEvent::CandidateRejected { tier, .. } => format!("rejected {tier}"),
            AcquisitionEvent::Accepted { tier, .. } => format!("accepted {tier}"),
            AcquisitionEvent::Finished { status, .. } => format!("finished {status:?}"),
            _ => return,
        };
        self.events.lock().unwrap().push(line);
    }
}
