use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::BreakerRegistry;
use crate::config::EngineConfig;
use crate::error::AppError;
use crate::models::{
    AcquisitionStatus, Attribution, Diagnostic, ExtractedContent, ExtractionCandidate,
    ExtractionRequest, ExtractionResult, FetchAttempt, FetchOutcome, Tier,
};
use crate::rate_limit::RateLimiter;
use crate::report::{AcquisitionEvent, AcquisitionReporter, TracingReporter};
use crate::sites::SiteDirectory;
use crate::traits::{
    ContentExtractor, FetchedPage, NoCache, NullSink, ResultCache, ResultSink, TierContext,
    TierOutput, TierStrategy,
};

/// Drives a request up the tier ladder until some tier yields text that
/// passes the quality gate.
///
/// Generic over the extractor, cache and sink so tests can run the whole
/// escalation without any network. Tiers are trait objects because every
/// rung has a different concrete type.
pub struct AcquisitionService<X, C = NoCache, S = NullSink>
where
    X: ContentExtractor,
    C: ResultCache,
    S: ResultSink,
{
    tiers: Vec<Arc<dyn TierStrategy>>,
    extractor: X,
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    sites: Arc<SiteDirectory>,
    config: EngineConfig,
    cache: C,
    sink: S,
    reporter: Arc<dyn AcquisitionReporter>,
}

impl<X: ContentExtractor> AcquisitionService<X> {
    /// Create a service with no tiers, no cache and no sink.
    ///
    /// The rate limiter and breaker registry are built from `config`.
    pub fn new(extractor: X, config: EngineConfig) -> Self {
        let limiter = RateLimiter::new(config.default_rate)
            .with_host_rates(config.host_rates.clone());
        let breakers = config
            .service_breakers
            .iter()
            .fold(BreakerRegistry::new(config.breaker.clone()), |reg, (name, cfg)| {
                reg.with_config(name.clone(), cfg.clone())
            });

        Self {
            tiers: Vec::new(),
            extractor,
            limiter: Arc::new(limiter),
            breakers: Arc::new(breakers),
            sites: Arc::new(SiteDirectory::default()),
            config,
            cache: NoCache,
            sink: NullSink,
            reporter: Arc::new(TracingReporter),
        }
    }
}

impl<X, C, S> AcquisitionService<X, C, S>
where
    X: ContentExtractor,
    C: ResultCache,
    S: ResultSink,
{
    /// Register a tier. A second strategy for the same tier replaces the first.
    pub fn with_tier(mut self, strategy: impl TierStrategy + 'static) -> Self {
        self.insert_tier(Arc::new(strategy));
        self
    }

    pub fn with_tiers(mut self, strategies: impl IntoIterator<Item = Arc<dyn TierStrategy>>) -> Self {
        for strategy in strategies {
            self.insert_tier(strategy);
        }
        self
    }

    /// Attach per-site hints. Site rates are merged into the rate limiter,
    /// with configured host rates taking precedence.
    pub fn with_sites(mut self, sites: SiteDirectory) -> Self {
        let limiter = RateLimiter::new(self.config.default_rate)
            .with_host_rates(sites.rates())
            .with_host_rates(self.config.host_rates.clone());
        self.limiter = Arc::new(limiter);
        self.sites = Arc::new(sites);
        self
    }

    /// Share a limiter with other services (e.g. one per worker).
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn AcquisitionReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cache<C2: ResultCache>(self, cache: C2) -> AcquisitionService<X, C2, S> {
        AcquisitionService {
            tiers: self.tiers,
            extractor: self.extractor,
            limiter: self.limiter,
            breakers: self.breakers,
            sites: self.sites,
            config: self.config,
            cache,
            sink: self.sink,
            reporter: self.reporter,
        }
    }

    pub fn with_sink<S2: ResultSink>(self, sink: S2) -> AcquisitionService<X, C, S2> {
        AcquisitionService {
            tiers: self.tiers,
            extractor: self.extractor,
            limiter: self.limiter,
            breakers: self.breakers,
            sites: self.sites,
            config: self.config,
            cache: self.cache,
            sink,
            reporter: self.reporter,
        }
    }

    /// Registered tiers, cheapest first.
    pub fn tiers(&self) -> Vec<Tier> {
        self.tiers.iter().map(|t| t.tier()).collect()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn reporter(&self) -> &dyn AcquisitionReporter {
        self.reporter.as_ref()
    }

    fn insert_tier(&mut self, strategy: Arc<dyn TierStrategy>) {
        let tier = strategy.tier();
        self.tiers.retain(|t| t.tier() != tier);
        self.tiers.push(strategy);
        self.tiers.sort_by_key(|t| t.tier());
    }

    /// Acquire text for `request`.
    ///
    /// Never fails: fetch errors, quality rejections and open breakers are
    /// recorded in the attempt history and the result status says whether
    /// text was accepted, every permitted tier was exhausted, or the run was
    /// cancelled (by `cancel` or the request deadline).
    pub async fn acquire(
        &self,
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> ExtractionResult {
        let started = Instant::now();
        let deadline = request
            .deadline()
            .map(|d| tokio::time::Instant::now() + d);

        let cache_key = request.cache_key();
        // An entry accepted above this request's ceiling does not count.
        if let Some(mut cached) = self.cache.get(&cache_key).await
            && cached.tier.is_none_or(|t| t <= request.max_tier())
        {
            self.reporter.report(AcquisitionEvent::CacheHit {
                request_id: request.id(),
                url: request.url(),
            });
            cached.request_id = request.id();
            cached.from_cache = true;
            cached.elapsed_ms = elapsed_ms(started);
            self.record(&cached).await;
            return cached;
        }

        let site = self.sites.lookup(request.host());
        let start_tier = site
            .and_then(|s| s.start_tier)
            .filter(|t| *t <= request.max_tier())
            .unwrap_or(Tier::Basic);
        if start_tier > Tier::Basic {
            tracing::debug!(host = %request.host(), %start_tier, "Site hint skips cheaper tiers");
        }

        let ctx = TierContext {
            request,
            site,
            limiter: &self.limiter,
            breakers: &self.breakers,
        };

        let mut attempts = Vec::new();
        let mut status = AcquisitionStatus::Exhausted;

        for strategy in &self.tiers {
            let tier = strategy.tier();
            if tier < start_tier {
                continue;
            }
            if tier > request.max_tier() {
                break;
            }
            if cancel.is_cancelled() || deadline.is_some_and(|d| tokio::time::Instant::now() >= d)
            {
                status = AcquisitionStatus::Cancelled;
                break;
            }
            if !self.config.is_enabled(tier) {
                self.reporter.report(AcquisitionEvent::TierSkipped {
                    request_id: request.id(),
                    tier,
                    reason: "disabled",
                });
                continue;
            }

            let keys = strategy.breaker_keys();
            if !keys.is_empty() && keys.iter().all(|k| !self.breakers.allows(k)) {
                let message = format!("Circuit open for {}", keys.join(", "));
                self.reporter.report(AcquisitionEvent::TierSkipped {
                    request_id: request.id(),
                    tier,
                    reason: &message,
                });
                attempts.push(FetchAttempt {
                    tier,
                    duration_ms: 0,
                    markup_chars: None,
                    outcome: FetchOutcome::CircuitOpen,
                    provider: None,
                    diagnostic: Some(Diagnostic {
                        status_code: None,
                        message,
                    }),
                    rejection: None,
                });
                continue;
            }

            self.reporter.report(AcquisitionEvent::TierStarted {
                request_id: request.id(),
                tier,
                url: request.url(),
            });
            let tier_started = Instant::now();

            let output = match self.run_tier(strategy.as_ref(), &ctx, cancel, deadline).await {
                Ok(output) => output,
                Err(e) => {
                    let outcome = e.outcome();
                    let error = e.to_string();
                    self.reporter.report(AcquisitionEvent::TierFailed {
                        request_id: request.id(),
                        tier,
                        outcome,
                        error: &error,
                    });
                    attempts.push(FetchAttempt {
                        tier,
                        duration_ms: elapsed_ms(tier_started),
                        markup_chars: None,
                        outcome,
                        provider: None,
                        diagnostic: Some(Diagnostic::from(&e)),
                        rejection: None,
                    });
                    if matches!(e, AppError::Cancelled) {
                        status = AcquisitionStatus::Cancelled;
                        break;
                    }
                    continue;
                }
            };

            let markup_chars = Some(output.markup_chars());
            match self.select(tier, &output, request) {
                Selection::Accepted {
                    page,
                    content,
                    candidate,
                } => {
                    attempts.push(FetchAttempt {
                        tier,
                        duration_ms: elapsed_ms(tier_started),
                        markup_chars,
                        outcome: FetchOutcome::Success,
                        provider: output.provider.clone(),
                        diagnostic: None,
                        rejection: None,
                    });
                    let result = ExtractionResult {
                        request_id: request.id(),
                        url: request.url().to_string(),
                        status: AcquisitionStatus::Accepted,
                        text: Some(candidate.text.clone()),
                        source_url: Some(page.url.clone()),
                        tier: Some(tier),
                        method: Some(candidate.method.clone()),
                        score: Some(candidate.score),
                        title: content.title.clone(),
                        attribution: Attribution::classify(
                            content.byline.as_deref(),
                            request.author(),
                        ),
                        published: content.published,
                        date_verified: request.window().is_none() || content.published.is_some(),
                        attempts,
                        elapsed_ms: elapsed_ms(started),
                        from_cache: false,
                        completed_at: Utc::now(),
                    };
                    self.finish(&result);
                    self.cache.put(&cache_key, &result).await;
                    self.record(&result).await;
                    return result;
                }
                Selection::Rejected { reason } => {
                    attempts.push(FetchAttempt {
                        tier,
                        duration_ms: elapsed_ms(tier_started),
                        markup_chars,
                        outcome: FetchOutcome::Success,
                        provider: output.provider.clone(),
                        diagnostic: None,
                        rejection: Some(reason),
                    });
                }
            }
        }

        let result = ExtractionResult {
            attempts,
            elapsed_ms: elapsed_ms(started),
            ..ExtractionResult::empty(request, status)
        };
        self.finish(&result);
        self.record(&result).await;
        result
    }

    /// Take a rate-limit token for the target host, then run the tier under
    /// its own timeout. Both steps race cancellation and the request deadline.
    async fn run_tier(
        &self,
        strategy: &dyn TierStrategy,
        ctx: &TierContext<'_>,
        cancel: &CancellationToken,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<TierOutput, AppError> {
        let timeout = self.config.timeout_for(strategy.tier());

        interruptible(
            async {
                self.limiter.acquire(ctx.request.host()).await;
                Ok::<(), AppError>(())
            },
            cancel,
            deadline,
        )
        .await?;

        interruptible(
            async {
                match tokio::time::timeout(timeout, strategy.fetch(ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout(timeout.as_secs())),
                }
            },
            cancel,
            deadline,
        )
        .await
    }

    /// Extract every page in order and return the first accepted candidate.
    fn select<'o>(
        &self,
        tier: Tier,
        output: &'o TierOutput,
        request: &ExtractionRequest,
    ) -> Selection<'o> {
        let mut first_reason = None;

        for page in &output.pages {
            let content = self.extractor.extract(&page.markup, request);
            if let Some(candidate) = content.accepted().cloned() {
                self.reporter.report(AcquisitionEvent::Accepted {
                    request_id: request.id(),
                    tier,
                    method: &candidate.method,
                    chars: candidate.text.chars().count(),
                    score: candidate.score,
                });
                return Selection::Accepted {
                    page,
                    content,
                    candidate,
                };
            }

            let reason = content
                .best_rejected()
                .and_then(|c| c.rejection.as_ref())
                .map(ToString::to_string)
                .unwrap_or_else(|| "no text extracted".to_string());
            self.reporter.report(AcquisitionEvent::CandidateRejected {
                request_id: request.id(),
                tier,
                page_url: &page.url,
                reason: &reason,
            });
            first_reason.get_or_insert(reason);
        }

        Selection::Rejected {
            reason: first_reason.unwrap_or_else(|| "tier returned no pages".to_string()),
        }
    }

    fn finish(&self, result: &ExtractionResult) {
        self.reporter.report(AcquisitionEvent::Finished {
            request_id: result.request_id,
            status: result.status,
            attempts: result.attempts.len(),
            elapsed: Duration::from_millis(result.elapsed_ms),
        });
    }

    async fn record(&self, result: &ExtractionResult) {
        if let Err(e) = self.sink.record(result).await {
            tracing::warn!(request_id = %result.request_id, error = %e, "Failed to record result");
        }
    }
}

enum Selection<'o> {
    Accepted {
        page: &'o FetchedPage,
        content: ExtractedContent,
        candidate: ExtractionCandidate,
    },
    Rejected {
        reason: String,
    },
}

async fn interruptible<T>(
    work: impl Future<Output = Result<T, AppError>>,
    cancel: &CancellationToken,
    deadline: Option<tokio::time::Instant>,
) -> Result<T, AppError> {
    let deadline_reached = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AppError::Cancelled),
        () = deadline_reached => Err(AppError::Timeout(0)),
        result = work => result,
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
