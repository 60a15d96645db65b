use std::time::Duration;

use quarry_core::circuit_breaker::BreakerRegistry;
use quarry_core::models::ExtractionRequest;
use quarry_core::rate_limit::{RateLimiter, RateSpec};
use quarry_core::sites::SiteProfile;
use quarry_core::traits::TierContext;

/// Registries for driving a tier outside the orchestrator.
pub struct TestEnv {
    pub limiter: RateLimiter,
    pub breakers: BreakerRegistry,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_rate(RateSpec::new(1000, Duration::from_secs(1)))
    }

    pub fn with_rate(spec: RateSpec) -> Self {
        Self {
            limiter: RateLimiter::new(spec),
            breakers: BreakerRegistry::default(),
        }
    }

    pub fn ctx<'a>(
        &'a self,
        request: &'a ExtractionRequest,
        site: Option<&'a SiteProfile>,
    ) -> TierContext<'a> {
        TierContext {
            request,
            site,
            limiter: &self.limiter,
            breakers: &self.breakers,
        }
    }
}

pub const ARTICLE_HTML: &str = r#"<html><head><title>Mazda CX-5 review</title></head><body>
<nav><a href="/">Home</a></nav>
<article><h1>2024 Mazda CX-5 review</h1>
<p>The Mazda CX-5 remains one of the most engaging compact crossovers you can buy today.</p>
<p>Its steering is precise and well weighted, and the ride stays composed over broken roads.</p>
<p>Inside, the cabin feels a class above, with soft materials and a tidy dashboard layout.</p>
<p>The turbocharged engine adds welcome punch, though fuel economy suffers in town driving.</p>
<p>Rear seat space is adequate for adults, and the boot swallows a family's weekend luggage.</p>
<p>Overall it is still the compact crossover we would pick for keen drivers on a budget.</p>
</article></body></html>"#;
