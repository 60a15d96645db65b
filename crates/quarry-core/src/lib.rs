pub mod acquire;
pub mod batch;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod models;
pub mod quality;
pub mod rate_limit;
pub mod report;
pub mod sites;
pub mod traits;
pub mod util;
pub mod variants;

#[cfg(test)]
pub(crate) mod testutil;

pub use acquire::AcquisitionService;
pub use batch::run_batch;
pub use cache::{ConfiguredCache, MokaResultCache};
pub use circuit_breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::EngineConfig;
pub use error::AppError;
pub use models::{
    AcquisitionStatus, Attribution, AttributionStrength, ExtractedContent, ExtractionCandidate,
    ExtractionRequest, ExtractionResult, FetchAttempt, FetchOutcome, Tier, compute_hash,
};
pub use quality::{QualityConfig, QualityGate, Rejection, Verdict};
pub use rate_limit::{RateLimiter, RateSpec};
pub use report::{AcquisitionEvent, AcquisitionReporter, SilentReporter, TracingReporter};
pub use sites::{SiteDirectory, SiteProfile};
pub use traits::{
    Analysis, AnalysisOutcome, ContentExtractor, FetchedPage, Fetcher, NoCache, NullSink,
    ResultCache, ResultSink, TextAnalyzer, TierContext, TierOutput, TierStrategy, WebSearch,
};
pub use variants::{TermVariants, subject_variants};
