use std::time::Duration;

use uuid::Uuid;

use crate::models::{AcquisitionStatus, FetchOutcome, Tier};

/// Events emitted by the acquisition engine for monitoring/logging.
#[derive(Debug, Clone)]
pub enum AcquisitionEvent<'a> {
    CacheHit {
        request_id: Uuid,
        url: &'a str,
    },
    TierStarted {
        request_id: Uuid,
        tier: Tier,
        url: &'a str,
    },
    /// The tier was not attempted (disabled, or every breaker open).
    TierSkipped {
        request_id: Uuid,
        tier: Tier,
        reason: &'a str,
    },
    TierFailed {
        request_id: Uuid,
        tier: Tier,
        outcome: FetchOutcome,
        error: &'a str,
    },
    CandidateRejected {
        request_id: Uuid,
        tier: Tier,
        page_url: &'a str,
        reason: &'a str,
    },
    Accepted {
        request_id: Uuid,
        tier: Tier,
        method: &'a str,
        chars: usize,
        score: f64,
    },
    Finished {
        request_id: Uuid,
        status: AcquisitionStatus,
        attempts: usize,
        elapsed: Duration,
    },
    BatchStarted {
        requests: usize,
        concurrency: usize,
    },
    BatchFinished {
        accepted: usize,
        total: usize,
    },
}

/// Trait for receiving acquisition events (decoupled logging).
pub trait AcquisitionReporter: Send + Sync {
    fn report(&self, event: AcquisitionEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl AcquisitionReporter for SilentReporter {}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl AcquisitionReporter for TracingReporter {
    fn report(&self, event: AcquisitionEvent<'_>) {
        match event {
            AcquisitionEvent::CacheHit { request_id, url } => {
                tracing::info!(%request_id, %url, "Served from cache");
            }
            AcquisitionEvent::TierStarted {
                request_id,
                tier,
                url,
            } => {
                tracing::info!(%request_id, %tier, %url, "Trying tier");
            }
            AcquisitionEvent::TierSkipped {
                request_id,
                tier,
                reason,
            } => {
                tracing::info!(%request_id, %tier, %reason, "Tier skipped");
            }
            AcquisitionEvent::TierFailed {
                request_id,
                tier,
                outcome,
                error,
            } => {
                tracing::warn!(%request_id, %tier, %outcome, %error, "Tier failed");
            }
            AcquisitionEvent::CandidateRejected {
                request_id,
                tier,
                page_url,
                reason,
            } => {
                tracing::info!(%request_id, %tier, %page_url, %reason, "Content rejected");
            }
            AcquisitionEvent::Accepted {
                request_id,
                tier,
                method,
                chars,
                score,
            } => {
                tracing::info!(%request_id, %tier, %method, %chars, score = %format!("{score:.1}"), "Content accepted");
            }
            AcquisitionEvent::Finished {
                request_id,
                status,
                attempts,
                elapsed,
            } => {
                tracing::info!(
                    %request_id,
                    ?status,
                    %attempts,
                    elapsed_ms = %elapsed.as_millis(),
                    "Acquisition finished"
                );
            }
            AcquisitionEvent::BatchStarted {
                requests,
                concurrency,
            } => {
                tracing::info!(%requests, %concurrency, "Batch started");
            }
            AcquisitionEvent::BatchFinished { accepted, total } => {
                tracing::info!(%accepted, %total, "Batch finished");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_report_is_a_no_op() {
        struct Quiet;
        impl AcquisitionReporter for Quiet {}

        Quiet.report(AcquisitionEvent::BatchStarted {
            requests: 1,
            concurrency: 1,
        });
        SilentReporter.report(AcquisitionEvent::BatchFinished {
            accepted: 0,
            total: 1,
        });
    }
}
