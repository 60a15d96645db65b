use thiserror::Error;

use crate::models::FetchOutcome;

/// Application-wide error types for Quarry.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed before a status was available.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Remote answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// A proxy reached the target, which answered with a non-success status.
    /// Says nothing about the proxy's own health.
    #[error("HTTP {status} for {url} via {provider}")]
    UpstreamStatus {
        provider: String,
        status: u16,
        url: String,
    },

    /// Remote answered 200 with a block page (captcha, access denied).
    #[error("Blocked: {0}")]
    Blocked(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Feed or markup could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A paid provider (proxy, search, analysis) rejected the call.
    #[error("{provider} error (HTTP {status_code}): {message}")]
    ProviderError {
        provider: String,
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// A circuit breaker rejected the call without touching the network.
    #[error("Circuit '{name}' is open, retry after {retry_after_secs} seconds")]
    CircuitOpen { name: String, retry_after_secs: u64 },

    /// A collaborator is missing credentials or endpoints.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// The tier has nothing to offer for this request.
    #[error("Not applicable: {0}")]
    NotApplicable(String),

    /// Invalid configuration or request.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The caller gave up.
    #[error("Cancelled")]
    Cancelled,

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error should trip the circuit breaker.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            AppError::ProviderError {
                status_code,
                retryable,
                ..
            } => {
                // Trip on rate limits (429) and server errors (5xx)
                *status_code == 429 || *status_code >= 500 || *retryable
            }
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("connection")
            }
            _ => false,
        }
    }

    /// Classifies this error as the terminal outcome of a fetch attempt.
    pub fn outcome(&self) -> FetchOutcome {
        match self {
            AppError::Timeout(_) => FetchOutcome::Timeout,
            AppError::RateLimitExceeded => FetchOutcome::RateLimited,
            AppError::HttpStatus { status: 429, .. } => FetchOutcome::RateLimited,
            AppError::ProviderError {
                status_code: 429, ..
            } => FetchOutcome::RateLimited,
            AppError::CircuitOpen { .. } => FetchOutcome::CircuitOpen,
            AppError::NotApplicable(_) | AppError::NotConfigured(_) => FetchOutcome::NotApplicable,
            AppError::Cancelled => FetchOutcome::Cancelled,
            _ => FetchOutcome::HttpError,
        }
    }

    /// Status code reported by the remote, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AppError::HttpStatus { status, .. } | AppError::UpstreamStatus { status, .. } => {
                Some(*status)
            }
            AppError::ProviderError { status_code, .. } => Some(*status_code),
            AppError::RateLimitExceeded => Some(429),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_tripping() {
        assert!(AppError::RateLimitExceeded.should_trip_circuit());
        assert!(AppError::Timeout(30).should_trip_circuit());
        assert!(
            AppError::ProviderError {
                provider: "scrapingbee".into(),
                message: "upstream down".into(),
                status_code: 502,
                retryable: true,
            }
            .should_trip_circuit()
        );
        assert!(
            !AppError::ProviderError {
                provider: "scrapingbee".into(),
                message: "bad params".into(),
                status_code: 422,
                retryable: false,
            }
            .should_trip_circuit()
        );
        assert!(!AppError::NotApplicable("no feed".into()).should_trip_circuit());
        let upstream = AppError::UpstreamStatus {
            provider: "scrapfly".into(),
            status: 503,
            url: "https://example.com".into(),
        };
        assert!(!upstream.should_trip_circuit());
        assert_eq!(upstream.status_code(), Some(503));
        assert_eq!(upstream.outcome(), FetchOutcome::HttpError);
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(AppError::Timeout(10).outcome(), FetchOutcome::Timeout);
        assert_eq!(
            AppError::HttpStatus {
                status: 429,
                url: "https://example.com".into()
            }
            .outcome(),
            FetchOutcome::RateLimited
        );
        assert_eq!(
            AppError::HttpStatus {
                status: 404,
                url: "https://example.com".into()
            }
            .outcome(),
            FetchOutcome::HttpError
        );
        assert_eq!(
            AppError::NetworkError("refused".into()).outcome(),
            FetchOutcome::HttpError
        );
        assert_eq!(
            AppError::NotConfigured("no key".into()).outcome(),
            FetchOutcome::NotApplicable
        );
        assert_eq!(AppError::Cancelled.outcome(), FetchOutcome::Cancelled);
        assert_eq!(
            AppError::CircuitOpen {
                name: "scrapingbee".into(),
                retry_after_secs: 30
            }
            .outcome(),
            FetchOutcome::CircuitOpen
        );
    }
}
