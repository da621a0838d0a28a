//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Failure of a single exchange-rate round trip.
///
/// Every variant is recoverable: the composer records the rate as unavailable
/// and the view omits the converted amount.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Quote service timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("Quote service unreachable: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Malformed quote response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e)
        } else {
            FetchError::Network(e)
        }
    }
}

/// A programming-contract breach at an integration boundary, e.g. a negative
/// balance handed in by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invariant violated: {0}")]
pub struct InvariantViolation(pub String);
