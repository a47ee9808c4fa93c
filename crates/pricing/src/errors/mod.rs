//! Error types and retry classification for source fetches.
//!
//! This module provides:
//! - [`ProviderError`]: The main error enum for all source fetch operations
//! - [`RetryClass`]: Classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur while fetching from a pricing source.
///
/// Each variant is classified into a [`RetryClass`] via the
/// [`retry_class`](Self::retry_class) method, which determines how the retry
/// policy handles the error. No variant ever escapes the per-source client
/// boundary - exhausted or terminal failures surface to reconciliation only
/// as an absent quote.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The source rejected the request shape.
    /// This is a terminal error - retrying won't help.
    #[error("Bad request to {source}: {message}")]
    BadRequest {
        /// The source that rejected the request
        r#source: String,
        /// The rejection reason, as far as the source reported one
        message: String,
    },

    /// The request to the source timed out.
    /// Should retry with exponential backoff.
    #[error("Timeout: {source}")]
    Timeout {
        /// The source that timed out
        r#source: String,
    },

    /// The source rate limited the request (HTTP 429).
    /// Should retry with exponential backoff.
    #[error("Rate limited: {source}")]
    RateLimited {
        /// The source that rate limited the request
        r#source: String,
    },

    /// The source failed on its side (HTTP 5xx).
    /// Should retry with exponential backoff.
    #[error("Upstream error from {source}: HTTP {status}")]
    Upstream {
        /// The source that failed
        r#source: String,
        /// The HTTP status code
        status: u16,
    },

    /// The source rejected the request (HTTP 4xx other than 429).
    /// This is a terminal error.
    #[error("Rejected by {source}: HTTP {status}")]
    Rejected {
        /// The source that rejected the request
        r#source: String,
        /// The HTTP status code
        status: u16,
    },

    /// The source answered with a shape we don't understand.
    /// Logged and given up on immediately - no retry.
    #[error("Malformed response from {source}: {message}")]
    MalformedResponse {
        /// The source that produced the response
        r#source: String,
        /// What failed to parse
        message: String,
    },

    /// A network error occurred while communicating with a source.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ProviderError {
    /// Map an unexpected HTTP status to the matching error variant.
    pub fn from_status(source: &str, status: StatusCode) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited {
                source: source.to_string(),
            }
        } else if status.is_server_error() {
            Self::Upstream {
                source: source.to_string(),
                status: status.as_u16(),
            }
        } else {
            Self::Rejected {
                source: source.to_string(),
                status: status.as_u16(),
            }
        }
    }

    /// Returns the retry classification for this error.
    ///
    /// - [`RetryClass::Fatal`]: Don't retry, the request is fundamentally wrong
    /// - [`RetryClass::Backoff`]: Retry with capped exponential backoff
    /// - [`RetryClass::NoRetry`]: Transient, but not worth re-sending
    pub fn retry_class(&self) -> RetryClass {
        match self {
            // Terminal errors - never retry
            Self::BadRequest { .. } | Self::Rejected { .. } => RetryClass::Fatal,

            // Transient errors - retry with backoff
            Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::Upstream { .. }
            | Self::Network(_) => RetryClass::Backoff,

            // The same request would parse the same way again
            Self::MalformedResponse { .. } => RetryClass::NoRetry,
        }
    }
}
