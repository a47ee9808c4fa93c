//! Pricing source trait definition.

use async_trait::async_trait;

use crate::client::RateLimitConfig;
use crate::errors::ProviderError;
use crate::models::{PriceQuery, SourceQuote};

/// Trait for pricing sources.
///
/// Implement this trait to add support for a new source. The per-source
/// client composes rate limiting, caching, retry and circuit breaking around
/// the implementation - a provider only has to know how to fetch.
///
/// Absence of data is a normal outcome: return `Ok(None)` when the source
/// simply has no price for the item, and reserve errors for failures of the
/// fetch itself.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Unique identifier for this source.
    ///
    /// Should be a constant string like "ninja" or "trade". Used for
    /// logging, rate limiter and circuit breaker tracking.
    fn id(&self) -> &'static str;

    /// Rate limit this source should be called under.
    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::default()
    }

    /// Fetch a quote for the query.
    ///
    /// # Returns
    ///
    /// `Ok(Some(quote))` on a successful price observation, `Ok(None)` when
    /// the source has no data for the item, or a [`ProviderError`] when the
    /// fetch itself failed.
    async fn fetch_quote(&self, query: &PriceQuery)
        -> Result<Option<SourceQuote>, ProviderError>;
}
