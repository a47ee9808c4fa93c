//! Per-source fetch pipeline.
//!
//! Composes the circuit breaker, response cache, rate limiter and retry
//! policy around a provider fetch:
//!
//! ```text
//! fetch(query)
//!   -> cache get (hit: done)
//!   -> circuit breaker admission
//!   -> rate limiter acquire
//!   -> retried provider fetch
//!   -> quote sanity check
//!   -> single-flight cache publish
//! ```
//!
//! Every failure is absorbed here. The rest of the engine only ever sees
//! `Option<SourceQuote>` - one broken source must never abort a resolution
//! that could still be served by the others.

use std::borrow::Cow;
use std::sync::Arc;

use log::{debug, warn};

use crate::errors::RetryClass;
use crate::models::{PriceQuery, SourceId, SourceQuote};
use crate::provider::PriceProvider;

use super::cache::{CacheConfig, CacheStats, ResponseCache};
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::rate_limiter::RateLimiter;
use super::retry::{RetryConfig, RetryPolicy};

/// One source's fetch pipeline.
///
/// The rate limiter is shared across clients (and with anything else that
/// talks to the same hosts); the cache, retry policy and circuit breaker are
/// per client.
pub struct SourceClient {
    provider: Arc<dyn PriceProvider>,
    limiter: Arc<RateLimiter>,
    cache: ResponseCache,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl SourceClient {
    /// Create a client with default cache, retry and breaker settings.
    ///
    /// Registers the provider's declared rate limit with the shared limiter.
    pub fn new(provider: Arc<dyn PriceProvider>, limiter: Arc<RateLimiter>) -> Self {
        Self::with_config(
            provider,
            limiter,
            CacheConfig::default(),
            RetryConfig::from_env(),
            CircuitBreakerConfig::default(),
        )
    }

    /// Create a client with custom configuration.
    pub fn with_config(
        provider: Arc<dyn PriceProvider>,
        limiter: Arc<RateLimiter>,
        cache: CacheConfig,
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let source: SourceId = Cow::Borrowed(provider.id());
        limiter.configure(&source, provider.rate_limit());

        Self {
            provider,
            limiter,
            cache: ResponseCache::with_config(cache),
            retry: RetryPolicy::with_config(retry),
            breaker: CircuitBreaker::with_config(breaker),
        }
    }

    /// The underlying source's identifier.
    pub fn id(&self) -> &'static str {
        self.provider.id()
    }

    /// Snapshot of this client's cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Fetch a quote for the query, absorbing all failures.
    ///
    /// Returns `None` when the source has no data for the item, when its
    /// circuit is open, or when the fetch failed terminally or exhausted its
    /// retries. Callers cannot tell these apart by design - reconciliation
    /// treats every absence the same way.
    pub async fn fetch(&self, query: &PriceQuery) -> Option<SourceQuote> {
        let source: SourceId = Cow::Borrowed(self.provider.id());

        if let Some(cached) = self.cache.get(&query.item_key) {
            return cached;
        }

        if !self.breaker.is_allowed(&source) {
            debug!(
                "{}: circuit open, skipping fetch for '{}'",
                source, query.item_key
            );
            return None;
        }

        self.limiter.acquire(&source).await;

        // The fetch runs outside any cache lock; publish re-checks before
        // committing, so callers that raced the same miss converge on one
        // published outcome.
        let outcome = self
            .retry
            .execute(self.provider.id(), || self.provider.fetch_quote(query))
            .await;

        match outcome {
            Ok(quote) => {
                self.breaker.record_success(&source);
                let quote = quote.and_then(|q| sanitize(&source, q));
                self.cache.publish(&query.item_key, quote)
            }
            Err(error) => {
                // A fatal rejection says the request is wrong, not the
                // source; only transient exhaustion counts against the
                // circuit.
                if error.retry_class() == RetryClass::Backoff {
                    self.breaker.record_failure(&source);
                }
                warn!(
                    "{}: no quote for '{}': {}",
                    source, query.item_key, error
                );
                None
            }
        }
    }
}

/// Drop quotes that fail basic sanity checks.
///
/// A non-finite or negative price is a source bug; treating it as absence
/// keeps it out of reconciliation arithmetic.
fn sanitize(source: &SourceId, quote: SourceQuote) -> Option<SourceQuote> {
    if quote.chaos_value.is_finite() && quote.chaos_value >= 0.0 {
        Some(quote)
    } else {
        warn!(
            "{}: discarding quote with invalid value {}",
            source, quote.chaos_value
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limiter::RateLimitConfig;
    use super::*;
    use crate::errors::ProviderError;
    use crate::models::ItemCategory;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Provider that plays back a scripted sequence of outcomes.
    struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<Option<SourceQuote>, ProviderError>>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(
            responses: Vec<Result<Option<SourceQuote>, ProviderError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PriceProvider for ScriptedProvider {
        fn id(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_quote(
            &self,
            _query: &PriceQuery,
        ) -> Result<Option<SourceQuote>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(None))
        }
    }

    fn fast_client(provider: Arc<ScriptedProvider>) -> SourceClient {
        fast_client_with_breaker(provider, CircuitBreakerConfig::default())
    }

    fn fast_client_with_breaker(
        provider: Arc<ScriptedProvider>,
        breaker: CircuitBreakerConfig,
    ) -> SourceClient {
        let limiter = Arc::new(RateLimiter::new());
        limiter.configure(
            &Cow::Borrowed("scripted"),
            RateLimitConfig {
                min_interval: Duration::from_millis(1),
            },
        );
        SourceClient::with_config(
            provider,
            limiter,
            CacheConfig::default(),
            RetryConfig {
                backoff: vec![Duration::from_millis(1)],
                max_attempts: 2,
                max_sleep: Duration::from_millis(1),
            },
            breaker,
        )
    }

    fn query() -> PriceQuery {
        PriceQuery::new("mageblood|heavy belt|unique", ItemCategory::UniqueAccessory)
    }

    fn transient() -> ProviderError {
        ProviderError::Timeout {
            source: "scripted".to_string(),
        }
    }

    #[tokio::test]
    async fn test_successful_fetch_is_cached() {
        let provider = ScriptedProvider::new(vec![Ok(Some(SourceQuote::new("scripted", 90.0)))]);
        let client = fast_client(Arc::clone(&provider));

        let first = client.fetch(&query()).await.expect("should quote");
        assert_eq!(first.chaos_value, 90.0);

        // Second lookup is served from cache without touching the provider.
        let second = client.fetch(&query()).await.expect("should quote");
        assert_eq!(second.chaos_value, 90.0);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_absence_is_cached_as_negative_result() {
        let provider = ScriptedProvider::new(vec![Ok(None)]);
        let client = fast_client(Arc::clone(&provider));

        assert!(client.fetch(&query()).await.is_none());
        assert!(client.fetch(&query()).await.is_none());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::BadRequest {
                source: "scripted".to_string(),
                message: "bad filter".to_string(),
            }),
            Ok(Some(SourceQuote::new("scripted", 12.0))),
        ]);
        let client = fast_client(Arc::clone(&provider));

        // The fatal failure yields None but is not remembered as absence.
        assert!(client.fetch(&query()).await.is_none());
        let retried = client.fetch(&query()).await.expect("should quote");
        assert_eq!(retried.chaos_value, 12.0);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_then_absorbed() {
        let provider = ScriptedProvider::new(vec![Err(transient()), Err(transient())]);
        let client = fast_client(Arc::clone(&provider));

        assert!(client.fetch(&query()).await.is_none());
        // max_attempts = 2: both scripted failures consumed by one fetch.
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_provider() {
        let responses: Vec<Result<Option<SourceQuote>, ProviderError>> =
            (0..4).map(|_| Err(transient())).collect();
        let provider = ScriptedProvider::new(responses);
        let client = fast_client_with_breaker(
            Arc::clone(&provider),
            CircuitBreakerConfig {
                failure_threshold: 2,
                cooldown: Duration::from_secs(60),
                probe_successes: 1,
            },
        );

        // Two exhausted fetches open the circuit (each burns 2 attempts).
        let other = PriceQuery::new("kaom's heart|glorious plate|unique", ItemCategory::UniqueArmour);
        assert!(client.fetch(&query()).await.is_none());
        assert!(client.fetch(&other).await.is_none());
        assert_eq!(provider.calls(), 4);

        // Third fetch is short-circuited without a provider call.
        let third = PriceQuery::new("shavronne's wrappings|occultist's vestment|unique", ItemCategory::UniqueArmour);
        assert!(client.fetch(&third).await.is_none());
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn test_invalid_quote_is_discarded() {
        let provider =
            ScriptedProvider::new(vec![Ok(Some(SourceQuote::new("scripted", f64::NAN)))]);
        let client = fast_client(Arc::clone(&provider));

        assert!(client.fetch(&query()).await.is_none());
    }

    #[tokio::test]
    async fn test_client_reports_cache_stats() {
        let provider = ScriptedProvider::new(vec![Ok(Some(SourceQuote::new("scripted", 5.0)))]);
        let client = fast_client(provider);

        client.fetch(&query()).await;
        client.fetch(&query()).await;

        let stats = client.cache_stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
    }
}
