//! Price resolution facade.
//!
//! Fans a query out to the configured sources, waits for every fetch to
//! settle (success, absence, or exhausted retries), and reconciles whatever
//! came back. One slow or broken source never blocks or fails the result of
//! the other - absence is data here.

use std::time::Duration;

use log::debug;
use tokio::time::error::Elapsed;

use crate::client::SourceClient;
use crate::models::{PriceQuery, ReconciledPrice, SourceQuote};
use crate::reconcile::{reconcile, ReconcilePolicy};

/// Facade turning a [`PriceQuery`] into one [`ReconciledPrice`].
///
/// Holds its source clients by construction-time injection, so tests and
/// embedders get isolated instances instead of process-wide shared state.
pub struct PriceResolutionService {
    primary: SourceClient,
    secondary: SourceClient,
    policy: ReconcilePolicy,
}

impl PriceResolutionService {
    /// Create a service over a primary (bulk-table) and secondary (search)
    /// source with the default reconciliation policy.
    pub fn new(primary: SourceClient, secondary: SourceClient) -> Self {
        Self::with_policy(primary, secondary, ReconcilePolicy::default())
    }

    /// Create a service with a custom reconciliation policy.
    pub fn with_policy(
        primary: SourceClient,
        secondary: SourceClient,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            primary,
            secondary,
            policy,
        }
    }

    /// Resolve a query against both sources.
    ///
    /// The sources are fetched concurrently; reconciliation runs once both
    /// have settled. Per-source failures were already absorbed below this
    /// layer, so this always produces a price - possibly the "no data"
    /// result, which callers must treat as unknown, not worthless.
    pub async fn resolve(&self, query: &PriceQuery) -> ReconciledPrice {
        let (primary, secondary) =
            tokio::join!(self.primary.fetch(query), self.secondary.fetch(query));

        self.reconciled(query, primary, secondary)
    }

    /// Resolve a query with an upper bound on per-source latency.
    ///
    /// A source that misses the deadline is treated as having no data for
    /// this resolution and its in-flight fetch is dropped. Whatever partial
    /// results are available at the deadline get reconciled - including
    /// none.
    pub async fn resolve_within(
        &self,
        query: &PriceQuery,
        deadline: Duration,
    ) -> ReconciledPrice {
        let (primary, secondary) = tokio::join!(
            tokio::time::timeout(deadline, self.primary.fetch(query)),
            tokio::time::timeout(deadline, self.secondary.fetch(query)),
        );

        let primary = settled(primary, self.primary.id(), query);
        let secondary = settled(secondary, self.secondary.id(), query);
        self.reconciled(query, primary, secondary)
    }

    fn reconciled(
        &self,
        query: &PriceQuery,
        primary: Option<SourceQuote>,
        secondary: Option<SourceQuote>,
    ) -> ReconciledPrice {
        let result = reconcile(primary.as_ref(), secondary.as_ref(), &self.policy);
        debug!(
            "resolved '{}': {} chaos, {} ({})",
            query.item_key, result.chaos_value, result.confidence, result.label
        );
        result
    }
}

/// Collapse a timed-out fetch into absence.
fn settled(
    outcome: Result<Option<SourceQuote>, Elapsed>,
    source: &str,
    query: &PriceQuery,
) -> Option<SourceQuote> {
    match outcome {
        Ok(quote) => quote,
        Err(_) => {
            debug!("{}: deadline elapsed for '{}'", source, query.item_key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{
        CacheConfig, CircuitBreakerConfig, RateLimitConfig, RateLimiter, RetryConfig,
    };
    use crate::errors::ProviderError;
    use crate::models::{Confidence, ItemCategory, ProviderConfidence};
    use crate::provider::PriceProvider;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Provider that always answers the same way, optionally slowly.
    struct FixedProvider {
        id: &'static str,
        outcome: Result<Option<SourceQuote>, ()>,
        delay: Duration,
    }

    impl FixedProvider {
        fn quoting(id: &'static str, value: f64, confidence: ProviderConfidence) -> Self {
            Self {
                id,
                outcome: Ok(Some(SourceQuote::new(id, value).with_confidence(confidence))),
                delay: Duration::ZERO,
            }
        }

        fn empty(id: &'static str) -> Self {
            Self {
                id,
                outcome: Ok(None),
                delay: Duration::ZERO,
            }
        }

        fn failing(id: &'static str) -> Self {
            Self {
                id,
                outcome: Err(()),
                delay: Duration::ZERO,
            }
        }

        fn slowed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl PriceProvider for FixedProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn fetch_quote(
            &self,
            _query: &PriceQuery,
        ) -> Result<Option<SourceQuote>, ProviderError> {
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            match &self.outcome {
                Ok(quote) => Ok(quote.clone()),
                Err(()) => Err(ProviderError::Timeout {
                    source: self.id.to_string(),
                }),
            }
        }
    }

    fn client(provider: FixedProvider) -> SourceClient {
        SourceClient::with_config(
            Arc::new(provider),
            Arc::new(RateLimiter::new()),
            CacheConfig::default(),
            RetryConfig {
                backoff: vec![Duration::from_millis(1)],
                max_attempts: 2,
                max_sleep: Duration::from_millis(1),
            },
            CircuitBreakerConfig::default(),
        )
    }

    fn query() -> PriceQuery {
        PriceQuery::new("the doctor|divination card", ItemCategory::DivinationCard)
    }

    #[tokio::test]
    async fn test_agreeing_sources_resolve_high() {
        let service = PriceResolutionService::new(
            client(FixedProvider::quoting("ninja", 150.8, ProviderConfidence::Unknown)),
            client(FixedProvider::quoting("trade", 157.3, ProviderConfidence::High)),
        );

        let result = service.resolve(&query()).await;
        assert_eq!(result.chaos_value, 150.8);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.contributing_sources, vec!["ninja", "trade"]);
    }

    #[tokio::test]
    async fn test_failing_secondary_degrades_to_primary_only() {
        let service = PriceResolutionService::new(
            client(FixedProvider::quoting("ninja", 42.0, ProviderConfidence::Unknown)),
            client(FixedProvider::failing("trade")),
        );

        let result = service.resolve(&query()).await;
        assert_eq!(result.chaos_value, 42.0);
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.label, "primary only");
    }

    #[tokio::test]
    async fn test_no_data_from_either_source() {
        let service = PriceResolutionService::new(
            client(FixedProvider::empty("ninja")),
            client(FixedProvider::empty("trade")),
        );

        let result = service.resolve(&query()).await;
        assert!(!result.is_known());
        assert_eq!(result.chaos_value, 0.0);
    }

    #[tokio::test]
    async fn test_deadline_yields_partial_result() {
        let service = PriceResolutionService::new(
            client(FixedProvider::quoting("ninja", 30.0, ProviderConfidence::Unknown)),
            client(
                FixedProvider::quoting("trade", 31.0, ProviderConfidence::High)
                    .slowed(Duration::from_millis(200)),
            ),
        );

        // The slow secondary misses the deadline; the primary still prices.
        let result = service
            .resolve_within(&query(), Duration::from_millis(50))
            .await;
        assert_eq!(result.chaos_value, 30.0);
        assert_eq!(result.label, "primary only");
        assert_eq!(result.contributing_sources, vec!["ninja"]);
    }

    #[tokio::test]
    async fn test_deadline_with_no_survivors() {
        let service = PriceResolutionService::new(
            client(
                FixedProvider::quoting("ninja", 30.0, ProviderConfidence::Unknown)
                    .slowed(Duration::from_millis(200)),
            ),
            client(
                FixedProvider::quoting("trade", 31.0, ProviderConfidence::High)
                    .slowed(Duration::from_millis(200)),
            ),
        );

        let result = service
            .resolve_within(&query(), Duration::from_millis(20))
            .await;
        assert!(!result.is_known());
    }

    #[tokio::test]
    async fn test_custom_policy_is_used() {
        let service = PriceResolutionService::with_policy(
            client(FixedProvider::quoting("ninja", 100.0, ProviderConfidence::Unknown)),
            client(FixedProvider::quoting("trade", 110.0, ProviderConfidence::High)),
            ReconcilePolicy {
                divergence_threshold: 0.05,
            },
        );

        // 10% apart: divergent under the tightened policy.
        let result = service.resolve(&query()).await;
        assert_eq!(result.chaos_value, 105.0);
        assert_eq!(result.confidence, Confidence::Medium);
    }
}
