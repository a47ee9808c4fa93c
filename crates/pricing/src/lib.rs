//! Loothound Pricing Crate
//!
//! This crate resolves a normalized item query into a single,
//! confidence-rated chaos price by querying multiple independent, unreliable
//! pricing sources and reconciling their disagreement.
//!
//! # Overview
//!
//! The pricing crate supports:
//! - Two source shapes behind one trait: bulk price tables and per-query search
//! - Per-source rate limiting, response caching, retry and circuit breaking
//! - Deterministic reconciliation with an explicit divergence threshold
//! - Partial-failure tolerance: a broken source degrades the answer, never kills it
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |   PriceQuery     |  (normalized item key + category)
//! +------------------+
//!          |
//!          v
//! +------------------+      +------------------+
//! |  SourceClient    |      |  SourceClient    |   (rate limit, cache,
//! |  (primary/bulk)  |      | (secondary/search)|   retry, circuit breaker)
//! +------------------+      +------------------+
//!          |                        |
//!          v                        v
//!    Option<SourceQuote>      Option<SourceQuote>
//!          \                        /
//!           v                      v
//!            +--------------------+
//!            |     reconcile      |  (pure decision table)
//!            +--------------------+
//!                      |
//!                      v
//!            +--------------------+
//!            |  ReconciledPrice   |  (value + confidence + provenance)
//!            +--------------------+
//! ```
//!
//! # Core Types
//!
//! - [`PriceQuery`] - Normalized lookup request
//! - [`SourceQuote`] - One source's price observation
//! - [`ReconciledPrice`] - The combined, confidence-rated result
//! - [`PriceProvider`] - Trait a pricing source implements
//! - [`SourceClient`] - Fetch pipeline wrapped around one source
//! - [`PriceResolutionService`] - The facade callers talk to
//!
//! All failures stay inside the source clients: reconciliation only ever
//! sees present or absent quotes, and an all-absent result means "price
//! unknown", never "worth zero".

pub mod client;
pub mod errors;
pub mod models;
pub mod provider;
pub mod reconcile;
pub mod service;

// Re-export all public types from models
pub use models::{
    Confidence, ItemCategory, PriceQuery, ProviderConfidence, ReconciledPrice, SourceId,
    SourceQuote,
};

// Re-export client types
pub use client::{
    BreakerMetrics, BreakerState, CacheConfig, CacheStats, CachedQuote, CircuitBreaker,
    CircuitBreakerConfig, RateLimitConfig, RateLimiter, RateLimiterMetrics, ResponseCache,
    RetryConfig, RetryPolicy, SourceClient,
};

// Re-export provider types
pub use provider::{NinjaProvider, PriceProvider, TradeProvider};

// Re-export reconciliation and service types
pub use reconcile::{reconcile, ReconcilePolicy, DEFAULT_DIVERGENCE_THRESHOLD};
pub use service::PriceResolutionService;
