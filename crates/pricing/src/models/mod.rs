//! Pricing data models
//!
//! This module contains the core data types for price resolution:
//! - `types` - Type aliases for common identifiers (SourceId)
//! - `query` - Normalized lookup request (PriceQuery, ItemCategory)
//! - `quote` - Per-source price observations (SourceQuote, ProviderConfidence)
//! - `price` - Reconciled output (ReconciledPrice, Confidence)

mod price;
mod query;
mod quote;
mod types;

pub use price::{Confidence, ReconciledPrice};
pub use query::{ItemCategory, PriceQuery};
pub use quote::{ProviderConfidence, SourceQuote};
pub use types::SourceId;
