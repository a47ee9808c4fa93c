use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::SourceId;

/// A source's own trust in its price observation.
///
/// Some sources flag thin markets themselves (few listings, sparse history).
/// The flag is carried through reconciliation untouched rather than being
/// folded into the value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderConfidence {
    /// The source did not report a confidence signal.
    Unknown,
    Low,
    Medium,
    High,
}

/// One source's price observation for an item.
///
/// Produced once per successful fetch and never mutated; cache entries are
/// replaced wholesale on refresh.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceQuote {
    /// Source that produced the observation ("ninja", "trade", ...).
    pub source_id: SourceId,

    /// Price in chaos orbs. Always finite and non-negative.
    pub chaos_value: f64,

    /// Number of listings or data points behind the observation.
    pub sample_count: u32,

    /// The source's own confidence signal, if it reports one.
    pub provider_confidence: ProviderConfidence,

    /// When the observation was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl SourceQuote {
    /// Create a quote with the minimal required fields.
    pub fn new(source_id: impl Into<SourceId>, chaos_value: f64) -> Self {
        Self {
            source_id: source_id.into(),
            chaos_value,
            sample_count: 0,
            provider_confidence: ProviderConfidence::Unknown,
            fetched_at: Utc::now(),
        }
    }

    /// Attach a sample count.
    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    /// Attach the source's confidence signal.
    pub fn with_confidence(mut self, confidence: ProviderConfidence) -> Self {
        self.provider_confidence = confidence;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_new_defaults() {
        let quote = SourceQuote::new("ninja", 150.8);
        assert_eq!(quote.source_id, "ninja");
        assert_eq!(quote.chaos_value, 150.8);
        assert_eq!(quote.sample_count, 0);
        assert_eq!(quote.provider_confidence, ProviderConfidence::Unknown);
    }

    #[test]
    fn test_quote_builders() {
        let quote = SourceQuote::new("trade", 80.0)
            .with_sample_count(1948)
            .with_confidence(ProviderConfidence::High);
        assert_eq!(quote.sample_count, 1948);
        assert_eq!(quote.provider_confidence, ProviderConfidence::High);
    }
}
