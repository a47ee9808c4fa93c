use std::fmt;

use serde::{Deserialize, Serialize};

use super::quote::ProviderConfidence;
use super::types::SourceId;

/// Categorical trust level attached to a reconciled price.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// No source had data. The price is unknown, not zero.
    None,
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl From<ProviderConfidence> for Confidence {
    /// 1:1 mapping of a source's own confidence signal. An absent signal
    /// reads as a normal, unflagged observation.
    fn from(confidence: ProviderConfidence) -> Self {
        match confidence {
            ProviderConfidence::Unknown => Self::Medium,
            ProviderConfidence::Low => Self::Low,
            ProviderConfidence::Medium => Self::Medium,
            ProviderConfidence::High => Self::High,
        }
    }
}

/// A single confidence-rated price for one query.
///
/// Built fresh per request by reconciliation and never cached - caching
/// happens at the quote layer so reconciliation policy can change without
/// invalidating source data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconciledPrice {
    /// Price in chaos orbs. Zero when `confidence` is `None`.
    pub chaos_value: f64,

    /// Trust level of the result.
    pub confidence: Confidence,

    /// Human-readable provenance ("primary validated by secondary", ...).
    pub label: String,

    /// Every source whose quote contributed, regardless of which one won.
    pub contributing_sources: Vec<SourceId>,
}

impl ReconciledPrice {
    /// The "no source had data" result.
    pub fn no_data() -> Self {
        Self {
            chaos_value: 0.0,
            confidence: Confidence::None,
            label: "no data".to_string(),
            contributing_sources: Vec::new(),
        }
    }

    /// Whether any source actually priced the item. Callers must treat a
    /// `false` here as "unknown", never as a zero valuation.
    pub fn is_known(&self) -> bool {
        self.confidence != Confidence::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_data_is_not_known() {
        let price = ReconciledPrice::no_data();
        assert_eq!(price.chaos_value, 0.0);
        assert_eq!(price.confidence, Confidence::None);
        assert!(!price.is_known());
        assert!(price.contributing_sources.is_empty());
    }

    #[test]
    fn test_provider_confidence_maps_one_to_one() {
        assert_eq!(Confidence::from(ProviderConfidence::Low), Confidence::Low);
        assert_eq!(
            Confidence::from(ProviderConfidence::Medium),
            Confidence::Medium
        );
        assert_eq!(Confidence::from(ProviderConfidence::High), Confidence::High);
    }

    #[test]
    fn test_unknown_provider_confidence_defaults_to_medium() {
        assert_eq!(
            Confidence::from(ProviderConfidence::Unknown),
            Confidence::Medium
        );
    }

    #[test]
    fn test_confidence_display() {
        assert_eq!(Confidence::None.to_string(), "none");
        assert_eq!(Confidence::High.to_string(), "high");
    }
}
