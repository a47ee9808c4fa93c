//! Combining source quotes into one priced result.
//!
//! [`reconcile`] is a pure decision table over the primary (bulk-table) and
//! secondary (search) quotes. The primary updates faster and wins whenever
//! the two sources agree; genuine disagreement is averaged and downgraded.
//! Labels come from a fixed template set so the confidence enum stays
//! machine-checkable while the label stays human-readable.

use std::fmt;

use crate::models::{Confidence, ProviderConfidence, ReconciledPrice, SourceId, SourceQuote};

/// Relative difference above which two sources are considered to disagree.
pub const DEFAULT_DIVERGENCE_THRESHOLD: f64 = 0.20;

/// Tunable reconciliation policy.
///
/// The threshold and the prefer-primary tie-break are policy choices, not
/// derived quantities - they live here so embedders can tune them without
/// touching the algorithm.
#[derive(Clone, Debug)]
pub struct ReconcilePolicy {
    /// `|p - s| / max(p, s)` above which the sources disagree.
    pub divergence_threshold: f64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            divergence_threshold: DEFAULT_DIVERGENCE_THRESHOLD,
        }
    }
}

/// Which decision-table row produced a price. Rendered into the label.
#[derive(Clone, Debug, PartialEq)]
enum Provenance {
    NoData,
    PrimaryOnly,
    SecondaryOnly,
    SecondaryLowConfidence,
    Validated,
    Averaged { primary: f64, secondary: f64 },
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => write!(f, "no data"),
            Self::PrimaryOnly => write!(f, "primary only"),
            Self::SecondaryOnly => write!(f, "secondary only"),
            Self::SecondaryLowConfidence => {
                write!(f, "primary (secondary: low confidence)")
            }
            Self::Validated => write!(f, "primary validated by secondary"),
            Self::Averaged { primary, secondary } => {
                write!(f, "averaged (primary={:.1}, secondary={:.1})", primary, secondary)
            }
        }
    }
}

/// Combine up to two source quotes into one confidence-rated price.
///
/// Decision table, evaluated in order:
///
/// 1. Neither present: no data.
/// 2. Only primary: its value at medium confidence.
/// 3. Only secondary: its value at the source's own confidence
///    (unflagged reads as medium).
/// 4. Both present but the secondary flags itself low confidence: the
///    primary's value at medium confidence - a thin secondary market
///    can't validate anything.
/// 5. Both present otherwise: agreement within the divergence threshold
///    promotes the primary's value to high confidence; past the threshold
///    the values are averaged at medium confidence.
///
/// `contributing_sources` lists every source whose quote was present,
/// regardless of which row fired.
pub fn reconcile(
    primary: Option<&SourceQuote>,
    secondary: Option<&SourceQuote>,
    policy: &ReconcilePolicy,
) -> ReconciledPrice {
    let contributing = [primary, secondary]
        .into_iter()
        .flatten()
        .map(|quote| quote.source_id.clone())
        .collect();

    match (primary, secondary) {
        (None, None) => ReconciledPrice::no_data(),
        (Some(p), None) => price(
            p.chaos_value,
            Confidence::Medium,
            Provenance::PrimaryOnly,
            contributing,
        ),
        (None, Some(s)) => price(
            s.chaos_value,
            s.provider_confidence.into(),
            Provenance::SecondaryOnly,
            contributing,
        ),
        (Some(p), Some(s)) if s.provider_confidence == ProviderConfidence::Low => price(
            p.chaos_value,
            Confidence::Medium,
            Provenance::SecondaryLowConfidence,
            contributing,
        ),
        (Some(p), Some(s)) => {
            let diff = relative_divergence(p.chaos_value, s.chaos_value);
            if diff <= policy.divergence_threshold {
                price(
                    p.chaos_value,
                    Confidence::High,
                    Provenance::Validated,
                    contributing,
                )
            } else {
                price(
                    (p.chaos_value + s.chaos_value) / 2.0,
                    Confidence::Medium,
                    Provenance::Averaged {
                        primary: p.chaos_value,
                        secondary: s.chaos_value,
                    },
                    contributing,
                )
            }
        }
    }
}

/// `|p - s| / max(p, s)`, with 0 when both values are 0.
fn relative_divergence(p: f64, s: f64) -> f64 {
    let denominator = p.max(s);
    if denominator == 0.0 {
        0.0
    } else {
        (p - s).abs() / denominator
    }
}

fn price(
    chaos_value: f64,
    confidence: Confidence,
    provenance: Provenance,
    contributing_sources: Vec<SourceId>,
) -> ReconciledPrice {
    ReconciledPrice {
        chaos_value,
        confidence,
        label: provenance.to_string(),
        contributing_sources,
    }
}
