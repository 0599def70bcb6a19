// Advice - rule-based operating threshold recommendations
//
// The measured false-positive rate is the error signal; the operating
// threshold is the only knob. Both functions here are pure so they can be
// swapped without touching a trained classifier.

use serde::{Deserialize, Serialize};

use crate::config::DecisionConfig;

/// False-positive rate band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FalsePositiveBand {
    /// FPR above 15%
    High,
    /// FPR above 10%, up to 15%
    Moderate,
    /// FPR of 10% or less
    Good,
}

/// Recommended operating threshold range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAdvice {
    pub band: FalsePositiveBand,
    pub min_threshold: f32,
    pub max_threshold: f32,
}

impl ThresholdAdvice {
    pub fn message(&self) -> String {
        match self.band {
            FalsePositiveBand::High => format!(
                "High false positive rate: raise the threshold to {:.1}-{:.1} or add more non-scream training data",
                self.min_threshold, self.max_threshold
            ),
            FalsePositiveBand::Moderate => format!(
                "Moderate false positive rate: use a threshold of {:.1}-{:.1}",
                self.min_threshold, self.max_threshold
            ),
            FalsePositiveBand::Good => format!(
                "Good false positive rate: a threshold of {:.1}-{:.1} should work well",
                self.min_threshold, self.max_threshold
            ),
        }
    }
}

/// Map an observed false-positive rate to a threshold range
///
/// # Arguments
/// * `false_positive_rate` - Fraction in [0, 1]
pub fn recommend_threshold(false_positive_rate: f32) -> ThresholdAdvice {
    if false_positive_rate > 0.15 {
        ThresholdAdvice {
            band: FalsePositiveBand::High,
            min_threshold: 0.7,
            max_threshold: 0.8,
        }
    } else if false_positive_rate > 0.10 {
        ThresholdAdvice {
            band: FalsePositiveBand::Moderate,
            min_threshold: 0.6,
            max_threshold: 0.7,
        }
    } else {
        ThresholdAdvice {
            band: FalsePositiveBand::Good,
            min_threshold: 0.5,
            max_threshold: 0.6,
        }
    }
}

/// Verbal reading of a scream probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Likelihood {
    VeryUnlikely,
    Unlikely,
    Possible,
    VeryLikely,
}

impl Likelihood {
    /// Band a probability against the operating threshold
    pub fn from_probability(probability: f32, threshold: f32, decision: &DecisionConfig) -> Self {
        if probability < decision.very_unlikely_below {
            Likelihood::VeryUnlikely
        } else if probability < threshold {
            Likelihood::Unlikely
        } else if probability < decision.very_likely_from {
            Likelihood::Possible
        } else {
            Likelihood::VeryLikely
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Likelihood::VeryUnlikely => "very unlikely to be a scream",
            Likelihood::Unlikely => "unlikely to be a scream",
            Likelihood::Possible => "possible scream",
            Likelihood::VeryLikely => "very likely a scream",
        }
    }
}
