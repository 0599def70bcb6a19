// Metrics - confusion matrix arithmetic and threshold sweeps
//
// Every ratio is 0 when its denominator is 0, so an empty class never
// produces NaN in a report.

use serde::{Deserialize, Serialize};

use crate::analysis::ClipLabel;
use crate::error::ModelError;

/// Candidate thresholds used when the caller gives none
pub const DEFAULT_SWEEP_THRESHOLDS: [f32; 6] = [0.3, 0.4, 0.5, 0.6, 0.7, 0.8];

fn ratio(numerator: usize, denominator: usize) -> f32 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f32 / denominator as f32
    }
}

/// Confusion counts of a binary decision (positive = scream)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionStats {
    pub true_positives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl ConfusionStats {
    /// Count (predicted, actual) pairs
    pub fn from_labels(predicted: &[ClipLabel], actual: &[ClipLabel]) -> Result<Self, ModelError> {
        if predicted.len() != actual.len() {
            return Err(ModelError::LabelMismatch {
                features: predicted.len(),
                labels: actual.len(),
            });
        }
        let mut stats = Self::default();
        for (&p, &a) in predicted.iter().zip(actual) {
            stats.record(p.is_scream(), a.is_scream());
        }
        Ok(stats)
    }

    /// Threshold probabilities (`p ≥ threshold` is a scream) and count
    pub fn from_scores(
        probabilities: &[f32],
        actual: &[ClipLabel],
        threshold: f32,
    ) -> Result<Self, ModelError> {
        if probabilities.len() != actual.len() {
            return Err(ModelError::LabelMismatch {
                features: probabilities.len(),
                labels: actual.len(),
            });
        }
        let mut stats = Self::default();
        for (&p, &a) in probabilities.iter().zip(actual) {
            stats.record(p >= threshold, a.is_scream());
        }
        Ok(stats)
    }

    fn record(&mut self, predicted_scream: bool, actual_scream: bool) {
        match (predicted_scream, actual_scream) {
            (true, true) => self.true_positives += 1,
            (false, false) => self.true_negatives += 1,
            (true, false) => self.false_positives += 1,
            (false, true) => self.false_negatives += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.true_negatives + self.false_positives + self.false_negatives
    }

    /// Clips predicted as scream
    pub fn predicted_positives(&self) -> usize {
        self.true_positives + self.false_positives
    }

    pub fn accuracy(&self) -> f32 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    pub fn precision(&self) -> f32 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f32 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Fraction of true non-screams labeled scream
    pub fn false_positive_rate(&self) -> f32 {
        ratio(self.false_positives, self.false_positives + self.true_negatives)
    }

    /// Fraction of true screams that were missed
    pub fn false_negative_rate(&self) -> f32 {
        ratio(self.false_negatives, self.false_negatives + self.true_positives)
    }

    pub fn f1(&self) -> f32 {
        let precision = self.precision();
        let recall = self.recall();
        if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        }
    }
}

/// One row of a threshold sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdMetrics {
    pub threshold: f32,
    pub accuracy: f32,
    pub precision: f32,
    pub recall: f32,
    pub false_positive_rate: f32,
    pub confusion: ConfusionStats,
}

impl ThresholdMetrics {
    pub fn from_confusion(threshold: f32, confusion: ConfusionStats) -> Self {
        Self {
            threshold,
            accuracy: confusion.accuracy(),
            precision: confusion.precision(),
            recall: confusion.recall(),
            false_positive_rate: confusion.false_positive_rate(),
            confusion,
        }
    }
}

/// Recompute the confusion matrix at every candidate threshold
///
/// # Arguments
/// * `probabilities` - Scream probabilities of a held-out set
/// * `labels` - Ground truth, parallel to `probabilities`
/// * `thresholds` - Candidate operating thresholds, reported in the given order
pub fn sweep_thresholds(
    probabilities: &[f32],
    labels: &[ClipLabel],
    thresholds: &[f32],
) -> Result<Vec<ThresholdMetrics>, ModelError> {
    thresholds
        .iter()
        .map(|&threshold| {
            ConfusionStats::from_scores(probabilities, labels, threshold)
                .map(|confusion| ThresholdMetrics::from_confusion(threshold, confusion))
        })
        .collect()
}

/// Area under the ROC curve (Mann-Whitney U statistic, tied scores count half)
///
/// # Returns
/// `None` when either class is absent
pub fn roc_auc(scores: &[f32], labels: &[ClipLabel]) -> Option<f32> {
    if scores.len() != labels.len() {
        return None;
    }
    let positives = labels.iter().filter(|l| l.is_scream()).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Average ranks (1-based) over runs of equal scores
    let mut rank_sum_positive = 0.0f64;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        let average_rank = (start + 1 + end) as f64 / 2.0;
        for &index in &order[start..end] {
            if labels[index].is_scream() {
                rank_sum_positive += average_rank;
            }
        }
        start = end;
    }

    let p = positives as f64;
    let u = rank_sum_positive - p * (p + 1.0) / 2.0;
    Some((u / (p * negatives as f64)) as f32)
}
