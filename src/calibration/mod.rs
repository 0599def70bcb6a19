// Calibration module - decision layer of the convolutional classifier
//
// This module provides three components:
// 1. metrics: confusion statistics, threshold sweeps and ROC-AUC
// 2. advice: threshold recommendation from a measured false-positive rate
// 3. state: OperatingPoint, the persisted decision threshold
//
// The calibration workflow:
// 1. Train a model and hold out a test set
// 2. evaluate() the test set: metrics at 0.5 plus a threshold sweep
// 3. Persist OperatingPoint::from_advice(&report.advice, report.false_positive_rate)

pub mod advice;
pub mod metrics;
pub mod state;

pub use advice::{recommend_threshold, FalsePositiveBand, Likelihood, ThresholdAdvice};
pub use metrics::{
    roc_auc, sweep_thresholds, ConfusionStats, ThresholdMetrics, DEFAULT_SWEEP_THRESHOLDS,
};
pub use state::OperatingPoint;

use serde::{Deserialize, Serialize};

use crate::analysis::features::TensorFeature;
use crate::analysis::ClipLabel;
use crate::error::ModelError;
use crate::model::TrainedConvModel;

/// Threshold of the headline metrics in an [`EvaluationReport`]
pub const REPORT_THRESHOLD: f32 = 0.5;

/// Probability clamp of the cross-entropy report
const PROBABILITY_EPSILON: f32 = 1e-7;

/// Held-out evaluation of a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub samples: usize,
    /// Mean unweighted binary cross-entropy
    pub loss: f32,
    pub accuracy: f32,
    pub precision: f32,
    pub recall: f32,
    pub auc: Option<f32>,
    /// Confusion counts at 0.5
    pub confusion: ConfusionStats,
    pub false_positive_rate: f32,
    pub false_negative_rate: f32,
    pub sweep: Vec<ThresholdMetrics>,
    pub advice: ThresholdAdvice,
}

fn check_inputs(features: &[TensorFeature], labels: &[ClipLabel]) -> Result<(), ModelError> {
    if features.len() != labels.len() {
        return Err(ModelError::LabelMismatch {
            features: features.len(),
            labels: labels.len(),
        });
    }
    if features.is_empty() {
        return Err(ModelError::EmptyDataset);
    }
    Ok(())
}

/// Predict a labeled set and sweep the candidate thresholds
///
/// # Arguments
/// * `model` - Trained classifier
/// * `features` - Held-out tensor features
/// * `labels` - Ground truth parallel to `features`
/// * `thresholds` - Candidate operating thresholds
pub fn evaluate_thresholds(
    model: &TrainedConvModel,
    features: &[TensorFeature],
    labels: &[ClipLabel],
    thresholds: &[f32],
) -> Result<Vec<ThresholdMetrics>, ModelError> {
    check_inputs(features, labels)?;
    let probabilities = model.predict_batch(features)?;
    sweep_thresholds(&probabilities, labels, thresholds)
}

/// Full held-out evaluation: metrics at 0.5, sweep and threshold advice
pub fn evaluate(
    model: &TrainedConvModel,
    features: &[TensorFeature],
    labels: &[ClipLabel],
    thresholds: &[f32],
) -> Result<EvaluationReport, ModelError> {
    check_inputs(features, labels)?;
    let probabilities = model.predict_batch(features)?;

    let loss = probabilities
        .iter()
        .zip(labels)
        .map(|(&p, label)| {
            let p = p.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON);
            if label.is_scream() {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum::<f32>()
        / probabilities.len() as f32;

    let confusion = ConfusionStats::from_scores(&probabilities, labels, REPORT_THRESHOLD)?;
    let advice = recommend_threshold(confusion.false_positive_rate());

    log::info!(
        "[Calibration] {} clips: accuracy={:.3} precision={:.3} recall={:.3} FPR={:.3}",
        probabilities.len(),
        confusion.accuracy(),
        confusion.precision(),
        confusion.recall(),
        confusion.false_positive_rate()
    );
    log::info!("[Calibration] {}", advice.message());

    Ok(EvaluationReport {
        samples: probabilities.len(),
        loss,
        accuracy: confusion.accuracy(),
        precision: confusion.precision(),
        recall: confusion.recall(),
        auc: roc_auc(&probabilities, labels),
        confusion,
        false_positive_rate: confusion.false_positive_rate(),
        false_negative_rate: confusion.false_negative_rate(),
        sweep: sweep_thresholds(&probabilities, labels, thresholds)?,
        advice,
    })
}
