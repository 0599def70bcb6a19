// Training module - offline protocol for the convolutional classifier
//
// Class-weighted binary cross-entropy, Adam, learning-rate reduction on a
// validation-loss plateau, early stopping that restores the best-loss
// weights, and a checkpoint kept on best validation precision.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::network::{sigmoid, ConvNet};
use super::optimizer::Adam;
use super::tensor::Tensor;
use super::TrainedConvModel;
use crate::analysis::features::TensorFeature;
use crate::analysis::ClipLabel;
use crate::calibration::metrics::{roc_auc, ConfusionStats};
use crate::config::{ConvNetConfig, DetectorConfig, FeatureConfig, TrainingConfig};
use crate::dataset::stratified_split;
use crate::error::ModelError;

/// Threshold used for the per-epoch accuracy / precision / recall
const METRIC_THRESHOLD: f32 = 0.5;

/// Samples per validation inference batch
const EVAL_BATCH: usize = 16;

/// Metrics recorded after one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    /// Mean class-weighted loss over training batches (L2 term included)
    pub loss: f32,
    pub accuracy: f32,
    pub precision: f32,
    pub recall: f32,
    pub auc: Option<f32>,
    /// Unweighted cross-entropy on the validation set (L2 term included)
    pub val_loss: f32,
    pub val_accuracy: f32,
    pub val_precision: f32,
    pub val_recall: f32,
    pub val_auc: Option<f32>,
    /// Learning rate in effect during the epoch
    pub learning_rate: f32,
}

/// Per-epoch record of one training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
    /// Epoch whose weights became the precision checkpoint
    pub checkpoint_epoch: usize,
    /// Epoch with the lowest validation loss
    pub best_loss_epoch: usize,
    /// True when early stopping ended the run before the epoch budget
    pub stopped_early: bool,
}

impl TrainingHistory {
    /// Metrics of the checkpointed epoch
    pub fn checkpoint_metrics(&self) -> Option<&EpochMetrics> {
        self.epochs.iter().find(|m| m.epoch == self.checkpoint_epoch)
    }

    pub fn final_learning_rate(&self) -> Option<f32> {
        self.epochs.last().map(|m| m.learning_rate)
    }
}

/// Result of a training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// Weights of the epoch with the best validation precision
    pub model: TrainedConvModel,
    /// Weights of the epoch with the lowest validation loss
    pub final_model: TrainedConvModel,
    pub history: TrainingHistory,
}

/// Per-class loss weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ClassWeights {
    pub scream: f32,
    pub non_scream: f32,
}

impl ClassWeights {
    /// Balanced weights `n / (2 · count)`, scream weight scaled by `positive_factor`
    ///
    /// Falls back to 1.0 for both classes when one is absent.
    pub fn balanced(labels: &[ClipLabel], positive_factor: f32) -> Self {
        let screams = labels.iter().filter(|l| l.is_scream()).count();
        let others = labels.len() - screams;
        if screams == 0 || others == 0 {
            return Self {
                scream: 1.0,
                non_scream: 1.0,
            };
        }
        let n = labels.len() as f32;
        Self {
            scream: n / (2.0 * screams as f32) * positive_factor,
            non_scream: n / (2.0 * others as f32),
        }
    }

    pub fn weight(&self, label: ClipLabel) -> f32 {
        match label {
            ClipLabel::Scream => self.scream,
            ClipLabel::NonScream => self.non_scream,
        }
    }
}

/// Binary cross-entropy of a logit, stable for large |z|
fn bce_from_logit(z: f32, target: f32) -> f32 {
    z.max(0.0) - z * target + (-z.abs()).exp().ln_1p()
}

fn target_of(label: ClipLabel) -> f32 {
    if label.is_scream() {
        1.0
    } else {
        0.0
    }
}

/// ReduceLROnPlateau on validation loss
#[derive(Debug, Clone)]
pub(crate) struct PlateauScheduler {
    factor: f32,
    patience: usize,
    min_delta: f32,
    min_lr: f32,
    best: f32,
    wait: usize,
}

impl PlateauScheduler {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            factor: config.plateau_factor,
            patience: config.plateau_patience,
            min_delta: config.plateau_min_delta,
            min_lr: config.min_learning_rate,
            best: f32::INFINITY,
            wait: 0,
        }
    }

    /// Observe one epoch's validation loss
    ///
    /// # Returns
    /// The reduced learning rate when a reduction fires
    pub fn observe(&mut self, val_loss: f32, current_lr: f32) -> Option<f32> {
        if val_loss < self.best - self.min_delta {
            self.best = val_loss;
            self.wait = 0;
            return None;
        }
        self.wait += 1;
        if self.wait < self.patience || current_lr <= self.min_lr {
            return None;
        }
        self.wait = 0;
        Some((current_lr * self.factor).max(self.min_lr))
    }
}

/// Early stopping on validation loss
#[derive(Debug, Clone)]
pub(crate) struct EarlyStopping {
    patience: usize,
    best: f32,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f32::INFINITY,
            wait: 0,
        }
    }

    /// True when `val_loss` is a new best
    pub fn improved(&mut self, val_loss: f32) -> bool {
        if val_loss < self.best {
            self.best = val_loss;
            self.wait = 0;
            true
        } else {
            self.wait += 1;
            false
        }
    }

    pub fn should_stop(&self) -> bool {
        self.wait >= self.patience
    }
}

/// Trains [`TrainedConvModel`]s
///
/// Deterministic for a given seed: splits, shuffling, initialization and
/// dropout masks all draw from one seeded generator.
pub struct ConvTrainer {
    feature_config: FeatureConfig,
    network_config: ConvNetConfig,
    training_config: TrainingConfig,
}

impl ConvTrainer {
    pub fn new(config: &DetectorConfig) -> Result<Self, ModelError> {
        Self::from_parts(
            config.features.clone(),
            config.network.clone(),
            config.training.clone(),
        )
    }

    pub fn from_parts(
        feature_config: FeatureConfig,
        network_config: ConvNetConfig,
        training_config: TrainingConfig,
    ) -> Result<Self, ModelError> {
        network_config.validate()?;
        training_config.validate()?;
        feature_config
            .validate()
            .map_err(|err| ModelError::InvalidConfig {
                reason: err.to_string(),
            })?;
        Ok(Self {
            feature_config,
            network_config,
            training_config,
        })
    }

    pub fn training_config(&self) -> &TrainingConfig {
        &self.training_config
    }

    /// Train with a stratified validation split carved from the inputs
    ///
    /// # Arguments
    /// * `features` - Tensor features, all of the configured shape
    /// * `labels` - Ground truth parallel to `features`
    /// * `validation_split` - Fraction of each class held out for validation
    pub fn train(
        &self,
        features: &[TensorFeature],
        labels: &[ClipLabel],
        validation_split: f32,
    ) -> Result<TrainingOutcome, ModelError> {
        check_inputs(features, labels)?;
        let split = stratified_split(labels, validation_split, 0.0, self.training_config.seed);

        let pick = |indices: &[usize]| -> (Vec<TensorFeature>, Vec<ClipLabel>) {
            indices
                .iter()
                .map(|&i| (features[i].clone(), labels[i]))
                .unzip()
        };
        let (train_x, train_y) = pick(&split.train);
        let (val_x, val_y) = pick(&split.validation);
        self.train_with_validation(&train_x, &train_y, &val_x, &val_y)
    }

    /// Train with an explicit validation set
    ///
    /// An empty validation set makes every validation-driven decision fall
    /// back to the training set.
    pub fn train_with_validation(
        &self,
        train_features: &[TensorFeature],
        train_labels: &[ClipLabel],
        val_features: &[TensorFeature],
        val_labels: &[ClipLabel],
    ) -> Result<TrainingOutcome, ModelError> {
        check_inputs(train_features, train_labels)?;
        if val_features.len() != val_labels.len() {
            return Err(ModelError::LabelMismatch {
                features: val_features.len(),
                labels: val_labels.len(),
            });
        }
        let expected = self.feature_config.tensor_shape();
        for feature in train_features.iter().chain(val_features) {
            if feature.shape() != expected {
                return Err(ModelError::ShapeMismatch {
                    expected,
                    got: feature.shape(),
                });
            }
        }

        let (val_features, val_labels) = if val_features.is_empty() {
            tracing::warn!(
                "[Trainer] Empty validation set, monitoring training data instead"
            );
            (train_features, train_labels)
        } else {
            (val_features, val_labels)
        };

        let config = &self.training_config;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut network = ConvNet::new(&self.network_config, expected, &mut rng)?;
        let mut adam = Adam::new(config.learning_rate);
        let weights = ClassWeights::balanced(train_labels, config.positive_weight_factor);

        tracing::info!(
            "[Trainer] {} training / {} validation clips, class weights scream={:.3} non-scream={:.3}",
            train_features.len(),
            val_features.len(),
            weights.scream,
            weights.non_scream
        );
        tracing::info!("[Trainer] Network: {}", network.summary());

        let val_refs: Vec<&TensorFeature> = val_features.iter().collect();
        let mut order: Vec<usize> = (0..train_features.len()).collect();
        let mut history = TrainingHistory::default();
        let mut plateau = PlateauScheduler::new(config);
        let mut stopping = EarlyStopping::new(config.early_stopping_patience);

        let mut best_loss_network = network.clone();
        let mut checkpoint_network = network.clone();
        let mut best_precision = f32::NEG_INFINITY;
        let mut checkpoint_val_loss = f32::INFINITY;

        for epoch in 1..=config.epochs {
            let learning_rate = adam.learning_rate();
            order.shuffle(&mut rng);

            let mut loss_sum = 0.0f32;
            let mut seen_probs = Vec::with_capacity(order.len());
            let mut seen_labels = Vec::with_capacity(order.len());

            for chunk in order.chunks(config.batch_size) {
                let batch_refs: Vec<&TensorFeature> =
                    chunk.iter().map(|&i| &train_features[i]).collect();
                let batch = Tensor::from_features(&batch_refs);
                let (logits, caches) = network.forward_train(batch, &mut rng);

                let n = chunk.len() as f32;
                let mut batch_loss = 0.0f32;
                let mut grads = Vec::with_capacity(chunk.len());
                for (&z, &index) in logits.iter().zip(chunk) {
                    let label = train_labels[index];
                    let w = weights.weight(label);
                    let y = target_of(label);
                    batch_loss += w * bce_from_logit(z, y);
                    let p = sigmoid(z);
                    grads.push(w * (p - y) / n);
                    seen_probs.push(p);
                    seen_labels.push(label);
                }
                batch_loss = batch_loss / n + network.l2_penalty();
                loss_sum += batch_loss * n;

                network.backward(caches, &grads);
                adam.step(&mut network);
            }

            let loss = loss_sum / train_features.len() as f32;
            let train_stats = ConfusionStats::from_scores(&seen_probs, &seen_labels, METRIC_THRESHOLD)?;

            let val_logits = infer_logits(&network, &val_refs);
            let val_probs: Vec<f32> = val_logits.iter().map(|&z| sigmoid(z)).collect();
            let val_loss = val_logits
                .iter()
                .zip(val_labels)
                .map(|(&z, &label)| bce_from_logit(z, target_of(label)))
                .sum::<f32>()
                / val_logits.len() as f32
                + network.l2_penalty();
            let val_stats = ConfusionStats::from_scores(&val_probs, val_labels, METRIC_THRESHOLD)?;

            let metrics = EpochMetrics {
                epoch,
                loss,
                accuracy: train_stats.accuracy(),
                precision: train_stats.precision(),
                recall: train_stats.recall(),
                auc: roc_auc(&seen_probs, &seen_labels),
                val_loss,
                val_accuracy: val_stats.accuracy(),
                val_precision: val_stats.precision(),
                val_recall: val_stats.recall(),
                val_auc: roc_auc(&val_probs, val_labels),
                learning_rate,
            };
            tracing::info!(
                "[Trainer] Epoch {}/{}: loss={:.4} acc={:.3} val_loss={:.4} val_acc={:.3} val_precision={:.3} val_recall={:.3} lr={:.2e}",
                epoch,
                config.epochs,
                metrics.loss,
                metrics.accuracy,
                metrics.val_loss,
                metrics.val_accuracy,
                metrics.val_precision,
                metrics.val_recall,
                learning_rate
            );
            history.epochs.push(metrics);

            if val_stats.precision() > best_precision
                || (val_stats.precision() == best_precision && val_loss < checkpoint_val_loss)
            {
                best_precision = val_stats.precision();
                checkpoint_val_loss = val_loss;
                checkpoint_network = network.clone();
                history.checkpoint_epoch = epoch;
                tracing::debug!(
                    "[Trainer] Checkpoint at epoch {} (val_precision={:.3})",
                    epoch,
                    best_precision
                );
            }

            if stopping.improved(val_loss) {
                best_loss_network = network.clone();
                history.best_loss_epoch = epoch;
            }

            if let Some(reduced) = plateau.observe(val_loss, learning_rate) {
                tracing::info!(
                    "[Trainer] Validation loss plateaued, learning rate {:.2e} -> {:.2e}",
                    learning_rate,
                    reduced
                );
                adam.set_learning_rate(reduced);
            }

            if stopping.should_stop() {
                tracing::info!(
                    "[Trainer] Early stopping at epoch {}, restoring epoch {}",
                    epoch,
                    history.best_loss_epoch
                );
                history.stopped_early = true;
                break;
            }
        }

        let wrap = |network: ConvNet| {
            TrainedConvModel::new(
                self.feature_config.clone(),
                self.network_config.clone(),
                network,
            )
        };
        Ok(TrainingOutcome {
            model: wrap(checkpoint_network),
            final_model: wrap(best_loss_network),
            history,
        })
    }
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

fn infer_logits(network: &ConvNet, features: &[&TensorFeature]) -> Vec<f32> {
    let mut logits = Vec::with_capacity(features.len());
    for chunk in features.chunks(EVAL_BATCH) {
        logits.extend(network.infer(&Tensor::from_features(chunk)));
    }
    logits
}

#[cfg(test)]
#[path = "training_tests.rs"]
mod tests;
