// Model module - deep convolutional scream classifier
//
// - tensor: NCHW activation buffers
// - layers: conv / batch norm / pooling / dropout / dense with backward passes
// - network: the layer stack and its topology
// - optimizer: Adam
// - training: class-weighted training protocol with early stopping,
//   learning-rate reduction and precision checkpointing
// - mod.rs: TrainedConvModel, the immutable inference artifact

mod layers;
mod network;
mod optimizer;
mod tensor;
mod training;

pub use training::{ConvTrainer, EpochMetrics, TrainingHistory, TrainingOutcome};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::analysis::features::TensorFeature;
use crate::config::{ConvNetConfig, FeatureConfig};
use crate::error::ModelError;
use network::{sigmoid, ConvNet};
use tensor::Tensor;

/// Samples per inference batch
const INFERENCE_BATCH: usize = 16;

/// Trained network plus the configuration its inputs must follow
///
/// Immutable after training; share it between threads with `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedConvModel {
    feature_config: FeatureConfig,
    network_config: ConvNetConfig,
    network: ConvNet,
}

impl TrainedConvModel {
    pub(crate) fn new(
        feature_config: FeatureConfig,
        network_config: ConvNetConfig,
        network: ConvNet,
    ) -> Self {
        Self {
            feature_config,
            network_config,
            network,
        }
    }

    /// Freshly initialized, untrained model
    #[cfg(test)]
    pub(crate) fn initialized(
        feature_config: FeatureConfig,
        network_config: ConvNetConfig,
        seed: u64,
    ) -> Result<Self, ModelError> {
        use rand::{rngs::StdRng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(seed);
        let network = ConvNet::new(&network_config, feature_config.tensor_shape(), &mut rng)?;
        Ok(Self::new(feature_config, network_config, network))
    }

    /// Feature configuration the model was trained with
    pub fn feature_config(&self) -> &FeatureConfig {
        &self.feature_config
    }

    pub fn network_config(&self) -> &ConvNetConfig {
        &self.network_config
    }

    /// (rows, columns) of accepted features
    pub fn input_shape(&self) -> (usize, usize) {
        self.network.input_shape()
    }

    pub fn parameter_count(&self) -> usize {
        self.network.parameter_count()
    }

    pub fn summary(&self) -> String {
        self.network.summary()
    }

    fn check_shape(&self, feature: &TensorFeature) -> Result<(), ModelError> {
        if feature.shape() != self.input_shape() {
            return Err(ModelError::ShapeMismatch {
                expected: self.input_shape(),
                got: feature.shape(),
            });
        }
        Ok(())
    }

    /// Scream probability of one feature
    ///
    /// Deterministic: batch-norm running statistics, no dropout.
    pub fn predict(&self, feature: &TensorFeature) -> Result<f32, ModelError> {
        self.check_shape(feature)?;
        let batch = Tensor::from_features(&[feature]);
        Ok(sigmoid(self.network.infer(&batch)[0]))
    }

    /// Scream probabilities of many features
    pub fn predict_batch(&self, features: &[TensorFeature]) -> Result<Vec<f32>, ModelError> {
        for feature in features {
            self.check_shape(feature)?;
        }
        let refs: Vec<&TensorFeature> = features.iter().collect();
        Ok(self.predict_refs(&refs))
    }

    /// Probabilities for pre-validated features
    pub(crate) fn predict_refs(&self, features: &[&TensorFeature]) -> Vec<f32> {
        let mut probabilities = Vec::with_capacity(features.len());
        for chunk in features.chunks(INFERENCE_BATCH) {
            let batch = Tensor::from_features(chunk);
            probabilities.extend(self.network.infer(&batch).into_iter().map(sigmoid));
        }
        probabilities
    }

    /// Save topology, weights and feature configuration as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        let json = serde_json::to_string(self).map_err(|err| ModelError::ModelSaveFailure {
            reason: err.to_string(),
        })?;
        fs::write(&path, json).map_err(|err| ModelError::ModelSaveFailure {
            reason: format!("{:?}: {}", path.as_ref(), err),
        })?;
        log::info!("[Classifier] Saved model to {:?}", path.as_ref());
        Ok(())
    }

    /// Load a model saved by [`TrainedConvModel::save`]
    ///
    /// # Returns
    /// `ModelNotFound` when the file is missing, `ModelLoadFailure` when it
    /// cannot be parsed or its input shape disagrees with its feature config
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelError::ModelNotFound {
                path: path.display().to_string(),
            });
        }
        let contents = fs::read_to_string(path).map_err(|err| ModelError::ModelLoadFailure {
            reason: format!("{:?}: {}", path, err),
        })?;
        let model: TrainedConvModel =
            serde_json::from_str(&contents).map_err(|err| ModelError::ModelLoadFailure {
                reason: format!("{:?}: {}", path, err),
            })?;

        if model.input_shape() != model.feature_config.tensor_shape() {
            return Err(ModelError::ModelLoadFailure {
                reason: format!(
                    "network input {:?} does not match feature configuration {:?}",
                    model.input_shape(),
                    model.feature_config.tensor_shape()
                ),
            });
        }

        log::info!(
            "[Classifier] Loaded model from {:?} ({} parameters, input {:?})",
            path,
            model.parameter_count(),
            model.input_shape()
        );
        Ok(model)
    }
}
