// Analysis module - clip conditioning, feature extraction and detection
//
// Architecture:
// - conditioner: SignalConditioner shared by both pipelines
// - features: tensor and vector extractors plus clip diagnostics
// - reference: kNN ReferenceSet over vector features
// - monitor: blocking capture → classify loop over a ClipSource
// - mod.rs: ClipLabel, AudioClip and the ScreamDetector facade
//
// Pipelines:
// - Convolutional: condition → TensorFeatureExtractor → TrainedConvModel → OperatingPoint
// - Reference: condition → VectorFeatureExtractor → ReferenceSet vote

pub mod conditioner;
pub mod features;
pub mod monitor;
pub mod reference;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::calibration::{Likelihood, OperatingPoint};
use crate::config::DetectorConfig;
use crate::error::{DetectionError, ModelError};
use crate::model::TrainedConvModel;
use conditioner::{ConditionedClip, SignalConditioner};
use features::{ClipAnalyzer, ClipCharacteristics, TensorFeatureExtractor, VectorFeatureExtractor};
use reference::{ReferenceSet, Vote};

/// Binary clip label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClipLabel {
    Scream,
    NonScream,
}

impl ClipLabel {
    pub fn is_scream(&self) -> bool {
        matches!(self, ClipLabel::Scream)
    }

    pub fn from_scream(is_scream: bool) -> Self {
        if is_scream {
            ClipLabel::Scream
        } else {
            ClipLabel::NonScream
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClipLabel::Scream => "scream",
            ClipLabel::NonScream => "non-scream",
        }
    }
}

/// Raw mono samples at their native rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration in seconds (0 for a zero sample rate)
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f32 / self.sample_rate as f32
        }
    }
}

/// Which classifier produced a detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Evidence {
    /// Scream probability of the convolutional model, banded
    Convolutional {
        probability: f32,
        likelihood: Likelihood,
    },
    /// Nearest-neighbor vote of the reference set
    Reference(Vote),
}

/// Classification of one clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: ClipLabel,
    /// Confidence in `label`, in percent
    pub confidence: f32,
    pub evidence: Evidence,
    pub characteristics: ClipCharacteristics,
}

impl Detection {
    pub fn is_scream(&self) -> bool {
        self.label.is_scream()
    }

    /// Scream probability, when the convolutional model decided
    pub fn probability(&self) -> Option<f32> {
        match self.evidence {
            Evidence::Convolutional { probability, .. } => Some(probability),
            Evidence::Reference(_) => None,
        }
    }
}

/// Scream detection facade
///
/// Owns the configuration, the shared conditioner, both extractors and the
/// operating point. Classifier artifacts are attached as `Arc`s so several
/// detectors (or threads) can share one model without locking.
pub struct ScreamDetector {
    config: DetectorConfig,
    conditioner: SignalConditioner,
    tensor_extractor: TensorFeatureExtractor,
    vector_extractor: VectorFeatureExtractor,
    analyzer: ClipAnalyzer,
    model: Option<Arc<TrainedConvModel>>,
    reference: Option<Arc<ReferenceSet>>,
    operating_point: OperatingPoint,
}

impl ScreamDetector {
    /// Create a detector without classifiers
    ///
    /// # Arguments
    /// * `config` - Detector configuration; the feature section is validated
    pub fn new(config: DetectorConfig) -> Result<Self, DetectionError> {
        let tensor_extractor = TensorFeatureExtractor::new(&config.features)?;
        let vector_extractor = VectorFeatureExtractor::new(&config.features)?;
        let operating_point = OperatingPoint::new(config.decision.operating_threshold)?;
        Ok(Self {
            conditioner: SignalConditioner::new(&config.features),
            analyzer: ClipAnalyzer::new(&config.features),
            tensor_extractor,
            vector_extractor,
            model: None,
            reference: None,
            operating_point,
            config,
        })
    }

    /// Attach a convolutional model
    ///
    /// Rejects models trained with a different feature configuration.
    pub fn with_model(mut self, model: Arc<TrainedConvModel>) -> Result<Self, DetectionError> {
        if model.feature_config() != &self.config.features {
            return Err(ModelError::InvalidConfig {
                reason: "model was trained with a different feature configuration".to_string(),
            }
            .into());
        }
        log::info!(
            "[ScreamDetector] Attached model ({} parameters)",
            model.parameter_count()
        );
        self.model = Some(model);
        Ok(self)
    }

    pub fn with_reference(mut self, reference: Arc<ReferenceSet>) -> Self {
        log::info!(
            "[ScreamDetector] Attached reference set ({} samples, k={})",
            reference.len(),
            reference.k()
        );
        self.reference = Some(reference);
        self
    }

    pub fn with_operating_point(mut self, operating_point: OperatingPoint) -> Self {
        self.operating_point = operating_point;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn operating_point(&self) -> &OperatingPoint {
        &self.operating_point
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    fn condition(&self, samples: &[f32], sample_rate: u32) -> Result<ConditionedClip, DetectionError> {
        Ok(self.conditioner.condition(samples, sample_rate)?)
    }

    /// Classify a clip with the convolutional model
    ///
    /// # Returns
    /// A detection, or an error when the clip is unusable (never coerced
    /// into a non-scream label) or no model is attached
    pub fn detect(&self, samples: &[f32], sample_rate: u32) -> Result<Detection, DetectionError> {
        let model = self.model.as_ref().ok_or_else(|| ModelError::ModelNotFound {
            path: "no convolutional model attached".to_string(),
        })?;

        let clip = self.condition(samples, sample_rate)?;
        let feature = self.tensor_extractor.extract(&clip)?;
        let probability = model.predict(&feature)?;

        let threshold = self.operating_point.threshold;
        let label = self.operating_point.decide(probability);
        let confidence = if label.is_scream() {
            probability * 100.0
        } else {
            100.0 - probability * 100.0
        };
        let likelihood = Likelihood::from_probability(probability, threshold, &self.config.decision);

        log::debug!(
            "[ScreamDetector] p={:.3} threshold={:.2} → {} ({})",
            probability,
            threshold,
            label.as_str(),
            likelihood.describe()
        );

        Ok(Detection {
            label,
            confidence,
            evidence: Evidence::Convolutional {
                probability,
                likelihood,
            },
            characteristics: self.analyzer.analyze(&clip),
        })
    }

    /// Classify a clip with the reference set
    pub fn detect_with_reference(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Detection, DetectionError> {
        let reference = self.reference.as_ref().ok_or_else(|| ModelError::ModelNotFound {
            path: "no reference set attached".to_string(),
        })?;

        let clip = self.condition(samples, sample_rate)?;
        let feature = self.vector_extractor.extract(&clip)?;
        let vote = reference.classify(&feature)?;
        if vote.tied {
            log::debug!(
                "[ScreamDetector] Reference vote tied ({}/{}), reporting non-scream",
                vote.scream_votes,
                vote.k
            );
        }

        Ok(Detection {
            label: vote.label,
            confidence: vote.confidence,
            evidence: Evidence::Reference(vote),
            characteristics: self.analyzer.analyze(&clip),
        })
    }

    /// Diagnostics of a clip without classifying it
    pub fn characterize(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<ClipCharacteristics, DetectionError> {
        let clip = self.condition(samples, sample_rate)?;
        Ok(self.analyzer.analyze(&clip))
    }
}

#[cfg(test)]
#[path = "detector_tests.rs"]
mod tests;
