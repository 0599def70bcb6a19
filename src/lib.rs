// Scream Detector Core - Rust classification engine
// Deterministic feature extraction with convolutional and nearest-neighbor classifiers

// Module declarations
pub mod analysis;
pub mod calibration;
pub mod config;
pub mod dataset;
pub mod error;
pub mod model;
pub mod testing;

// Re-exports for convenience
pub use analysis::conditioner::{ConditionedClip, SignalConditioner};
pub use analysis::features::{
    ClipCharacteristics, TensorFeature, TensorFeatureExtractor, VectorFeature,
    VectorFeatureExtractor,
};
pub use analysis::monitor::{check_capture, ClipSource, FileClipSource, Monitor, MonitorMode};
pub use analysis::reference::{ReferenceSet, Vote};
pub use analysis::{AudioClip, ClipLabel, Detection, Evidence, ScreamDetector};
pub use calibration::{
    evaluate, evaluate_thresholds, recommend_threshold, sweep_thresholds, ConfusionStats,
    EvaluationReport, Likelihood, OperatingPoint, ThresholdAdvice, ThresholdMetrics,
};
pub use config::DetectorConfig;
pub use dataset::DatasetSample;
pub use error::{DetectionError, FeatureError, ModelError};
pub use model::{ConvTrainer, TrainedConvModel, TrainingHistory, TrainingOutcome};
