// Model error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Model error code constants
///
/// Error code range: 2001-2008
pub struct ModelErrorCodes {}

impl ModelErrorCodes {
    /// Persisted artifact does not exist
    pub const MODEL_NOT_FOUND: i32 = 2001;

    /// Persisted artifact exists but cannot be parsed
    pub const MODEL_LOAD_FAILURE: i32 = 2002;

    /// Artifact could not be written
    pub const MODEL_SAVE_FAILURE: i32 = 2003;

    /// No usable samples for training or building a reference set
    pub const EMPTY_DATASET: i32 = 2004;

    /// Feature and label counts differ
    pub const LABEL_MISMATCH: i32 = 2005;

    /// Feature shape does not match the model input
    pub const SHAPE_MISMATCH: i32 = 2006;

    /// Reference set parameters are invalid
    pub const INVALID_REFERENCE: i32 = 2007;

    /// Network or training configuration is invalid
    pub const INVALID_CONFIG: i32 = 2008;
}

/// Log a model error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_model_error(err: &ModelError, context: &str) {
    error!(
        "Model error in {}: code={}, component=Classifier, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Classifier, training and artifact errors
///
/// Error code range: 2001-2008
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Persisted artifact is missing (fatal for an inference session)
    ModelNotFound { path: String },

    /// Persisted artifact is corrupt or incompatible
    ModelLoadFailure { reason: String },

    /// Artifact could not be written
    ModelSaveFailure { reason: String },

    /// No usable samples after filtering
    EmptyDataset,

    /// Feature and label counts differ
    LabelMismatch { features: usize, labels: usize },

    /// Feature shape does not match what the model was built for
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    /// Reference set cannot be built with the given parameters
    InvalidReference { reason: String },

    /// Network or training configuration is invalid
    InvalidConfig { reason: String },
}

impl ErrorCode for ModelError {
    fn code(&self) -> i32 {
        match self {
            ModelError::ModelNotFound { .. } => ModelErrorCodes::MODEL_NOT_FOUND,
            ModelError::ModelLoadFailure { .. } => ModelErrorCodes::MODEL_LOAD_FAILURE,
            ModelError::ModelSaveFailure { .. } => ModelErrorCodes::MODEL_SAVE_FAILURE,
            ModelError::EmptyDataset => ModelErrorCodes::EMPTY_DATASET,
            ModelError::LabelMismatch { .. } => ModelErrorCodes::LABEL_MISMATCH,
            ModelError::ShapeMismatch { .. } => ModelErrorCodes::SHAPE_MISMATCH,
            ModelError::InvalidReference { .. } => ModelErrorCodes::INVALID_REFERENCE,
            ModelError::InvalidConfig { .. } => ModelErrorCodes::INVALID_CONFIG,
        }
    }

    fn message(&self) -> String {
        match self {
            ModelError::ModelNotFound { path } => format!("Model not found: {}", path),
            ModelError::ModelLoadFailure { reason } => {
                format!("Failed to load model: {}", reason)
            }
            ModelError::ModelSaveFailure { reason } => {
                format!("Failed to save model: {}", reason)
            }
            ModelError::EmptyDataset => "Dataset contains no usable samples".to_string(),
            ModelError::LabelMismatch { features, labels } => format!(
                "Got {} feature rows but {} labels",
                features, labels
            ),
            ModelError::ShapeMismatch { expected, got } => format!(
                "Feature shape {}x{} does not match model input {}x{}",
                got.0, got.1, expected.0, expected.1
            ),
            ModelError::InvalidReference { reason } => {
                format!("Invalid reference set: {}", reason)
            }
            ModelError::InvalidConfig { reason } => {
                format!("Invalid model configuration: {}", reason)
            }
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for ModelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_codes() {
        assert_eq!(
            ModelError::ModelNotFound {
                path: "m.json".to_string()
            }
            .code(),
            2001
        );
        assert_eq!(
            ModelError::ModelLoadFailure {
                reason: "test".to_string()
            }
            .code(),
            2002
        );
        assert_eq!(ModelError::EmptyDataset.code(), 2004);
        assert_eq!(
            ModelError::ShapeMismatch {
                expected: (215, 130),
                got: (63, 32)
            }
            .code(),
            2006
        );
        assert_eq!(
            ModelError::InvalidConfig {
                reason: "test".to_string()
            }
            .code(),
            2008
        );
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = ModelError::ShapeMismatch {
            expected: (215, 130),
            got: (63, 32),
        };
        assert_eq!(
            err.message(),
            "Feature shape 63x32 does not match model input 215x130"
        );
    }

    #[test]
    fn test_model_error_display() {
        let err = ModelError::LabelMismatch {
            features: 3,
            labels: 2,
        };
        let display = format!("{}", err);
        assert!(display.contains("ModelError"));
        assert!(display.contains("2005"));
    }
}
