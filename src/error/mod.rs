// Error types for the scream detector
//
// This module defines custom error types for feature extraction and model
// operations, providing structured error handling with stable error codes.

mod feature;
mod model;

use std::fmt;

pub use feature::{log_feature_error, FeatureError, FeatureErrorCodes};
pub use model::{log_model_error, ModelError, ModelErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the library and its command-line front-end.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// Errors surfaced by the detector facade
///
/// A detection either fails while turning audio into features (the clip is
/// unclassifiable) or while consulting a classifier artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionError {
    Feature(FeatureError),
    Model(ModelError),
}

impl DetectionError {
    /// True when the clip was rejected as silence rather than failing.
    pub fn is_silence(&self) -> bool {
        matches!(
            self,
            DetectionError::Feature(FeatureError::InsufficientEnergy { .. })
        )
    }
}

impl ErrorCode for DetectionError {
    fn code(&self) -> i32 {
        match self {
            DetectionError::Feature(err) => err.code(),
            DetectionError::Model(err) => err.code(),
        }
    }

    fn message(&self) -> String {
        match self {
            DetectionError::Feature(err) => err.message(),
            DetectionError::Model(err) => err.message(),
        }
    }
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionError::Feature(err) => write!(f, "{}", err),
            DetectionError::Model(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for DetectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DetectionError::Feature(err) => Some(err),
            DetectionError::Model(err) => Some(err),
        }
    }
}

impl From<FeatureError> for DetectionError {
    fn from(err: FeatureError) -> Self {
        DetectionError::Feature(err)
    }
}

impl From<ModelError> for DetectionError {
    fn from(err: ModelError) -> Self {
        DetectionError::Model(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_error_delegates_code() {
        let err: DetectionError = FeatureError::InsufficientEnergy {
            energy: 0.0,
            threshold: 1e-6,
        }
        .into();
        assert_eq!(err.code(), FeatureErrorCodes::INSUFFICIENT_ENERGY);
        assert!(err.is_silence());

        let err: DetectionError = ModelError::EmptyDataset.into();
        assert_eq!(err.code(), ModelErrorCodes::EMPTY_DATASET);
        assert!(!err.is_silence());
    }
}
