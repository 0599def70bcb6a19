// Feature extraction error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Feature error code constants
///
/// Single source of truth for the numeric codes reported by [`FeatureError`].
///
/// Error code range: 1001-1005
pub struct FeatureErrorCodes {}

impl FeatureErrorCodes {
    /// Audio could not be read or decoded by the I/O layer
    pub const UNREADABLE_AUDIO: i32 = 1001;

    /// Clip is empty or carries a zero sample rate
    pub const INVALID_CLIP: i32 = 1002;

    /// Clip is effectively silence
    pub const INSUFFICIENT_ENERGY: i32 = 1003;

    /// Extraction produced NaN or infinite values
    pub const NON_FINITE_FEATURE: i32 = 1004;

    /// Feature configuration is inconsistent
    pub const INVALID_CONFIG: i32 = 1005;
}

/// Log a feature error with structured context
///
/// This function logs feature errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - component: The component where the error occurred
/// - message: Human-readable error message
/// - context: Additional contextual information
pub fn log_feature_error(err: &FeatureError, context: &str) {
    error!(
        "Feature error in {}: code={}, component=FeatureExtraction, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Feature extraction errors
///
/// Every variant means "no feature was produced". None of them may be turned
/// into a non-scream label by callers.
///
/// Error code range: 1001-1005
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureError {
    /// Audio could not be read (propagated from the I/O collaborator)
    UnreadableAudio { path: String, reason: String },

    /// Clip cannot be conditioned (empty buffer, zero sample rate)
    InvalidClip { reason: String },

    /// Mean squared amplitude is below the silence threshold
    InsufficientEnergy { energy: f64, threshold: f64 },

    /// A NaN or infinite value appeared in the named feature group
    NonFiniteFeature { feature: String },

    /// Feature configuration is inconsistent
    InvalidConfig { reason: String },
}

impl ErrorCode for FeatureError {
    fn code(&self) -> i32 {
        match self {
            FeatureError::UnreadableAudio { .. } => FeatureErrorCodes::UNREADABLE_AUDIO,
            FeatureError::InvalidClip { .. } => FeatureErrorCodes::INVALID_CLIP,
            FeatureError::InsufficientEnergy { .. } => FeatureErrorCodes::INSUFFICIENT_ENERGY,
            FeatureError::NonFiniteFeature { .. } => FeatureErrorCodes::NON_FINITE_FEATURE,
            FeatureError::InvalidConfig { .. } => FeatureErrorCodes::INVALID_CONFIG,
        }
    }

    fn message(&self) -> String {
        match self {
            FeatureError::UnreadableAudio { path, reason } => {
                format!("Unreadable audio {}: {}", path, reason)
            }
            FeatureError::InvalidClip { reason } => format!("Invalid clip: {}", reason),
            FeatureError::InsufficientEnergy { energy, threshold } => format!(
                "Insufficient energy: {:.3e} below silence threshold {:.1e}",
                energy, threshold
            ),
            FeatureError::NonFiniteFeature { feature } => {
                format!("Non-finite value in {} features", feature)
            }
            FeatureError::InvalidConfig { reason } => {
                format!("Invalid feature configuration: {}", reason)
            }
        }
    }
}

impl fmt::Display for FeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FeatureError (code {}): {}",
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for FeatureError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_error_codes() {
        assert_eq!(
            FeatureError::UnreadableAudio {
                path: "a.wav".to_string(),
                reason: "test".to_string()
            }
            .code(),
            FeatureErrorCodes::UNREADABLE_AUDIO
        );
        assert_eq!(
            FeatureError::InvalidClip {
                reason: "test".to_string()
            }
            .code(),
            FeatureErrorCodes::INVALID_CLIP
        );
        assert_eq!(
            FeatureError::InsufficientEnergy {
                energy: 0.0,
                threshold: 1e-6
            }
            .code(),
            FeatureErrorCodes::INSUFFICIENT_ENERGY
        );
        assert_eq!(
            FeatureError::NonFiniteFeature {
                feature: "mfcc".to_string()
            }
            .code(),
            FeatureErrorCodes::NON_FINITE_FEATURE
        );
        assert_eq!(
            FeatureError::InvalidConfig {
                reason: "test".to_string()
            }
            .code(),
            FeatureErrorCodes::INVALID_CONFIG
        );
    }

    #[test]
    fn test_feature_error_messages() {
        let err = FeatureError::NonFiniteFeature {
            feature: "contrast".to_string(),
        };
        assert_eq!(err.message(), "Non-finite value in contrast features");

        let err = FeatureError::InsufficientEnergy {
            energy: 0.0,
            threshold: 1e-6,
        };
        assert!(err.message().contains("Insufficient energy"));
    }

    #[test]
    fn test_feature_error_display() {
        let err = FeatureError::InvalidClip {
            reason: "empty buffer".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("FeatureError"));
        assert!(display.contains(&err.code().to_string()));
        assert!(display.contains("empty buffer"));
    }
}
