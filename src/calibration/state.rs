// OperatingPoint - persisted decision threshold
//
// The threshold lives apart from any trained model so operators can retune
// it after an evaluation without retraining.

use std::fs;
use std::path::Path;

use super::advice::ThresholdAdvice;
use crate::analysis::ClipLabel;
use crate::error::ModelError;

/// Current operating threshold of the convolutional classifier
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OperatingPoint {
    /// Probabilities at or above this are labeled scream
    pub threshold: f32,
    /// False-positive rate measured when the threshold was chosen
    #[serde(default)]
    pub measured_false_positive_rate: Option<f32>,
}

impl Default for OperatingPoint {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            measured_false_positive_rate: None,
        }
    }
}

fn check_threshold(threshold: f32) -> Result<(), String> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(format!("threshold {} outside [0, 1]", threshold))
    }
}

impl OperatingPoint {
    /// # Returns
    /// `InvalidConfig` when the threshold is NaN or outside [0, 1]
    pub fn new(threshold: f32) -> Result<Self, ModelError> {
        check_threshold(threshold).map_err(|reason| ModelError::InvalidConfig { reason })?;
        Ok(Self {
            threshold,
            measured_false_positive_rate: None,
        })
    }

    /// Lowest threshold of the advised range, remembering the measured FPR
    pub fn from_advice(advice: &ThresholdAdvice, measured_false_positive_rate: f32) -> Self {
        Self {
            threshold: advice.min_threshold,
            measured_false_positive_rate: Some(measured_false_positive_rate),
        }
    }

    /// Apply the decision rule `probability ≥ threshold`
    pub fn decide(&self, probability: f32) -> ClipLabel {
        ClipLabel::from_scream(probability >= self.threshold)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        let json = serde_json::to_string_pretty(self).map_err(|err| {
            ModelError::ModelSaveFailure {
                reason: err.to_string(),
            }
        })?;
        fs::write(&path, json).map_err(|err| ModelError::ModelSaveFailure {
            reason: format!("{:?}: {}", path.as_ref(), err),
        })
    }

    /// Load a saved operating point
    ///
    /// # Returns
    /// `ModelNotFound` when the file is missing, `ModelLoadFailure` when it
    /// cannot be parsed or the threshold is outside [0, 1]
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
        let point: OperatingPoint =
            serde_json::from_str(&contents).map_err(|err| ModelError::ModelLoadFailure {
                reason: format!("{:?}: {}", path, err),
            })?;
        check_threshold(point.threshold)
            .map_err(|reason| ModelError::ModelLoadFailure { reason })?;
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::advice::recommend_threshold;

    #[test]
    fn test_decision_rule_is_inclusive() {
        let point = OperatingPoint::new(0.6).unwrap();
        assert_eq!(point.decide(0.6), ClipLabel::Scream);
        assert_eq!(point.decide(0.5999), ClipLabel::NonScream);
    }

    #[test]
    fn test_threshold_must_be_a_probability() {
        for threshold in [f32::NAN, f32::INFINITY, -0.01, 1.01] {
            assert!(matches!(
                OperatingPoint::new(threshold),
                Err(ModelError::InvalidConfig { .. })
            ));
        }
        assert_eq!(OperatingPoint::new(0.0).unwrap().decide(0.0), ClipLabel::Scream);
        assert_eq!(OperatingPoint::new(1.0).unwrap().decide(0.999), ClipLabel::NonScream);
        assert_eq!(OperatingPoint::default().threshold, 0.6);
    }

    #[test]
    fn test_from_advice() {
        let point = OperatingPoint::from_advice(&recommend_threshold(0.2), 0.2);
        assert_eq!(point.threshold, 0.7);
        assert_eq!(point.measured_false_positive_rate, Some(0.2));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operating_point.json");
        let point = OperatingPoint::new(0.65).unwrap();
        point.save(&path).unwrap();
        assert_eq!(OperatingPoint::load(&path).unwrap(), point);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            OperatingPoint::load(dir.path().join("missing.json")),
            Err(ModelError::ModelNotFound { .. })
        ));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"threshold": 1.5}"#).unwrap();
        assert!(matches!(
            OperatingPoint::load(&path),
            Err(ModelError::ModelLoadFailure { .. })
        ));
    }
}
