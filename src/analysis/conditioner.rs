// Conditioner module - fixed-length normalization and silence rejection
//
// Both feature pipelines start here. A raw buffer of arbitrary length and
// sample rate is resampled to the canonical rate, cut or padded to the
// canonical duration, gated on mean-square energy and peak-normalized so that
// loudness never reaches the classifiers.

use crate::config::FeatureConfig;
use crate::error::FeatureError;

/// Added to the peak before dividing so near-silent clips stay finite
pub const PEAK_EPSILON: f32 = 1e-8;

/// A clip ready for feature extraction
///
/// `samples.len()` always equals [`FeatureConfig::target_len`] of the
/// conditioner that produced it, and the peak magnitude is ≈ 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionedClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Mean squared amplitude before normalization
    pub energy: f64,
    /// Peak absolute amplitude before normalization
    pub peak: f32,
}

/// Shared first stage of the tensor and vector pipelines
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    sample_rate: u32,
    target_len: usize,
    energy_threshold: f64,
}

impl SignalConditioner {
    /// Create a conditioner for the canonical rate and duration of `config`
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            target_len: config.target_len(),
            energy_threshold: config.energy_threshold,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// Condition a raw buffer
    ///
    /// # Arguments
    /// * `samples` - Mono samples in approximately [-1, 1]
    /// * `sample_rate` - Rate of `samples` in Hz
    ///
    /// # Returns
    /// The conditioned clip, `InvalidClip` for an empty buffer or zero rate,
    /// or `InsufficientEnergy` when the fixed-length clip is effectively silence
    pub fn condition(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<ConditionedClip, FeatureError> {
        if samples.is_empty() {
            return Err(FeatureError::InvalidClip {
                reason: "empty sample buffer".to_string(),
            });
        }
        if sample_rate == 0 {
            return Err(FeatureError::InvalidClip {
                reason: "sample rate is 0 Hz".to_string(),
            });
        }

        let mut fixed = if sample_rate == self.sample_rate {
            samples.to_vec()
        } else {
            log::debug!(
                "[Conditioner] Resampling {} samples from {} Hz to {} Hz",
                samples.len(),
                sample_rate,
                self.sample_rate
            );
            resample_linear(samples, sample_rate, self.sample_rate)
        };

        // Keep the leading samples; pad silence on the right
        fixed.resize(self.target_len, 0.0);

        let energy = mean_square(&fixed);
        if energy < self.energy_threshold {
            return Err(FeatureError::InsufficientEnergy {
                energy,
                threshold: self.energy_threshold,
            });
        }

        let peak = peak_abs(&fixed);
        let scale = 1.0 / (peak + PEAK_EPSILON);
        for sample in fixed.iter_mut() {
            *sample *= scale;
        }

        Ok(ConditionedClip {
            samples: fixed,
            sample_rate: self.sample_rate,
            energy,
            peak,
        })
    }
}

/// Mean squared amplitude, accumulated in f64
pub fn mean_square(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&x| (x as f64) * (x as f64)).sum();
    sum / samples.len() as f64
}

/// Largest absolute sample value
pub fn peak_abs(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()))
}

/// Linear-interpolation resampler
///
/// Output length is `floor(len × to / from)` (at least one sample); positions
/// past the last input sample hold the last value.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == 0 || to_rate == 0 || from_rate == to_rate {
        return samples.to_vec();
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).floor().max(1.0) as usize;
    let last = samples[samples.len() - 1];

    (0..out_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let i0 = pos.floor() as usize;
            if i0 + 1 >= samples.len() {
                last
            } else {
                let frac = (pos - i0 as f64) as f32;
                let a = samples[i0];
                let b = samples[i0 + 1];
                a + (b - a) * frac
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{compact_feature_config, sine_wave};

    #[test]
    fn test_output_length_is_fixed() {
        let config = compact_feature_config();
        let conditioner = SignalConditioner::new(&config);

        let short = sine_wave(config.sample_rate, 440.0, 0.5, 100);
        let long = sine_wave(config.sample_rate, 440.0, 0.5, config.target_len() * 3);

        let a = conditioner.condition(&short, config.sample_rate).unwrap();
        let b = conditioner.condition(&long, config.sample_rate).unwrap();
        assert_eq!(a.samples.len(), config.target_len());
        assert_eq!(b.samples.len(), config.target_len());

        // Padding is on the right
        assert!(a.samples[200..].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_truncation_keeps_leading_samples() {
        let config = compact_feature_config();
        let conditioner = SignalConditioner::new(&config);

        let mut samples = vec![0.25f32; config.target_len()];
        samples.extend(std::iter::repeat(1.0).take(500));
        let clip = conditioner.condition(&samples, config.sample_rate).unwrap();

        // Trailing loud tail was cut; the constant 0.25 section normalizes to ~1
        assert!(clip.samples.iter().all(|&x| (x - 1.0).abs() < 1e-5));
        assert!((clip.peak - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_peak_normalization() {
        let config = compact_feature_config();
        let conditioner = SignalConditioner::new(&config);
        let samples = sine_wave(config.sample_rate, 300.0, 0.1, config.target_len());

        let clip = conditioner.condition(&samples, config.sample_rate).unwrap();
        let peak = peak_abs(&clip.samples);
        assert!((peak - 1.0).abs() < 1e-4, "peak after normalization: {}", peak);
    }

    #[test]
    fn test_silence_rejected() {
        let config = compact_feature_config();
        let conditioner = SignalConditioner::new(&config);
        let silence = vec![0.0f32; config.target_len()];

        match conditioner.condition(&silence, config.sample_rate) {
            Err(FeatureError::InsufficientEnergy { energy, threshold }) => {
                assert_eq!(energy, 0.0);
                assert_eq!(threshold, config.energy_threshold);
            }
            other => panic!("Expected InsufficientEnergy, got {:?}", other),
        }
    }

    #[test]
    fn test_quiet_but_audible_clip_accepted() {
        let config = compact_feature_config();
        let conditioner = SignalConditioner::new(&config);
        // Mean square of a 0.01 amplitude sine is 5e-5, above the 1e-6 gate
        let samples = sine_wave(config.sample_rate, 440.0, 0.01, config.target_len());
        assert!(conditioner.condition(&samples, config.sample_rate).is_ok());
    }

    #[test]
    fn test_invalid_input_rejected() {
        let conditioner = SignalConditioner::new(&compact_feature_config());
        assert!(matches!(
            conditioner.condition(&[], 8000),
            Err(FeatureError::InvalidClip { .. })
        ));
        assert!(matches!(
            conditioner.condition(&[0.5; 16], 0),
            Err(FeatureError::InvalidClip { .. })
        ));
    }

    #[test]
    fn test_resample_changes_length_by_ratio() {
        let samples: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let up = resample_linear(&samples, 8000, 16000);
        let down = resample_linear(&samples, 16000, 8000);
        assert_eq!(up.len(), 2000);
        assert_eq!(down.len(), 500);

        // Midpoints are interpolated
        assert!((up[1] - 0.5).abs() < 1e-6);
        assert!((down[10] - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_foreign_rate_is_resampled_before_fitting() {
        let config = compact_feature_config();
        let conditioner = SignalConditioner::new(&config);
        let samples = sine_wave(config.sample_rate * 2, 440.0, 0.5, config.target_len());

        let clip = conditioner
            .condition(&samples, config.sample_rate * 2)
            .unwrap();
        assert_eq!(clip.sample_rate, config.sample_rate);
        // Half a clip of audio followed by right padding
        let tail = &clip.samples[config.target_len() / 2 + 1..];
        assert!(tail.iter().all(|&x| x == 0.0));
    }
}
