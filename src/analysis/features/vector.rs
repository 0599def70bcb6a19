// Vector module - Compact statistical summary of a clip
//
// Time-domain statistics, zero-crossing rate, whole-clip spectrum summary and
// frame-energy statistics, always in the order of VECTOR_FEATURE_NAMES.

use super::fft::whole_signal_magnitude;
use super::spectral::SpectralFeatures;
use super::temporal::TemporalFeatures;
use super::types::{VectorFeature, VECTOR_FEATURE_LEN};
use crate::analysis::conditioner::{ConditionedClip, SignalConditioner};
use crate::config::FeatureConfig;
use crate::error::FeatureError;

/// Produces [`VectorFeature`]s for one [`FeatureConfig`]
pub struct VectorFeatureExtractor {
    conditioner: SignalConditioner,
    spectral: SpectralFeatures,
}

impl VectorFeatureExtractor {
    pub fn new(config: &FeatureConfig) -> Result<Self, FeatureError> {
        config.validate()?;
        Ok(Self {
            conditioner: SignalConditioner::new(config),
            // The spectrum spans the whole conditioned clip
            spectral: SpectralFeatures::new(config.sample_rate, config.target_len()),
        })
    }

    /// Condition a raw buffer and extract its vector feature
    pub fn extract_samples(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<VectorFeature, FeatureError> {
        let clip = self.conditioner.condition(samples, sample_rate)?;
        self.extract(&clip)
    }

    /// Extract the vector feature of a conditioned clip
    ///
    /// Degenerate spectra and clips too short for a frame give zeros for the
    /// affected components; any NaN or infinite component rejects the clip.
    pub fn extract(&self, clip: &ConditionedClip) -> Result<VectorFeature, FeatureError> {
        if clip.samples.len() != self.conditioner.target_len() {
            return Err(FeatureError::InvalidClip {
                reason: format!(
                    "clip has {} samples, extractor expects {}",
                    clip.samples.len(),
                    self.conditioner.target_len()
                ),
            });
        }
        let audio = &clip.samples;

        let amplitude = TemporalFeatures::compute_amplitude_stats(audio);
        let zcr = TemporalFeatures::compute_zcr(audio);

        let spectrum = whole_signal_magnitude(audio);
        let centroid = self.spectral.compute_centroid(&spectrum);
        let spread = self.spectral.compute_spread(&spectrum, centroid);
        let rolloff = self.spectral.compute_rolloff(&spectrum);
        let flatness = self.spectral.compute_flatness(&spectrum);
        let (magnitude_mean, magnitude_std, magnitude_max) = summarize(&spectrum);

        let energies = TemporalFeatures::compute_frame_energies(audio);
        let frame_energy = TemporalFeatures::summarize_frame_energies(&energies);

        let crest = if amplitude.rms > 0.0 {
            amplitude.peak / amplitude.rms
        } else {
            0.0
        };

        let values: [f32; VECTOR_FEATURE_LEN] = [
            amplitude.mean,
            amplitude.std,
            amplitude.peak,
            amplitude.min,
            amplitude.median,
            amplitude.rms,
            zcr,
            centroid,
            spread,
            rolloff,
            magnitude_mean,
            magnitude_std,
            magnitude_max,
            frame_energy.mean,
            frame_energy.std,
            frame_energy.max,
            flatness,
            crest,
        ];

        VectorFeature::new(values)
    }
}

fn summarize(values: &[f32]) -> (f32, f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean) * (v as f64 - mean))
        .sum::<f64>()
        / n;
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    (mean as f32, variance.sqrt() as f32, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{compact_feature_config, sine_wave, white_noise};

    #[test]
    fn test_sine_vector_components() {
        let config = compact_feature_config();
        let extractor = VectorFeatureExtractor::new(&config).unwrap();
        let audio = sine_wave(config.sample_rate, 1000.0, 0.5, config.target_len());

        let feature = extractor.extract_samples(&audio, config.sample_rate).unwrap();
        let get = |name: &str| feature.get(name).unwrap();

        assert!((get("peak") - 1.0).abs() < 1e-3);
        assert!((get("rms") - 0.7071).abs() < 1e-2);
        assert!((get("spectral_centroid") - 1000.0).abs() < 50.0);
        assert!((get("crest_factor") - 2f32.sqrt()).abs() < 1e-2);
        // A 1 kHz tone crosses zero twice per period
        assert!((get("zcr") - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_noise_is_brighter_and_flatter_than_tone() {
        let config = compact_feature_config();
        let extractor = VectorFeatureExtractor::new(&config).unwrap();
        let tone = sine_wave(config.sample_rate, 300.0, 0.5, config.target_len());
        let noise = white_noise(config.target_len(), 0.5, 5);

        let tone = extractor.extract_samples(&tone, config.sample_rate).unwrap();
        let noise = extractor.extract_samples(&noise, config.sample_rate).unwrap();
        assert!(noise.get("zcr").unwrap() > tone.get("zcr").unwrap());
        assert!(noise.get("spectral_flatness").unwrap() > tone.get("spectral_flatness").unwrap());
        assert!(noise.get("spectral_centroid").unwrap() > tone.get("spectral_centroid").unwrap());
    }

    #[test]
    fn test_vector_scale_invariance_and_determinism() {
        let config = compact_feature_config();
        let extractor = VectorFeatureExtractor::new(&config).unwrap();
        let audio = white_noise(config.target_len(), 0.1, 9);
        let louder: Vec<f32> = audio.iter().map(|&x| x * 4.0).collect();

        let a = extractor.extract_samples(&audio, config.sample_rate).unwrap();
        let again = extractor.extract_samples(&audio, config.sample_rate).unwrap();
        let b = extractor.extract_samples(&louder, config.sample_rate).unwrap();
        assert_eq!(a, again);

        for (i, (x, y)) in a.as_slice().iter().zip(b.as_slice()).enumerate() {
            let tolerance = 1e-3 * x.abs().max(1.0);
            assert!((x - y).abs() < tolerance, "component {}: {} vs {}", i, x, y);
        }
    }

    #[test]
    fn test_silence_is_rejected() {
        let config = compact_feature_config();
        let extractor = VectorFeatureExtractor::new(&config).unwrap();
        assert!(matches!(
            extractor.extract_samples(&vec![0.0; config.target_len()], config.sample_rate),
            Err(FeatureError::InsufficientEnergy { .. })
        ));
    }
}
