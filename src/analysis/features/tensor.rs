// Tensor module - Stacked time-frequency feature map
//
// Stage order:
// 1. Mel energy in dB relative to the clip's own peak power
// 2. MFCC from a full-band mel spectrogram
// 3. ΔMFCC
// 4. Octave-band spectral contrast
// 5. Vertical stack and per-row standardization

use ndarray::{concatenate, Array2, Axis};

use super::cepstral::{dct_basis, delta, mfcc_from_log_mel};
use super::contrast::SpectralContrast;
use super::fft::StftProcessor;
use super::mel::{power_to_db, DbReference, MelFilterbank};
use super::types::TensorFeature;
use crate::analysis::conditioner::{ConditionedClip, SignalConditioner};
use crate::config::FeatureConfig;
use crate::error::FeatureError;

/// Added to the row standard deviation before dividing
pub const STANDARDIZE_EPSILON: f32 = 1e-8;

/// Produces [`TensorFeature`]s of a fixed shape for one [`FeatureConfig`]
pub struct TensorFeatureExtractor {
    config: FeatureConfig,
    conditioner: SignalConditioner,
    stft: StftProcessor,
    /// Bands up to `fmax` for the energy map
    energy_mel: MelFilterbank,
    /// Full-band filters feeding the cepstral transform
    cepstral_mel: MelFilterbank,
    dct: Array2<f32>,
    contrast: SpectralContrast,
}

impl TensorFeatureExtractor {
    /// Build an extractor; filterbanks and DCT basis are computed once
    pub fn new(config: &FeatureConfig) -> Result<Self, FeatureError> {
        config.validate()?;

        let stft = StftProcessor::new(config.n_fft, config.hop_length);
        let bin_freqs = stft.bin_frequencies(config.sample_rate);

        Ok(Self {
            conditioner: SignalConditioner::new(config),
            energy_mel: MelFilterbank::new(
                config.sample_rate,
                config.n_fft,
                config.n_mels,
                0.0,
                config.fmax,
            ),
            cepstral_mel: MelFilterbank::new(
                config.sample_rate,
                config.n_fft,
                config.mfcc_mels,
                0.0,
                config.nyquist(),
            ),
            dct: dct_basis(config.n_mfcc, config.mfcc_mels),
            contrast: SpectralContrast::new(
                &bin_freqs,
                config.contrast_fmin,
                config.contrast_bands,
                config.contrast_quantile,
                config.top_db,
            ),
            stft,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Shape of every feature this extractor produces
    pub fn output_shape(&self) -> (usize, usize) {
        self.config.tensor_shape()
    }

    /// Condition a raw buffer and extract its tensor feature
    pub fn extract_samples(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<TensorFeature, FeatureError> {
        let clip = self.conditioner.condition(samples, sample_rate)?;
        self.extract(&clip)
    }

    /// Extract the tensor feature of a conditioned clip
    ///
    /// # Returns
    /// A (tensor_rows × n_frames) feature, or `NonFiniteFeature` naming the
    /// first stage that produced a NaN or infinite value
    pub fn extract(&self, clip: &ConditionedClip) -> Result<TensorFeature, FeatureError> {
        if clip.samples.len() != self.config.target_len() || clip.sample_rate != self.config.sample_rate
        {
            return Err(FeatureError::InvalidClip {
                reason: format!(
                    "clip has {} samples at {} Hz, extractor expects {} at {} Hz",
                    clip.samples.len(),
                    clip.sample_rate,
                    self.config.target_len(),
                    self.config.sample_rate
                ),
            });
        }

        let magnitude = self.stft.magnitude(&clip.samples);
        let power = magnitude.mapv(|m| m * m);

        let mel_db = power_to_db(
            &self.energy_mel.apply(power.view()),
            DbReference::Max,
            self.config.top_db,
        );
        ensure_finite(&mel_db, "mel")?;

        let cepstral_db = power_to_db(
            &self.cepstral_mel.apply(power.view()),
            DbReference::Value(1.0),
            self.config.top_db,
        );
        let mfcc = mfcc_from_log_mel(&self.dct, cepstral_db.view());
        ensure_finite(&mfcc, "mfcc")?;

        let mfcc_delta = delta(mfcc.view(), self.config.delta_width);
        ensure_finite(&mfcc_delta, "delta")?;

        let contrast = self.contrast.compute(magnitude.view());
        ensure_finite(&contrast, "contrast")?;

        let mut stacked = concatenate(
            Axis(0),
            &[mel_db.view(), mfcc.view(), mfcc_delta.view(), contrast.view()],
        )
        .map_err(|err| FeatureError::InvalidConfig {
            reason: format!("feature groups do not share a frame axis: {}", err),
        })?;

        standardize_rows(&mut stacked);
        ensure_finite(&stacked, "standardized")?;

        Ok(TensorFeature::from_array(stacked))
    }
}

/// Standardize every row to zero mean and unit (population) variance
pub fn standardize_rows(data: &mut Array2<f32>) {
    for mut row in data.axis_iter_mut(Axis(0)) {
        let n = row.len() as f32;
        if n == 0.0 {
            continue;
        }
        let mean = row.sum() / n;
        let variance = row.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / n;
        let denom = variance.sqrt() + STANDARDIZE_EPSILON;
        row.mapv_inplace(|x| (x - mean) / denom);
    }
}

fn ensure_finite(data: &Array2<f32>, feature: &str) -> Result<(), FeatureError> {
    if data.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(FeatureError::NonFiniteFeature {
            feature: feature.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{compact_feature_config, noise_burst, sine_wave, white_noise};

    fn extractor() -> TensorFeatureExtractor {
        TensorFeatureExtractor::new(&compact_feature_config()).unwrap()
    }

    #[test]
    fn test_output_shape_matches_config() {
        let extractor = extractor();
        let config = extractor.config().clone();
        let audio = white_noise(config.target_len(), 0.5, 7);

        let feature = extractor.extract_samples(&audio, config.sample_rate).unwrap();
        assert_eq!(feature.shape(), config.tensor_shape());
        assert_eq!(feature.shape(), (63, 32));
    }

    #[test]
    fn test_rows_are_standardized() {
        let extractor = extractor();
        let config = extractor.config().clone();
        let audio = noise_burst(config.target_len(), config.target_len() / 3, 0.8, 3);

        let feature = extractor.extract_samples(&audio, config.sample_rate).unwrap();
        for (i, row) in feature.as_array().axis_iter(Axis(0)).enumerate() {
            let n = row.len() as f32;
            let mean = row.sum() / n;
            let std = (row.iter().map(|&x| (x - mean).powi(2)).sum::<f32>() / n).sqrt();
            assert!(mean.abs() < 1e-3, "row {} mean {}", i, mean);
            assert!(
                (std - 1.0).abs() < 1e-3 || std < 1e-3,
                "row {} std {}",
                i,
                std
            );
        }
    }

    #[test]
    fn test_constant_row_standardizes_to_zero() {
        let mut data = Array2::from_elem((2, 5), 3.0f32);
        data[[1, 0]] = 4.0;
        standardize_rows(&mut data);
        assert!(data.row(0).iter().all(|&x| x == 0.0));
        assert!(data[[1, 0]] > 1.0);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = extractor();
        let config = extractor.config().clone();
        let audio = sine_wave(config.sample_rate, 440.0, 0.3, config.target_len());

        let a = extractor.extract_samples(&audio, config.sample_rate).unwrap();
        let b = extractor.extract_samples(&audio, config.sample_rate).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_extraction_is_scale_invariant() {
        let extractor = extractor();
        let config = extractor.config().clone();
        let audio = white_noise(config.target_len(), 0.2, 11);
        let louder: Vec<f32> = audio.iter().map(|&x| x * 3.5).collect();

        let a = extractor.extract_samples(&audio, config.sample_rate).unwrap();
        let b = extractor.extract_samples(&louder, config.sample_rate).unwrap();
        let max_diff = a
            .as_array()
            .iter()
            .zip(b.as_array().iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0f32, f32::max);
        assert!(max_diff < 1e-2, "max difference {}", max_diff);
    }

    #[test]
    fn test_silence_is_rejected() {
        let extractor = extractor();
        let config = extractor.config().clone();
        let result = extractor.extract_samples(&vec![0.0; config.target_len()], config.sample_rate);
        assert!(matches!(
            result,
            Err(FeatureError::InsufficientEnergy { .. })
        ));
    }

    #[test]
    fn test_reference_configuration_shape() {
        let config = FeatureConfig::default();
        let extractor = TensorFeatureExtractor::new(&config).unwrap();
        let audio = white_noise(config.target_len(), 0.5, 1);
        let feature = extractor.extract_samples(&audio, config.sample_rate).unwrap();
        assert_eq!(feature.shape(), (215, 130));
    }
}
