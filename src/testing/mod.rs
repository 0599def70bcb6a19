//! Deterministic signal generators and compact configurations for tests.
//!
//! Everything here is seeded so unit tests, integration tests and the CLI's
//! synthetic smoke runs see identical audio on every machine. The compact
//! configurations shrink the tensor feature to 63x32 and the network to a few
//! thousand parameters so training tests finish in seconds.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f32::consts::PI;

use crate::analysis::ClipLabel;
use crate::config::{ConvNetConfig, DetectorConfig, FeatureConfig, TrainingConfig};

/// Pure tone
///
/// # Arguments
/// * `sample_rate` - Sample rate in Hz
/// * `frequency` - Tone frequency in Hz
/// * `amplitude` - Peak amplitude
/// * `len` - Number of samples
pub fn sine_wave(sample_rate: u32, frequency: f32, amplitude: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Uniform white noise in [-amplitude, amplitude)
pub fn white_noise(len: usize, amplitude: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| rng.gen_range(-amplitude..amplitude))
        .collect()
}

/// Silence followed by a decaying noise burst starting at `onset`
pub fn noise_burst(len: usize, onset: usize, amplitude: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let tail = len.saturating_sub(onset).max(1) as f32;
    (0..len)
        .map(|i| {
            if i < onset {
                0.0
            } else {
                let decay = (-2.0 * (i - onset) as f32 / tail).exp();
                amplitude * decay * rng.gen_range(-1.0f32..1.0)
            }
        })
        .collect()
}

pub fn silence(len: usize) -> Vec<f32> {
    vec![0.0; len]
}

/// 1 s clips at 8 kHz producing 63x32 tensor features
pub fn compact_feature_config() -> FeatureConfig {
    FeatureConfig {
        sample_rate: 8000,
        duration_secs: 1.0,
        n_fft: 512,
        hop_length: 256,
        n_mels: 32,
        fmax: 4000.0,
        n_mfcc: 13,
        mfcc_mels: 32,
        delta_width: 9,
        contrast_bands: 4,
        contrast_fmin: 200.0,
        contrast_quantile: 0.02,
        top_db: 80.0,
        energy_threshold: 1e-6,
    }
}

/// Narrow network without dropout
pub fn compact_network_config() -> ConvNetConfig {
    ConvNetConfig {
        conv_channels: [4, 8, 8, 8],
        conv_dropout: [0.0; 4],
        conv_l2: 1e-4,
        dense_units: [8, 4],
        dense_dropout: [0.0; 2],
        dense_l2: 1e-4,
        batch_norm_momentum: 0.7,
        batch_norm_epsilon: 1e-3,
    }
}

/// Fast-converging protocol for the compact network
pub fn compact_training_config() -> TrainingConfig {
    TrainingConfig {
        epochs: 40,
        batch_size: 4,
        learning_rate: 1e-2,
        positive_weight_factor: 0.8,
        early_stopping_patience: 15,
        plateau_patience: 5,
        plateau_factor: 0.5,
        plateau_min_delta: 1e-4,
        min_learning_rate: 1e-7,
        validation_fraction: 0.15,
        test_fraction: 0.15,
        seed: 42,
    }
}

/// Complete configuration built from the compact sections
pub fn compact_detector_config() -> DetectorConfig {
    DetectorConfig {
        features: compact_feature_config(),
        network: compact_network_config(),
        training: compact_training_config(),
        ..DetectorConfig::default()
    }
}

/// Quiet lead-in, then a loud broadband burst with a high screech partial
///
/// The burst starts between 20% and 40% of the clip.
pub fn scream_like_clip(config: &FeatureConfig, seed: u64) -> Vec<f32> {
    let len = config.target_len();
    let mut rng = StdRng::seed_from_u64(seed);
    let onset = (len as f32 * rng.gen_range(0.2f32..0.4)) as usize;
    let amplitude = rng.gen_range(0.6f32..0.9);
    let partial = rng.gen_range(0.3f32..0.6) * config.nyquist();

    let mut clip = noise_burst(len, onset, amplitude, seed.wrapping_add(0x5C5C));
    let lead_in = white_noise(onset, 0.005, seed.wrapping_add(1));
    for (sample, noise) in clip.iter_mut().zip(lead_in) {
        *sample += noise;
    }
    let sr = config.sample_rate as f32;
    for (i, sample) in clip.iter_mut().enumerate().skip(onset) {
        *sample += 0.3 * (2.0 * PI * partial * i as f32 / sr).sin();
    }
    clip
}

/// Stationary low tone between 200 and 600 Hz with a faint noise floor
pub fn calm_clip(config: &FeatureConfig, seed: u64) -> Vec<f32> {
    let len = config.target_len();
    let mut rng = StdRng::seed_from_u64(seed);
    let frequency = rng.gen_range(200.0f32..600.0);
    let amplitude = rng.gen_range(0.2f32..0.5);
    let floor = white_noise(len, 0.01, seed.wrapping_add(1));
    sine_wave(config.sample_rate, frequency, amplitude, len)
        .into_iter()
        .zip(floor)
        .map(|(tone, noise)| tone + noise)
        .collect()
}

/// Alternating scream-like and calm clips, `per_class` of each
pub fn labeled_clips(
    config: &FeatureConfig,
    per_class: usize,
    seed: u64,
) -> (Vec<Vec<f32>>, Vec<ClipLabel>) {
    let mut clips = Vec::with_capacity(per_class * 2);
    let mut labels = Vec::with_capacity(per_class * 2);
    for i in 0..per_class as u64 {
        clips.push(scream_like_clip(config, seed.wrapping_add(2 * i)));
        labels.push(ClipLabel::Scream);
        clips.push(calm_clip(config, seed.wrapping_add(2 * i + 1)));
        labels.push(ClipLabel::NonScream);
    }
    (clips, labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generators_are_seeded() {
        assert_eq!(white_noise(64, 0.5, 3), white_noise(64, 0.5, 3));
        assert_ne!(white_noise(64, 0.5, 3), white_noise(64, 0.5, 4));
        let config = compact_feature_config();
        assert_eq!(scream_like_clip(&config, 1), scream_like_clip(&config, 1));
    }

    #[test]
    fn test_burst_starts_at_onset() {
        let burst = noise_burst(1000, 300, 0.8, 1);
        assert!(burst[..300].iter().all(|&x| x == 0.0));
        assert!(burst[300..].iter().any(|&x| x.abs() > 0.1));
    }

    #[test]
    fn test_labeled_clips_are_balanced() {
        let config = compact_feature_config();
        let (clips, labels) = labeled_clips(&config, 3, 7);
        assert_eq!(clips.len(), 6);
        assert_eq!(labels.iter().filter(|l| l.is_scream()).count(), 3);
        assert!(clips.iter().all(|c| c.len() == config.target_len()));
    }
}
