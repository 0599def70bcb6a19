//! Detector configuration
//!
//! A single immutable [`DetectorConfig`] is passed into every extractor,
//! classifier and trainer constructor so training-time and inference-time
//! parameters cannot drift apart. The trained model artifact also stores the
//! [`FeatureConfig`] it was trained with and inference checks it.
//!
//! Configuration can be loaded from JSON for experimentation without
//! recompilation; missing or malformed files fall back to the defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{FeatureError, ModelError};

/// Complete detector configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub network: ConvNetConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
}

/// Signal conditioning and feature extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Canonical sample rate in Hz; input clips are resampled to it
    pub sample_rate: u32,
    /// Canonical clip duration in seconds
    pub duration_secs: f32,
    /// STFT window size in samples
    pub n_fft: usize,
    /// STFT hop size in samples
    pub hop_length: usize,
    /// Mel bands of the spectral-energy map
    pub n_mels: usize,
    /// Upper frequency bound of the spectral-energy map (Hz)
    pub fmax: f32,
    /// Number of cepstral coefficients kept
    pub n_mfcc: usize,
    /// Mel bands feeding the cepstral transform (0 Hz to Nyquist)
    pub mfcc_mels: usize,
    /// Savitzky-Golay window of the delta coefficients (odd)
    pub delta_width: usize,
    /// Octave sub-bands of the spectral contrast (rows = bands + 1)
    pub contrast_bands: usize,
    /// Lower edge of the first contrast octave (Hz)
    pub contrast_fmin: f32,
    /// Fraction of a sub-band averaged for its peak and valley
    pub contrast_quantile: f32,
    /// Dynamic range kept by the decibel conversion
    pub top_db: f32,
    /// Mean-square amplitude below which a clip is rejected as silence
    pub energy_threshold: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            duration_secs: 3.0,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            fmax: 8000.0,
            n_mfcc: 40,
            mfcc_mels: 128,
            delta_width: 9,
            contrast_bands: 6,
            contrast_fmin: 200.0,
            contrast_quantile: 0.02,
            top_db: 80.0,
            energy_threshold: 1e-6,
        }
    }
}

impl FeatureConfig {
    /// Number of samples in a conditioned clip
    pub fn target_len(&self) -> usize {
        (self.sample_rate as f64 * self.duration_secs as f64).round() as usize
    }

    /// Number of STFT frames of a conditioned clip (centered framing)
    pub fn n_frames(&self) -> usize {
        1 + self.target_len() / self.hop_length.max(1)
    }

    /// Spectral contrast rows (one per octave band plus the residual band)
    pub fn contrast_rows(&self) -> usize {
        self.contrast_bands + 1
    }

    /// Rows of the stacked tensor feature
    pub fn tensor_rows(&self) -> usize {
        self.n_mels + 2 * self.n_mfcc + self.contrast_rows()
    }

    /// (rows, columns) of every tensor feature produced with this config
    pub fn tensor_shape(&self) -> (usize, usize) {
        (self.tensor_rows(), self.n_frames())
    }

    /// Nyquist frequency in Hz
    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), FeatureError> {
        let invalid = |reason: String| Err(FeatureError::InvalidConfig { reason });

        if self.sample_rate == 0 {
            return invalid("sample_rate must be > 0".to_string());
        }
        if !(self.duration_secs > 0.0) {
            return invalid(format!(
                "duration_secs must be > 0 (got {})",
                self.duration_secs
            ));
        }
        if self.n_fft < 2 || self.hop_length == 0 {
            return invalid(format!(
                "n_fft must be >= 2 and hop_length > 0 (got {} / {})",
                self.n_fft, self.hop_length
            ));
        }
        if self.n_mels == 0 || self.mfcc_mels == 0 {
            return invalid("mel band counts must be > 0".to_string());
        }
        if !(self.fmax > 0.0) || self.fmax > self.nyquist() {
            return invalid(format!(
                "fmax {} Hz must lie in (0, {}] Hz",
                self.fmax,
                self.nyquist()
            ));
        }
        if self.n_mfcc == 0 || self.n_mfcc > self.mfcc_mels {
            return invalid(format!(
                "n_mfcc must be in 1..={} (got {})",
                self.mfcc_mels, self.n_mfcc
            ));
        }
        if self.delta_width < 3 || self.delta_width % 2 == 0 {
            return invalid(format!(
                "delta_width must be odd and >= 3 (got {})",
                self.delta_width
            ));
        }
        if self.contrast_bands == 0 || !(self.contrast_fmin > 0.0) {
            return invalid("contrast needs >= 1 band and fmin > 0".to_string());
        }
        if !(self.contrast_quantile > 0.0 && self.contrast_quantile < 1.0) {
            return invalid(format!(
                "contrast_quantile must lie in (0, 1) (got {})",
                self.contrast_quantile
            ));
        }
        let highest_edge = self.contrast_fmin * 2f32.powi(self.contrast_bands as i32 - 1);
        if highest_edge >= self.nyquist() {
            return invalid(format!(
                "contrast band edge {} Hz exceeds Nyquist {} Hz",
                highest_edge,
                self.nyquist()
            ));
        }
        if !(self.top_db > 0.0) {
            return invalid("top_db must be > 0".to_string());
        }
        if !(self.energy_threshold >= 0.0) {
            return invalid("energy_threshold must be >= 0".to_string());
        }
        Ok(())
    }
}

/// Convolutional network topology and regularization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvNetConfig {
    /// Output channels of the four 3x3 convolution blocks
    pub conv_channels: [usize; 4],
    /// Dropout after each convolution block
    pub conv_dropout: [f32; 4],
    /// L2 factor on convolution kernels
    pub conv_l2: f32,
    /// Units of the two hidden dense layers
    pub dense_units: [usize; 2],
    /// Dropout after each hidden dense layer
    pub dense_dropout: [f32; 2],
    /// L2 factor on dense kernels
    pub dense_l2: f32,
    /// Moving-average momentum of batch-norm statistics
    pub batch_norm_momentum: f32,
    /// Batch-norm variance epsilon
    pub batch_norm_epsilon: f32,
}

impl Default for ConvNetConfig {
    fn default() -> Self {
        Self {
            conv_channels: [32, 64, 128, 128],
            conv_dropout: [0.25, 0.30, 0.40, 0.5],
            conv_l2: 0.001,
            dense_units: [128, 64],
            dense_dropout: [0.6, 0.5],
            dense_l2: 0.01,
            batch_norm_momentum: 0.99,
            batch_norm_epsilon: 0.001,
        }
    }
}

impl ConvNetConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |reason: String| Err(ModelError::InvalidConfig { reason });

        if self.conv_channels.contains(&0) || self.dense_units.contains(&0) {
            return invalid("layer widths must be > 0".to_string());
        }
        let rates = self.conv_dropout.iter().chain(self.dense_dropout.iter());
        for &rate in rates {
            if !(0.0..1.0).contains(&rate) {
                return invalid(format!("dropout rate {} outside [0, 1)", rate));
            }
        }
        if self.conv_l2 < 0.0 || self.dense_l2 < 0.0 {
            return invalid("L2 factors must be >= 0".to_string());
        }
        if !(0.0..1.0).contains(&self.batch_norm_momentum) || !(self.batch_norm_epsilon > 0.0) {
            return invalid("batch-norm momentum must lie in [0, 1) and epsilon > 0".to_string());
        }
        Ok(())
    }
}

/// Offline training protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Multiplier applied to the balanced positive-class weight
    pub positive_weight_factor: f32,
    /// Epochs without val-loss improvement before stopping
    pub early_stopping_patience: usize,
    /// Epochs without val-loss improvement before halving the learning rate
    pub plateau_patience: usize,
    pub plateau_factor: f32,
    pub plateau_min_delta: f32,
    pub min_learning_rate: f32,
    /// Fraction of the dataset held out for validation
    pub validation_fraction: f32,
    /// Fraction of the dataset held out for the final test report
    pub test_fraction: f32,
    /// Seed for splits, shuffling, initialization and dropout
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 80,
            batch_size: 16,
            learning_rate: 1e-4,
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
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |reason: String| Err(ModelError::InvalidConfig { reason });

        if self.epochs == 0 || self.batch_size == 0 {
            return invalid("epochs and batch_size must be > 0".to_string());
        }
        if !(self.learning_rate > 0.0) {
            return invalid("learning_rate must be > 0".to_string());
        }
        if !(self.positive_weight_factor > 0.0) {
            return invalid("positive_weight_factor must be > 0".to_string());
        }
        if !(self.plateau_factor > 0.0 && self.plateau_factor < 1.0) {
            return invalid("plateau_factor must lie in (0, 1)".to_string());
        }
        let held_out = self.validation_fraction + self.test_fraction;
        if self.validation_fraction < 0.0 || self.test_fraction < 0.0 || held_out >= 1.0 {
            return invalid(format!(
                "validation + test fractions must be < 1 (got {})",
                held_out
            ));
        }
        Ok(())
    }
}

/// Decision layer parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Probability at or above which a clip is labeled scream
    pub operating_threshold: f32,
    /// Candidate thresholds for the evaluation sweep
    pub sweep_thresholds: Vec<f32>,
    /// Probabilities below this are reported as "very unlikely"
    pub very_unlikely_below: f32,
    /// Probabilities from this upward are reported as "very likely"
    pub very_likely_from: f32,
    /// Live captures with less energy are treated as a dead microphone
    pub capture_min_energy: f64,
    /// Live captures with a lower peak are treated as too quiet
    pub capture_min_peak: f32,
    /// Report the first silent chunk of a run, then every n-th one after it
    pub silence_report_every: u32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            operating_threshold: 0.6,
            sweep_thresholds: vec![0.3, 0.4, 0.5, 0.6, 0.7, 0.8],
            very_unlikely_below: 0.3,
            very_likely_from: 0.8,
            capture_min_energy: 1e-10,
            capture_min_peak: 0.001,
            silence_report_every: 5,
        }
    }
}

/// Instance-based classifier parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Neighbors consulted per query
    pub k: usize,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self { k: 5 }
    }
}

impl DetectorConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<(), String> {
        self.features.validate().map_err(|err| err.to_string())?;
        self.network.validate().map_err(|err| err.to_string())?;
        self.training.validate().map_err(|err| err.to_string())?;
        if !(0.0..=1.0).contains(&self.decision.operating_threshold) {
            return Err(format!(
                "operating_threshold {} outside [0, 1]",
                self.decision.operating_threshold
            ));
        }
        if self.reference.k == 0 {
            return Err("reference k must be > 0".to_string());
        }
        Ok(())
    }

    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// Loaded configuration, or the defaults if the file doesn't exist,
    /// the JSON is invalid, or the values fail validation
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<DetectorConfig>(&contents) {
                Ok(config) => match config.validate() {
                    Ok(()) => {
                        log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                        config
                    }
                    Err(reason) => {
                        log::warn!(
                            "[Config] Rejected configuration from {:?}: {}. Using defaults.",
                            path.as_ref(),
                            reason
                        );
                        Self::default()
                    }
                },
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Write configuration as pretty-printed JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, json)
    }
}
