// Feature extraction - DSP front-ends for both classifiers
//
// Module organization:
// - types: TensorFeature / VectorFeature
// - fft: STFT and whole-signal spectrum
// - mel: Slaney mel filterbank, power_to_db
// - cepstral: MFCC (DCT-II) and delta coefficients
// - contrast: octave-band spectral contrast
// - spectral: centroid, spread, flatness, rolloff
// - temporal: amplitude statistics, ZCR, frame energy
// - tensor: TensorFeatureExtractor (stacked, row-standardized map)
// - vector: VectorFeatureExtractor (18-component summary)
// - mod.rs: ClipCharacteristics diagnostics
//
// References:
// - Peeters, G. (2004). A large set of audio features for sound description
// - Jiang, D. et al. (2002). Music type classification by spectral contrast feature
// - Slaney, M. (1998). Auditory Toolbox

mod cepstral;
mod contrast;
mod fft;
mod mel;
mod spectral;
mod temporal;
mod tensor;
mod types;
mod vector;

pub use tensor::{standardize_rows, TensorFeatureExtractor, STANDARDIZE_EPSILON};
pub use types::{TensorFeature, VectorFeature, VECTOR_FEATURE_LEN, VECTOR_FEATURE_NAMES};
pub use vector::VectorFeatureExtractor;

use serde::{Deserialize, Serialize};

use crate::analysis::conditioner::ConditionedClip;
use crate::config::FeatureConfig;
use fft::StftProcessor;
use spectral::SpectralFeatures;
use temporal::TemporalFeatures;

/// Human-oriented description of a conditioned clip
///
/// Attached to detections to help explain false positives: loud, bright,
/// noisy clips are the usual suspects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipCharacteristics {
    /// Mean squared amplitude of the fixed-length clip before normalization
    pub energy: f32,
    /// Root mean square before normalization (loudness)
    pub rms: f32,
    /// Zero-crossing rate (noisiness)
    pub zcr: f32,
    /// Mean per-frame spectral centroid in Hz (brightness)
    pub spectral_centroid: f32,
    /// Mean per-frame 85% rolloff in Hz
    pub spectral_rolloff: f32,
}

/// Computes [`ClipCharacteristics`] with the STFT settings of a config
pub struct ClipAnalyzer {
    stft: StftProcessor,
    spectral: SpectralFeatures,
}

impl ClipAnalyzer {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            stft: StftProcessor::new(config.n_fft, config.hop_length),
            spectral: SpectralFeatures::new(config.sample_rate, config.n_fft),
        }
    }

    pub fn analyze(&self, clip: &ConditionedClip) -> ClipCharacteristics {
        let energy = clip.energy as f32;
        let magnitude = self.stft.magnitude(&clip.samples);

        let n_frames = magnitude.ncols().max(1) as f32;
        let mut centroid_sum = 0.0f32;
        let mut rolloff_sum = 0.0f32;
        for frame in magnitude.columns() {
            let frame = frame.to_vec();
            centroid_sum += self.spectral.compute_centroid(&frame);
            rolloff_sum += self.spectral.compute_rolloff(&frame);
        }

        ClipCharacteristics {
            energy,
            rms: energy.sqrt(),
            zcr: TemporalFeatures::compute_zcr(&clip.samples),
            spectral_centroid: centroid_sum / n_frames,
            spectral_rolloff: rolloff_sum / n_frames,
        }
    }
}
