// Temporal module - Time-domain feature extraction
//
// This module computes features directly from time-domain audio signals:
// amplitude statistics, zero-crossing rate and sliding-window frame energy.
//
// References:
// - Peeters, G. (2004). A large set of audio features for sound description
// - Lerch, A. (2012). An Introduction to Audio Content Analysis

/// Largest frame-energy window in samples
const MAX_ENERGY_WINDOW: usize = 2048;

/// Amplitude statistics of a waveform
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AmplitudeStats {
    pub mean: f32,
    /// Population standard deviation
    pub std: f32,
    /// Largest absolute value
    pub peak: f32,
    pub min: f32,
    pub median: f32,
    pub rms: f32,
}

/// Summary of per-frame energies
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameEnergyStats {
    pub mean: f32,
    pub std: f32,
    pub max: f32,
}

/// Temporal feature computation functions
pub struct TemporalFeatures;

impl TemporalFeatures {
    /// Compute zero-crossing rate (ZCR)
    ///
    /// ZCR measures how often the signal changes sign (crosses zero).
    /// High ZCR indicates high-frequency or noise-like content.
    ///
    /// # Returns
    /// Crossings per adjacent sample pair (0.0 to 1.0)
    pub fn compute_zcr(audio: &[f32]) -> f32 {
        if audio.len() < 2 {
            return 0.0;
        }

        let crossings = audio
            .windows(2)
            .filter(|pair| (pair[1] >= 0.0) != (pair[0] >= 0.0))
            .count();

        crossings as f32 / (audio.len() - 1) as f32
    }

    /// Compute mean, std, peak, minimum, median and RMS
    pub fn compute_amplitude_stats(audio: &[f32]) -> AmplitudeStats {
        if audio.is_empty() {
            return AmplitudeStats::default();
        }
        let n = audio.len() as f64;

        let mean = audio.iter().map(|&x| x as f64).sum::<f64>() / n;
        let variance = audio
            .iter()
            .map(|&x| {
                let d = x as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let mean_square = audio.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>() / n;

        let peak = audio.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
        let min = audio.iter().copied().fold(f32::INFINITY, f32::min);

        let mut sorted = audio.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        AmplitudeStats {
            mean: mean as f32,
            std: variance.sqrt() as f32,
            peak,
            min,
            median,
            rms: mean_square.sqrt() as f32,
        }
    }

    /// Sliding-window frame energy (sum of squares per frame)
    ///
    /// The window adapts to the clip: `min(2048, len/4)` samples with a hop
    /// of a quarter window (at least 1). Frames must fit entirely in the clip.
    pub fn compute_frame_energies(audio: &[f32]) -> Vec<f32> {
        let window = MAX_ENERGY_WINDOW.min(audio.len() / 4);
        if window == 0 || audio.len() < window {
            return Vec::new();
        }
        let hop = (window / 4).max(1);

        (0..=(audio.len() - window) / hop)
            .map(|i| {
                let start = i * hop;
                audio[start..start + window].iter().map(|&x| x * x).sum()
            })
            .collect()
    }

    /// Mean, population std and max of frame energies (zeros when empty)
    pub fn summarize_frame_energies(energies: &[f32]) -> FrameEnergyStats {
        if energies.is_empty() {
            return FrameEnergyStats::default();
        }
        let n = energies.len() as f32;
        let mean = energies.iter().sum::<f32>() / n;
        let variance = energies.iter().map(|&e| (e - mean) * (e - mean)).sum::<f32>() / n;
        let max = energies.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        FrameEnergyStats {
            mean,
            std: variance.max(0.0).sqrt(),
            max,
        }
    }
}
