// Spectral module - Frequency-domain summary statistics
//
// This module computes scalar features from magnitude spectra.
// All features are based on the magnitude spectrum (absolute values of FFT bins).
//
// References:
// - Peeters, G. (2004). A large set of audio features for sound description
// - Lerch, A. (2012). An Introduction to Audio Content Analysis

/// Spectral rolloff threshold (85% of spectral energy)
const ROLLOFF_THRESHOLD: f32 = 0.85;

/// Magnitude sums below this are treated as an empty spectrum
const SILENT_SPECTRUM: f32 = 1e-10;

/// Spectral feature computation functions
pub struct SpectralFeatures {
    sample_rate: u32,
    fft_size: usize,
}

impl SpectralFeatures {
    /// Create a new spectral features processor
    ///
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz
    /// * `fft_size` - Transform length that produced the spectra
    pub fn new(sample_rate: u32, fft_size: usize) -> Self {
        Self {
            sample_rate,
            fft_size,
        }
    }

    fn bin_width(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Compute spectral centroid (weighted mean frequency)
    ///
    /// Formula: centroid = Σ(f_i × |X[i]|) / Σ|X[i]|
    ///
    /// # Returns
    /// Spectral centroid in Hz, 0 for an empty spectrum
    pub fn compute_centroid(&self, spectrum: &[f32]) -> f32 {
        let bin_width = self.bin_width();

        let weighted_sum: f32 = spectrum
            .iter()
            .enumerate()
            .map(|(i, &mag)| i as f32 * bin_width * mag)
            .sum();
        let magnitude_sum: f32 = spectrum.iter().sum();

        if magnitude_sum > SILENT_SPECTRUM {
            weighted_sum / magnitude_sum
        } else {
            0.0
        }
    }

    /// Compute spectral spread (magnitude-weighted standard deviation of
    /// frequency around the centroid)
    ///
    /// Formula: spread = sqrt(Σ((f_i − centroid)² × |X[i]|) / Σ|X[i]|)
    ///
    /// # Returns
    /// Spread in Hz, 0 for an empty spectrum
    pub fn compute_spread(&self, spectrum: &[f32], centroid: f32) -> f32 {
        let bin_width = self.bin_width();
        let magnitude_sum: f32 = spectrum.iter().sum();
        if magnitude_sum <= SILENT_SPECTRUM {
            return 0.0;
        }

        let variance: f32 = spectrum
            .iter()
            .enumerate()
            .map(|(i, &mag)| {
                let deviation = i as f32 * bin_width - centroid;
                deviation * deviation * mag
            })
            .sum::<f32>()
            / magnitude_sum;

        variance.max(0.0).sqrt()
    }

    /// Compute spectral flatness (tonality measure)
    ///
    /// Formula: flatness = geometric_mean(|X[i]|) / arithmetic_mean(|X[i]|)
    ///
    /// Returns value between 0 (tonal, e.g., sine wave) and 1 (noise-like).
    pub fn compute_flatness(&self, spectrum: &[f32]) -> f32 {
        // Filter out zero or near-zero values for geometric mean
        let non_zero: Vec<f32> = spectrum
            .iter()
            .filter(|&&mag| mag > SILENT_SPECTRUM)
            .copied()
            .collect();

        if non_zero.is_empty() {
            return 0.0;
        }

        // Geometric mean via the log domain, accumulated in f64 for long spectra
        let log_sum: f64 = non_zero.iter().map(|&mag| (mag as f64).ln()).sum();
        let geometric_mean = (log_sum / non_zero.len() as f64).exp() as f32;
        let arithmetic_mean: f32 = non_zero.iter().sum::<f32>() / non_zero.len() as f32;

        if arithmetic_mean > SILENT_SPECTRUM {
            (geometric_mean / arithmetic_mean).min(1.0)
        } else {
            0.0
        }
    }

    /// Compute spectral rolloff (85% energy threshold frequency)
    ///
    /// # Returns
    /// Rolloff frequency in Hz, 0 for an empty spectrum
    pub fn compute_rolloff(&self, spectrum: &[f32]) -> f32 {
        let total_energy: f32 = spectrum.iter().map(|&mag| mag * mag).sum();

        if total_energy < SILENT_SPECTRUM {
            return 0.0;
        }

        let threshold = ROLLOFF_THRESHOLD * total_energy;
        let bin_width = self.bin_width();

        let mut cumulative_energy = 0.0;
        for (i, &mag) in spectrum.iter().enumerate() {
            cumulative_energy += mag * mag;
            if cumulative_energy >= threshold {
                return i as f32 * bin_width;
            }
        }

        (spectrum.len() - 1) as f32 * bin_width
    }
}
