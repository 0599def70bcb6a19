// Mel module - Slaney mel filterbank and decibel conversion
//
// The mel scale is linear below 1 kHz and logarithmic above it (Slaney's
// Auditory Toolbox). Triangular filters are area-normalized so each band has
// approximately constant energy per Hz.

use ndarray::{Array2, ArrayView2};

const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

/// Smallest power considered by [`power_to_db`]
pub const AMIN: f32 = 1e-10;

fn log_step() -> f32 {
    6.4f32.ln() / 27.0
}

/// Convert Hz to Slaney mels
pub fn hz_to_mel(hz: f32) -> f32 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

/// Convert Slaney mels to Hz
pub fn mel_to_hz(mel: f32) -> f32 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Mel filterbank matrix
pub struct MelFilterbank {
    /// Shape (n_mels, n_fft/2 + 1)
    weights: Array2<f32>,
}

impl MelFilterbank {
    /// Build `n_mels` triangular filters spanning `fmin..fmax` Hz
    ///
    /// # Arguments
    /// * `sample_rate` - Sample rate in Hz
    /// * `n_fft` - FFT size the filters are applied to
    /// * `n_mels` - Number of bands
    /// * `fmin` / `fmax` - Frequency range in Hz
    pub fn new(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: f32) -> Self {
        let n_bins = n_fft / 2 + 1;
        let fft_freqs = super::fft::fft_frequencies(sample_rate, n_fft);

        // n_mels + 2 band edges, equally spaced on the mel scale
        let mel_min = hz_to_mel(fmin);
        let mel_max = hz_to_mel(fmax);
        let edges: Vec<f32> = (0..n_mels + 2)
            .map(|i| {
                let mel = mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32;
                mel_to_hz(mel)
            })
            .collect();

        let mut weights = Array2::<f32>::zeros((n_mels, n_bins));
        for m in 0..n_mels {
            let lower_width = edges[m + 1] - edges[m];
            let upper_width = edges[m + 2] - edges[m + 1];
            let enorm = 2.0 / (edges[m + 2] - edges[m]);

            for (bin, &freq) in fft_freqs.iter().enumerate() {
                let lower = (freq - edges[m]) / lower_width;
                let upper = (edges[m + 2] - freq) / upper_width;
                let w = lower.min(upper).max(0.0);
                weights[[m, bin]] = w * enorm;
            }
        }

        Self { weights }
    }

    pub fn n_mels(&self) -> usize {
        self.weights.nrows()
    }

    /// Project a power spectrogram (bins × frames) onto the mel bands
    pub fn apply(&self, power: ArrayView2<f32>) -> Array2<f32> {
        self.weights.dot(&power)
    }
}

/// Reference level for [`power_to_db`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DbReference {
    /// Fixed reference power
    Value(f32),
    /// The largest value of the input
    Max,
}

/// Convert a power matrix to decibels
///
/// `10·log10(max(S, amin)) − 10·log10(max(ref, amin))`, then values more
/// than `top_db` below the maximum are raised to `max − top_db`.
pub fn power_to_db(power: &Array2<f32>, reference: DbReference, top_db: f32) -> Array2<f32> {
    let ref_value = match reference {
        DbReference::Value(value) => value,
        DbReference::Max => power.iter().fold(f32::NEG_INFINITY, |acc, &x| acc.max(x)),
    };
    let offset = 10.0 * ref_value.max(AMIN).log10();

    let mut db = power.mapv(|x| 10.0 * x.max(AMIN).log10() - offset);
    let max_db = db.iter().fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let floor = max_db - top_db;
    db.mapv_inplace(|x| x.max(floor));
    db
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mel_scale_roundtrip_and_breakpoint() {
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-4);
        assert!((hz_to_mel(500.0) - 7.5).abs() < 1e-4);
        for hz in [0.0f32, 200.0, 999.0, 1000.0, 4000.0, 8000.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert!((back - hz).abs() < 0.05, "{} Hz came back as {}", hz, back);
        }
    }

    #[test]
    fn test_filterbank_respects_fmax() {
        let fb = MelFilterbank::new(22050, 2048, 128, 0.0, 8000.0);
        assert_eq!(fb.weights.dim(), (128, 1025));

        // Bins above 8 kHz receive no weight
        let first_bin_above = (8000.0 / (22050.0 / 2048.0)) as usize + 2;
        for m in 0..128 {
            for bin in first_bin_above..1025 {
                assert_eq!(fb.weights[[m, bin]], 0.0);
            }
        }
        // Every band covers at least one bin at this resolution
        let empty = (0..128)
            .filter(|&m| fb.weights.row(m).iter().all(|&w| w == 0.0))
            .count();
        assert!(empty < 10, "{} empty mel bands", empty);
    }

    #[test]
    fn test_power_to_db_top_db_floor() {
        let power = array![[1.0f32, 1e-12], [0.1, 0.01]];
        let db = power_to_db(&power, DbReference::Value(1.0), 80.0);
        assert!((db[[0, 0]] - 0.0).abs() < 1e-5);
        assert!((db[[1, 0]] + 10.0).abs() < 1e-4);
        // 1e-12 clamps to amin (-100 dB), then to the -80 dB floor
        assert!((db[[0, 1]] + 80.0).abs() < 1e-4);
    }

    #[test]
    fn test_power_to_db_relative_to_max() {
        let power = array![[4.0f32, 0.4]];
        let db = power_to_db(&power, DbReference::Max, 80.0);
        assert!((db[[0, 0]]).abs() < 1e-5);
        assert!((db[[0, 1]] + 10.0).abs() < 1e-4);
    }
}
