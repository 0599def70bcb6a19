// Contrast module - Octave-band spectral contrast
//
// For every frame and sub-band, the mean of the strongest and of the weakest
// `quantile` fraction of bins are compared in decibels. Band 0 covers
// 0..fmin, band k covers fmin·2^(k-1)..fmin·2^k and the last band extends to
// Nyquist.

use ndarray::{Array2, ArrayView2};

use super::mel::{power_to_db, DbReference};

/// Spectral contrast extractor for a fixed bin layout
pub struct SpectralContrast {
    /// Bin indices of every sub-band
    bands: Vec<Vec<usize>>,
    /// Number of bins averaged for the peak and the valley of each band
    take: Vec<usize>,
    top_db: f32,
}

impl SpectralContrast {
    /// Pre-compute band membership
    ///
    /// # Arguments
    /// * `bin_freqs` - Center frequency of each STFT bin
    /// * `fmin` - Upper edge of band 0 in Hz
    /// * `n_bands` - Octave bands above `fmin` (rows = n_bands + 1)
    /// * `quantile` - Fraction of each band averaged for peak and valley
    /// * `top_db` - Dynamic range of the decibel conversion
    pub fn new(bin_freqs: &[f32], fmin: f32, n_bands: usize, quantile: f32, top_db: f32) -> Self {
        let mut edges = vec![0.0f32];
        edges.extend((0..=n_bands).map(|i| fmin * 2f32.powi(i as i32)));

        let mut bands = Vec::with_capacity(n_bands + 1);
        let mut take = Vec::with_capacity(n_bands + 1);

        for k in 0..=n_bands {
            let (low, high) = (edges[k], edges[k + 1]);
            let mut members: Vec<usize> = bin_freqs
                .iter()
                .enumerate()
                .filter(|(_, &f)| f >= low && f <= high)
                .map(|(i, _)| i)
                .collect();

            if let (Some(&first), Some(&last)) = (members.first(), members.last()) {
                // Bands overlap their lower neighbour by one bin
                if k > 0 && first > 0 {
                    members.insert(0, first - 1);
                }
                // The top band takes everything up to Nyquist
                if k == n_bands {
                    members.extend(last + 1..bin_freqs.len());
                }
            }

            let count = members.len();
            let n_take = ((quantile * count as f32).round() as usize).max(1);

            // Lower bands drop their top bin, which the next band also covers
            if k < n_bands && count > 1 {
                members.pop();
            }

            bands.push(members);
            take.push(n_take);
        }

        Self {
            bands,
            take,
            top_db,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.bands.len()
    }

    /// Compute contrast rows from a magnitude spectrogram (bins × frames)
    pub fn compute(&self, magnitude: ArrayView2<f32>) -> Array2<f32> {
        let n_frames = magnitude.ncols();
        let mut peak = Array2::<f32>::zeros((self.n_rows(), n_frames));
        let mut valley = Array2::<f32>::zeros((self.n_rows(), n_frames));
        let mut sorted: Vec<f32> = Vec::new();

        for (k, members) in self.bands.iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            let n_take = self.take[k].min(members.len());

            for t in 0..n_frames {
                sorted.clear();
                sorted.extend(members.iter().map(|&bin| magnitude[[bin, t]]));
                sorted.sort_by(|a, b| a.total_cmp(b));

                let low: f32 = sorted[..n_take].iter().sum();
                let high: f32 = sorted[sorted.len() - n_take..].iter().sum();
                valley[[k, t]] = low / n_take as f32;
                peak[[k, t]] = high / n_take as f32;
            }
        }

        let peak_db = power_to_db(&peak, DbReference::Value(1.0), self.top_db);
        let valley_db = power_to_db(&valley, DbReference::Value(1.0), self.top_db);
        peak_db - valley_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::fft::fft_frequencies;

    fn reference_contrast() -> SpectralContrast {
        SpectralContrast::new(&fft_frequencies(22050, 2048), 200.0, 6, 0.02, 80.0)
    }

    #[test]
    fn test_band_layout() {
        let contrast = reference_contrast();
        assert_eq!(contrast.n_rows(), 7);

        // Bands tile the spectrum without gaps
        let mut covered = vec![false; 1025];
        for members in &contrast.bands {
            for &bin in members {
                covered[bin] = true;
            }
        }
        assert!(covered.iter().all(|&c| c));

        // The top band reaches Nyquist
        assert_eq!(contrast.bands[6].last(), Some(&1024));
    }

    #[test]
    fn test_flat_spectrum_has_zero_contrast() {
        let contrast = reference_contrast();
        let flat = Array2::from_elem((1025, 3), 0.5f32);
        let rows = contrast.compute(flat.view());
        assert_eq!(rows.dim(), (7, 3));
        assert!(rows.iter().all(|&x| x.abs() < 1e-4));
    }

    #[test]
    fn test_tonal_peak_raises_contrast() {
        let contrast = reference_contrast();
        let mut spectrum = Array2::from_elem((1025, 1), 0.01f32);
        // A strong partial near 3 kHz sits in band 4 (1600..3200 Hz)
        spectrum[[280, 0]] = 10.0;
        let rows = contrast.compute(spectrum.view());

        assert!(rows[[4, 0]] > 20.0, "band 4 contrast {}", rows[[4, 0]]);
        assert!(rows[[1, 0]].abs() < 1e-4);
    }
}
