// FFT module - Short-time Fourier transform
//
// Centered framing: the signal is zero-padded by n_fft/2 on both sides, so a
// clip of `len` samples yields `1 + len / hop` frames and frame `t` is
// centered on sample `t * hop`. Every frame is weighted with a periodic Hann
// window before the transform.

use ndarray::Array2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// STFT processor producing magnitude spectrograms
///
/// The FFT plan is built once; the processor is `Send + Sync` and can be
/// shared between extraction calls.
pub struct StftProcessor {
    fft: Arc<dyn Fft<f32>>,
    n_fft: usize,
    hop_length: usize,
    /// Periodic Hann window (pre-computed)
    window: Vec<f32>,
}

impl StftProcessor {
    /// Create a new STFT processor
    ///
    /// # Arguments
    /// * `n_fft` - Window and transform size
    /// * `hop_length` - Samples between successive frames
    pub fn new(n_fft: usize, hop_length: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);

        Self {
            fft,
            n_fft,
            hop_length,
            window: hann_window(n_fft),
        }
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    /// Number of non-negative frequency bins
    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of frames produced for a signal of `len` samples
    pub fn n_frames(&self, len: usize) -> usize {
        1 + len / self.hop_length
    }

    /// Compute the magnitude spectrogram
    ///
    /// # Arguments
    /// * `audio` - Time-domain signal
    ///
    /// # Returns
    /// `|STFT|` with shape (n_fft/2 + 1 bins, frames)
    pub fn magnitude(&self, audio: &[f32]) -> Array2<f32> {
        let n_frames = self.n_frames(audio.len());
        let n_bins = self.n_bins();
        let pad = self.n_fft / 2;

        let mut padded = vec![0.0f32; audio.len() + 2 * pad];
        padded[pad..pad + audio.len()].copy_from_slice(audio);

        let mut spectrogram = Array2::<f32>::zeros((n_bins, n_frames));
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];

        for t in 0..n_frames {
            let start = t * self.hop_length;
            for (i, slot) in buffer.iter_mut().enumerate() {
                let sample = padded.get(start + i).copied().unwrap_or(0.0);
                *slot = Complex::new(sample * self.window[i], 0.0);
            }

            self.fft.process_with_scratch(&mut buffer, &mut scratch);

            for (bin, value) in buffer[..n_bins].iter().enumerate() {
                spectrogram[[bin, t]] = value.norm();
            }
        }

        spectrogram
    }

    /// Center frequency of every bin in Hz
    pub fn bin_frequencies(&self, sample_rate: u32) -> Vec<f32> {
        fft_frequencies(sample_rate, self.n_fft)
    }
}

/// Periodic Hann window of length `n`
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 * (1.0 - ((2.0 * std::f32::consts::PI * i as f32) / n as f32).cos()))
        .collect()
}

/// Frequencies of the `n_fft/2 + 1` non-negative FFT bins
pub fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f32> {
    let bin_width = sample_rate as f32 / n_fft as f32;
    (0..=n_fft / 2).map(|i| i as f32 * bin_width).collect()
}

/// Magnitude spectrum of a whole signal (unwindowed real FFT)
///
/// # Returns
/// `len/2 + 1` magnitudes for a signal of `len` samples
pub fn whole_signal_magnitude(audio: &[f32]) -> Vec<f32> {
    if audio.is_empty() {
        return Vec::new();
    }
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(audio.len());

    let mut buffer: Vec<Complex<f32>> = audio.iter().map(|&x| Complex::new(x, 0.0)).collect();
    fft.process(&mut buffer);

    buffer[..audio.len() / 2 + 1]
        .iter()
        .map(|c| c.norm())
        .collect()
}
