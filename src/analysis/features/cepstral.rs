// Cepstral module - MFCC and delta coefficients
//
// MFCCs are the orthonormal DCT-II of a log-mel spectrogram, keeping the
// lowest coefficients (coarse spectral envelope). Deltas are the first-order
// Savitzky-Golay derivative along time.

use ndarray::{Array2, ArrayView2, Axis};

/// Orthonormal DCT-II basis, shape (n_coeffs, n_inputs)
pub fn dct_basis(n_coeffs: usize, n_inputs: usize) -> Array2<f32> {
    let n = n_inputs as f32;
    let mut basis = Array2::<f32>::zeros((n_coeffs, n_inputs));
    for k in 0..n_coeffs {
        let scale = if k == 0 {
            (1.0 / n).sqrt()
        } else {
            (2.0 / n).sqrt()
        };
        for i in 0..n_inputs {
            let angle = std::f32::consts::PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n);
            basis[[k, i]] = scale * angle.cos();
        }
    }
    basis
}

/// Apply a DCT basis to a log-mel spectrogram (mels × frames)
pub fn mfcc_from_log_mel(basis: &Array2<f32>, log_mel: ArrayView2<f32>) -> Array2<f32> {
    basis.dot(&log_mel)
}

/// First-order time derivative of every row
///
/// Interior frames use a least-squares slope over `width` frames centered on
/// the frame. The first and last `width/2` frames take the slope of the first
/// and last full window. When there are fewer frames than `width`, the
/// largest odd window that fits is used; fewer than 3 frames give zeros.
pub fn delta(data: ArrayView2<f32>, width: usize) -> Array2<f32> {
    let n_frames = data.ncols();
    let mut out = Array2::<f32>::zeros(data.raw_dim());
    if n_frames < 3 {
        return out;
    }

    let mut width = width.min(n_frames);
    if width % 2 == 0 {
        width -= 1;
    }
    let half = width / 2;
    // Σ k² for k in -half..=half
    let denom = (half * (half + 1) * (2 * half + 1)) as f32 / 3.0;

    for (row_in, mut row_out) in data.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        let slope_at = |center: usize| -> f32 {
            (1..=half)
                .map(|k| k as f32 * (row_in[center + k] - row_in[center - k]))
                .sum::<f32>()
                / denom
        };

        for t in half..n_frames - half {
            row_out[t] = slope_at(t);
        }
        let head = slope_at(half);
        let tail = slope_at(n_frames - 1 - half);
        for t in 0..half {
            row_out[t] = head;
            row_out[n_frames - 1 - t] = tail;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn test_dct_basis_is_orthonormal() {
        let basis = dct_basis(16, 16);
        let gram = basis.dot(&basis.t());
        for i in 0..16 {
            for j in 0..16 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (gram[[i, j]] - expected).abs() < 1e-4,
                    "gram[{}, {}] = {}",
                    i,
                    j,
                    gram[[i, j]]
                );
            }
        }
    }

    #[test]
    fn test_dct_of_constant_is_dc_only() {
        let basis = dct_basis(4, 8);
        let column = Array2::from_elem((8, 1), 2.0f32);
        let coeffs = mfcc_from_log_mel(&basis, column.view());
        assert!((coeffs[[0, 0]] - 2.0 * 8f32.sqrt()).abs() < 1e-4);
        for k in 1..4 {
            assert!(coeffs[[k, 0]].abs() < 1e-4);
        }
    }

    #[test]
    fn test_delta_of_linear_ramp_is_constant_slope() {
        let ramp = Array1::from_iter((0..20).map(|t| 3.0 * t as f32));
        let data = ramp.insert_axis(Axis(0));
        let d = delta(data.view(), 9);
        for &value in d.iter() {
            assert!((value - 3.0).abs() < 1e-4, "slope {}", value);
        }
    }

    #[test]
    fn test_delta_edges_take_boundary_window_slope() {
        // Quadratic: interior slope varies, edges copy the nearest full window
        let data = Array1::from_iter((0..12).map(|t| (t * t) as f32)).insert_axis(Axis(0));
        let d = delta(data.view(), 5);
        assert_eq!(d[[0, 0]], d[[0, 2]]);
        assert_eq!(d[[0, 1]], d[[0, 2]]);
        assert_eq!(d[[0, 11]], d[[0, 9]]);
        // Central difference of t² is exactly 2t
        assert!((d[[0, 5]] - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_delta_short_inputs() {
        let two = Array2::from_shape_vec((1, 2), vec![1.0f32, 5.0]).unwrap();
        assert!(delta(two.view(), 9).iter().all(|&x| x == 0.0));

        let four = Array2::from_shape_vec((1, 4), vec![0.0f32, 1.0, 2.0, 3.0]).unwrap();
        let d = delta(four.view(), 9);
        assert!(d.iter().all(|&x| (x - 1.0).abs() < 1e-5));
    }
}
