// Tensor module - dense NCHW activations for the network
//
// Dense activations use the same layout with h = w = 1.

use crate::analysis::features::TensorFeature;

/// Batch of activations in NCHW order
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tensor {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn zeros(n: usize, c: usize, h: usize, w: usize) -> Self {
        Self {
            n,
            c,
            h,
            w,
            data: vec![0.0; n * c * h * w],
        }
    }

    pub fn from_vec(n: usize, c: usize, h: usize, w: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), n * c * h * w);
        Self { n, c, h, w, data }
    }

    /// Stack features into a single-channel batch
    pub fn from_features(features: &[&TensorFeature]) -> Self {
        let (h, w) = features.first().map(|f| f.shape()).unwrap_or((0, 0));
        let mut data = Vec::with_capacity(features.len() * h * w);
        for feature in features {
            data.extend(feature.as_array().iter().copied());
        }
        Self::from_vec(features.len(), 1, h, w, data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Elements per sample
    pub fn sample_len(&self) -> usize {
        self.c * self.h * self.w
    }

    pub fn plane_len(&self) -> usize {
        self.h * self.w
    }

    /// Offset of plane (n, c)
    pub fn plane_offset(&self, n: usize, c: usize) -> usize {
        (n * self.c + c) * self.plane_len()
    }

    pub fn same_shape(&self) -> Self {
        Self::zeros(self.n, self.c, self.h, self.w)
    }
}
