// Types module - Data structures for extracted features

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::FeatureError;

/// Number of components in a [`VectorFeature`]
pub const VECTOR_FEATURE_LEN: usize = 18;

/// Column names of a [`VectorFeature`], in storage order
pub const VECTOR_FEATURE_NAMES: [&str; VECTOR_FEATURE_LEN] = [
    "mean",
    "std",
    "peak",
    "min",
    "median",
    "rms",
    "zcr",
    "spectral_centroid",
    "spectral_spread",
    "spectral_rolloff",
    "magnitude_mean",
    "magnitude_std",
    "magnitude_max",
    "frame_energy_mean",
    "frame_energy_std",
    "frame_energy_max",
    "spectral_flatness",
    "crest_factor",
];

/// Stacked, row-standardized time-frequency map of one clip
///
/// Rows, top to bottom: mel energy (dB), MFCC, ΔMFCC, spectral contrast.
/// Columns are STFT frames. Every row has zero mean and unit variance
/// (constant rows are all zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorFeature {
    data: Array2<f32>,
}

impl TensorFeature {
    /// Wrap an already standardized matrix
    pub fn from_array(data: Array2<f32>) -> Self {
        Self { data }
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn as_array(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn into_array(self) -> Array2<f32> {
        self.data
    }
}

/// Fixed-order statistical summary of one clip
///
/// Column semantics are listed in [`VECTOR_FEATURE_NAMES`]. All components
/// are finite; construction and deserialization both enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f32; VECTOR_FEATURE_LEN]", into = "[f32; VECTOR_FEATURE_LEN]")]
pub struct VectorFeature {
    values: [f32; VECTOR_FEATURE_LEN],
}

impl VectorFeature {
    /// Wrap raw components
    ///
    /// # Returns
    /// `NonFiniteFeature` naming the first NaN or infinite column
    pub fn new(values: [f32; VECTOR_FEATURE_LEN]) -> Result<Self, FeatureError> {
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(FeatureError::NonFiniteFeature {
                feature: VECTOR_FEATURE_NAMES[i].to_string(),
            });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32; VECTOR_FEATURE_LEN] {
        &self.values
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Look up a component by its column name
    pub fn get(&self, name: &str) -> Option<f32> {
        VECTOR_FEATURE_NAMES
            .iter()
            .position(|&n| n == name)
            .map(|i| self.values[i])
    }
}

impl TryFrom<[f32; VECTOR_FEATURE_LEN]> for VectorFeature {
    type Error = FeatureError;

    fn try_from(values: [f32; VECTOR_FEATURE_LEN]) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<VectorFeature> for [f32; VECTOR_FEATURE_LEN] {
    fn from(feature: VectorFeature) -> Self {
        feature.values
    }
}
