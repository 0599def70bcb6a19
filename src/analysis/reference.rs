// Reference module - k-nearest-neighbor classifier over vector features
//
// The reference set stores standardized training vectors together with the
// per-column statistics used to standardize them. Queries are standardized
// with the same statistics, never re-fitted.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::analysis::features::{VectorFeature, VECTOR_FEATURE_LEN, VECTOR_FEATURE_NAMES};
use crate::analysis::ClipLabel;
use crate::error::{FeatureError, ModelError};

/// Outcome of a nearest-neighbor vote
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub label: ClipLabel,
    /// Share of the `k` neighbors backing `label`, in percent
    pub confidence: f32,
    pub scream_votes: usize,
    pub k: usize,
    /// Exact tie with an even `k`; `label` is NonScream in that case
    pub tied: bool,
}

/// Standardized training vectors for the instance-based classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSet {
    /// Standardized rows, shape (samples, VECTOR_FEATURE_LEN)
    matrix: Array2<f32>,
    labels: Vec<ClipLabel>,
    mean: Array1<f32>,
    /// Population std per column; zero-variance columns store 1
    std: Array1<f32>,
    k: usize,
}

impl ReferenceSet {
    /// Build a reference set
    ///
    /// # Arguments
    /// * `vectors` - Training features
    /// * `labels` - Ground truth, parallel to `vectors`
    /// * `k` - Neighbors consulted per query (1..=vectors.len())
    pub fn build(
        vectors: &[VectorFeature],
        labels: &[ClipLabel],
        k: usize,
    ) -> Result<Self, ModelError> {
        if vectors.is_empty() {
            return Err(ModelError::EmptyDataset);
        }
        if vectors.len() != labels.len() {
            return Err(ModelError::LabelMismatch {
                features: vectors.len(),
                labels: labels.len(),
            });
        }
        if k == 0 || k > vectors.len() {
            return Err(ModelError::InvalidReference {
                reason: format!("k must be in 1..={} (got {})", vectors.len(), k),
            });
        }

        let n = vectors.len();
        let mut matrix = Array2::<f32>::zeros((n, VECTOR_FEATURE_LEN));
        for (mut row, vector) in matrix.axis_iter_mut(Axis(0)).zip(vectors) {
            row.assign(&Array1::from(vector.as_slice().to_vec()));
        }

        let mean = matrix.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(VECTOR_FEATURE_LEN));
        let std = matrix
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });

        for mut row in matrix.axis_iter_mut(Axis(0)) {
            row -= &mean;
            row /= &std;
        }
        if let Some(column) = first_non_finite_column(&matrix, &mean) {
            return Err(ModelError::InvalidReference {
                reason: format!(
                    "column {} does not standardize to finite values",
                    VECTOR_FEATURE_NAMES[column]
                ),
            });
        }

        let scream_count = labels.iter().filter(|l| l.is_scream()).count();
        log::info!(
            "[Reference] Built reference set: {} samples ({} scream, {} non-scream), k={}",
            n,
            scream_count,
            n - scream_count,
            k
        );

        Ok(Self {
            matrix,
            labels: labels.to_vec(),
            mean,
            std,
            k,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn labels(&self) -> &[ClipLabel] {
        &self.labels
    }

    /// Standardize a query with the stored statistics
    pub fn standardize(&self, feature: &VectorFeature) -> Array1<f32> {
        let raw = Array1::from(feature.as_slice().to_vec());
        (raw - &self.mean) / &self.std
    }

    /// Classify a query by majority vote of its `k` nearest references
    ///
    /// Ties in distance are resolved by reference order. The query is a
    /// scream only when strictly more than half of the neighbors are.
    ///
    /// # Returns
    /// `NonFiniteFeature` when a component overflows once standardized
    pub fn classify(&self, feature: &VectorFeature) -> Result<Vote, FeatureError> {
        let query = self.standardize(feature);
        if let Some(i) = query.iter().position(|v| !v.is_finite()) {
            return Err(FeatureError::NonFiniteFeature {
                feature: VECTOR_FEATURE_NAMES[i].to_string(),
            });
        }

        let mut distances: Vec<(usize, f32)> = self
            .matrix
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(i, row)| {
                let d2: f32 = row
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                (i, d2)
            })
            .collect();
        // Stable sort keeps reference order for equal distances
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));

        let scream_votes = distances[..self.k]
            .iter()
            .filter(|(i, _)| self.labels[*i].is_scream())
            .count();

        let is_scream = scream_votes * 2 > self.k;
        let tied = scream_votes * 2 == self.k;
        let winning_votes = if is_scream {
            scream_votes
        } else {
            self.k - scream_votes
        };

        Ok(Vote {
            label: ClipLabel::from_scream(is_scream),
            confidence: winning_votes as f32 / self.k as f32 * 100.0,
            scream_votes,
            k: self.k,
            tied,
        })
    }

    /// Save as JSON (matrix, labels, mean/std and `k`)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        let json = serde_json::to_string(self).map_err(|err| ModelError::ModelSaveFailure {
            reason: err.to_string(),
        })?;
        fs::write(&path, json).map_err(|err| ModelError::ModelSaveFailure {
            reason: format!("{:?}: {}", path.as_ref(), err),
        })?;
        log::info!("[Reference] Saved reference set to {:?}", path.as_ref());
        Ok(())
    }

    /// Load a reference set saved by [`ReferenceSet::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelError::ModelNotFound {
                path: path.display().to_string(),
            });
        }
        let contents = fs::read_to_string(path).map_err(|err| ModelError::ModelLoadFailure {
            reason: format!("{:?}: {}", path, err),
        })?;
        let set: ReferenceSet =
            serde_json::from_str(&contents).map_err(|err| ModelError::ModelLoadFailure {
                reason: format!("{:?}: {}", path, err),
            })?;
        set.check_consistency()
            .map_err(|reason| ModelError::ModelLoadFailure { reason })?;

        log::info!(
            "[Reference] Loaded reference set from {:?} ({} samples, k={})",
            path,
            set.len(),
            set.k
        );
        Ok(set)
    }

    fn check_consistency(&self) -> Result<(), String> {
        let (rows, cols) = self.matrix.dim();
        if rows == 0 || rows != self.labels.len() {
            return Err(format!("{} rows but {} labels", rows, self.labels.len()));
        }
        if cols != VECTOR_FEATURE_LEN
            || self.mean.len() != VECTOR_FEATURE_LEN
            || self.std.len() != VECTOR_FEATURE_LEN
        {
            return Err(format!(
                "expected {} columns, matrix has {}",
                VECTOR_FEATURE_LEN, cols
            ));
        }
        if self.k == 0 || self.k > rows {
            return Err(format!("k={} outside 1..={}", self.k, rows));
        }
        if self.std.iter().any(|&s| !(s > 0.0)) {
            return Err("non-positive standard deviation".to_string());
        }
        if let Some(column) = first_non_finite_column(&self.matrix, &self.mean)
            .or_else(|| self.std.iter().position(|s| !s.is_finite()))
        {
            return Err(format!(
                "non-finite values in column {}",
                VECTOR_FEATURE_NAMES[column]
            ));
        }
        Ok(())
    }
}

/// First column holding a NaN or infinity in the statistics or the rows
fn first_non_finite_column(matrix: &Array2<f32>, mean: &Array1<f32>) -> Option<usize> {
    mean.iter().position(|v| !v.is_finite()).or_else(|| {
        matrix
            .axis_iter(Axis(0))
            .find_map(|row| row.iter().position(|v| !v.is_finite()))
    })
}

#[cfg(test)]
#[path = "reference_tests.rs"]
mod tests;
