// Dataset module - labeled clip discovery, WAV decoding and splits
//
// A dataset is any directory tree that contains sibling `positive` and
// `negative` folders (matched case-insensitively). Positive clips are
// screams. Files that fail to decode or extract are logged and skipped.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::features::{
    TensorFeature, TensorFeatureExtractor, VectorFeature, VectorFeatureExtractor,
};
use crate::analysis::{AudioClip, ClipLabel};
use crate::error::{log_feature_error, FeatureError, ModelError};

/// File extensions considered audio
pub const AUDIO_EXTENSIONS: [&str; 5] = ["wav", "mp3", "flac", "ogg", "m4a"];

/// Positive:negative ratios outside this range trigger an imbalance warning
const BALANCED_RATIO: (f32, f32) = (0.5, 2.0);

/// One labeled audio file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSample {
    pub path: PathBuf,
    pub label: ClipLabel,
}

/// Features extracted from a dataset, parallel to `labels`
#[derive(Debug, Clone)]
pub struct LabeledSet<T> {
    pub features: Vec<T>,
    pub labels: Vec<ClipLabel>,
    /// Files skipped because decoding or extraction failed
    pub skipped: usize,
}

impl<T> LabeledSet<T> {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn class_counts(&self) -> (usize, usize) {
        class_counts(&self.labels)
    }
}

/// Index sets of a stratified split
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

/// (screams, non-screams)
pub fn class_counts(labels: &[ClipLabel]) -> (usize, usize) {
    let screams = labels.iter().filter(|l| l.is_scream()).count();
    (screams, labels.len() - screams)
}

fn has_audio_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            AUDIO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(read) => read.filter_map(|entry| entry.ok().map(|e| e.path())).collect(),
        Err(err) => {
            log::warn!("[Dataset] Cannot read {:?}: {}", dir, err);
            Vec::new()
        }
    };
    entries.sort();
    entries
}

fn child_named(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    dirs.iter()
        .find(|d| {
            d.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
        .cloned()
}

/// Locate the `positive` / `negative` folder pair under `root`
///
/// Breadth-first, so the shallowest pair wins; siblings are visited in
/// name order.
///
/// # Returns
/// `(positive_dir, negative_dir)`, or `None` when no directory holds both
pub fn find_class_dirs<P: AsRef<Path>>(root: P) -> Option<(PathBuf, PathBuf)> {
    let mut queue = VecDeque::from([root.as_ref().to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        let subdirs: Vec<PathBuf> = sorted_entries(&dir)
            .into_iter()
            .filter(|p| p.is_dir())
            .collect();
        if let (Some(pos), Some(neg)) = (
            child_named(&subdirs, "positive"),
            child_named(&subdirs, "negative"),
        ) {
            log::info!("[Dataset] Found class folders {:?} and {:?}", pos, neg);
            return Some((pos, neg));
        }
        queue.extend(subdirs);
    }
    None
}

/// Audio files directly inside `dir`, in name order
pub fn list_audio_files<P: AsRef<Path>>(dir: P) -> Vec<PathBuf> {
    sorted_entries(dir.as_ref())
        .into_iter()
        .filter(|p| p.is_file() && has_audio_extension(p))
        .collect()
}

/// Enumerate every labeled audio file of a dataset
///
/// # Returns
/// Positive samples first, then negatives; `EmptyDataset` when the class
/// folders are missing or hold no audio files
pub fn discover<P: AsRef<Path>>(root: P) -> Result<Vec<DatasetSample>, ModelError> {
    let (positive, negative) = find_class_dirs(&root).ok_or_else(|| {
        log::error!(
            "[Dataset] No positive/negative folders under {:?}",
            root.as_ref()
        );
        ModelError::EmptyDataset
    })?;

    let mut samples: Vec<DatasetSample> = list_audio_files(&positive)
        .into_iter()
        .map(|path| DatasetSample {
            path,
            label: ClipLabel::Scream,
        })
        .collect();
    samples.extend(list_audio_files(&negative).into_iter().map(|path| DatasetSample {
        path,
        label: ClipLabel::NonScream,
    }));

    if samples.is_empty() {
        return Err(ModelError::EmptyDataset);
    }
    let labels: Vec<ClipLabel> = samples.iter().map(|s| s.label).collect();
    let (screams, others) = class_counts(&labels);
    log::info!(
        "[Dataset] {} audio files ({} positive, {} negative)",
        samples.len(),
        screams,
        others
    );
    Ok(samples)
}

/// Decode an audio file into mono samples
///
/// Only WAV is decoded (integer PCM of 8-32 bits or 32-bit float);
/// multi-channel audio is averaged down to mono.
pub fn load_audio<P: AsRef<Path>>(path: P) -> Result<AudioClip, FeatureError> {
    let path = path.as_ref();
    let unreadable = |reason: String| FeatureError::UnreadableAudio {
        path: path.display().to_string(),
        reason,
    };

    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);
    if !is_wav {
        return Err(unreadable("only WAV files can be decoded".to_string()));
    }

    let mut reader = hound::WavReader::open(path).map_err(|err| unreadable(err.to_string()))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(unreadable("zero channels".to_string()));
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|err| unreadable(err.to_string()))?,
        hound::SampleFormat::Int => {
            if !(8..=32).contains(&spec.bits_per_sample) {
                return Err(unreadable(format!(
                    "unsupported bits_per_sample={}",
                    spec.bits_per_sample
                )));
            }
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|v| v as f32 / scale))
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|err| unreadable(err.to_string()))?
        }
    };

    let channels = spec.channels as usize;
    let samples = if channels == 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(AudioClip {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Write mono 16-bit PCM, used for fixtures and exported captures
pub fn write_wav<P: AsRef<Path>>(path: P, clip: &AudioClip) -> Result<(), FeatureError> {
    let path = path.as_ref();
    let unwritable = |err: hound::Error| FeatureError::UnreadableAudio {
        path: path.display().to_string(),
        reason: err.to_string(),
    };
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(unwritable)?;
    for &sample in &clip.samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        writer.write_sample(value).map_err(unwritable)?;
    }
    writer.finalize().map_err(unwritable)
}

fn build_set<T>(
    samples: &[DatasetSample],
    mut extract: impl FnMut(&AudioClip) -> Result<T, FeatureError>,
) -> Result<LabeledSet<T>, ModelError> {
    let mut set = LabeledSet {
        features: Vec::with_capacity(samples.len()),
        labels: Vec::with_capacity(samples.len()),
        skipped: 0,
    };

    for (index, sample) in samples.iter().enumerate() {
        match load_audio(&sample.path).and_then(|clip| extract(&clip)) {
            Ok(feature) => {
                set.features.push(feature);
                set.labels.push(sample.label);
            }
            Err(err) => {
                log_feature_error(&err, "Dataset");
                log::warn!("[Dataset] Skipping {:?}", sample.path);
                set.skipped += 1;
            }
        }
        if (index + 1) % 50 == 0 {
            log::debug!("[Dataset] Processed {}/{} files", index + 1, samples.len());
        }
    }

    if set.is_empty() {
        return Err(ModelError::EmptyDataset);
    }
    warn_on_imbalance(&set.labels);
    log::info!(
        "[Dataset] Built {} samples ({} skipped)",
        set.len(),
        set.skipped
    );
    Ok(set)
}

/// Decode and extract tensor features for every sample
pub fn build_tensor_set(
    samples: &[DatasetSample],
    extractor: &TensorFeatureExtractor,
) -> Result<LabeledSet<TensorFeature>, ModelError> {
    build_set(samples, |clip| {
        extractor.extract_samples(&clip.samples, clip.sample_rate)
    })
}

/// Decode and extract vector features for every sample
pub fn build_vector_set(
    samples: &[DatasetSample],
    extractor: &VectorFeatureExtractor,
) -> Result<LabeledSet<VectorFeature>, ModelError> {
    build_set(samples, |clip| {
        extractor.extract_samples(&clip.samples, clip.sample_rate)
    })
}

/// Log a warning when the positive:negative ratio is outside [0.5, 2.0]
///
/// # Returns
/// True when the classes are imbalanced
pub fn warn_on_imbalance(labels: &[ClipLabel]) -> bool {
    let (screams, others) = class_counts(labels);
    if screams == 0 || others == 0 {
        log::warn!(
            "[Dataset] Only one class present ({} positive, {} negative)",
            screams,
            others
        );
        return true;
    }
    let ratio = screams as f32 / others as f32;
    if ratio < BALANCED_RATIO.0 || ratio > BALANCED_RATIO.1 {
        log::warn!(
            "[Dataset] Class imbalance: {:.2}:1 (positive:negative)",
            ratio
        );
        return true;
    }
    false
}

/// Seeded split that keeps each class's proportion in every part
///
/// Each class is shuffled independently; `round(count × fraction)` of it
/// goes to validation and test, but at least one sample of every class
/// stays in training. Index lists are returned in ascending order.
pub fn stratified_split(
    labels: &[ClipLabel],
    validation_fraction: f32,
    test_fraction: f32,
    seed: u64,
) -> SplitIndices {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = SplitIndices::default();

    for class in [ClipLabel::Scream, ClipLabel::NonScream] {
        let mut members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        if members.is_empty() {
            continue;
        }
        members.shuffle(&mut rng);

        let count = members.len();
        let mut n_test = (count as f32 * test_fraction).round() as usize;
        let mut n_val = (count as f32 * validation_fraction).round() as usize;
        while n_test + n_val >= count && n_test + n_val > 0 {
            if n_test >= n_val && n_test > 0 {
                n_test -= 1;
            } else {
                n_val -= 1;
            }
        }

        split.test.extend_from_slice(&members[..n_test]);
        split.validation.extend_from_slice(&members[n_test..n_test + n_val]);
        split.train.extend_from_slice(&members[n_test + n_val..]);
    }

    split.train.sort_unstable();
    split.validation.sort_unstable();
    split.test.sort_unstable();
    split
}

#[cfg(test)]
#[path = "dataset_tests.rs"]
mod tests;
