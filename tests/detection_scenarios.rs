//! End-to-end detection scenarios
//!
//! These tests drive the public API the way the command-line front-end does:
//! - Scenario A: a silent reference-length clip is rejected by both extractors
//! - Scenario B: a model trained on separable synthetic classes flags a
//!   scream-like burst it has never seen
//! - Scenario C: known confusion counts yield the documented metrics and advice
//!
//! Synthetic clips come from `scream_detector::testing` so every run sees the
//! same audio.

use std::sync::Arc;

use scream_detector::calibration::{
    recommend_threshold, sweep_thresholds, FalsePositiveBand, DEFAULT_SWEEP_THRESHOLDS,
};
use scream_detector::config::FeatureConfig;
use scream_detector::testing::{
    calm_clip, compact_detector_config, labeled_clips, scream_like_clip,
};
use scream_detector::{
    ClipLabel, ConfusionStats, ConvTrainer, FeatureError, ScreamDetector, TensorFeature,
    TensorFeatureExtractor, VectorFeatureExtractor,
};

/// Scenario A: 3 s of zeros at 22050 Hz never reaches a classifier
#[test]
fn test_silent_clip_is_rejected() {
    let config = FeatureConfig::default();
    let zeros = vec![0.0f32; 66150];

    let tensor = TensorFeatureExtractor::new(&config)
        .unwrap()
        .extract_samples(&zeros, 22050);
    let vector = VectorFeatureExtractor::new(&config)
        .unwrap()
        .extract_samples(&zeros, 22050);

    assert!(matches!(tensor, Err(FeatureError::InsufficientEnergy { .. })));
    assert!(matches!(vector, Err(FeatureError::InsufficientEnergy { .. })));
}

/// Scenario B: train on bursts vs. stationary tones, then classify a new burst
#[test]
fn test_trained_model_flags_unseen_scream_like_burst() {
    let mut config = compact_detector_config();
    config.training.epochs = 30;
    let features_config = config.features.clone();

    let extractor = TensorFeatureExtractor::new(&features_config).unwrap();
    let (clips, labels) = labeled_clips(&features_config, 12, 1234);
    let features: Vec<TensorFeature> = clips
        .iter()
        .map(|clip| extractor.extract_samples(clip, features_config.sample_rate).unwrap())
        .collect();

    let outcome = ConvTrainer::new(&config)
        .unwrap()
        .train(&features, &labels, 0.2)
        .unwrap();
    for m in &outcome.history.epochs {
        println!(
            "epoch {:>2}: loss={:.4} val_loss={:.4} val_precision={:.3}",
            m.epoch, m.loss, m.val_loss, m.val_precision
        );
    }

    let detector = ScreamDetector::new(config)
        .unwrap()
        .with_model(Arc::new(outcome.final_model))
        .unwrap();

    let burst = scream_like_clip(&features_config, 987_654);
    let detection = detector.detect(&burst, features_config.sample_rate).unwrap();
    let p = detection.probability().unwrap();
    println!("unseen burst: p={:.3} label={:?}", p, detection.label);
    assert!(p > 0.5, "scream-like burst scored {}", p);

    let tone = calm_clip(&features_config, 987_655);
    let calm = detector.detect(&tone, features_config.sample_rate).unwrap();
    println!("unseen tone: p={:.3}", calm.probability().unwrap());
    assert!(calm.probability().unwrap() < p);
}

/// Scenario C: TP=8, FP=2, FN=1, TN=9 in the 0.5 row of a threshold sweep
#[test]
fn test_known_confusion_counts_and_advice() {
    use ClipLabel::{NonScream, Scream};

    let mut probabilities = vec![0.9f32; 8];
    let mut labels = vec![Scream; 8];
    // False positives sit between 0.5 and 0.7
    probabilities.extend([0.65; 2]);
    labels.extend([NonScream; 2]);
    probabilities.push(0.4);
    labels.push(Scream);
    probabilities.extend([0.1; 9]);
    labels.extend([NonScream; 9]);

    let sweep = sweep_thresholds(&probabilities, &labels, &DEFAULT_SWEEP_THRESHOLDS).unwrap();
    assert_eq!(sweep.len(), DEFAULT_SWEEP_THRESHOLDS.len());
    let row = sweep.iter().find(|row| row.threshold == 0.5).unwrap();

    assert_eq!(
        row.confusion,
        ConfusionStats {
            true_positives: 8,
            true_negatives: 9,
            false_positives: 2,
            false_negatives: 1,
        }
    );
    assert!((row.accuracy - 0.85).abs() < 1e-6);
    assert!((row.precision - 0.80).abs() < 1e-6);
    assert!((row.recall - 0.889).abs() < 1e-3);
    assert!((row.false_positive_rate - 0.182).abs() < 1e-3);

    let advice = recommend_threshold(row.false_positive_rate);
    assert_eq!(advice.band, FalsePositiveBand::High);
    assert_eq!((advice.min_threshold, advice.max_threshold), (0.7, 0.8));

    // Raising the threshold into the advised range removes the false positives
    let advised = sweep.iter().find(|row| row.threshold == 0.7).unwrap();
    assert_eq!(advised.confusion.false_positives, 0);
    assert_eq!(advised.confusion.true_positives, 8);
}
