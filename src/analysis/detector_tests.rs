use super::*;
use crate::analysis::features::VectorFeature;
use crate::error::{FeatureError, ModelError};
use crate::testing::{
    calm_clip, compact_detector_config, compact_network_config, labeled_clips, scream_like_clip,
    silence,
};

fn detector() -> ScreamDetector {
    ScreamDetector::new(compact_detector_config()).unwrap()
}

fn untrained_model() -> Arc<TrainedConvModel> {
    let config = compact_detector_config();
    Arc::new(TrainedConvModel::initialized(config.features, compact_network_config(), 3).unwrap())
}

fn reference_set(k: usize) -> Arc<ReferenceSet> {
    let config = compact_detector_config();
    let extractor = VectorFeatureExtractor::new(&config.features).unwrap();
    let (clips, labels) = labeled_clips(&config.features, 6, 50);
    let vectors: Vec<VectorFeature> = clips
        .iter()
        .map(|c| extractor.extract_samples(c, config.features.sample_rate).unwrap())
        .collect();
    Arc::new(ReferenceSet::build(&vectors, &labels, k).unwrap())
}

#[test]
fn test_clip_label_helpers() {
    assert!(ClipLabel::Scream.is_scream());
    assert_eq!(ClipLabel::from_scream(false), ClipLabel::NonScream);
    assert_eq!(ClipLabel::NonScream.as_str(), "non-scream");
    assert_eq!(AudioClip::new(vec![0.0; 4410], 22050).duration_secs(), 0.2);
}

#[test]
fn test_detect_without_model_is_an_error() {
    let detector = detector();
    let sr = detector.config().features.sample_rate;
    let clip = scream_like_clip(&detector.config().features, 1);
    assert!(matches!(
        detector.detect(&clip, sr),
        Err(DetectionError::Model(ModelError::ModelNotFound { .. }))
    ));
    assert!(detector.detect_with_reference(&clip, sr).is_err());
}

#[test]
fn test_silence_is_an_error_not_a_label() {
    let detector = detector().with_model(untrained_model()).unwrap();
    let config = detector.config().features.clone();
    let err = detector
        .detect(&silence(config.target_len()), config.sample_rate)
        .unwrap_err();
    assert!(err.is_silence());
    assert!(matches!(
        err,
        DetectionError::Feature(FeatureError::InsufficientEnergy { .. })
    ));
}

#[test]
fn test_model_with_other_feature_config_is_rejected() {
    let mut config = compact_detector_config();
    config.features.n_mels = 24;
    let model = Arc::new(TrainedConvModel::initialized(config.features, compact_network_config(), 3).unwrap());
    assert!(matches!(
        detector().with_model(model),
        Err(DetectionError::Model(ModelError::InvalidConfig { .. }))
    ));
}

#[test]
fn test_confidence_follows_the_decision() {
    let base = detector().with_model(untrained_model()).unwrap();
    let config = base.config().features.clone();
    let clip = calm_clip(&config, 4);

    let always = base.with_operating_point(OperatingPoint::new(0.0).unwrap());
    let detection = always.detect(&clip, config.sample_rate).unwrap();
    let p = detection.probability().unwrap();
    assert!(detection.is_scream());
    assert!((detection.confidence - p * 100.0).abs() < 1e-4);

    let never = always.with_operating_point(OperatingPoint::new(1.0).unwrap());
    let detection = never.detect(&clip, config.sample_rate).unwrap();
    if p < 1.0 {
        assert_eq!(detection.label, ClipLabel::NonScream);
        assert!((detection.confidence - (100.0 - p * 100.0)).abs() < 1e-4);
    }
}

#[test]
fn test_reference_detection_separates_synthetic_classes() {
    let detector = detector().with_reference(reference_set(3));
    let config = detector.config().features.clone();

    let scream = detector
        .detect_with_reference(&scream_like_clip(&config, 999), config.sample_rate)
        .unwrap();
    assert_eq!(scream.label, ClipLabel::Scream);
    assert!(scream.probability().is_none());
    match scream.evidence {
        Evidence::Reference(vote) => assert_eq!(vote.k, 3),
        other => panic!("Expected reference evidence, got {:?}", other),
    }

    let calm = detector
        .detect_with_reference(&calm_clip(&config, 998), config.sample_rate)
        .unwrap();
    assert_eq!(calm.label, ClipLabel::NonScream);
}

#[test]
fn test_characteristics_describe_the_clip() {
    let detector = detector();
    let config = detector.config().features.clone();
    let bright = detector
        .characterize(&scream_like_clip(&config, 2), config.sample_rate)
        .unwrap();
    let dull = detector
        .characterize(&calm_clip(&config, 3), config.sample_rate)
        .unwrap();
    println!("bright: {:?}\ndull: {:?}", bright, dull);
    assert!(bright.zcr > dull.zcr);
    assert!(bright.spectral_centroid > dull.spectral_centroid);
}

#[test]
fn test_detector_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ScreamDetector>();
    assert_send_sync::<TrainedConvModel>();
    assert_send_sync::<ReferenceSet>();
}
