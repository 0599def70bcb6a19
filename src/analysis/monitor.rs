// Monitor - blocking capture → classify loop
//
// The loop pulls clips from a ClipSource, rejects dead captures, counts
// consecutive silent chunks and hands every detection to a callback. A
// shared stop flag is checked between iterations, so stopping never
// interrupts a classification in progress.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::conditioner::{mean_square, peak_abs};
use super::{AudioClip, Detection, ScreamDetector};
use crate::config::DecisionConfig;
use crate::dataset::load_audio;
use crate::error::{DetectionError, FeatureError};

/// Producer of clips for monitoring
pub trait ClipSource {
    /// Next clip, `None` once the source is exhausted
    fn next_clip(&mut self) -> Option<Result<AudioClip, FeatureError>>;
}

/// Replays audio files as if they were consecutive captures
pub struct FileClipSource {
    paths: VecDeque<PathBuf>,
}

impl FileClipSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths: paths.into(),
        }
    }
}

impl ClipSource for FileClipSource {
    fn next_clip(&mut self) -> Option<Result<AudioClip, FeatureError>> {
        self.paths.pop_front().map(load_audio)
    }
}

/// In-memory clips, used for tests and synthetic runs
impl ClipSource for VecDeque<AudioClip> {
    fn next_clip(&mut self) -> Option<Result<AudioClip, FeatureError>> {
        self.pop_front().map(Ok)
    }
}

/// Reject captures from a dead or muted input before classification
///
/// # Returns
/// `InsufficientEnergy` when the mean square is below
/// `capture_min_energy`, `InvalidClip` when the peak is below
/// `capture_min_peak`
pub fn check_capture(clip: &AudioClip, decision: &DecisionConfig) -> Result<(), FeatureError> {
    let energy = mean_square(&clip.samples);
    if energy < decision.capture_min_energy {
        return Err(FeatureError::InsufficientEnergy {
            energy,
            threshold: decision.capture_min_energy,
        });
    }
    let peak = peak_abs(&clip.samples);
    if peak < decision.capture_min_peak {
        return Err(FeatureError::InvalidClip {
            reason: format!(
                "capture peak {:.5} below {:.5}",
                peak, decision.capture_min_peak
            ),
        });
    }
    Ok(())
}

/// Classifier consulted by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    Convolutional,
    Reference,
}

/// Counters of a finished monitoring run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    pub clips: usize,
    pub screams: usize,
    pub non_screams: usize,
    /// Silent or dead captures
    pub silent: usize,
    /// Silence notices logged: the first of a run, then every `silence_report_every`-th
    pub silence_reports: usize,
    /// Unreadable clips and classification failures
    pub failures: usize,
    /// True when the stop flag ended the run
    pub stopped: bool,
}

pub struct Monitor<'a> {
    detector: &'a ScreamDetector,
    mode: MonitorMode,
    stop: Arc<AtomicBool>,
}

impl<'a> Monitor<'a> {
    pub fn new(detector: &'a ScreamDetector, mode: MonitorMode) -> Self {
        Self {
            detector,
            mode,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that ends the loop at the next iteration
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run until the source is exhausted or the stop flag is set
    ///
    /// # Arguments
    /// * `source` - Clip producer
    /// * `on_detection` - Called for every classified clip
    pub fn run<S: ClipSource>(
        &self,
        source: &mut S,
        mut on_detection: impl FnMut(&Detection),
    ) -> MonitorSummary {
        let decision = &self.detector.config().decision;
        let report_every = decision.silence_report_every.max(1) as usize;
        let mut summary = MonitorSummary::default();
        let mut consecutive_silent = 0usize;

        tracing::info!("[Monitor] Started ({:?})", self.mode);

        loop {
            if self.stop.load(Ordering::Acquire) {
                summary.stopped = true;
                break;
            }
            let clip = match source.next_clip() {
                None => break,
                Some(Ok(clip)) => clip,
                Some(Err(err)) => {
                    tracing::warn!("[Monitor] Capture failed: {}", err);
                    summary.failures += 1;
                    continue;
                }
            };
            summary.clips += 1;

            let result = match check_capture(&clip, decision) {
                Ok(()) => match self.mode {
                    MonitorMode::Convolutional => {
                        self.detector.detect(&clip.samples, clip.sample_rate)
                    }
                    MonitorMode::Reference => self
                        .detector
                        .detect_with_reference(&clip.samples, clip.sample_rate),
                },
                Err(err) => {
                    tracing::debug!("[Monitor] Dead capture: {}", err);
                    Err(DetectionError::Feature(FeatureError::InsufficientEnergy {
                        energy: mean_square(&clip.samples),
                        threshold: decision.capture_min_energy,
                    }))
                }
            };

            match result {
                Ok(detection) => {
                    consecutive_silent = 0;
                    if detection.is_scream() {
                        summary.screams += 1;
                        tracing::info!(
                            "[Monitor] Scream detected ({:.1}% confidence)",
                            detection.confidence
                        );
                    } else {
                        summary.non_screams += 1;
                    }
                    on_detection(&detection);
                }
                Err(err) if err.is_silence() => {
                    summary.silent += 1;
                    consecutive_silent += 1;
                    if (consecutive_silent - 1) % report_every == 0 {
                        summary.silence_reports += 1;
                        tracing::info!(
                            "[Monitor] {} consecutive silent captures",
                            consecutive_silent
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!("[Monitor] Classification failed: {}", err);
                    summary.failures += 1;
                }
            }
        }

        tracing::info!(
            "[Monitor] Finished: {} clips, {} screams, {} silent, {} failures",
            summary.clips,
            summary.screams,
            summary.silent,
            summary.failures
        );
        summary
    }
}
