use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use scream_detector::analysis::features::{TensorFeatureExtractor, VectorFeatureExtractor};
use scream_detector::calibration::{self, OperatingPoint};
use scream_detector::dataset::{self, stratified_split, LabeledSet};
use scream_detector::{
    ClipLabel, ConvTrainer, DetectorConfig, FileClipSource, Monitor, MonitorMode, ReferenceSet,
    ScreamDetector, TrainedConvModel,
};
use serde::Serialize;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "scream_cli",
    about = "Train, evaluate and run the scream detector"
)]
struct Cli {
    /// JSON configuration (defaults are used when absent or invalid)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the convolutional classifier on a positive/negative dataset
    Train(TrainArgs),
    /// Build a nearest-neighbor reference set from a dataset
    BuildReference {
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Neighbors per vote (overrides the configuration)
        #[arg(long)]
        k: Option<usize>,
    },
    /// Classify audio files with a trained model
    Classify {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        operating_point: Option<PathBuf>,
        /// Threshold override in [0, 1]
        #[arg(long)]
        threshold: Option<f32>,
        files: Vec<PathBuf>,
    },
    /// Classify audio files with a reference set
    ClassifyReference {
        #[arg(long)]
        reference: PathBuf,
        files: Vec<PathBuf>,
    },
    /// Evaluate a model on the held-out test split of a dataset
    Evaluate {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        dataset: PathBuf,
        /// Evaluate every clip instead of the test split
        #[arg(long)]
        all: bool,
        /// Comma-separated candidate thresholds
        #[arg(long, value_delimiter = ',')]
        thresholds: Vec<f32>,
        /// Write the recommended operating point here
        #[arg(long)]
        operating_point: Option<PathBuf>,
    },
    /// Replay a directory of WAV files through the monitoring loop
    Monitor {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, conflicts_with = "reference")]
        model: Option<PathBuf>,
        #[arg(long)]
        reference: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON
    DumpConfig {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[arg(long)]
    dataset: PathBuf,
    /// Destination of the precision-checkpointed model
    #[arg(long)]
    output: PathBuf,
    /// Destination of the best-validation-loss model
    #[arg(long)]
    final_output: Option<PathBuf>,
    /// Destination of the per-epoch history (JSON)
    #[arg(long)]
    history: Option<PathBuf>,
    /// Destination of the recommended operating point (JSON)
    #[arg(long)]
    operating_point: Option<PathBuf>,
    /// Epoch budget (overrides the configuration)
    #[arg(long)]
    epochs: Option<usize>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => DetectorConfig::load_from_file(path),
        None => DetectorConfig::default(),
    };

    match cli.command {
        Commands::Train(args) => run_train(config, args),
        Commands::BuildReference { dataset, output, k } => {
            run_build_reference(config, &dataset, &output, k)
        }
        Commands::Classify {
            model,
            operating_point,
            threshold,
            files,
        } => run_classify(config, &model, operating_point, threshold, &files),
        Commands::ClassifyReference { reference, files } => {
            run_classify_reference(config, &reference, &files)
        }
        Commands::Evaluate {
            model,
            dataset,
            all,
            thresholds,
            operating_point,
        } => run_evaluate(config, &model, &dataset, all, thresholds, operating_point),
        Commands::Monitor {
            dir,
            model,
            reference,
        } => run_monitor(config, &dir, model, reference),
        Commands::DumpConfig { output } => run_dump_config(&config, output),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

/// Clips at `indices` of a labeled set
fn subset<T: Clone>(set: &LabeledSet<T>, indices: &[usize]) -> (Vec<T>, Vec<ClipLabel>) {
    indices
        .iter()
        .map(|&i| (set.features[i].clone(), set.labels[i]))
        .unzip()
}

fn run_train(mut config: DetectorConfig, args: TrainArgs) -> Result<ExitCode> {
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    let trainer = ConvTrainer::new(&config)?;
    let extractor = TensorFeatureExtractor::new(&config.features)?;

    let samples = dataset::discover(&args.dataset)
        .with_context(|| format!("discovering dataset under {}", args.dataset.display()))?;
    let set = dataset::build_tensor_set(&samples, &extractor)?;

    let split = stratified_split(
        &set.labels,
        config.training.validation_fraction,
        config.training.test_fraction,
        config.training.seed,
    );
    tracing::info!(
        "[Train] Split: {} train / {} validation / {} test",
        split.train.len(),
        split.validation.len(),
        split.test.len()
    );

    let (train_x, train_y) = subset(&set, &split.train);
    let (val_x, val_y) = subset(&set, &split.validation);
    let outcome = trainer.train_with_validation(&train_x, &train_y, &val_x, &val_y)?;

    outcome.model.save(&args.output)?;
    if let Some(path) = &args.final_output {
        outcome.final_model.save(path)?;
    }
    if let Some(path) = &args.history {
        write_json(path, &outcome.history)?;
    }
    if let Some(m) = outcome.history.checkpoint_metrics() {
        tracing::info!(
            "[Train] Checkpoint epoch {}: val_precision={:.3} val_recall={:.3} val_auc={:?}",
            m.epoch,
            m.val_precision,
            m.val_recall,
            m.val_auc
        );
    }

    if split.test.is_empty() {
        tracing::warn!("[Train] Empty test split, skipping evaluation");
        return Ok(ExitCode::SUCCESS);
    }
    let (test_x, test_y) = subset(&set, &split.test);
    let report = calibration::evaluate(
        &outcome.model,
        &test_x,
        &test_y,
        &config.decision.sweep_thresholds,
    )?;
    if let Some(path) = &args.operating_point {
        OperatingPoint::from_advice(&report.advice, report.false_positive_rate).save(path)?;
    }
    print_json(&report)?;
    Ok(ExitCode::SUCCESS)
}

fn run_build_reference(
    mut config: DetectorConfig,
    dataset_dir: &Path,
    output: &Path,
    k: Option<usize>,
) -> Result<ExitCode> {
    if let Some(k) = k {
        config.reference.k = k;
    }
    let extractor = VectorFeatureExtractor::new(&config.features)?;
    let samples = dataset::discover(dataset_dir)
        .with_context(|| format!("discovering dataset under {}", dataset_dir.display()))?;
    let set = dataset::build_vector_set(&samples, &extractor)?;
    let reference = ReferenceSet::build(&set.features, &set.labels, config.reference.k)?;
    reference.save(output)?;
    println!(
        "Reference set with {} samples (k={}) written to {}",
        reference.len(),
        reference.k(),
        output.display()
    );
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct FileResult<'a, T: Serialize> {
    file: &'a Path,
    #[serde(flatten)]
    outcome: Outcome<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Outcome<T: Serialize> {
    Detection(T),
    Error { code: i32, message: String },
}

fn classify_files(
    files: &[PathBuf],
    classify: impl Fn(&[f32], u32) -> Result<scream_detector::Detection, scream_detector::DetectionError>,
) -> Result<ExitCode> {
    use scream_detector::error::ErrorCode;

    if files.is_empty() {
        bail!("no input files given");
    }
    let mut failures = 0;
    for file in files {
        let outcome = match dataset::load_audio(file) {
            Ok(clip) => match classify(&clip.samples, clip.sample_rate) {
                Ok(detection) => Outcome::Detection(detection),
                Err(err) => Outcome::Error {
                    code: err.code(),
                    message: err.message(),
                },
            },
            Err(err) => Outcome::Error {
                code: err.code(),
                message: err.message(),
            },
        };
        if matches!(outcome, Outcome::Error { .. }) {
            failures += 1;
        }
        println!(
            "{}",
            serde_json::to_string(&FileResult {
                file,
                outcome
            })?
        );
    }
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

/// Detector configured with the feature settings the model was trained on
fn model_detector(config: DetectorConfig, model_path: &Path) -> Result<ScreamDetector> {
    let model = TrainedConvModel::load(model_path)?;
    let config = DetectorConfig {
        features: model.feature_config().clone(),
        ..config
    };
    Ok(ScreamDetector::new(config)?.with_model(Arc::new(model))?)
}

fn run_classify(
    config: DetectorConfig,
    model_path: &Path,
    operating_point: Option<PathBuf>,
    threshold: Option<f32>,
    files: &[PathBuf],
) -> Result<ExitCode> {
    let mut detector = model_detector(config, model_path)?;
    if let Some(path) = operating_point {
        detector = detector.with_operating_point(OperatingPoint::load(&path)?);
    }
    if let Some(threshold) = threshold {
        detector = detector.with_operating_point(OperatingPoint::new(threshold)?);
    }
    classify_files(files, |samples, rate| detector.detect(samples, rate))
}

fn run_classify_reference(
    config: DetectorConfig,
    reference_path: &Path,
    files: &[PathBuf],
) -> Result<ExitCode> {
    let reference = ReferenceSet::load(reference_path)?;
    let detector = ScreamDetector::new(config)?.with_reference(Arc::new(reference));
    classify_files(files, |samples, rate| {
        detector.detect_with_reference(samples, rate)
    })
}

fn run_evaluate(
    config: DetectorConfig,
    model_path: &Path,
    dataset_dir: &Path,
    all: bool,
    thresholds: Vec<f32>,
    operating_point: Option<PathBuf>,
) -> Result<ExitCode> {
    let model = TrainedConvModel::load(model_path)?;
    let extractor = TensorFeatureExtractor::new(model.feature_config())?;
    let samples = dataset::discover(dataset_dir)
        .with_context(|| format!("discovering dataset under {}", dataset_dir.display()))?;
    let set = dataset::build_tensor_set(&samples, &extractor)?;

    let (features, labels) = if all {
        (set.features.clone(), set.labels.clone())
    } else {
        let split = stratified_split(
            &set.labels,
            config.training.validation_fraction,
            config.training.test_fraction,
            config.training.seed,
        );
        subset(&set, &split.test)
    };
    let thresholds = if thresholds.is_empty() {
        config.decision.sweep_thresholds.clone()
    } else {
        thresholds
    };

    let report = calibration::evaluate(&model, &features, &labels, &thresholds)?;
    if let Some(path) = operating_point {
        OperatingPoint::from_advice(&report.advice, report.false_positive_rate).save(&path)?;
    }
    print_json(&report)?;
    eprintln!("{}", report.advice.message());
    Ok(ExitCode::SUCCESS)
}

fn run_monitor(
    config: DetectorConfig,
    dir: &Path,
    model: Option<PathBuf>,
    reference: Option<PathBuf>,
) -> Result<ExitCode> {
    let (detector, mode) = match (model, reference) {
        (Some(model), _) => (model_detector(config, &model)?, MonitorMode::Convolutional),
        (None, Some(reference)) => {
            let reference = ReferenceSet::load(&reference)?;
            (
                ScreamDetector::new(config)?.with_reference(Arc::new(reference)),
                MonitorMode::Reference,
            )
        }
        (None, None) => bail!("either --model or --reference is required"),
    };

    let files = dataset::list_audio_files(dir);
    if files.is_empty() {
        bail!("no audio files in {}", dir.display());
    }
    let mut source = FileClipSource::new(files);
    let summary = Monitor::new(&detector, mode).run(&mut source, |detection| {
        if let Ok(line) = serde_json::to_string(detection) {
            println!("{}", line);
        }
    });
    eprintln!(
        "{} clips: {} screams, {} non-screams, {} silent, {} failures",
        summary.clips, summary.screams, summary.non_screams, summary.silent, summary.failures
    );
    Ok(ExitCode::SUCCESS)
}

fn run_dump_config(config: &DetectorConfig, output: Option<PathBuf>) -> Result<ExitCode> {
    match output {
        Some(path) => {
            config
                .save_to_file(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Configuration written to {}", path.display());
        }
        None => print_json(config)?,
    }
    Ok(ExitCode::SUCCESS)
}
