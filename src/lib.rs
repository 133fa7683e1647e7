//! Vistrain: from a Pascal VOC upload to versioned YOLO training runs.
//!
//! A job starts as an uploaded ZIP of images and VOC XML annotations. It is
//! validated, transformed into the YOLO directory layout with a reproducible
//! train/validation split, fingerprinted, and then trained any number of
//! times; each training run gets its own `v<N>` directory and the job keeps a
//! pointer to the latest complete run.
//!
//! # Modules
//!
//! - [`annotation`]: VOC parsing, box conversion and class maps
//! - [`validation`]: Dataset precondition checks
//! - [`transform`]: VOC → YOLO layout, split and manifest
//! - [`metadata`]: Dataset metadata record and fingerprint
//! - [`versioning`]: Run versions and the latest pointer
//! - [`status`]: Per-job status record
//! - [`training`]: Trainer collaborator and run orchestration
//! - [`storage`]: Blob store collaborator
//! - [`tracking`]: Experiment tracking collaborator (MLflow)
//! - [`job`]: Job directory layout and upload ingest
//! - [`config`]: Pipeline configuration
//! - [`error`]: Error types for vistrain operations

pub mod annotation;
pub mod config;
pub mod error;
pub mod job;
mod json_io;
pub mod metadata;
pub mod status;
pub mod storage;
pub mod tracking;
pub mod training;
pub mod transform;
pub mod validation;
pub mod versioning;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use annotation::class_map::parse_class_pair;
use annotation::ClassMap;
use config::PipelineConfig;
use job::{JobLayout, DATASET_METADATA_FILE};
use status::JobStatus;
use storage::{blob_key, BlobStore, LocalBlobStore, DATASET_CATEGORY};
use training::{CommandTrainer, TrainingParams, TrainingPipeline};
use versioning::{ArtifactKind, RunVersioner};

pub use error::PipelineError;

/// The vistrain CLI application.
#[derive(Parser)]
#[command(name = "vistrain")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true, env = "VISTRAIN_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding one subdirectory per job.
    #[arg(long, global = true, env = "VISTRAIN_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Root directory of the local blob store.
    #[arg(long, global = true, env = "VISTRAIN_BLOB_DIR")]
    blob_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Store and extract an uploaded dataset ZIP as a new job.
    Ingest(IngestArgs),
    /// Check a job's extracted dataset for enough images and annotations.
    Validate(JobArgs),
    /// Validate and convert a job's dataset to the YOLO layout.
    Preprocess(PreprocessArgs),
    /// Train a model on a preprocessed job and register the run.
    Train(TrainArgs),
    /// Show a job's status record.
    Status(JobArgs),
    /// Show a job's latest run version.
    Latest(JobArgs),
    /// List a job's run versions.
    Versions(JobArgs),
    /// Locate or download one artifact of a run.
    Artifact(ArtifactArgs),
    /// Show or download a job's dataset metadata record.
    Metadata(MetadataArgs),
}

/// Output format for reports.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(clap::Args)]
struct JobArgs {
    /// Job id, as printed by `ingest`.
    job_id: String,
}

#[derive(clap::Args)]
struct IngestArgs {
    /// Dataset ZIP with images and VOC XML annotations.
    zip: PathBuf,
}

#[derive(clap::Args)]
struct PreprocessArgs {
    /// Job id, as printed by `ingest`.
    job_id: String,

    /// Class map YAML (`names: [..]` or `{label: id}`).
    #[arg(long, conflicts_with = "class")]
    classes: Option<PathBuf>,

    /// Class map entry as LABEL=ID; repeat for each class.
    #[arg(long, value_parser = parse_class_pair)]
    class: Vec<(String, u32)>,

    /// Override the split seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Override the fraction of images used for training.
    #[arg(long)]
    train_ratio: Option<f64>,

    /// Report format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(clap::Args)]
struct TrainArgs {
    /// Job id, as printed by `ingest`.
    job_id: String,

    #[arg(long)]
    epochs: Option<u32>,

    #[arg(long)]
    imgsz: Option<u32>,

    #[arg(long)]
    batch: Option<u32>,

    /// Base model weights.
    #[arg(long)]
    model: Option<String>,

    /// Trainer executable.
    #[arg(long, env = "VISTRAIN_TRAINER")]
    trainer: Option<String>,

    /// MLflow tracking server to log the run to.
    #[arg(long, env = "VISTRAIN_TRACKING_URI")]
    tracking_uri: Option<String>,

    /// MLflow experiment name.
    #[arg(long)]
    experiment: Option<String>,
}

#[derive(clap::Args)]
struct ArtifactArgs {
    /// Job id, as printed by `ingest`.
    job_id: String,

    /// Artifact to resolve ('model', 'metrics' or 'params').
    kind: ArtifactKind,

    /// Run version such as 'v3'; defaults to the latest run.
    #[arg(id = "run", long = "run", value_name = "VERSION")]
    version: Option<String>,

    /// Download the artifact from the blob store to this path.
    #[arg(long)]
    download: Option<PathBuf>,
}

#[derive(clap::Args)]
struct MetadataArgs {
    /// Job id, as printed by `ingest`.
    job_id: String,

    /// Download the record from the blob store to this path.
    #[arg(long)]
    download: Option<PathBuf>,
}

#[derive(Serialize)]
struct IngestSummary<'a> {
    job_id: &'a str,
    job_dir: &'a Path,
    message: &'static str,
}

#[derive(Serialize)]
struct ValidateSummary {
    job_id: String,
    images: usize,
    annotations: usize,
}

#[derive(Serialize)]
struct ArtifactLocation {
    job_id: String,
    version: String,
    kind: String,
    path: PathBuf,
}

/// Run the vistrain CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), PipelineError> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("vistrain {}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Turns Pascal VOC uploads into versioned YOLO training runs.");
        println!();
        println!("Run 'vistrain --help' for usage information.");
        return Ok(());
    };

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(base_dir) = cli.base_dir {
        config.base_dir = base_dir;
    }
    if let Some(blob_dir) = cli.blob_dir {
        config.blob_dir = blob_dir;
    }

    match command {
        Commands::Ingest(args) => run_ingest(&config, args),
        Commands::Validate(args) => run_validate(&config, args),
        Commands::Preprocess(args) => run_preprocess(config, args),
        Commands::Train(args) => run_train(config, args),
        Commands::Status(args) => {
            let layout = JobLayout::open(&config.base_dir, &args.job_id)?;
            print_json(&status::read_status(layout.root())?)
        }
        Commands::Latest(args) => {
            let versioner = open_versioner(&config, &args.job_id)?;
            print_json(&versioning::LatestPointer {
                latest_version: versioner.get_latest()?,
            })
        }
        Commands::Versions(args) => {
            let versioner = open_versioner(&config, &args.job_id)?;
            print_json(&versioner.list_versions()?)
        }
        Commands::Artifact(args) => run_artifact(&config, args),
        Commands::Metadata(args) => run_metadata(&config, args),
    }
}

fn run_ingest(config: &PipelineConfig, args: IngestArgs) -> Result<(), PipelineError> {
    let layout = job::ingest_zip(&config.base_dir, &args.zip)?;
    print_json(&IngestSummary {
        job_id: layout.job_id(),
        job_dir: layout.root(),
        message: "Dataset uploaded and extracted successfully",
    })
}

fn run_validate(config: &PipelineConfig, args: JobArgs) -> Result<(), PipelineError> {
    let layout = JobLayout::open(&config.base_dir, &args.job_id)?;
    let found =
        validation::validate_extracted_dataset(&layout.extracted_dir(), &config.validate_options())?;
    print_json(&ValidateSummary {
        job_id: args.job_id,
        images: found.images.len(),
        annotations: found.annotations.len(),
    })
}

fn run_preprocess(mut config: PipelineConfig, args: PreprocessArgs) -> Result<(), PipelineError> {
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(ratio) = args.train_ratio {
        config.train_ratio = ratio;
    }
    config.validate()?;

    let class_map = match (&args.classes, args.class.is_empty()) {
        (Some(path), _) => ClassMap::from_yaml_file(path)?,
        (None, false) => ClassMap::from_pairs(args.class)?,
        (None, true) => {
            return Err(PipelineError::InvalidClassMap {
                message: "provide --classes <yaml> or at least one --class LABEL=ID".to_string(),
            })
        }
    };

    let layout = JobLayout::open(&config.base_dir, &args.job_id)?;
    if !layout.extracted_dir().is_dir() {
        return Err(PipelineError::JobNotFound {
            job_id: args.job_id,
        });
    }
    validation::validate_extracted_dataset(&layout.extracted_dir(), &config.validate_options())?;

    let store = LocalBlobStore::new(&config.blob_dir);
    let report =
        transform::transform_dataset(&layout, &class_map, &config.transform_options(), &store)?;

    match args.output {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!("{report}");
            Ok(())
        }
    }
}

fn run_train(mut config: PipelineConfig, args: TrainArgs) -> Result<(), PipelineError> {
    let params = &mut config.training;
    if let Some(epochs) = args.epochs {
        params.epochs = epochs;
    }
    if let Some(imgsz) = args.imgsz {
        params.imgsz = imgsz;
    }
    if let Some(batch) = args.batch {
        params.batch = batch;
    }
    if let Some(model) = args.model {
        params.model = model;
    }
    if let Some(trainer) = args.trainer {
        config.trainer_program = trainer;
    }
    if let Some(uri) = args.tracking_uri {
        config.tracking.uri = Some(uri);
    }
    if let Some(experiment) = args.experiment {
        config.tracking.experiment = experiment;
    }
    config.validate()?;

    let pipeline = TrainingPipeline::new(
        Arc::new(CommandTrainer::new(config.trainer_program.clone())),
        Arc::new(LocalBlobStore::new(&config.blob_dir)),
        &config.base_dir,
    )
    .with_tracker(config.tracking.tracker());
    let params: TrainingParams = config.training.clone();
    let handle = pipeline.enqueue(&args.job_id, params)?;
    let status = handle
        .join()
        .map_err(|_| PipelineError::Training("training worker panicked".to_string()))?;

    let layout = JobLayout::open(&config.base_dir, &args.job_id)?;
    let record = status::read_status(layout.root())?;
    print_json(&record)?;

    match status {
        JobStatus::Failed => Err(PipelineError::Training(record.message)),
        _ => Ok(()),
    }
}

fn run_artifact(config: &PipelineConfig, args: ArtifactArgs) -> Result<(), PipelineError> {
    let versioner = open_versioner(config, &args.job_id)?;
    let version = match args.version {
        Some(version) => version,
        None => versioner.get_latest()?,
    };

    let path = match &args.download {
        Some(output) => {
            versioning::parse_version(&version)
                .ok_or_else(|| PipelineError::InvalidVersion(version.clone()))?;
            let key = training::run_blob_key(&args.job_id, &version, &args.kind.relative_path());
            LocalBlobStore::new(&config.blob_dir).get(&key, output)?;
            output.clone()
        }
        None => versioner.resolve_artifact(&version, args.kind)?,
    };

    print_json(&ArtifactLocation {
        job_id: args.job_id,
        version,
        kind: args.kind.to_string(),
        path,
    })
}

fn run_metadata(config: &PipelineConfig, args: MetadataArgs) -> Result<(), PipelineError> {
    let layout = JobLayout::open(&config.base_dir, &args.job_id)?;
    let record: metadata::DatasetMetadata = match &args.download {
        Some(output) => {
            let key = blob_key(layout.job_id(), DATASET_CATEGORY, DATASET_METADATA_FILE);
            LocalBlobStore::new(&config.blob_dir).get(&key, output)?;
            let data = fs::read(output).map_err(PipelineError::Io)?;
            serde_json::from_slice(&data).map_err(|source| PipelineError::JsonParse {
                path: output.clone(),
                source,
            })?
        }
        None => metadata::read_dataset_metadata(layout.root())?,
    };
    print_json(&record)
}

fn open_versioner(config: &PipelineConfig, job_id: &str) -> Result<RunVersioner, PipelineError> {
    let layout = JobLayout::open(&config.base_dir, job_id)?;
    Ok(RunVersioner::new(layout.artifacts_dir()))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| PipelineError::JsonWrite {
        path: PathBuf::from("<stdout>"),
        source,
    })?;
    println!("{json}");
    Ok(())
}
