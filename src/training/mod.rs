//! Training collaborator and run orchestration.
//!
//! The model-training call is a black box behind [`Trainer`]: it takes the
//! dataset manifest and hyperparameters and returns where the run's output
//! and best weights ended up. [`TrainingPipeline`] wraps one training call
//! with status tracking, run versioning and artifact upload.
//!
//! A run is registered in this order:
//!
//! 1. claim a fresh output directory `artifacts/train/<attempt>/`
//! 2. train into it
//! 3. check the best weights exist
//! 4. reserve `runs/v<N>/`
//! 5. copy weights, write `metrics.json` and `params.json`
//! 6. move `latest.json` to `v<N>`
//! 7. upload the run's files to the blob store
//! 8. log the run with the experiment tracker
//!
//! Every attempt owns its output directory, so overlapping runs of one job
//! never read each other's weights and a run that writes no weights never
//! picks up an older run's. A failure before step 6 leaves `latest.json` on
//! the previous complete run.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use rand::RngExt;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::job::JobLayout;
use crate::json_io::write_json_atomic;
use crate::status::{write_status, JobStatus};
use crate::storage::{blob_key, BlobStore, RUNS_CATEGORY};
use crate::tracking::{run_artifacts, ExperimentTracker, NoopTracker, TrackedRun};
use crate::versioning::{ArtifactKind, RunVersioner, METRICS_FILE, MODEL_DIR, MODEL_FILE, PARAMS_FILE};

pub const DEFAULT_EPOCHS: u32 = 50;
pub const DEFAULT_IMGSZ: u32 = 640;
pub const DEFAULT_BATCH: u32 = 16;
pub const DEFAULT_MODEL: &str = "yolov8n.pt";

/// Directory under `artifacts/` holding one trainer output directory per attempt.
pub const TRAINER_OUTPUT_DIR: &str = "train";

const MAX_OUTPUT_DIR_ATTEMPTS: u32 = 100;

pub const MSG_QUEUED: &str = "Queued for training";
pub const MSG_STARTED: &str = "Training started";
pub const MSG_COMPLETED: &str = "Training completed successfully";

/// Hyperparameters passed to the trainer and recorded as `params.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingParams {
    pub epochs: u32,
    pub imgsz: u32,
    pub batch: u32,
    pub model: String,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            imgsz: DEFAULT_IMGSZ,
            batch: DEFAULT_BATCH,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl TrainingParams {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.epochs == 0 || self.imgsz == 0 || self.batch == 0 {
            return Err(PipelineError::InvalidConfig(
                "epochs, imgsz and batch must be positive".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Input of one training call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainRequest {
    /// The dataset's `data.yaml`.
    pub manifest_path: PathBuf,
    /// Directory the trainer writes its run output under.
    pub project_dir: PathBuf,
    /// Name of this attempt's directory inside `project_dir`. It already
    /// exists and belongs to this attempt alone.
    pub run_name: String,
    pub params: TrainingParams,
}

impl TrainRequest {
    /// `<project_dir>/<run_name>`.
    pub fn output_dir(&self) -> PathBuf {
        self.project_dir.join(&self.run_name)
    }
}

/// Where a finished training call left its output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainOutput {
    pub run_output_dir: PathBuf,
    pub best_weights: PathBuf,
}

/// A failed training call. The message is recorded verbatim in the job status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainerError(pub String);

impl fmt::Display for TrainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TrainerError {}

/// The model-training call.
pub trait Trainer: Send + Sync {
    fn train(&self, request: &TrainRequest) -> Result<TrainOutput, TrainerError>;
}

/// Runs the Ultralytics command-line trainer:
///
/// ```text
/// yolo detect train data=<manifest> epochs=<n> imgsz=<n> batch=<n> model=<m> \
///     project=<project_dir> name=<run_name> exist_ok=True
/// ```
///
/// Best weights are expected at `<project_dir>/<run_name>/weights/best.pt`.
#[derive(Clone, Debug)]
pub struct CommandTrainer {
    program: String,
}

impl CommandTrainer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments passed to the program, in order.
    pub fn args(request: &TrainRequest) -> Vec<String> {
        let params = &request.params;
        vec![
            "detect".to_string(),
            "train".to_string(),
            format!("data={}", request.manifest_path.display()),
            format!("epochs={}", params.epochs),
            format!("imgsz={}", params.imgsz),
            format!("batch={}", params.batch),
            format!("model={}", params.model),
            format!("project={}", request.project_dir.display()),
            format!("name={}", request.run_name),
            "exist_ok=True".to_string(),
        ]
    }
}

impl Default for CommandTrainer {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TRAINER_PROGRAM)
    }
}

impl Trainer for CommandTrainer {
    fn train(&self, request: &TrainRequest) -> Result<TrainOutput, TrainerError> {
        let args = Self::args(request);
        tracing::info!(program = %self.program, args = ?args, "starting trainer");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|err| TrainerError(format!("failed to run '{}': {err}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no output");
            return Err(TrainerError(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                detail.trim()
            )));
        }

        let run_output_dir = request.output_dir();
        let best_weights = run_output_dir.join("weights").join(MODEL_FILE);
        Ok(TrainOutput {
            run_output_dir,
            best_weights,
        })
    }
}

/// Claims a new, empty attempt directory under `project_dir` and returns its name.
fn claim_output_dir(project_dir: &Path) -> Result<String, PipelineError> {
    fs::create_dir_all(project_dir).map_err(PipelineError::Io)?;
    for _ in 0..MAX_OUTPUT_DIR_ATTEMPTS {
        let name = format!(
            "{}-{:08x}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S"),
            rand::rng().random::<u32>()
        );
        match fs::create_dir(project_dir.join(&name)) {
            Ok(()) => return Ok(name),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(PipelineError::Io(err)),
        }
    }
    Err(PipelineError::Io(std::io::Error::other(format!(
        "could not claim a trainer output directory in {}",
        project_dir.display()
    ))))
}

/// Contents of a run's `metrics.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub version: String,
    /// Wall-clock seconds from trainer start to metrics, two decimals.
    pub training_time_sec: f64,
    pub best_model_path: PathBuf,
}

/// A registered run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunRecord {
    pub version: String,
    pub run_dir: PathBuf,
    pub model_path: PathBuf,
    pub metrics_path: PathBuf,
    pub params_path: PathBuf,
    pub metrics: RunMetrics,
    /// Blob keys the run's files were uploaded under.
    pub uploaded_keys: Vec<String>,
}

/// Orchestrates training runs for jobs under one base directory.
#[derive(Clone)]
pub struct TrainingPipeline {
    trainer: Arc<dyn Trainer>,
    store: Arc<dyn BlobStore>,
    tracker: Arc<dyn ExperimentTracker>,
    base_dir: PathBuf,
}

impl TrainingPipeline {
    /// A pipeline that does not track runs; see [`TrainingPipeline::with_tracker`].
    pub fn new(
        trainer: Arc<dyn Trainer>,
        store: Arc<dyn BlobStore>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            trainer,
            store,
            tracker: Arc::new(NoopTracker),
            base_dir: base_dir.into(),
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn ExperimentTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Marks the job `pending` and starts training on a background thread.
    ///
    /// Returns as soon as the thread is spawned. The handle yields the final
    /// status; errors inside the worker are only reported through the job's
    /// status record.
    pub fn enqueue(
        &self,
        job_id: &str,
        params: TrainingParams,
    ) -> Result<JoinHandle<JobStatus>, PipelineError> {
        let layout = JobLayout::open(&self.base_dir, job_id)?;
        write_status(layout.root(), JobStatus::Pending, MSG_QUEUED)?;

        let pipeline = self.clone();
        std::thread::Builder::new()
            .name(format!("train-{job_id}"))
            .spawn(move || pipeline.run_job(&layout, &params))
            .map_err(PipelineError::Io)
    }

    /// Runs training for a job on the calling thread and returns the final status.
    pub fn run(&self, job_id: &str, params: &TrainingParams) -> Result<JobStatus, PipelineError> {
        let layout = JobLayout::open(&self.base_dir, job_id)?;
        Ok(self.run_job(&layout, params))
    }

    fn run_job(&self, layout: &JobLayout, params: &TrainingParams) -> JobStatus {
        let job_dir = layout.root();
        if let Err(err) = write_status(job_dir, JobStatus::Running, MSG_STARTED) {
            tracing::error!(job_id = layout.job_id(), error = %err, "failed to record running status");
        }

        let (status, message) = match self.train_and_register(layout, params) {
            Ok(record) => {
                tracing::info!(
                    job_id = layout.job_id(),
                    version = %record.version,
                    seconds = record.metrics.training_time_sec,
                    "training run registered"
                );
                (JobStatus::Completed, MSG_COMPLETED.to_string())
            }
            Err(err) => {
                tracing::error!(job_id = layout.job_id(), error = %err, "training failed");
                (JobStatus::Failed, failure_message(&err))
            }
        };

        if let Err(err) = write_status(job_dir, status, message) {
            tracing::error!(job_id = layout.job_id(), error = %err, "failed to record final status");
        }
        status
    }

    /// Trains once and registers the result as the job's next run version.
    pub fn train_and_register(
        &self,
        layout: &JobLayout,
        params: &TrainingParams,
    ) -> Result<RunRecord, PipelineError> {
        let manifest_path = layout.manifest_path();
        if !manifest_path.is_file() {
            return Err(PipelineError::ArtifactNotFound {
                path: manifest_path,
            });
        }

        let artifacts_dir = layout.artifacts_dir();
        let project_dir = artifacts_dir.join(TRAINER_OUTPUT_DIR);

        let started = Instant::now();
        let run_name = claim_output_dir(&project_dir)?;
        tracing::debug!(job_id = layout.job_id(), run_name = %run_name, "claimed trainer output directory");
        let request = TrainRequest {
            manifest_path,
            project_dir,
            run_name,
            params: params.clone(),
        };
        let output = self
            .trainer
            .train(&request)
            .map_err(|err| PipelineError::Training(err.0))?;

        if !output.best_weights.is_file() {
            return Err(PipelineError::Training(format!(
                "Training completed but best.pt not found at {}",
                output.best_weights.display()
            )));
        }

        let versioner = RunVersioner::new(&artifacts_dir);
        let slot = versioner.reserve_next_version()?;

        let model_path = slot.dir.join(ArtifactKind::Model.relative_path());
        fs::create_dir_all(slot.dir.join(MODEL_DIR)).map_err(PipelineError::Io)?;
        fs::copy(&output.best_weights, &model_path).map_err(PipelineError::Io)?;

        let metrics = RunMetrics {
            version: slot.version.clone(),
            training_time_sec: round_to_hundredths(started.elapsed().as_secs_f64()),
            best_model_path: model_path.clone(),
        };
        let metrics_path = slot.dir.join(METRICS_FILE);
        let params_path = slot.dir.join(PARAMS_FILE);
        write_json_atomic(&metrics_path, &metrics)?;
        write_json_atomic(&params_path, params)?;

        versioner.update_latest(&slot.version)?;

        let mut uploaded_keys = Vec::with_capacity(3);
        for kind in [ArtifactKind::Model, ArtifactKind::Metrics, ArtifactKind::Params] {
            let relative = kind.relative_path();
            let key = run_blob_key(layout.job_id(), &slot.version, &relative);
            self.store.put(&slot.dir.join(&relative), &key)?;
            uploaded_keys.push(key);
        }

        self.tracker.log_run(&TrackedRun {
            run_name: layout.job_id(),
            version: &slot.version,
            params,
            training_time_sec: metrics.training_time_sec,
            artifacts: run_artifacts(&model_path, &metrics_path, &params_path),
        })?;

        Ok(RunRecord {
            version: slot.version,
            run_dir: slot.dir,
            model_path,
            metrics_path,
            params_path,
            metrics,
            uploaded_keys,
        })
    }
}

/// Blob key of a run file: `<job_id>/runs/<version>/<relative path>`.
pub fn run_blob_key(job_id: &str, version: &str, relative: &Path) -> String {
    let relative = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    blob_key(job_id, RUNS_CATEGORY, &format!("{version}/{relative}"))
}

/// Text recorded in the status record for a failed run. Trainer errors are
/// kept verbatim, without the error type's prefix.
fn failure_message(err: &PipelineError) -> String {
    match err {
        PipelineError::Training(message) => message.clone(),
        other => other.to_string(),
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
