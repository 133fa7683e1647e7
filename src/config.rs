//! Pipeline configuration.
//!
//! Defaults live here as constants. A YAML file may override any of them;
//! command-line flags and environment variables are applied on top by the CLI.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::tracking::TrackingConfig;
use crate::training::TrainingParams;
use crate::transform::TransformOptions;
use crate::validation::ValidateOptions;

pub const DEFAULT_BASE_DIR: &str = "data/uploads";
pub const DEFAULT_BLOB_DIR: &str = "data/blobs";
pub const DEFAULT_TRAINER_PROGRAM: &str = "yolo";
pub const MIN_IMAGES_REQUIRED: usize = 5;
pub const TRAIN_SPLIT_RATIO: f64 = 0.8;
pub const RANDOM_SEED: u64 = 42;

/// Settings shared by every pipeline stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory holding one subdirectory per job.
    pub base_dir: PathBuf,
    /// Root of the directory-backed blob store.
    pub blob_dir: PathBuf,
    pub min_images: usize,
    pub train_ratio: f64,
    pub seed: u64,
    pub training: TrainingParams,
    /// Executable invoked by the command trainer.
    pub trainer_program: String,
    pub tracking: TrackingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            blob_dir: PathBuf::from(DEFAULT_BLOB_DIR),
            min_images: MIN_IMAGES_REQUIRED,
            train_ratio: TRAIN_SPLIT_RATIO,
            seed: RANDOM_SEED,
            training: TrainingParams::default(),
            trainer_program: DEFAULT_TRAINER_PROGRAM.to_string(),
            tracking: TrackingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads `path` if given, otherwise returns the defaults. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML config file; missing keys take their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, PipelineError> {
        let data = fs::read_to_string(path).map_err(PipelineError::Io)?;
        serde_yaml::from_str(&data).map_err(|source| PipelineError::YamlParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.train_ratio > 0.0 && self.train_ratio <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "train_ratio must be in (0, 1], got {}",
                self.train_ratio
            )));
        }
        if self.min_images == 0 {
            return Err(PipelineError::InvalidConfig(
                "min_images must be at least 1".to_string(),
            ));
        }
        if self.trainer_program.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "trainer_program must not be empty".to_string(),
            ));
        }
        self.tracking.validate()?;
        self.training.validate()
    }

    pub fn validate_options(&self) -> ValidateOptions {
        ValidateOptions {
            min_images: self.min_images,
        }
    }

    pub fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            seed: self.seed,
            train_ratio: self.train_ratio,
        }
    }
}
