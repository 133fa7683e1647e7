use std::path::PathBuf;
use thiserror::Error;

/// The main error type for vistrain operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not enough images for training in {path}: found {found}, need at least {required}")]
    InsufficientData {
        path: PathBuf,
        found: usize,
        required: usize,
    },

    #[error("No XML annotations found in {path}")]
    MissingAnnotations { path: PathBuf },

    #[error("No images found in extracted dataset {path}")]
    EmptyDataset { path: PathBuf },

    #[error("Malformed annotation {path}: {message}")]
    MalformedAnnotation { path: PathBuf, message: String },

    #[error("Invalid class map: {message}")]
    InvalidClassMap { message: String },

    #[error("Failed to write dataset manifest {path}: {source}")]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to parse YAML from {path}: {source}")]
    YamlParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write JSON to {path}: {source}")]
    JsonWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse JSON from {path}: {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Artifact not found: {path}")]
    ArtifactNotFound { path: PathBuf },

    #[error("No latest version found in {path}")]
    NoVersionFound { path: PathBuf },

    #[error("Invalid run version '{0}' (expected v<N> with N >= 1)")]
    InvalidVersion(String),

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Invalid ZIP file {path}: {message}")]
    InvalidZip { path: PathBuf, message: String },

    #[error("Blob store error for key '{key}': {message}")]
    BlobStore { key: String, message: String },

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Experiment tracking failed: {0}")]
    Tracking(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Returns true for errors that mean "the requested thing does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PipelineError::ArtifactNotFound { .. }
                | PipelineError::NoVersionFound { .. }
                | PipelineError::JobNotFound { .. }
        )
    }

    /// Returns true for caller-visible dataset precondition failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PipelineError::InsufficientData { .. }
                | PipelineError::MissingAnnotations { .. }
                | PipelineError::EmptyDataset { .. }
        )
    }
}
