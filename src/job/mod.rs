//! Per-job directory layout and upload ingest.
//!
//! Every job owns one directory under the configured base directory:
//!
//! ```text
//! <base>/<job_id>/
//!   raw_zip/                      uploaded archive
//!   extracted/                    archive contents
//!   processed/images/{train,val}  copied images
//!   processed/labels/{train,val}  YOLO label files
//!   processed/data.yaml           dataset manifest
//!   artifacts/train/<attempt>/    trainer output, one per training attempt
//!   artifacts/runs/v<N>/          one directory per training run
//!   artifacts/runs/latest.json    latest-version pointer
//!   status.json                   job status record
//!   dataset_metadata.json         dataset metadata record
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use rand::RngExt;

use crate::error::PipelineError;
use crate::transform::Split;

pub const RAW_ZIP_DIR: &str = "raw_zip";
pub const EXTRACTED_DIR: &str = "extracted";
pub const PROCESSED_DIR: &str = "processed";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const IMAGES_DIR: &str = "images";
pub const LABELS_DIR: &str = "labels";
pub const MANIFEST_FILE: &str = "data.yaml";
pub const STATUS_FILE: &str = "status.json";
pub const DATASET_METADATA_FILE: &str = "dataset_metadata.json";

/// Paths of one job's directory tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobLayout {
    job_id: String,
    root: PathBuf,
}

impl JobLayout {
    /// Describes the layout of `job_id` under `base_dir` without touching disk.
    pub fn new(base_dir: &Path, job_id: &str) -> Result<Self, PipelineError> {
        if !is_valid_job_id(job_id) {
            return Err(PipelineError::JobNotFound {
                job_id: job_id.to_string(),
            });
        }

        Ok(Self {
            job_id: job_id.to_string(),
            root: base_dir.join(job_id),
        })
    }

    /// Like [`JobLayout::new`], but the job directory must already exist.
    pub fn open(base_dir: &Path, job_id: &str) -> Result<Self, PipelineError> {
        let layout = Self::new(base_dir, job_id)?;
        if !layout.root.is_dir() {
            return Err(PipelineError::JobNotFound {
                job_id: job_id.to_string(),
            });
        }
        Ok(layout)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_zip_dir(&self) -> PathBuf {
        self.root.join(RAW_ZIP_DIR)
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.root.join(EXTRACTED_DIR)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join(PROCESSED_DIR)
    }

    pub fn images_dir(&self, split: Split) -> PathBuf {
        self.processed_dir().join(IMAGES_DIR).join(split.as_str())
    }

    pub fn labels_dir(&self, split: Split) -> PathBuf {
        self.processed_dir().join(LABELS_DIR).join(split.as_str())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.processed_dir().join(MANIFEST_FILE)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIR)
    }
}

/// Generates a fresh job id of the form `job_<8 hex digits>`.
pub fn new_job_id() -> String {
    format!("job_{:08x}", rand::rng().random::<u32>())
}

/// Job ids become directory names, so they must be a single plain path component.
fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id != "."
        && job_id != ".."
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Creates a new job directory with empty `raw_zip/` and `extracted/` dirs.
pub fn create_job(base_dir: &Path) -> Result<JobLayout, PipelineError> {
    fs::create_dir_all(base_dir).map_err(PipelineError::Io)?;

    // Collisions on 32 random bits are rare; create_dir makes them detectable.
    loop {
        let layout = JobLayout::new(base_dir, &new_job_id())?;
        match fs::create_dir(layout.root()) {
            Ok(()) => {
                fs::create_dir_all(layout.raw_zip_dir()).map_err(PipelineError::Io)?;
                fs::create_dir_all(layout.extracted_dir()).map_err(PipelineError::Io)?;
                return Ok(layout);
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(PipelineError::Io(err)),
        }
    }
}

/// Stores an uploaded ZIP archive under a new job and extracts it.
///
/// The job directory is removed again if the archive cannot be read.
pub fn ingest_zip(base_dir: &Path, zip_path: &Path) -> Result<JobLayout, PipelineError> {
    let file_name = zip_path
        .file_name()
        .filter(|_| has_zip_extension(zip_path))
        .ok_or_else(|| PipelineError::InvalidZip {
            path: zip_path.to_path_buf(),
            message: "only ZIP files are allowed".to_string(),
        })?
        .to_owned();

    let layout = create_job(base_dir)?;
    let stored = layout.raw_zip_dir().join(file_name);
    fs::copy(zip_path, &stored).map_err(PipelineError::Io)?;

    if let Err(err) = extract_zip(&stored, &layout.extracted_dir()) {
        if let Err(cleanup) = fs::remove_dir_all(layout.root()) {
            tracing::warn!(
                job_id = layout.job_id(),
                error = %cleanup,
                "failed to remove job directory after invalid upload"
            );
        }
        return Err(err);
    }

    tracing::info!(
        job_id = layout.job_id(),
        archive = %stored.display(),
        "dataset uploaded and extracted"
    );
    Ok(layout)
}

fn extract_zip(zip_path: &Path, dest: &Path) -> Result<(), PipelineError> {
    let invalid = |message: String| PipelineError::InvalidZip {
        path: zip_path.to_path_buf(),
        message,
    };

    let file = fs::File::open(zip_path).map_err(PipelineError::Io)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|source| invalid(source.to_string()))?;
    archive
        .extract(dest)
        .map_err(|source| invalid(source.to_string()))
}

fn has_zip_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}
