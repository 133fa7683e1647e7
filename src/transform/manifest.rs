//! The `data.yaml` dataset manifest consumed by the training step.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::Split;
use crate::annotation::ClassMap;
use crate::error::PipelineError;
use crate::job::{IMAGES_DIR, MANIFEST_FILE};

/// Ultralytics-style dataset description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetManifest {
    /// Dataset root; `train` and `val` are relative to it.
    pub path: PathBuf,
    pub train: String,
    pub val: String,
    /// Number of classes.
    pub nc: usize,
    /// Class names in class map order.
    pub names: Vec<String>,
}

impl DatasetManifest {
    pub fn new(dataset_dir: &Path, class_map: &ClassMap) -> Self {
        Self {
            path: dataset_dir.to_path_buf(),
            train: format!("{IMAGES_DIR}/{}", Split::Train),
            val: format!("{IMAGES_DIR}/{}", Split::Val),
            nc: class_map.len(),
            names: class_map.names(),
        }
    }
}

/// Writes `data.yaml` into `dataset_dir` and returns its path.
///
/// The recorded `path` is the canonical dataset directory when it can be
/// resolved, so the trainer does not depend on the caller's working directory.
pub fn write_manifest(dataset_dir: &Path, class_map: &ClassMap) -> Result<PathBuf, PipelineError> {
    let root = fs::canonicalize(dataset_dir).unwrap_or_else(|_| dataset_dir.to_path_buf());
    let manifest = DatasetManifest::new(&root, class_map);

    let path = dataset_dir.join(MANIFEST_FILE);
    let yaml = serde_yaml::to_string(&manifest).map_err(|source| PipelineError::ManifestWrite {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, yaml).map_err(PipelineError::Io)?;

    Ok(path)
}

/// Reads a manifest written by [`write_manifest`].
pub fn read_manifest(path: &Path) -> Result<DatasetManifest, PipelineError> {
    if !path.is_file() {
        return Err(PipelineError::ArtifactNotFound {
            path: path.to_path_buf(),
        });
    }

    let data = fs::read_to_string(path).map_err(PipelineError::Io)?;
    serde_yaml::from_str(&data).map_err(|source| PipelineError::YamlParse {
        path: path.to_path_buf(),
        source,
    })
}
