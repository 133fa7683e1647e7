//! Blob store collaborator.
//!
//! The pipeline only needs opaque `put`/`get` of named blobs. Keys are
//! hierarchical strings, `<job_id>/<category>/<filename>`. The store is
//! constructed once by the caller and passed into each stage.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use crate::error::PipelineError;

/// Category under which dataset-level artifacts are stored.
pub const DATASET_CATEGORY: &str = "dataset";

/// Category prefix under which run artifacts are stored.
pub const RUNS_CATEGORY: &str = "runs";

/// Opaque storage of named blobs.
pub trait BlobStore: Send + Sync {
    /// Uploads the file at `local_path` under `key`, replacing any existing blob.
    fn put(&self, local_path: &Path, key: &str) -> Result<(), PipelineError>;

    /// Downloads the blob stored under `key` to `local_path`, creating parent
    /// directories as needed.
    fn get(&self, key: &str, local_path: &Path) -> Result<(), PipelineError>;
}

/// Builds a blob key: `<job_id>/<category>/<filename>`.
pub fn blob_key(job_id: &str, category: &str, filename: &str) -> String {
    format!("{job_id}/{category}/{filename}")
}

/// A blob store backed by a local directory; keys map to relative paths.
#[derive(Clone, Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, PipelineError> {
        let rel = Path::new(key);
        let is_plain = !key.is_empty()
            && rel
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(PipelineError::BlobStore {
                key: key.to_string(),
                message: "keys must be relative paths without '..' components".to_string(),
            });
        }
        Ok(self.root.join(rel))
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&self, local_path: &Path, key: &str) -> Result<(), PipelineError> {
        let target = self.key_path(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(PipelineError::Io)?;
        }
        fs::copy(local_path, &target).map_err(|source| PipelineError::BlobStore {
            key: key.to_string(),
            message: format!("upload from {} failed: {source}", local_path.display()),
        })?;
        tracing::debug!(key, source = %local_path.display(), "stored blob");
        Ok(())
    }

    fn get(&self, key: &str, local_path: &Path) -> Result<(), PipelineError> {
        let source_path = self.key_path(key)?;
        if !source_path.is_file() {
            return Err(PipelineError::BlobStore {
                key: key.to_string(),
                message: "no such key".to_string(),
            });
        }
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).map_err(PipelineError::Io)?;
        }
        fs::copy(&source_path, local_path).map_err(PipelineError::Io)?;
        Ok(())
    }
}

/// An in-process blob store, useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Returns a copy of the stored bytes for `key`.
    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, local_path: &Path, key: &str) -> Result<(), PipelineError> {
        let bytes = fs::read(local_path).map_err(|source| PipelineError::BlobStore {
            key: key.to_string(),
            message: format!("upload from {} failed: {source}", local_path.display()),
        })?;
        self.lock().insert(key.to_string(), bytes);
        Ok(())
    }

    fn get(&self, key: &str, local_path: &Path) -> Result<(), PipelineError> {
        let bytes = self.bytes(key).ok_or_else(|| PipelineError::BlobStore {
            key: key.to_string(),
            message: "no such key".to_string(),
        })?;
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).map_err(PipelineError::Io)?;
        }
        fs::write(local_path, bytes).map_err(PipelineError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_key_is_hierarchical() {
        assert_eq!(
            blob_key("job_1", DATASET_CATEGORY, "dataset_metadata.json"),
            "job_1/dataset/dataset_metadata.json"
        );
    }

    #[test]
    fn local_store_put_then_get() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let store = LocalBlobStore::new(temp.path().join("blobs"));
        let src = temp.path().join("src.bin");
        fs::write(&src, b"payload").unwrap();

        store.put(&src, "job_1/runs/v1/model/best.pt").expect("put");
        let out = temp.path().join("out/best.pt");
        store.get("job_1/runs/v1/model/best.pt", &out).expect("get");
        assert_eq!(fs::read(out).unwrap(), b"payload");
    }

    #[test]
    fn local_store_rejects_escaping_keys() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let store = LocalBlobStore::new(temp.path());
        let src = temp.path().join("src.bin");
        fs::write(&src, b"payload").unwrap();

        assert!(store.put(&src, "../outside").is_err());
        assert!(store.put(&src, "/abs/key").is_err());
        assert!(store.get("missing/key", &temp.path().join("x")).is_err());
    }

    #[test]
    fn memory_store_round_trips_bytes() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let store = MemoryBlobStore::new();
        let src = temp.path().join("a.json");
        fs::write(&src, b"{}").unwrap();

        store.put(&src, "job/dataset/a.json").unwrap();
        assert!(store.contains("job/dataset/a.json"));
        assert_eq!(store.keys(), vec!["job/dataset/a.json".to_string()]);

        let out = temp.path().join("nested/b.json");
        store.get("job/dataset/a.json", &out).unwrap();
        assert_eq!(fs::read(out).unwrap(), b"{}");
        assert!(store.get("job/dataset/missing", &temp.path().join("c")).is_err());
    }
}
