//! Run versioning for a job's artifact directory.
//!
//! Runs live in `artifacts/runs/v<N>/`. The next version is derived by
//! scanning the existing `v<N>` directories (max + 1, gaps are never filled),
//! not from a counter file, so a missing or corrupt pointer never breaks
//! numbering.
//!
//! # Concurrent runs
//!
//! [`RunVersioner::next_version`] is a plain scan: two callers racing on the
//! same job can compute the same value. Writers must use
//! [`RunVersioner::reserve_next_version`], which claims the directory with an
//! exclusive `create_dir`; the loser of a race moves on to the next number.
//! The latest pointer is last-write-wins.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::json_io::{read_json, write_json_atomic};

pub const RUNS_DIR: &str = "runs";
pub const LATEST_FILE: &str = "latest.json";
pub const VERSION_PREFIX: &str = "v";
pub const MODEL_DIR: &str = "model";
pub const MODEL_FILE: &str = "best.pt";
pub const METRICS_FILE: &str = "metrics.json";
pub const PARAMS_FILE: &str = "params.json";

/// Upper bound on reservation attempts; each failed attempt means another
/// writer claimed that number first.
const MAX_RESERVE_ATTEMPTS: u32 = 1000;

/// Contents of `runs/latest.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub latest_version: String,
}

/// A run directory claimed by [`RunVersioner::reserve_next_version`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSlot {
    pub version: String,
    pub dir: PathBuf,
}

/// Files stored per run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Model,
    Metrics,
    Params,
}

impl ArtifactKind {
    /// Path of this artifact relative to the run directory.
    pub fn relative_path(&self) -> PathBuf {
        match self {
            ArtifactKind::Model => Path::new(MODEL_DIR).join(MODEL_FILE),
            ArtifactKind::Metrics => PathBuf::from(METRICS_FILE),
            ArtifactKind::Params => PathBuf::from(PARAMS_FILE),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Model => "model",
            ArtifactKind::Metrics => "metrics",
            ArtifactKind::Params => "params",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "model" | "weights" => Ok(ArtifactKind::Model),
            "metrics" => Ok(ArtifactKind::Metrics),
            "params" => Ok(ArtifactKind::Params),
            other => Err(format!(
                "unknown artifact '{other}' (supported: model, metrics, params)"
            )),
        }
    }
}

/// Parses the numeric part of a version string: `"v12"` → `Some(12)`.
///
/// Only `v` followed by ASCII digits with a value of at least 1 is accepted.
pub fn parse_version(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(VERSION_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().filter(|n| *n >= 1)
}

/// Formats a version number: `3` → `"v3"`.
pub fn format_version(number: u32) -> String {
    format!("{VERSION_PREFIX}{number}")
}

/// Assigns and resolves run versions under one job's artifact directory.
#[derive(Clone, Debug)]
pub struct RunVersioner {
    artifacts_dir: PathBuf,
}

impl RunVersioner {
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.artifacts_dir.join(RUNS_DIR)
    }

    pub fn latest_path(&self) -> PathBuf {
        self.runs_dir().join(LATEST_FILE)
    }

    /// Returns the version after the highest existing one, or `v1`.
    ///
    /// Does not reserve anything; see [`RunVersioner::reserve_next_version`].
    pub fn next_version(&self) -> Result<String, PipelineError> {
        Ok(format_version(self.max_version()? + 1))
    }

    /// Claims the next free run directory and returns it.
    ///
    /// The directory is created with an exclusive `create_dir`; if another
    /// writer created it first, the next number is tried.
    pub fn reserve_next_version(&self) -> Result<RunSlot, PipelineError> {
        let runs_dir = self.runs_dir();
        fs::create_dir_all(&runs_dir).map_err(PipelineError::Io)?;

        let mut number = self.max_version()? + 1;
        for _ in 0..MAX_RESERVE_ATTEMPTS {
            let version = format_version(number);
            let dir = runs_dir.join(&version);
            match fs::create_dir(&dir) {
                Ok(()) => {
                    tracing::debug!(version = %version, dir = %dir.display(), "reserved run slot");
                    return Ok(RunSlot { version, dir });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::debug!(version = %version, "run slot taken, trying next");
                    number += 1;
                }
                Err(err) => return Err(PipelineError::Io(err)),
            }
        }

        Err(PipelineError::Io(std::io::Error::other(format!(
            "could not reserve a run version in {} after {MAX_RESERVE_ATTEMPTS} attempts",
            runs_dir.display()
        ))))
    }

    /// Existing versions, in ascending numeric order.
    pub fn list_versions(&self) -> Result<Vec<String>, PipelineError> {
        let mut numbers = self.scan_version_numbers()?;
        numbers.sort_unstable();
        Ok(numbers.into_iter().map(format_version).collect())
    }

    /// Points `latest.json` at `version`.
    ///
    /// Call only after every artifact of that run has been written, so the
    /// pointer never references a partial run.
    pub fn update_latest(&self, version: &str) -> Result<(), PipelineError> {
        validate_version(version)?;
        write_json_atomic(
            &self.latest_path(),
            &LatestPointer {
                latest_version: version.to_string(),
            },
        )
    }

    /// Returns the version recorded in `latest.json`.
    ///
    /// # Errors
    /// [`PipelineError::NoVersionFound`] if no pointer has been written yet.
    pub fn get_latest(&self) -> Result<String, PipelineError> {
        let path = self.latest_path();
        if !path.is_file() {
            return Err(PipelineError::NoVersionFound { path });
        }
        let pointer: LatestPointer = read_json(&path)?;
        Ok(pointer.latest_version)
    }

    /// Directory of a run. The version string is validated, not checked for existence.
    pub fn run_dir(&self, version: &str) -> Result<PathBuf, PipelineError> {
        validate_version(version)?;
        Ok(self.runs_dir().join(version))
    }

    /// Path of one artifact of a run.
    ///
    /// # Errors
    /// [`PipelineError::ArtifactNotFound`] if the file does not exist.
    pub fn resolve_artifact(
        &self,
        version: &str,
        kind: ArtifactKind,
    ) -> Result<PathBuf, PipelineError> {
        let path = self.run_dir(version)?.join(kind.relative_path());
        if !path.is_file() {
            return Err(PipelineError::ArtifactNotFound { path });
        }
        Ok(path)
    }

    /// Resolves an artifact of the latest run; returns the version with the path.
    pub fn resolve_latest_artifact(
        &self,
        kind: ArtifactKind,
    ) -> Result<(String, PathBuf), PipelineError> {
        let version = self.get_latest()?;
        let path = self.resolve_artifact(&version, kind)?;
        Ok((version, path))
    }

    fn max_version(&self) -> Result<u32, PipelineError> {
        Ok(self.scan_version_numbers()?.into_iter().max().unwrap_or(0))
    }

    fn scan_version_numbers(&self) -> Result<Vec<u32>, PipelineError> {
        let runs_dir = self.runs_dir();
        if !runs_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut numbers = Vec::new();
        for entry in fs::read_dir(&runs_dir).map_err(PipelineError::Io)? {
            let entry = entry.map_err(PipelineError::Io)?;
            if !entry.file_type().map_err(PipelineError::Io)?.is_dir() {
                continue;
            }
            if let Some(number) = entry.file_name().to_str().and_then(parse_version) {
                numbers.push(number);
            }
        }
        Ok(numbers)
    }
}

fn validate_version(version: &str) -> Result<(), PipelineError> {
    match parse_version(version) {
        Some(_) => Ok(()),
        None => Err(PipelineError::InvalidVersion(version.to_string())),
    }
}
