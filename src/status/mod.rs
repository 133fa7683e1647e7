//! Job state tracking.
//!
//! Each job has exactly one status record (`status.json`). Every write fully
//! replaces the previous record; no history is kept. Writes are last-write-wins,
//! which is sound as long as only one run per job is active at a time.
//!
//! A process crash during training leaves the last written status in place
//! (typically `running`). Nothing here detects or repairs that.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::job::STATUS_FILE;
use crate::json_io::{read_json, write_json_atomic};

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Returned when no record has been written yet. Never written to disk.
    Unknown,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single status record of a job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: JobStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl StatusRecord {
    /// The sentinel returned when a job has no status record yet.
    pub fn unknown() -> Self {
        Self {
            status: JobStatus::Unknown,
            message: String::new(),
            timestamp: None,
        }
    }
}

/// Overwrites the job's status record with `status`, `message` and the
/// current UTC time.
pub fn write_status(
    job_dir: &Path,
    status: JobStatus,
    message: impl Into<String>,
) -> Result<StatusRecord, PipelineError> {
    let record = StatusRecord {
        status,
        message: message.into(),
        timestamp: Some(Utc::now()),
    };
    write_json_atomic(&job_dir.join(STATUS_FILE), &record)?;
    tracing::debug!(
        job_dir = %job_dir.display(),
        status = %record.status,
        message = %record.message,
        "status updated"
    );
    Ok(record)
}

/// Reads the job's status record, or [`StatusRecord::unknown`] if none exists.
pub fn read_status(job_dir: &Path) -> Result<StatusRecord, PipelineError> {
    let path = job_dir.join(STATUS_FILE);
    if !path.exists() {
        return Ok(StatusRecord::unknown());
    }
    read_json(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_record_reads_as_unknown() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let record = read_status(temp.path()).expect("read status");
        assert_eq!(record, StatusRecord::unknown());
    }

    #[test]
    fn each_write_replaces_the_previous_record() {
        let temp = tempfile::tempdir().expect("create temp dir");
        write_status(temp.path(), JobStatus::Pending, "Queued for training").unwrap();
        write_status(temp.path(), JobStatus::Running, "Training started").unwrap();
        write_status(temp.path(), JobStatus::Failed, "CUDA out of memory").unwrap();

        let record = read_status(temp.path()).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.message, "CUDA out of memory");
        assert!(record.timestamp.is_some());
    }

    #[test]
    fn record_serializes_lowercase_status() {
        let temp = tempfile::tempdir().expect("create temp dir");
        write_status(temp.path(), JobStatus::Completed, "done").unwrap();

        let raw = std::fs::read_to_string(temp.path().join(STATUS_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["message"], "done");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn unknown_sentinel_serializes_status_only_fields() {
        let value = serde_json::to_value(StatusRecord::unknown()).unwrap();
        assert_eq!(value["status"], "unknown");
        assert!(value.get("timestamp").is_none());
    }
}
