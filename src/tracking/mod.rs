//! Experiment tracking collaborator.
//!
//! After a run is registered, its hyperparameters, training time and the
//! three run files are handed to an [`ExperimentTracker`]. Tracking is off by
//! default ([`NoopTracker`]); with a tracking URI configured the run is
//! logged to an MLflow server through its REST API ([`MlflowTracker`]).
//!
//! MLflow layout of one logged run:
//!
//! ```text
//! experiment <experiment name>
//!   run <job id>                  tag vistrain.version = v<N>
//!     params   epochs imgsz batch model
//!     metrics  training_time_sec
//!     artifacts
//!       model/best.pt
//!       metadata/metrics.json
//!       metadata/params.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::PipelineError;
use crate::training::TrainingParams;

pub const DEFAULT_EXPERIMENT_NAME: &str = "VIS_APP_YOLO";

/// Artifact directory the model weights are logged under.
pub const MODEL_ARTIFACT_PATH: &str = "model";
/// Artifact directory the metrics and params files are logged under.
pub const METADATA_ARTIFACT_PATH: &str = "metadata";

const VERSION_TAG: &str = "vistrain.version";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where runs are tracked. No URI means tracking is disabled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingConfig {
    /// MLflow server, e.g. `http://localhost:5000`.
    pub uri: Option<String>,
    pub experiment: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            uri: None,
            experiment: DEFAULT_EXPERIMENT_NAME.to_string(),
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if let Some(uri) = &self.uri {
            if !(uri.starts_with("http://") || uri.starts_with("https://")) {
                return Err(PipelineError::InvalidConfig(format!(
                    "tracking uri must be an http(s) URL, got '{uri}'"
                )));
            }
        }
        if self.experiment.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "tracking experiment must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The tracker this configuration describes.
    pub fn tracker(&self) -> Arc<dyn ExperimentTracker> {
        match &self.uri {
            Some(uri) => Arc::new(MlflowTracker::new(uri.clone(), self.experiment.clone())),
            None => Arc::new(NoopTracker),
        }
    }
}

/// One file logged with a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedArtifact {
    pub local_path: PathBuf,
    /// Artifact directory inside the tracked run.
    pub artifact_path: &'static str,
}

/// A registered run as seen by a tracker.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedRun<'a> {
    /// Tracked run name; the job id.
    pub run_name: &'a str,
    pub version: &'a str,
    pub params: &'a TrainingParams,
    pub training_time_sec: f64,
    pub artifacts: Vec<TrackedArtifact>,
}

/// Records training runs in an experiment tracker.
pub trait ExperimentTracker: Send + Sync {
    fn log_run(&self, run: &TrackedRun<'_>) -> Result<(), PipelineError>;
}

/// Tracks nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTracker;

impl ExperimentTracker for NoopTracker {
    fn log_run(&self, _run: &TrackedRun<'_>) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// `(key, value)` pairs logged as run parameters.
pub fn param_entries(params: &TrainingParams) -> Vec<(&'static str, String)> {
    vec![
        ("epochs", params.epochs.to_string()),
        ("imgsz", params.imgsz.to_string()),
        ("batch", params.batch.to_string()),
        ("model", params.model.clone()),
    ]
}

/// Logs runs to an MLflow tracking server over its REST API.
///
/// Artifacts go through the server's artifact proxy
/// (`/api/2.0/mlflow-artifacts`), so the server must serve artifacts.
#[derive(Clone)]
pub struct MlflowTracker {
    tracking_uri: String,
    experiment_name: String,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct GetExperimentResponse {
    experiment: Experiment,
}

#[derive(Debug, Deserialize)]
struct Experiment {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateRunResponse {
    run: Run,
}

#[derive(Debug, Deserialize)]
struct Run {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
}

impl MlflowTracker {
    pub fn new(tracking_uri: impl Into<String>, experiment_name: impl Into<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        Self {
            tracking_uri: tracking_uri.into(),
            experiment_name: experiment_name.into(),
            agent: config.into(),
        }
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/2.0/{endpoint}",
            self.tracking_uri.trim_end_matches('/')
        )
    }

    fn artifact_url(
        &self,
        experiment_id: &str,
        run_id: &str,
        artifact: &TrackedArtifact,
    ) -> Result<String, PipelineError> {
        let file_name = artifact
            .local_path
            .file_name()
            .map(|name| name.to_string_lossy())
            .ok_or_else(|| {
                PipelineError::Tracking(format!(
                    "artifact {} has no file name",
                    artifact.local_path.display()
                ))
            })?;
        Ok(self.api_url(&format!(
            "mlflow-artifacts/artifacts/{experiment_id}/{run_id}/artifacts/{}/{file_name}",
            artifact.artifact_path
        )))
    }

    fn post<T: DeserializeOwned>(&self, endpoint: &str, body: &Value) -> Result<T, PipelineError> {
        let mut response = self
            .agent
            .post(&self.api_url(endpoint))
            .send_json(body)
            .map_err(|err| request_failed(endpoint, err))?;
        response
            .body_mut()
            .read_json::<T>()
            .map_err(|err| request_failed(endpoint, err))
    }

    /// Id of the configured experiment, created on first use.
    fn experiment_id(&self) -> Result<String, PipelineError> {
        let endpoint = "mlflow/experiments/get-by-name";
        let lookup = self
            .agent
            .get(&self.api_url(endpoint))
            .query("experiment_name", &self.experiment_name)
            .call();

        match lookup {
            Ok(mut response) => {
                let found: GetExperimentResponse = response
                    .body_mut()
                    .read_json()
                    .map_err(|err| request_failed(endpoint, err))?;
                Ok(found.experiment.experiment_id)
            }
            Err(ureq::Error::StatusCode(404)) => {
                let created: CreateExperimentResponse = self.post(
                    "mlflow/experiments/create",
                    &json!({ "name": self.experiment_name }),
                )?;
                tracing::info!(
                    experiment = %self.experiment_name,
                    experiment_id = %created.experiment_id,
                    "created tracking experiment"
                );
                Ok(created.experiment_id)
            }
            Err(err) => Err(request_failed(endpoint, err)),
        }
    }

    fn upload_artifact(
        &self,
        experiment_id: &str,
        run_id: &str,
        artifact: &TrackedArtifact,
    ) -> Result<(), PipelineError> {
        let url = self.artifact_url(experiment_id, run_id, artifact)?;
        let data = fs::read(&artifact.local_path).map_err(PipelineError::Io)?;
        self.agent
            .put(&url)
            .send(data.as_slice())
            .map_err(|err| request_failed("mlflow-artifacts", err))?;
        tracing::debug!(
            run_id,
            artifact = %artifact.local_path.display(),
            "logged tracking artifact"
        );
        Ok(())
    }

    fn log_contents(
        &self,
        experiment_id: &str,
        run_id: &str,
        run: &TrackedRun<'_>,
    ) -> Result<(), PipelineError> {
        let params: Vec<Value> = param_entries(run.params)
            .into_iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect();
        self.post::<Value>(
            "mlflow/runs/log-batch",
            &json!({
                "run_id": run_id,
                "params": params,
                "metrics": [{
                    "key": "training_time_sec",
                    "value": run.training_time_sec,
                    "timestamp": now_millis(),
                    "step": 0,
                }],
            }),
        )?;

        for artifact in &run.artifacts {
            self.upload_artifact(experiment_id, run_id, artifact)?;
        }
        Ok(())
    }

    fn finish_run(&self, run_id: &str, status: &str) -> Result<(), PipelineError> {
        self.post::<Value>(
            "mlflow/runs/update",
            &json!({ "run_id": run_id, "status": status, "end_time": now_millis() }),
        )
        .map(|_| ())
    }
}

impl ExperimentTracker for MlflowTracker {
    fn log_run(&self, run: &TrackedRun<'_>) -> Result<(), PipelineError> {
        let experiment_id = self.experiment_id()?;
        let created: CreateRunResponse = self.post(
            "mlflow/runs/create",
            &json!({
                "experiment_id": experiment_id,
                "run_name": run.run_name,
                "start_time": now_millis(),
                "tags": [{ "key": VERSION_TAG, "value": run.version }],
            }),
        )?;
        let run_id = created.run.info.run_id;

        if let Err(err) = self.log_contents(&experiment_id, &run_id, run) {
            if let Err(finish) = self.finish_run(&run_id, "FAILED") {
                tracing::warn!(run_id = %run_id, error = %finish, "failed to close tracking run");
            }
            return Err(err);
        }
        self.finish_run(&run_id, "FINISHED")?;

        tracing::info!(
            experiment = %self.experiment_name,
            run_id = %run_id,
            version = run.version,
            "training run tracked"
        );
        Ok(())
    }
}

fn request_failed(endpoint: &str, err: ureq::Error) -> PipelineError {
    PipelineError::Tracking(format!("{endpoint}: {err}"))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The three run files, in the artifact directories they are logged under.
pub fn run_artifacts(model: &Path, metrics: &Path, params: &Path) -> Vec<TrackedArtifact> {
    vec![
        TrackedArtifact {
            local_path: model.to_path_buf(),
            artifact_path: MODEL_ARTIFACT_PATH,
        },
        TrackedArtifact {
            local_path: metrics.to_path_buf(),
            artifact_path: METADATA_ARTIFACT_PATH,
        },
        TrackedArtifact {
            local_path: params.to_path_buf(),
            artifact_path: METADATA_ARTIFACT_PATH,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default() {
        let config = TrackingConfig::default();
        assert_eq!(config.uri, None);
        assert_eq!(config.experiment, "VIS_APP_YOLO");
        config.validate().expect("defaults validate");
    }

    #[test]
    fn rejects_non_http_uris_and_blank_experiments() {
        let config = TrackingConfig {
            uri: Some("localhost:5000".to_string()),
            ..TrackingConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));

        let config = TrackingConfig {
            experiment: "  ".to_string(),
            ..TrackingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn params_are_logged_as_strings() {
        let params = TrainingParams {
            epochs: 3,
            ..TrainingParams::default()
        };
        assert_eq!(
            param_entries(&params),
            vec![
                ("epochs", "3".to_string()),
                ("imgsz", "640".to_string()),
                ("batch", "16".to_string()),
                ("model", "yolov8n.pt".to_string()),
            ]
        );
    }

    #[test]
    fn urls_follow_the_rest_layout() {
        let tracker = MlflowTracker::new("http://mlflow:5000/", "exp");
        assert_eq!(
            tracker.api_url("mlflow/runs/create"),
            "http://mlflow:5000/api/2.0/mlflow/runs/create"
        );

        let artifacts = run_artifacts(
            Path::new("/j/runs/v2/model/best.pt"),
            Path::new("/j/runs/v2/metrics.json"),
            Path::new("/j/runs/v2/params.json"),
        );
        assert_eq!(
            tracker.artifact_url("7", "abc", &artifacts[0]).unwrap(),
            "http://mlflow:5000/api/2.0/mlflow-artifacts/artifacts/7/abc/artifacts/model/best.pt"
        );
        assert_eq!(
            tracker.artifact_url("7", "abc", &artifacts[2]).unwrap(),
            "http://mlflow:5000/api/2.0/mlflow-artifacts/artifacts/7/abc/artifacts/metadata/params.json"
        );
    }

    #[test]
    fn unreachable_server_is_a_tracking_error() {
        let tracker = MlflowTracker::new("http://127.0.0.1:9", "exp");
        let params = TrainingParams::default();
        let err = tracker
            .log_run(&TrackedRun {
                run_name: "job_1",
                version: "v1",
                params: &params,
                training_time_sec: 1.0,
                artifacts: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, PipelineError::Tracking(message) if message.contains("get-by-name")));
    }
}
