use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::fs as async_fs;

use crate::datepicker::DatePickerState;
use crate::error::FlowError;
use crate::events::SyncState;

// ========================= Run Records =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    Timeout,
    Error,
}

/// Position of a run in its step table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum FlowState {
    Pending(usize),
    ReadyToSubmit,
    Failed(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    Skipped,
    /// Failed, but the step is allowed to.
    Tolerated,
    Failed,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub steps: usize,
    pub skipped: usize,
    pub time_ms: u128,
    pub success: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepLog {
    pub step: usize,
    pub label: String,
    pub action: String,
    pub outcome: StepOutcome,
    pub detail: Option<String>,
    pub events: Option<u64>,
    pub error: Option<String>,
    pub elapsed_ms: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub agent: String,
    pub workflow: String,
    pub status: RunStatus,
    pub state: FlowState,
    pub metrics: RunMetrics,
    pub steps: Vec<StepLog>,
    pub sync: SyncState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub date_picker: Vec<DatePickerState>,
    pub error: Option<FlowError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Success
    }
}

// ========================= Artifact Sink =========================

/// Where failure screenshots and run reports go.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save_screenshot(&self, run_id: &str, name: &str, image_base64: &str) -> Result<PathBuf, FlowError>;
    async fn save_report(&self, report: &RunReport) -> Result<PathBuf, FlowError>;
}

/// Writes `<base>/<run_id>/{name, report.json}`.
pub struct DiskArtifactStore {
    base_dir: PathBuf,
}

impl DiskArtifactStore {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self { base_dir: base.as_ref().to_path_buf() }
    }

    async fn run_dir(&self, run_id: &str) -> Result<PathBuf, FlowError> {
        let dir = self.base_dir.join(run_id);
        async_fs::create_dir_all(&dir)
            .await
            .map_err(|e| FlowError::Io(format!("create_dir {}: {}", dir.display(), e)))?;
        Ok(dir)
    }
}

#[async_trait]
impl ArtifactStore for DiskArtifactStore {
    async fn save_screenshot(&self, run_id: &str, name: &str, image_base64: &str) -> Result<PathBuf, FlowError> {
        let png = B64
            .decode(image_base64)
            .map_err(|e| FlowError::Io(format!("b64 decode: {}", e)))?;
        let path = self.run_dir(run_id).await?.join(name);
        async_fs::write(&path, &png).await?;
        Ok(path)
    }

    async fn save_report(&self, report: &RunReport) -> Result<PathBuf, FlowError> {
        let path = self.run_dir(&report.run_id).await?.join("report.json");
        async_fs::write(&path, serde_json::to_vec_pretty(report)?).await?;
        Ok(path)
    }
}
