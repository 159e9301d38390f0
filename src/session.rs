//! Authenticated session artifact: cookies plus per-origin local storage,
//! written once after login and imported read-only by every worker.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs as async_fs;
use tracing::{info, warn};

use crate::error::FlowError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    /// Seconds since the epoch, -1 for session cookies.
    #[serde(default = "session_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn root_path() -> String {
    "/".to_string()
}

fn session_expiry() -> f64 {
    -1.0
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageItem {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginState {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageItem>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub origins: Vec<OriginState>,
}

impl SessionState {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.origins.iter().all(|o| o.local_storage.is_empty())
    }
}

/// JSON file holding a [`SessionState`].
#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty state file if none exists so workers can always load one.
    pub async fn ensure_placeholder(&self) -> Result<(), FlowError> {
        if async_fs::try_exists(&self.path).await? {
            return Ok(());
        }
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            async_fs::create_dir_all(dir).await?;
        }
        self.save(&SessionState::default()).await?;
        info!(path = %self.path.display(), "created empty session file");
        Ok(())
    }

    pub async fn save(&self, state: &SessionState) -> Result<(), FlowError> {
        let json = serde_json::to_vec_pretty(state)?;
        async_fs::write(&self.path, json).await?;
        Ok(())
    }

    pub async fn load(&self) -> Result<SessionState, FlowError> {
        let bytes = async_fs::read(&self.path)
            .await
            .map_err(|e| FlowError::Session(format!("read {}: {e}", self.path.display())))?;
        let state: SessionState = serde_json::from_slice(&bytes)
            .map_err(|e| FlowError::Session(format!("parse {}: {e}", self.path.display())))?;
        if state.is_empty() {
            warn!(path = %self.path.display(), "session file holds no cookies or storage");
        }
        Ok(state)
    }
}
