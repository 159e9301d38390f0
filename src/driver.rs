use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::intent::TextPattern;
use crate::session::SessionState;

// ========================= Handles & Queries =========================

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub String);

/// A resolved reference to a live element. Only meaningful to the driver that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub id: String,
    pub frame: Option<FrameId>,
}

impl Handle {
    pub fn new(id: impl Into<String>, frame: Option<FrameId>) -> Self {
        Self { id: id.into(), frame }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }
}

#[derive(Clone, Debug)]
pub enum By {
    Role { role: String, name: Option<TextPattern> },
    Label(TextPattern),
    Placeholder(TextPattern),
    Css(String),
    Text(TextPattern),
}

/// One side-effect-free lookup the driver evaluates against the live page.
#[derive(Clone, Debug)]
pub struct Query {
    pub by: By,
    pub has_text: Option<TextPattern>,
    pub enabled_only: bool,
}

impl Query {
    pub fn new(by: By) -> Self {
        Self { by, has_text: None, enabled_only: false }
    }
}

/// Where a query runs: the main document or a child frame, optionally below an element.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    pub frame: Option<FrameId>,
    pub within: Option<Handle>,
}

impl Scope {
    pub fn page() -> Self {
        Self::default()
    }

    pub fn frame(frame: FrameId) -> Self {
        Self { frame: Some(frame), within: None }
    }

    pub fn within(handle: &Handle) -> Self {
        Self { frame: handle.frame.clone(), within: Some(handle.clone()) }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ClickOptions {
    /// Skip actionability checks (visibility, enabled state, hit-testing).
    pub force: bool,
}

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum DriverError {
    #[error("element not actionable: {0}")]
    NotActionable(String),
    #[error("element detached: {0}")]
    Detached(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("browser error: {0}")]
    Browser(String),
}

// ========================= Browser Driver =========================

/// Capability set the workflow engine consumes. Implemented over Chromium in
/// [`crate::browser::ChromiumDriver`] and in memory by `ScriptedDriver` (feature `scripted`).
#[async_trait]
pub trait Driver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), DriverError>;
    async fn current_url(&self) -> Result<String, DriverError>;
    async fn query(&self, scope: &Scope, query: &Query) -> Result<Vec<Handle>, DriverError>;
    async fn frames(&self) -> Result<Vec<FrameId>, DriverError>;
    async fn parent(&self, handle: &Handle) -> Result<Option<Handle>, DriverError>;
    async fn is_visible(&self, handle: &Handle) -> Result<bool, DriverError>;
    async fn is_enabled(&self, handle: &Handle) -> Result<bool, DriverError>;
    async fn text(&self, handle: &Handle) -> Result<String, DriverError>;
    async fn bounding_box(&self, handle: &Handle) -> Result<Option<Rect>, DriverError>;
    async fn click(&self, handle: &Handle, opts: ClickOptions) -> Result<(), DriverError>;
    async fn mouse_click(&self, x: f64, y: f64) -> Result<(), DriverError>;
    async fn fill(&self, handle: &Handle, text: &str) -> Result<(), DriverError>;
    /// Press a key on `target`, or on whatever has focus when `None`.
    async fn press(&self, target: Option<&Handle>, key: &str) -> Result<(), DriverError>;
    async fn screenshot_b64(&self) -> Result<String, DriverError>;
    async fn export_session(&self) -> Result<SessionState, DriverError>;
    async fn import_session(&self, state: &SessionState) -> Result<(), DriverError>;
}
