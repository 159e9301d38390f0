use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::driver::DriverError;

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum FlowError {
    #[error("element not found: {intent} (tried: {tried})")]
    ElementNotFound { intent: String, tried: String },
    #[error("timeout after {elapsed_ms}ms waiting for {condition}")]
    Timeout { condition: String, elapsed_ms: u128, last_observed: Option<String> },
    #[error("option not found: {target}")]
    OptionNotFound { target: String },
    #[error("date not reachable: {target} after {attempts} page turns")]
    DateNotReachable { target: String, attempts: usize },
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("config error: {0}")]
    Config(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("json error: {0}")]
    Json(String),
}

impl From<std::io::Error> for FlowError {
    fn from(e: std::io::Error) -> Self {
        FlowError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        FlowError::Json(e.to_string())
    }
}

impl FlowError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FlowError::Timeout { .. })
    }
}

/// Marks a failure as tolerable at the call site: it is logged and dropped.
///
/// Fatal errors keep flowing through `?`; soft ones are opted into per call,
/// e.g. `driver.press(None, "Enter").await.soft("submit prompt")`.
pub trait Soft<T> {
    fn soft(self, what: &str) -> Option<T>;
}

impl<T, E: std::fmt::Display> Soft<T> for Result<T, E> {
    fn soft(self, what: &str) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(what, error = %e, "soft failure ignored");
                None
            }
        }
    }
}
