//! Environment configuration and timeouts.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const AGENT_COUNT: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid { key: &'static str, value: String, reason: String },
    #[error("expected 5 agent names, got {0}")]
    AgentCount(usize),
}

/// Wait budgets. Defaults follow what the application needs in practice:
/// assistant replies can take minutes, ordinary controls settle in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Assistant messages and prompt fields.
    pub prompt: Duration,
    /// Buttons becoming visible or enabled.
    pub action: Duration,
    pub navigation: Duration,
    /// "AI Events" badge appearing.
    pub events: Duration,
    pub login: Duration,
    pub grid: Duration,
    /// Loading indicators inside dropdowns.
    pub dropdown: Duration,
    /// Yes/No confirmation buttons.
    pub confirm: Duration,
    /// "Proceed with request" versus radio race in the offboarding flow.
    pub race: Duration,
    /// Whole agent run, enforced by the suite runner.
    pub run: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            prompt: Duration::from_secs(240),
            action: Duration::from_secs(30),
            navigation: Duration::from_secs(120),
            events: Duration::from_secs(180),
            login: Duration::from_secs(45),
            grid: Duration::from_secs(60),
            dropdown: Duration::from_secs(15),
            confirm: Duration::from_secs(30),
            race: Duration::from_secs(120),
            run: Duration::from_secs(900),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfig {
    pub base_url: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub qube_mesh_url: String,
    pub agent_names: Vec<String>,
    /// Opening query per agent, index 0 for agent 1.
    pub user_queries: Vec<String>,
    pub reason_offboard: Option<String>,
    pub reason_amend: Option<String>,
    pub reason_terminate: Option<String>,
    pub termination_status: Option<String>,
    pub termination_date: NaiveDate,
    pub supplier_name: Option<String>,
    pub storage_state: PathBuf,
    pub artifacts_dir: PathBuf,
    pub headless: bool,
    pub chrome_ws_url: Option<String>,
}

impl EnvConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "loaded .env"),
            Err(e) => debug!(error = %e, "no .env loaded"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let user_queries = (1..=AGENT_COUNT)
            .map(|n| {
                let key = if n == 1 { "USER_QUERY".to_string() } else { format!("USER_QUERY{n}") };
                get(&key).unwrap_or_else(|| default_query(n))
            })
            .collect();

        let termination_date = match get("TERMINATION_DATE") {
            Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| ConfigError::Invalid {
                key: "TERMINATION_DATE",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => default_termination_date(),
        };

        let headless = match get("HEADLESS") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "HEADLESS",
                value: raw.clone(),
                reason: "expected true/false".into(),
            })?,
            None => true,
        };

        Ok(Self {
            base_url: required("BASE_URL")?,
            user_id: required("USER_ID")?,
            password: required("PASSWORD")?,
            qube_mesh_url: required("QUBE_MESH_URL")?,
            agent_names: agent_names(&get)?,
            user_queries,
            reason_offboard: get("REASON_OFFBOARD"),
            reason_amend: get("REASON_AMEND"),
            reason_terminate: get("REASON_TERMINATE"),
            termination_status: get("TERMINATION_STATUS"),
            termination_date,
            supplier_name: get("SUPPLIER_NAME"),
            storage_state: get("STORAGE_STATE").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("storageState.json")),
            artifacts_dir: get("ARTIFACTS_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("artifacts")),
            headless,
            chrome_ws_url: get("CHROME_WS_URL"),
        })
    }

    /// Display name of agent `index` (0-based).
    pub fn agent_name(&self, index: usize) -> &str {
        &self.agent_names[index]
    }

    pub fn user_query(&self, index: usize) -> &str {
        &self.user_queries[index]
    }
}

fn default_query(n: usize) -> String {
    if n == 1 {
        "Hello from qubemesh-e2e".to_string()
    } else {
        format!("Hello from qubemesh-e2e (Agent {n})")
    }
}

pub fn default_termination_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2028, 1, 20).unwrap_or(NaiveDate::MIN)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `AGENT_n` wins per slot, then the `AGENTS` comma list, then "Agent n".
fn agent_names(get: &dyn Fn(&str) -> Option<String>) -> Result<Vec<String>, ConfigError> {
    let individual: Vec<Option<String>> = (1..=AGENT_COUNT).map(|n| get(&format!("AGENT_{n}"))).collect();
    let list: Option<Vec<String>> = get("AGENTS").map(|raw| {
        raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
    });

    if let Some(list) = &list {
        if list.len() != AGENT_COUNT && individual.iter().any(Option::is_none) {
            return Err(ConfigError::AgentCount(list.len()));
        }
    }

    Ok(individual
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            name.or_else(|| list.as_ref().and_then(|l| l.get(i).cloned()))
                .unwrap_or_else(|| format!("Agent {}", i + 1))
        })
        .collect())
}
