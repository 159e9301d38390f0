pub mod agents;
pub mod browser;
pub mod config;
pub mod datepicker;
pub mod driver;
pub mod error;
pub mod events;
pub mod executor;
pub mod harness;
pub mod intent;
pub mod launcher;
pub mod login;
pub mod report;
pub mod resolver;
#[cfg(any(test, feature = "scripted"))]
pub mod scripted;
pub mod session;
pub mod wait;
pub mod workflow;

pub use agents::AgentVariant;
pub use browser::{BrowserConfig, ChromiumDriver};
pub use config::{EnvConfig, Timeouts};
pub use driver::{Driver, DriverError, Handle};
pub use error::{FlowError, Soft};
pub use harness::Harness;
pub use intent::Intent;
pub use report::{ArtifactStore, DiskArtifactStore, RunReport, RunStatus};
pub use session::{SessionState, SessionStore};
pub use workflow::{AgentContext, Workflow, WorkflowRunner};
