//! Step tables for the Qube Mesh agents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Timeouts;
use crate::intent::Intent;
use crate::workflow::{ConfigKey, EventSyncPolicy, StepAction, TerminationMode, Workflow, WorkflowStep};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentVariant {
    Agent1,
    Agent2,
    Agent3,
    /// Agent 3 forced to immediate termination.
    Agent3Immediate,
    Agent4,
    Agent5,
}

impl AgentVariant {
    pub const ALL: [AgentVariant; 6] = [
        AgentVariant::Agent1,
        AgentVariant::Agent2,
        AgentVariant::Agent3,
        AgentVariant::Agent3Immediate,
        AgentVariant::Agent4,
        AgentVariant::Agent5,
    ];

    /// What the runner executes when no agent is picked.
    pub const DEFAULT: [AgentVariant; 5] = [
        AgentVariant::Agent1,
        AgentVariant::Agent2,
        AgentVariant::Agent3,
        AgentVariant::Agent4,
        AgentVariant::Agent5,
    ];

    /// Slot among the five configured agents (name, query).
    pub fn index(&self) -> usize {
        match self {
            AgentVariant::Agent1 => 0,
            AgentVariant::Agent2 => 1,
            AgentVariant::Agent3 | AgentVariant::Agent3Immediate => 2,
            AgentVariant::Agent4 => 3,
            AgentVariant::Agent5 => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AgentVariant::Agent1 => "1",
            AgentVariant::Agent2 => "2",
            AgentVariant::Agent3 => "3",
            AgentVariant::Agent3Immediate => "3.1",
            AgentVariant::Agent4 => "4",
            AgentVariant::Agent5 => "5",
        }
    }

    pub fn workflow(&self, t: &Timeouts) -> Workflow {
        match self {
            AgentVariant::Agent1 => offboard_supplier(t),
            AgentVariant::Agent2 => amend_contract(t),
            AgentVariant::Agent3 => terminate_contract(t),
            AgentVariant::Agent3Immediate => {
                let mut wf = terminate_contract(t).force_mode(TerminationMode::Immediate);
                wf.name = "terminate contract immediately".into();
                wf.default_mode = TerminationMode::Immediate;
                wf
            }
            AgentVariant::Agent4 | AgentVariant::Agent5 => query_only(t),
        }
    }
}

impl fmt::Display for AgentVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent {}", self.label())
    }
}

impl FromStr for AgentVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        let key = key.trim_start_matches("agent").trim_start_matches(['_', '-', ' ']);
        let key = key.replace('_', ".");
        AgentVariant::ALL
            .into_iter()
            .find(|v| v.label() == key)
            .ok_or_else(|| format!("unknown agent {s:?} (expected 1, 2, 3, 3.1, 4 or 5)"))
    }
}

// ========================= Shared Intents =========================

pub fn prompt_field() -> Intent {
    Intent::new("prompt field")
        .role("textbox", r"^\s*prompt\s*$")
        .role("textbox", "prompt|ask me anything")
        .label("ask me anything")
        .placeholder("ask me anything")
}

pub fn proceed_with_request() -> Intent {
    Intent::new("Proceed with request").role("button", "proceed with request")
}

pub fn proceed() -> Intent {
    Intent::new("Proceed").role("button", r"^\s*proceed\s*$")
}

pub fn create_request() -> Intent {
    Intent::new("Create request").role("button", "create request")
}

pub fn send_for_validation() -> Intent {
    Intent::new("Send for validation").role("button", "send (for )?validation")
}

fn says(name: &str, pattern: &str) -> Intent {
    Intent::new(name).text(pattern)
}

const OFFBOARD_REASONS: &str = "no longer doing business|not approved by tprm|quick setup and pay";

// ========================= Tables =========================

/// Agent 1: pick a supplier from the grid and raise an offboarding request.
fn offboard_supplier(t: &Timeouts) -> Workflow {
    let grid = Intent::new("supplier grid").any_role("grid").has_text("supplier name");
    let any_grid = Intent::new("first grid").any_role("grid").css("[role=\"grid\"]");
    let rows = Intent::new("selectable rows")
        .role("row", "press space to select this row")
        .css("[role=\"row\"]:has(input[type=\"checkbox\"]), [role=\"row\"]:has([role=\"checkbox\"])");
    let reasons = Intent::new("offboarding reasons")
        .role("button", OFFBOARD_REASONS)
        .css("button")
        .has_text(OFFBOARD_REASONS);

    Workflow::new(
        "offboard supplier",
        vec![
            WorkflowStep::new("send opening query", StepAction::Fill { submit: true }, prompt_field(), t.prompt)
                .config(ConfigKey::UserQuery),
            WorkflowStep::new("select first supplier", StepAction::CheckFirstRow { rows }, grid, t.grid).or(any_grid),
            WorkflowStep::new("proceed", StepAction::Click, proceed(), t.action),
            WorkflowStep::new(
                "proceed with request if asked",
                StepAction::ClickIfFirst { rival: Intent::new("reason radio").any_role("radio") },
                Intent::new("Proceed with request")
                    .role("button", "proceed with request")
                    .role("link", "proceed with request"),
                t.race,
            ),
            WorkflowStep::new("offboarding reason", StepAction::Choose { fallbacks: vec![], strict: false }, reasons, t.race)
                .config(ConfigKey::ReasonOffboard),
            WorkflowStep::new("create request", StepAction::Click, create_request(), t.action),
        ],
    )
}

/// Agent 2: amend a contract through the reason dropdown and Yes/No questions.
fn amend_contract(t: &Timeouts) -> Workflow {
    let listbox = Intent::new("Amendment Reason dropdown")
        .role("listbox", "amendment reason")
        .css("div[role=\"listbox\"][aria-label=\"Amendment Reason\"]");

    Workflow::new(
        "amend contract",
        vec![
            WorkflowStep::new("send opening query", StepAction::Fill { submit: true }, prompt_field(), t.events)
                .config(ConfigKey::UserQuery)
                .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new("proceed with request", StepAction::Click, proceed_with_request(), t.events)
                .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new("prompt ready", StepAction::Expect, prompt_field(), t.events),
            WorkflowStep::new(
                "supplier discussion question",
                StepAction::Expect,
                says("discussed question", r"discuss(ed)?\s+with\s+the\s+supplier|supplier.*discuss"),
                t.action,
            )
            .soft(),
            WorkflowStep::new("confirm discussion", StepAction::Fill { submit: true }, prompt_field(), t.action)
                .literal("Yes, I have discussed")
                .sync(EventSyncPolicy::Required),
            WorkflowStep::new("amendment reason", StepAction::Select { default_index: 2 }, listbox, t.events)
                .config(ConfigKey::ReasonAmend),
            WorkflowStep::new("close dropdown", StepAction::Dismiss, Intent::new("page"), t.action),
            WorkflowStep::new("proceed", StepAction::Click, proceed(), t.action).sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new(
                "description request",
                StepAction::Expect,
                says("description prompt", r"noted\.\s*please provide brief description for the amendment"),
                t.events,
            ),
            WorkflowStep::new("send description", StepAction::Fill { submit: true }, prompt_field(), t.action)
                .literal("Description: this is final description")
                .sync(EventSyncPolicy::Required),
            WorkflowStep::new(
                "time sensitivity question",
                StepAction::AnswerYes,
                says(
                    "time sensitivity question",
                    r"type\s+or\s+volume\s+of\s+data\s+being\s+shared|time\s+sensitivity|amendment\s+time\s+sensitivity",
                ),
                t.prompt,
            )
            .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new(
                "products or services question",
                StepAction::AnswerYes,
                says("products question", r"significant changes in products or services"),
                t.prompt,
            )
            .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new("summary", StepAction::Expect, says("summary", r"here'?s a quick summary"), t.prompt).or(says(
                "final confirmation",
                r"please confirm if the above details are correct",
            )),
            WorkflowStep::new(
                "create request",
                StepAction::Click,
                Intent::new("Create request").role("button", r"^\s*create request\s*$"),
                t.prompt,
            )
            .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new("send for validation", StepAction::Expect, send_for_validation(), t.prompt)
                .or(says("send for validation text", "send (for )?validation")),
        ],
    )
}

/// Agent 3: terminate a contract now or on a future date.
fn terminate_contract(t: &Timeouts) -> Workflow {
    use TerminationMode::{FutureDate, Immediate};

    let first_enabled = Intent::new("first enabled option").css("button").has_text(r"\S").enabled_only();

    Workflow::new(
        "terminate contract",
        vec![
            WorkflowStep::new("send opening query", StepAction::Fill { submit: true }, prompt_field(), t.events)
                .config(ConfigKey::UserQuery)
                .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new(
                "termination request question",
                StepAction::Expect,
                says("proceed question", r"would you like to proceed with the termination request\?"),
                t.prompt,
            ),
            WorkflowStep::new("proceed with request", StepAction::Click, proceed_with_request(), t.prompt)
                .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new(
                "termination mode question",
                StepAction::Expect,
                says("mode question", r"how would you like to proceed with the termination\?"),
                t.prompt,
            ),
            WorkflowStep::new(
                "terminate immediately",
                StepAction::Click,
                Intent::new("Terminate immediately").role("button", "terminate immediately"),
                t.prompt,
            )
            .when(Immediate)
            .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new(
                "terminate for a future date",
                StepAction::Click,
                Intent::new("Terminate for a future date").role("button", "terminate for a future date"),
                t.prompt,
            )
            .when(FutureDate)
            .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new(
                "termination date question",
                StepAction::Expect,
                says("date question", "capture the new contract termination date"),
                t.grid,
            )
            .when(FutureDate),
            WorkflowStep::new("date section ready", StepAction::Expect, proceed(), t.grid).when(FutureDate),
            WorkflowStep::new("termination date", StepAction::PickDate, Intent::new("termination date"), t.action)
                .when(FutureDate),
            WorkflowStep::new("confirm date", StepAction::Click, proceed(), t.grid)
                .when(FutureDate)
                .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new(
                "termination reason question",
                StepAction::Expect,
                says("reason question", r"what is the reason for terminating this contract\?"),
                t.prompt,
            ),
            WorkflowStep::new(
                "termination reason",
                StepAction::Choose {
                    fallbacks: vec![Intent::new("Termination for cause").role("button", "termination for cause")],
                    strict: true,
                },
                first_enabled,
                t.prompt,
            )
            .config(ConfigKey::ReasonTerminate)
            .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new(
                "create request question",
                StepAction::Expect,
                says("create question", r"would you like to create the project request with these details\?"),
                t.prompt,
            ),
            WorkflowStep::new("create request", StepAction::Click, create_request(), t.prompt)
                .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new("send for validation", StepAction::Expect, send_for_validation(), t.prompt),
        ],
    )
}

/// Agents 4 and 5: send the configured query and wait for the assistant to hand the prompt back.
fn query_only(t: &Timeouts) -> Workflow {
    Workflow::new(
        "query",
        vec![
            WorkflowStep::new("send opening query", StepAction::Fill { submit: true }, prompt_field(), t.events)
                .config(ConfigKey::UserQuery)
                .sync(EventSyncPolicy::BestEffort),
            WorkflowStep::new("prompt ready", StepAction::Expect, prompt_field(), t.prompt),
        ],
    )
}
