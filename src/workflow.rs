//! Declarative step tables and the machine that runs them.
//!
//! Each agent is a [`Workflow`]: an ordered list of [`WorkflowStep`]s. The
//! runner walks the table, gating every transition on a required wait, and
//! produces a [`RunReport`]. Branching is expressed with step guards against
//! the run's [`TerminationMode`].

use std::sync::Arc;
use std::time::Duration;

use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::EnvConfig;
use crate::datepicker::{DatePicker, DatePickerState};
use crate::error::{FlowError, Soft};
use crate::events::SyncState;
use crate::executor::{OptionChoice, SelectPolicy};
use crate::harness::Harness;
use crate::intent::{Intent, TextPattern};
use crate::report::{ArtifactStore, FlowState, RunMetrics, RunReport, RunStatus, StepLog, StepOutcome};
use crate::wait::RaceArm;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationMode {
    Immediate,
    FutureDate,
}

impl TerminationMode {
    /// Recognised spellings of `TERMINATION_STATUS`; anything else is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "future" | "future date" | "terminate for a future date" => Some(TerminationMode::FutureDate),
            "immediate" | "terminate immediately" => Some(TerminationMode::Immediate),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigKey {
    /// The running agent's own opening query.
    UserQuery,
    ReasonOffboard,
    ReasonAmend,
    ReasonTerminate,
}

/// Text a step types or chooses. Never inline reason text in a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Literal(String),
    Config(ConfigKey),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Guard {
    Always,
    Mode(TerminationMode),
}

impl Guard {
    fn allows(&self, mode: TerminationMode) -> bool {
        match self {
            Guard::Always => true,
            Guard::Mode(m) => *m == mode,
        }
    }
}

/// What to do with the "AI Events" badge after a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSyncPolicy {
    None,
    BestEffort,
    Required,
}

#[derive(Clone, Debug)]
pub enum StepAction {
    /// Fill the field with the payload, optionally pressing Enter.
    Fill { submit: bool },
    Click,
    /// Wait for the element (usually assistant text) to show up.
    Expect,
    /// Dropdown choice from the payload: number = 1-based index, text = fuzzy.
    Select { default_index: usize },
    /// Answer "Yes" to the question matched by the step intent.
    AnswerYes,
    /// Tick the first selectable row of the grid matched by the step intent.
    CheckFirstRow { rows: Intent },
    /// Race the step intent against `rival`; click the intent only if it wins.
    ClickIfFirst { rival: Intent },
    /// Click the configured choice, else a fallback, else the step intent.
    /// `strict` requires the configured choice to appear.
    Choose { fallbacks: Vec<Intent>, strict: bool },
    /// Enter the configured termination date through the calendar.
    PickDate,
    /// Click empty space to close overlays.
    Dismiss,
}

impl StepAction {
    pub fn name(&self) -> &'static str {
        match self {
            StepAction::Fill { .. } => "fill",
            StepAction::Click => "click",
            StepAction::Expect => "expect",
            StepAction::Select { .. } => "select",
            StepAction::AnswerYes => "answer_yes",
            StepAction::CheckFirstRow { .. } => "check_first_row",
            StepAction::ClickIfFirst { .. } => "click_if_first",
            StepAction::Choose { .. } => "choose",
            StepAction::PickDate => "pick_date",
            StepAction::Dismiss => "dismiss",
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkflowStep {
    pub label: String,
    pub intent: Intent,
    /// Tried in order after `intent` when locating the step's element.
    pub alternates: Vec<Intent>,
    pub action: StepAction,
    pub payload: Option<Payload>,
    pub timeout: Duration,
    pub guard: Guard,
    pub sync: EventSyncPolicy,
    /// A failure is logged and the run continues.
    pub soft: bool,
}

impl WorkflowStep {
    pub fn new(label: impl Into<String>, action: StepAction, intent: Intent, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            intent,
            alternates: Vec::new(),
            action,
            payload: None,
            timeout,
            guard: Guard::Always,
            sync: EventSyncPolicy::None,
            soft: false,
        }
    }

    pub fn or(mut self, alternate: Intent) -> Self {
        self.alternates.push(alternate);
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn literal(self, text: &str) -> Self {
        self.payload(Payload::Literal(text.to_string()))
    }

    pub fn config(self, key: ConfigKey) -> Self {
        self.payload(Payload::Config(key))
    }

    pub fn when(mut self, mode: TerminationMode) -> Self {
        self.guard = Guard::Mode(mode);
        self
    }

    pub fn sync(mut self, policy: EventSyncPolicy) -> Self {
        self.sync = policy;
        self
    }

    pub fn soft(mut self) -> Self {
        self.soft = true;
        self
    }
}

#[derive(Clone, Debug)]
pub struct Workflow {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    /// Mode that overrides configuration; a conflicting configured mode is rejected.
    pub forced_mode: Option<TerminationMode>,
    pub default_mode: TerminationMode,
}

impl Workflow {
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self { name: name.into(), steps, forced_mode: None, default_mode: TerminationMode::FutureDate }
    }

    pub fn force_mode(mut self, mode: TerminationMode) -> Self {
        self.forced_mode = Some(mode);
        self
    }

    pub fn resolve_mode(&self, configured: Option<&str>) -> Result<TerminationMode, FlowError> {
        let parsed = match configured.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => {
                let mode = TerminationMode::parse(raw);
                if mode.is_none() {
                    warn!(value = raw, workflow = %self.name, "unrecognised TERMINATION_STATUS; using default");
                }
                mode
            }
            None => None,
        };
        match (self.forced_mode, parsed) {
            (Some(forced), Some(wanted)) if forced != wanted => Err(FlowError::Config(format!(
                "{} only supports {:?} termination, TERMINATION_STATUS asks for {:?}",
                self.name, forced, wanted
            ))),
            (Some(forced), _) => Ok(forced),
            (None, parsed) => Ok(parsed.unwrap_or(self.default_mode)),
        }
    }

    /// Steps that would run under `mode`, in order.
    pub fn plan(&self, mode: TerminationMode) -> Vec<&WorkflowStep> {
        self.steps.iter().filter(|s| s.guard.allows(mode)).collect()
    }
}

/// Identity of one agent run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_name: String,
    /// 0-based position among the five agents.
    pub agent_index: usize,
}

/// Mutable state threaded through a run.
#[derive(Default)]
struct RunContext {
    sync: SyncState,
    date_trail: Vec<DatePickerState>,
}

pub struct WorkflowRunner<'a> {
    h: &'a Harness,
    cfg: &'a EnvConfig,
    artifacts: Option<Arc<dyn ArtifactStore>>,
}

impl<'a> WorkflowRunner<'a> {
    pub fn new(h: &'a Harness, cfg: &'a EnvConfig) -> Self {
        Self { h, cfg, artifacts: None }
    }

    pub fn with_artifacts(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub async fn run(&self, workflow: &Workflow, ctx: &AgentContext) -> RunReport {
        let run_id = nanoid!();
        let start = Instant::now();
        let mut run = RunContext::default();
        let mut steps: Vec<StepLog> = Vec::new();
        let mut metrics = RunMetrics::default();
        info!(run_id = %run_id, agent = %ctx.agent_name, workflow = %workflow.name, "run started");

        let mode = match workflow.resolve_mode(self.cfg.termination_status.as_deref()) {
            Ok(m) => m,
            Err(e) => {
                return self.finish(run_id, workflow, ctx, steps, metrics, run, FlowState::Failed(0), Some(e), start).await;
            }
        };

        for (i, step) in workflow.steps.iter().enumerate() {
            let mut log = StepLog {
                step: i,
                label: step.label.clone(),
                action: step.action.name().to_string(),
                outcome: StepOutcome::Done,
                detail: None,
                events: None,
                error: None,
                elapsed_ms: 0,
            };
            if !step.guard.allows(mode) {
                log.outcome = StepOutcome::Skipped;
                metrics.skipped += 1;
                steps.push(log);
                continue;
            }

            info!(run_id = %run_id, step = i, label = %step.label, action = step.action.name(), "step");
            let result = self.execute(step, ctx, &mut run).await;
            metrics.steps += 1;
            log.elapsed_ms = start.elapsed().as_millis();
            log.events = run.sync.last_count;

            match result {
                Ok(detail) => {
                    log.detail = detail;
                    steps.push(log);
                }
                Err(e) if step.soft => {
                    warn!(run_id = %run_id, step = i, label = %step.label, error = %e, "optional step failed");
                    log.outcome = StepOutcome::Tolerated;
                    log.error = Some(e.to_string());
                    steps.push(log);
                }
                Err(e) => {
                    error!(run_id = %run_id, step = i, label = %step.label, error = %e, "step failed");
                    log.outcome = StepOutcome::Failed;
                    log.error = Some(e.to_string());
                    steps.push(log);
                    return self.finish(run_id, workflow, ctx, steps, metrics, run, FlowState::Failed(i), Some(e), start).await;
                }
            }
        }

        self.finish(run_id, workflow, ctx, steps, metrics, run, FlowState::ReadyToSubmit, None, start).await
    }

    async fn execute(&self, step: &WorkflowStep, ctx: &AgentContext, run: &mut RunContext) -> Result<Option<String>, FlowError> {
        let h = self.h;
        let detail = match &step.action {
            StepAction::Fill { submit } => {
                let text = self
                    .payload(step, ctx)
                    .ok_or_else(|| FlowError::Config(format!("step {:?} has no text to fill", step.label)))?;
                let field = self.locate(step).await?;
                h.exec.fill(&field, &text, *submit).await?;
                Some(text)
            }
            StepAction::Click => {
                let target = self.locate(step).await?;
                h.exec.click(&target).await?;
                None
            }
            StepAction::Expect => {
                self.locate(step).await?;
                None
            }
            StepAction::Select { default_index } => {
                let field = self.locate(step).await?;
                let choice = OptionChoice::parse(self.payload(step, ctx).as_deref(), *default_index);
                Some(h.exec.select(&field, &choice, &SelectPolicy::default()).await?)
            }
            StepAction::AnswerYes => {
                let question = self.locate(step).await?;
                h.exec.answer_yes(&question).await?;
                None
            }
            StepAction::CheckFirstRow { rows } => {
                let grid = self.locate(step).await?;
                h.exec.check_first_row(&grid, rows).await?;
                None
            }
            StepAction::ClickIfFirst { rival } => {
                let arms = [RaceArm::new(step.intent.clone(), step.timeout), RaceArm::new(rival.clone(), step.timeout)];
                match h.waiter.race(&arms).await {
                    Some((0, target)) => {
                        h.exec.click(&target).await?;
                        Some(format!("clicked {}", step.intent))
                    }
                    Some((_, _)) => Some(format!("{rival} came first")),
                    None => {
                        return Err(FlowError::Timeout {
                            condition: format!("{} or {}", step.intent, rival),
                            elapsed_ms: step.timeout.as_millis(),
                            last_observed: None,
                        })
                    }
                }
            }
            StepAction::Choose { fallbacks, strict } => Some(self.choose(step, ctx, fallbacks, *strict).await?),
            StepAction::PickDate => {
                let trail = DatePicker::new(h).pick(self.cfg.termination_date).await?;
                run.date_trail = trail;
                Some(self.cfg.termination_date.to_string())
            }
            StepAction::Dismiss => {
                h.exec.dismiss().await;
                None
            }
        };

        match step.sync {
            EventSyncPolicy::None => {}
            EventSyncPolicy::BestEffort => {
                h.events.sync(&mut run.sync).await.soft("ai events sync");
            }
            EventSyncPolicy::Required => {
                h.events.sync(&mut run.sync).await?;
            }
        }
        Ok(detail)
    }

    /// First visible element among the step intent and its alternates.
    async fn locate(&self, step: &WorkflowStep) -> Result<crate::driver::Handle, FlowError> {
        if step.alternates.is_empty() {
            return self.h.waiter.visible(&step.intent, step.timeout).await;
        }
        let mut intents = Vec::with_capacity(step.alternates.len() + 1);
        intents.push(step.intent.clone());
        intents.extend(step.alternates.iter().cloned());
        let (_, handle) = self.h.waiter.first_visible(&intents, step.timeout).await?;
        Ok(handle)
    }

    async fn choose(
        &self,
        step: &WorkflowStep,
        ctx: &AgentContext,
        fallbacks: &[Intent],
        strict: bool,
    ) -> Result<String, FlowError> {
        let h = self.h;
        if let Some(wanted) = self.payload(step, ctx) {
            let configured = Intent::new(format!("configured choice {wanted:?}"))
                .role("button", TextPattern::loose(&wanted))
                .css("button")
                .has_text(TextPattern::loose(&wanted));
            if strict {
                h.exec.click_intent(&configured, step.timeout).await?;
                return Ok(wanted);
            }
            self.locate(step).await?;
            if let Some(target) = h.waiter.visible_now(&configured).await {
                h.exec.click(&target).await?;
                return Ok(wanted);
            }
            warn!(wanted = %wanted, step = %step.label, "configured choice not offered; using default");
        }
        for fallback in fallbacks {
            if let Some(target) = h.waiter.visible_now(fallback).await {
                let text = h.driver.text(&target).await.unwrap_or_default();
                h.exec.click(&target).await?;
                return Ok(text.trim().to_string());
            }
        }
        let target = self.locate(step).await?;
        let text = h.driver.text(&target).await.unwrap_or_default();
        h.exec.click(&target).await?;
        Ok(text.trim().to_string())
    }

    fn payload(&self, step: &WorkflowStep, ctx: &AgentContext) -> Option<String> {
        match step.payload.as_ref()? {
            Payload::Literal(text) => Some(text.clone()),
            Payload::Config(key) => match key {
                ConfigKey::UserQuery => self.cfg.user_queries.get(ctx.agent_index).cloned(),
                ConfigKey::ReasonOffboard => self.cfg.reason_offboard.clone(),
                ConfigKey::ReasonAmend => self.cfg.reason_amend.clone(),
                ConfigKey::ReasonTerminate => self.cfg.reason_terminate.clone(),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        run_id: String,
        workflow: &Workflow,
        ctx: &AgentContext,
        steps: Vec<StepLog>,
        mut metrics: RunMetrics,
        run: RunContext,
        state: FlowState,
        err: Option<FlowError>,
        start: Instant,
    ) -> RunReport {
        metrics.time_ms = start.elapsed().as_millis();
        metrics.success = err.is_none();
        let status = match &err {
            None => RunStatus::Success,
            Some(e) if e.is_timeout() => RunStatus::Timeout,
            Some(_) => RunStatus::Error,
        };
        let mut report = RunReport {
            run_id,
            agent: ctx.agent_name.clone(),
            workflow: workflow.name.clone(),
            status,
            state,
            metrics,
            steps,
            sync: run.sync,
            date_picker: run.date_trail,
            error: err,
            screenshot: None,
        };

        if let Some(store) = &self.artifacts {
            if report.error.is_some() {
                if let Some(image) = self.h.driver.screenshot_b64().await.soft("failure screenshot") {
                    report.screenshot = store.save_screenshot(&report.run_id, "failure.png", &image).await.soft("save failure screenshot");
                }
            }
            store.save_report(&report).await.soft("save run report");
        }
        info!(run_id = %report.run_id, agent = %report.agent, status = ?report.status, state = ?report.state, "run finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Workflow {
        let t = Duration::from_secs(1);
        Workflow::new(
            "terminate",
            vec![
                WorkflowStep::new("mode prompt", StepAction::Expect, Intent::new("mode prompt").text("how would you like"), t),
                WorkflowStep::new("now", StepAction::Click, Intent::new("now").role("button", "now"), t)
                    .when(TerminationMode::Immediate),
                WorkflowStep::new("later", StepAction::Click, Intent::new("later").role("button", "later"), t)
                    .when(TerminationMode::FutureDate),
                WorkflowStep::new("date", StepAction::PickDate, Intent::new("date"), t).when(TerminationMode::FutureDate),
            ],
        )
    }

    #[test]
    fn termination_mode_spellings() {
        assert_eq!(TerminationMode::parse(" Future Date "), Some(TerminationMode::FutureDate));
        assert_eq!(TerminationMode::parse("terminate for a future date"), Some(TerminationMode::FutureDate));
        assert_eq!(TerminationMode::parse("TERMINATE IMMEDIATELY"), Some(TerminationMode::Immediate));
        assert_eq!(TerminationMode::parse("tomorrow"), None);
    }

    #[test]
    fn configured_mode_with_default() {
        let wf = table();
        assert_eq!(wf.resolve_mode(None).unwrap(), TerminationMode::FutureDate);
        assert_eq!(wf.resolve_mode(Some("immediate")).unwrap(), TerminationMode::Immediate);
        assert_eq!(wf.resolve_mode(Some("sometime")).unwrap(), TerminationMode::FutureDate);
    }

    #[test]
    fn forced_mode_rejects_conflicting_configuration() {
        let wf = table().force_mode(TerminationMode::Immediate);
        assert_eq!(wf.resolve_mode(None).unwrap(), TerminationMode::Immediate);
        assert_eq!(wf.resolve_mode(Some("terminate immediately")).unwrap(), TerminationMode::Immediate);
        assert!(matches!(wf.resolve_mode(Some("future")), Err(FlowError::Config(_))));
    }

    #[test]
    fn guards_remove_branch_steps() {
        let wf = table();
        let labels = |mode| wf.plan(mode).iter().map(|s| s.label.clone()).collect::<Vec<_>>();
        assert_eq!(labels(TerminationMode::Immediate), vec!["mode prompt", "now"]);
        assert_eq!(labels(TerminationMode::FutureDate), vec!["mode prompt", "later", "date"]);
    }
}
