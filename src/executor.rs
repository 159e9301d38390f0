//! Step executor: performs one user action against a resolved element, with
//! bounded fallbacks for the flaky parts of the UI.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Timeouts;
use crate::driver::{ClickOptions, Driver, Handle, Scope};
use crate::error::{FlowError, Soft};
use crate::intent::{fuzzy_matches, Intent};
use crate::resolver::Resolver;
use crate::wait::{wait_until, Check, Poll, Waiter};

/// Dropdown choice: 1-based position or fuzzy option text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionChoice {
    Index(usize),
    Text(String),
}

impl OptionChoice {
    /// Numeric input selects by position (clamped to at least 1), anything
    /// else by text, blank falls back to `default_index`.
    pub fn parse(raw: Option<&str>, default_index: usize) -> Self {
        let v = raw.map(str::trim).unwrap_or("");
        if v.is_empty() {
            OptionChoice::Index(default_index.max(1))
        } else if v.chars().all(|c| c.is_ascii_digit()) {
            OptionChoice::Index(v.parse::<usize>().unwrap_or(1).max(1))
        } else {
            OptionChoice::Text(v.to_string())
        }
    }

    fn describe(&self) -> String {
        match self {
            OptionChoice::Index(i) => format!("option #{i}"),
            OptionChoice::Text(t) => format!("option {t:?}"),
        }
    }
}

/// Where a dropdown renders its options and how it signals loading.
#[derive(Clone, Debug)]
pub struct SelectPolicy {
    pub options: Intent,
    pub loader: Intent,
    pub max_attempts: usize,
}

impl Default for SelectPolicy {
    fn default() -> Self {
        Self {
            options: Intent::new("dropdown options")
                .any_role("option")
                .css(".cdk-overlay-pane mat-option, .mat-select-panel mat-option, .mat-option, .dropdown-item")
                .any_role("menuitem"),
            loader: Intent::new("loading indicator")
                .any_role("progressbar")
                .css("[aria-busy=\"true\"]")
                .css(".spinner, .loading, .loader, .mat-progress-spinner, .mat-spinner"),
            max_attempts: 6,
        }
    }
}

const CHEVRON_INSET: f64 = 12.0;
const TOGGLE_SETTLE: Duration = Duration::from_millis(150);
const OPEN_BACKOFF: Duration = Duration::from_millis(350);
const ANCESTOR_DEPTH: usize = 8;

#[derive(Clone)]
pub struct Executor {
    driver: Arc<dyn Driver>,
    resolver: Resolver,
    waiter: Waiter,
    timeouts: Timeouts,
}

impl Executor {
    pub fn new(driver: Arc<dyn Driver>, resolver: Resolver, waiter: Waiter, timeouts: Timeouts) -> Self {
        Self { driver, resolver, waiter, timeouts }
    }

    /// Click with escalating fallbacks: regular click once enabled, forced
    /// click, then a pointer click at the element's centre.
    pub async fn click(&self, handle: &Handle) -> Result<(), FlowError> {
        let regular = match self.waiter.enabled(handle, self.timeouts.action).await {
            Ok(()) => self.driver.click(handle, ClickOptions::default()).await.map_err(FlowError::from),
            Err(e) => Err(e),
        };
        let err = match regular {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!(element = %handle.id, error = %err, "click failed; retrying with force");
        self.force_click(handle).await
    }

    /// Forced click, falling back to a pointer click at the centre.
    pub async fn force_click(&self, handle: &Handle) -> Result<(), FlowError> {
        let err = match self.driver.click(handle, ClickOptions { force: true }).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!(element = %handle.id, error = %err, "forced click failed; clicking element centre");
        match self.driver.bounding_box(handle).await? {
            Some(rect) => {
                let (x, y) = rect.center();
                self.driver.mouse_click(x, y).await?;
                Ok(())
            }
            None => Err(err.into()),
        }
    }

    /// Resolve a visible element for `intent` and click it.
    pub async fn click_intent(&self, intent: &Intent, timeout: Duration) -> Result<Handle, FlowError> {
        let handle = self.waiter.visible(intent, timeout).await?;
        self.click(&handle).await?;
        Ok(handle)
    }

    /// Set a field's value and optionally submit it with Enter. Submission is
    /// best-effort since some fields submit on blur.
    pub async fn fill(&self, handle: &Handle, text: &str, submit: bool) -> Result<(), FlowError> {
        self.driver.click(handle, ClickOptions::default()).await.soft("focus field");
        self.driver.fill(handle, text).await?;
        if submit {
            self.driver.press(Some(handle), "Enter").await.soft("submit with Enter");
        }
        Ok(())
    }

    /// Click on empty page space to close overlays.
    pub async fn dismiss(&self) {
        self.driver.mouse_click(10.0, 10.0).await.soft("dismiss overlay");
    }

    /// Open a dropdown and pick an option.
    pub async fn select(&self, field: &Handle, choice: &OptionChoice, policy: &SelectPolicy) -> Result<String, FlowError> {
        let mut options = Vec::new();
        for attempt in 0..policy.max_attempts {
            self.toggle(field).await;
            self.driver.press(None, "Enter").await.soft("open dropdown with Enter");
            self.wait_loader(policy).await;
            self.toggle(field).await;

            options = self.resolver.probe(&policy.options).await.unwrap_or_default();
            if !options.is_empty() {
                debug!(attempt, options = options.len(), "dropdown open");
                break;
            }
            sleep(OPEN_BACKOFF).await;
        }
        if options.is_empty() {
            options = self
                .waiter
                .present(&policy.options, self.timeouts.action)
                .await
                .map_err(|_| FlowError::OptionNotFound { target: choice.describe() })?;
        }

        let pick = match choice {
            OptionChoice::Index(i) => options.get(i.saturating_sub(1).min(options.len() - 1)).cloned(),
            OptionChoice::Text(wanted) => {
                let mut found = None;
                for h in &options {
                    let text = self.driver.text(h).await.unwrap_or_default();
                    if fuzzy_matches(&text, wanted) {
                        found = Some(h.clone());
                        break;
                    }
                }
                found
            }
        };
        let pick = pick.ok_or_else(|| FlowError::OptionNotFound { target: choice.describe() })?;
        let label = self.driver.text(&pick).await.unwrap_or_default();
        self.click(&pick).await?;
        info!(choice = %choice.describe(), picked = %label.trim(), "dropdown option selected");
        Ok(label.trim().to_string())
    }

    /// Click the chevron area on the right edge of a field.
    async fn toggle(&self, field: &Handle) {
        match self.driver.bounding_box(field).await {
            Ok(Some(rect)) => {
                let x = rect.x + rect.width - CHEVRON_INSET;
                let y = rect.y + rect.height / 2.0;
                self.driver.mouse_click(x, y).await.soft("click dropdown chevron");
            }
            _ => {
                self.driver.click(field, ClickOptions::default()).await.soft("click dropdown field");
            }
        }
        sleep(TOGGLE_SETTLE).await;
    }

    async fn wait_loader(&self, policy: &SelectPolicy) {
        if self.waiter.visible_now(&policy.loader).await.is_some() {
            self.waiter.hidden(&policy.loader, self.timeouts.dropdown).await.soft("dropdown loading");
        }
    }

    /// Click an enabled "Yes" belonging to the question card around `question`.
    /// Earlier answered cards stay in the page with disabled buttons, so the
    /// search walks up from the question before falling back to the page.
    pub async fn answer_yes(&self, question: &Handle) -> Result<(), FlowError> {
        let yes = yes_button();
        let mut cursor = question.clone();
        for _ in 0..ANCESTOR_DEPTH {
            cursor = match self.driver.parent(&cursor).await? {
                Some(p) => p,
                None => break,
            };
            let candidates = self.resolver.probe_in(&yes, &Scope::within(&cursor)).await.unwrap_or_default();
            for h in candidates {
                if self.driver.is_visible(&h).await.unwrap_or(false) {
                    debug!(card = %cursor.id, button = %h.id, "answering yes inside question card");
                    return self.force_click(&h).await;
                }
            }
        }
        let global = self.waiter.visible(&yes, self.timeouts.confirm).await?;
        self.force_click(&global).await
    }

    /// Tick the first selectable row of a grid.
    pub async fn check_first_row(&self, grid: &Handle, rows: &Intent) -> Result<(), FlowError> {
        let scope = Scope::within(grid);
        let resolver = &self.resolver;
        let scope_ref = &scope;
        let rows_found = wait_until(Poll::new(self.timeouts.grid), move || async move {
            match resolver.probe_in(rows, scope_ref).await {
                Ok(found) if !found.is_empty() => Check::Ready(found),
                _ => Check::NotReady(None),
            }
        })
        .await
        .require("selectable grid rows")?;

        let row = &rows_found[0];
        let checkbox = Intent::new("row checkbox")
            .any_role("checkbox")
            .css("input[type=\"checkbox\"]")
            .css("[role=\"checkbox\"]");
        let boxes = self.resolver.probe_in(&checkbox, &Scope::within(row)).await.unwrap_or_default();
        if let Some(cb) = boxes.first() {
            if self.driver.click(cb, ClickOptions { force: true }).await.is_ok() {
                return Ok(());
            }
        }
        warn!(row = %row.id, "row checkbox not clickable; selecting the row instead");
        self.driver.click(row, ClickOptions { force: true }).await?;
        self.driver.press(None, "Space").await.soft("select row with Space");
        Ok(())
    }
}

pub fn yes_button() -> Intent {
    Intent::new("enabled Yes button")
        .role("button", r"^\s*yes\s*$")
        .css("button")
        .has_text(r"\byes\b")
        .enabled_only()
}
