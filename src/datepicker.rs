//! Year-paging calendar navigation.
//!
//! The picker opens on the current month. It is switched to the multi-year
//! view, paged until the target year is on screen, then the year, month and
//! day cells are clicked in turn.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{FlowError, Soft};
use crate::harness::Harness;
use crate::intent::{Intent, TextPattern};

pub const MAX_PAGE_TURNS: usize = 30;
const PERIOD_SWITCHES: usize = 2;
const OPEN_WAIT: Duration = Duration::from_secs(5);
const PAGE_SETTLE: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatePickerState {
    Closed,
    Open,
    YearPaged,
    YearSelected,
    MonthSelected,
    DaySelected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalendarHeader {
    /// Multi-year view, inclusive bounds.
    Range(i32, i32),
    /// Month or year view.
    Single(i32),
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageMove {
    Previous,
    Next,
    /// Target inside the shown range but its cell is missing.
    Stuck,
}

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})\s*[–-]\s*(\d{4})").unwrap_or_else(|e| panic!("{e}")))
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})").unwrap_or_else(|e| panic!("{e}")))
}

pub fn parse_header(text: &str) -> CalendarHeader {
    if let Some(c) = range_re().captures(text) {
        if let (Ok(a), Ok(b)) = (c[1].parse(), c[2].parse()) {
            return CalendarHeader::Range(a, b);
        }
    }
    match year_re().captures(text).and_then(|c| c[1].parse().ok()) {
        Some(y) => CalendarHeader::Single(y),
        None => CalendarHeader::Unknown,
    }
}

pub fn plan_page(header: CalendarHeader, year: i32) -> PageMove {
    match header {
        CalendarHeader::Range(a, _) if year < a => PageMove::Previous,
        CalendarHeader::Range(_, b) if year > b => PageMove::Next,
        CalendarHeader::Range(..) => PageMove::Stuck,
        CalendarHeader::Single(y) if year < y => PageMove::Previous,
        CalendarHeader::Single(_) => PageMove::Next,
        CalendarHeader::Unknown => PageMove::Previous,
    }
}

fn openers() -> Vec<Intent> {
    vec![
        Intent::new("date text dd/mm/yyyy").text("dd/mm/yyyy"),
        Intent::new("date input by placeholder").css("[placeholder*=\"DD/MM/YYYY\"]"),
        Intent::new("date-like input").css("input[placeholder*=\"date\" i]"),
        Intent::new("Date field by label").label(r"^\*?\s*Date$"),
        Intent::new("datepicker toggle").css("mat-datepicker-toggle"),
    ]
}

fn calendar() -> Intent {
    Intent::new("calendar").css(".mat-calendar, .cdk-overlay-pane, .mat-datepicker-content")
}

fn period_button() -> Intent {
    Intent::new("calendar period button").css(".mat-calendar-period-button")
}

fn cell(what: &str, text: &str) -> Intent {
    Intent::new(format!("{what} cell {text}"))
        .css(".mat-calendar-body-cell")
        .has_text(TextPattern::exact(text))
}

fn day_cell(date: NaiveDate) -> Intent {
    let aria = format!(r"^\s*{}\s+{}\s*,\s*{}\s*$", date.format("%B"), date.day(), date.year());
    cell("day", &date.day().to_string()).label(TextPattern::new(&aria))
}

pub struct DatePicker<'a> {
    h: &'a Harness,
}

impl<'a> DatePicker<'a> {
    pub fn new(h: &'a Harness) -> Self {
        Self { h }
    }

    /// Pick `date`, returning the states visited.
    pub async fn pick(&self, date: NaiveDate) -> Result<Vec<DatePickerState>, FlowError> {
        let mut trail = Vec::new();
        let target = date.format("%Y-%m-%d").to_string();

        self.open().await?;
        trail.push(DatePickerState::Open);

        let year_cell = cell("year", &date.year().to_string());
        self.multi_year_view(&year_cell).await;
        trail.push(DatePickerState::YearPaged);

        let mut turns = 0;
        let year = loop {
            if let Some(h) = self.h.waiter.visible_now(&year_cell).await {
                break h;
            }
            if turns >= MAX_PAGE_TURNS {
                return Err(FlowError::DateNotReachable { target, attempts: turns });
            }
            let header = self.header().await;
            let step = plan_page(header, date.year());
            debug!(?header, ?step, turn = turns, "paging calendar");
            let button = match step {
                PageMove::Previous => Intent::new("calendar previous").css(".mat-calendar-previous-button"),
                PageMove::Next => Intent::new("calendar next").css(".mat-calendar-next-button"),
                PageMove::Stuck => {
                    warn!(?header, year = date.year(), "year inside the shown range but no cell");
                    return Err(FlowError::DateNotReachable { target, attempts: turns });
                }
            };
            self.h.exec.click_intent(&button, self.h.timeouts.action).await?;
            turns += 1;
            sleep(PAGE_SETTLE).await;
        };
        self.h.exec.click(&year).await?;
        trail.push(DatePickerState::YearSelected);

        let month = date.format("%b").to_string().to_uppercase();
        self.h.exec.click_intent(&cell("month", &month), self.h.timeouts.action).await?;
        trail.push(DatePickerState::MonthSelected);

        self.h.exec.click_intent(&day_cell(date), self.h.timeouts.action).await?;
        trail.push(DatePickerState::DaySelected);

        self.h.driver.press(None, "Escape").await.soft("close calendar");
        trail.push(DatePickerState::Closed);
        info!(date = %target, page_turns = turns, "date picked");
        Ok(trail)
    }

    async fn open(&self) -> Result<(), FlowError> {
        let cal = calendar();
        let mut tried = Vec::new();
        for opener in openers() {
            tried.push(opener.name().to_string());
            let Some(handle) = self.h.waiter.visible_now(&opener).await else {
                continue;
            };
            if self.h.exec.click(&handle).await.soft("open date picker").is_none() {
                continue;
            }
            if self.h.waiter.visible(&cal, OPEN_WAIT).await.is_ok() {
                debug!(opener = %opener, "calendar open");
                return Ok(());
            }
        }
        Err(FlowError::ElementNotFound { intent: "date picker".into(), tried: tried.join(" > ") })
    }

    /// Switch to the multi-year view unless the target year is already shown.
    async fn multi_year_view(&self, year_cell: &Intent) {
        for _ in 0..PERIOD_SWITCHES {
            if matches!(self.header().await, CalendarHeader::Range(..))
                || self.h.waiter.visible_now(year_cell).await.is_some()
            {
                return;
            }
            match self.h.waiter.visible_now(&period_button()).await {
                Some(b) => {
                    self.h.exec.click(&b).await.soft("switch calendar to multi-year view");
                }
                None => return,
            }
            sleep(PAGE_SETTLE).await;
        }
    }

    async fn header(&self) -> CalendarHeader {
        match self.h.waiter.visible_now(&period_button()).await {
            Some(b) => parse_header(&self.h.driver.text(&b).await.unwrap_or_default()),
            None => CalendarHeader::Unknown,
        }
    }
}
