//! In-memory driver for exercising workflows without a browser.
//!
//! The page is a flat list of [`Node`]s in document order with parent links.
//! Interactions are recorded as [`DriverCall`]s and can trigger scripted
//! [`Reaction`]s that mutate the page, which is how tests emulate the
//! assistant answering. CSS support is limited to exact selector tags: a
//! selector list matches a node when any comma-separated part is one of the
//! node's `selectors`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Datelike, NaiveDate};

use crate::driver::{By, ClickOptions, Driver, DriverError, FrameId, Handle, Query, Rect, Scope};
use crate::session::SessionState;

pub type Reaction = Arc<dyn Fn(&mut Dom) + Send + Sync>;

#[derive(Clone, Debug, Default)]
pub struct Node {
    pub id: String,
    pub parent: Option<String>,
    pub frame: Option<String>,
    pub role: Option<String>,
    pub name: Option<String>,
    pub label: Option<String>,
    pub placeholder: Option<String>,
    pub selectors: Vec<String>,
    pub text: String,
    pub value: String,
    pub visible: bool,
    pub enabled: bool,
    pub rect: Option<Rect>,
    /// Regular clicks fail as if the element were covered.
    pub blocked: bool,
    /// Forced clicks fail too; only coordinate clicks get through.
    pub inert: bool,
}

impl Node {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string(), visible: true, enabled: true, ..Default::default() }
    }

    pub fn parent(mut self, id: &str) -> Self {
        self.parent = Some(id.to_string());
        self
    }

    pub fn frame(mut self, frame: &str) -> Self {
        self.frame = Some(frame.to_string());
        self
    }

    pub fn role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    /// Accessible name; also used as text when none is set.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        if self.text.is_empty() {
            self.text = name.to_string();
        }
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn placeholder(mut self, placeholder: &str) -> Self {
        self.placeholder = Some(placeholder.to_string());
        self
    }

    pub fn css(mut self, selector: &str) -> Self {
        self.selectors.push(selector.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = Some(Rect { x, y, width, height });
        self
    }

    pub fn blocked(mut self) -> Self {
        self.blocked = true;
        self
    }

    pub fn inert(mut self) -> Self {
        self.blocked = true;
        self.inert = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DriverCall {
    Goto(String),
    Click { id: String, force: bool },
    MouseClick { x: f64, y: f64, hit: Option<String> },
    Fill { id: String, text: String },
    Press { id: Option<String>, key: String },
    ImportSession,
    ExportSession,
}

#[derive(Default)]
pub struct Dom {
    nodes: Vec<Node>,
    reactions: HashMap<String, Reaction>,
    calls: Vec<DriverCall>,
    url: String,
    session: SessionState,
}

impl Dom {
    pub fn add(&mut self, node: Node) {
        self.remove(&node.id.clone());
        self.nodes.push(node);
    }

    /// Remove a node and its descendants.
    pub fn remove(&mut self, id: &str) {
        let mut doomed = vec![id.to_string()];
        let mut i = 0;
        while i < doomed.len() {
            let current = doomed[i].clone();
            doomed.extend(
                self.nodes
                    .iter()
                    .filter(|n| n.parent.as_deref() == Some(current.as_str()))
                    .map(|n| n.id.clone()),
            );
            i += 1;
        }
        self.nodes.retain(|n| !doomed.contains(&n.id));
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn set_visible(&mut self, id: &str, visible: bool) {
        if let Some(n) = self.node_mut(id) {
            n.visible = visible;
        }
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) {
        if let Some(n) = self.node_mut(id) {
            n.enabled = enabled;
        }
    }

    pub fn set_text(&mut self, id: &str, text: &str) {
        if let Some(n) = self.node_mut(id) {
            n.text = text.to_string();
        }
    }

    pub fn value(&self, id: &str) -> Option<&str> {
        self.get(id).map(|n| n.value.as_str())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: &str) {
        self.url = url.to_string();
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn set_session(&mut self, state: SessionState) {
        self.session = state;
    }

    pub fn calls(&self) -> &[DriverCall] {
        &self.calls
    }

    pub fn on_click(&mut self, id: &str, reaction: impl Fn(&mut Dom) + Send + Sync + 'static) {
        self.reactions.insert(format!("click:{id}"), Arc::new(reaction));
    }

    pub fn on_fill(&mut self, id: &str, reaction: impl Fn(&mut Dom) + Send + Sync + 'static) {
        self.reactions.insert(format!("fill:{id}"), Arc::new(reaction));
    }

    /// Reaction to `key` pressed on element `id`.
    pub fn on_press(&mut self, id: &str, key: &str, reaction: impl Fn(&mut Dom) + Send + Sync + 'static) {
        self.reactions.insert(format!("press:{id}:{key}"), Arc::new(reaction));
    }

    /// Reaction to `key` pressed without a target element.
    pub fn on_key(&mut self, key: &str, reaction: impl Fn(&mut Dom) + Send + Sync + 'static) {
        self.reactions.insert(format!("press:*:{key}"), Arc::new(reaction));
    }

    pub fn on_goto(&mut self, reaction: impl Fn(&mut Dom) + Send + Sync + 'static) {
        self.reactions.insert("goto".to_string(), Arc::new(reaction));
    }

    fn fire(&mut self, key: &str) {
        if let Some(reaction) = self.reactions.get(key).cloned() {
            reaction(self);
        }
    }

    fn is_descendant(&self, id: &str, ancestor: &str) -> bool {
        let mut cur = self.get(id).and_then(|n| n.parent.clone());
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.get(&p).and_then(|n| n.parent.clone());
        }
        false
    }

    fn is_rendered(&self, id: &str) -> bool {
        let mut cur = self.get(id);
        while let Some(n) = cur {
            if !n.visible {
                return false;
            }
            cur = n.parent.as_deref().and_then(|p| self.get(p));
        }
        self.get(id).is_some()
    }

    /// Own text followed by descendant text, in document order.
    fn full_text(&self, id: &str) -> String {
        let mut parts = Vec::new();
        for n in &self.nodes {
            if (n.id == id || self.is_descendant(&n.id, id)) && !n.text.is_empty() {
                parts.push(n.text.clone());
            }
        }
        parts.join(" ")
    }

    fn matches(&self, node: &Node, query: &Query) -> bool {
        let hit = match &query.by {
            By::Role { role, name } => {
                node.role.as_deref() == Some(role.as_str())
                    && name.as_ref().map_or(true, |p| {
                        p.is_match(node.name.as_deref().unwrap_or(node.text.as_str()))
                    })
            }
            By::Label(p) => node.label.as_deref().is_some_and(|l| p.is_match(l)),
            By::Placeholder(p) => node.placeholder.as_deref().is_some_and(|l| p.is_match(l)),
            By::Css(selector) => selector
                .split(',')
                .map(str::trim)
                .any(|part| node.selectors.iter().any(|s| s == part)),
            By::Text(p) => !node.text.is_empty() && p.is_match(&node.text),
        };
        hit && query.has_text.as_ref().map_or(true, |p| p.is_match(&self.full_text(&node.id)))
            && (!query.enabled_only || node.enabled)
    }

    fn handle(&self, node: &Node) -> Handle {
        Handle::new(node.id.clone(), node.frame.clone().map(FrameId))
    }

    fn require(&self, handle: &Handle) -> Result<&Node, DriverError> {
        self.get(&handle.id).ok_or_else(|| DriverError::Detached(handle.id.clone()))
    }
}

#[derive(Default)]
pub struct ScriptedDriver {
    dom: Mutex<Dom>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Dom> {
        // a panicking reaction only poisons test state; keep going with what is there
        self.dom.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_dom<R>(&self, f: impl FnOnce(&mut Dom) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    /// Number of clicks (forced or not) an element received.
    pub fn clicks_on(&self, id: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, DriverCall::Click { id: i, .. } if i == id)
                || matches!(c, DriverCall::MouseClick { hit: Some(i), .. } if i == id))
            .count()
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let mut dom = self.lock();
        dom.calls.push(DriverCall::Goto(url.to_string()));
        dom.url = url.to_string();
        dom.fire("goto");
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.lock().url.clone())
    }

    async fn query(&self, scope: &Scope, query: &Query) -> Result<Vec<Handle>, DriverError> {
        let dom = self.lock();
        let frame = scope.frame.as_ref().map(|f| f.0.as_str());
        if let Some(within) = &scope.within {
            dom.require(within)?;
        }
        Ok(dom
            .nodes
            .iter()
            .filter(|n| n.frame.as_deref() == frame)
            .filter(|n| scope.within.as_ref().map_or(true, |w| dom.is_descendant(&n.id, &w.id)))
            .filter(|n| dom.matches(n, query))
            .map(|n| dom.handle(n))
            .collect())
    }

    async fn frames(&self) -> Result<Vec<FrameId>, DriverError> {
        let dom = self.lock();
        let mut frames: Vec<FrameId> = dom.nodes.iter().filter_map(|n| n.frame.clone().map(FrameId)).collect();
        frames.sort();
        frames.dedup();
        Ok(frames)
    }

    async fn parent(&self, handle: &Handle) -> Result<Option<Handle>, DriverError> {
        let dom = self.lock();
        let node = dom.require(handle)?;
        Ok(node.parent.as_deref().and_then(|p| dom.get(p)).map(|p| dom.handle(p)))
    }

    async fn is_visible(&self, handle: &Handle) -> Result<bool, DriverError> {
        let dom = self.lock();
        dom.require(handle)?;
        Ok(dom.is_rendered(&handle.id))
    }

    async fn is_enabled(&self, handle: &Handle) -> Result<bool, DriverError> {
        Ok(self.lock().require(handle)?.enabled)
    }

    async fn text(&self, handle: &Handle) -> Result<String, DriverError> {
        let dom = self.lock();
        dom.require(handle)?;
        Ok(dom.full_text(&handle.id))
    }

    async fn bounding_box(&self, handle: &Handle) -> Result<Option<Rect>, DriverError> {
        let dom = self.lock();
        let node = dom.require(handle)?;
        Ok(if dom.is_rendered(&handle.id) { node.rect } else { None })
    }

    async fn click(&self, handle: &Handle, opts: ClickOptions) -> Result<(), DriverError> {
        let mut dom = self.lock();
        let node = dom.require(handle)?;
        if opts.force {
            if node.inert {
                return Err(DriverError::NotActionable(format!("{} ignores synthetic clicks", node.id)));
            }
        } else if node.blocked || !node.enabled || !dom.is_rendered(&node.id) {
            return Err(DriverError::NotActionable(format!("{} is covered, hidden or disabled", node.id)));
        }
        dom.calls.push(DriverCall::Click { id: handle.id.clone(), force: opts.force });
        dom.fire(&format!("click:{}", handle.id));
        Ok(())
    }

    async fn mouse_click(&self, x: f64, y: f64) -> Result<(), DriverError> {
        let mut dom = self.lock();
        let hit = dom
            .nodes
            .iter()
            .rev()
            .find(|n| n.rect.is_some_and(|r| r.contains(x, y)) && dom.is_rendered(&n.id))
            .map(|n| n.id.clone());
        dom.calls.push(DriverCall::MouseClick { x, y, hit: hit.clone() });
        if let Some(id) = hit {
            dom.fire(&format!("click:{id}"));
        }
        Ok(())
    }

    async fn fill(&self, handle: &Handle, text: &str) -> Result<(), DriverError> {
        let mut dom = self.lock();
        dom.require(handle)?;
        if let Some(n) = dom.node_mut(&handle.id) {
            n.value = text.to_string();
        }
        dom.calls.push(DriverCall::Fill { id: handle.id.clone(), text: text.to_string() });
        dom.fire(&format!("fill:{}", handle.id));
        Ok(())
    }

    async fn press(&self, target: Option<&Handle>, key: &str) -> Result<(), DriverError> {
        let mut dom = self.lock();
        if let Some(h) = target {
            dom.require(h)?;
        }
        dom.calls.push(DriverCall::Press { id: target.map(|h| h.id.clone()), key: key.to_string() });
        match target {
            Some(h) => dom.fire(&format!("press:{}:{key}", h.id)),
            None => dom.fire(&format!("press:*:{key}")),
        }
        Ok(())
    }

    async fn screenshot_b64(&self) -> Result<String, DriverError> {
        let dom = self.lock();
        let summary = dom
            .nodes
            .iter()
            .filter(|n| dom.is_rendered(&n.id))
            .map(|n| n.id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        Ok(STANDARD.encode(summary))
    }

    async fn export_session(&self) -> Result<SessionState, DriverError> {
        let mut dom = self.lock();
        dom.calls.push(DriverCall::ExportSession);
        Ok(dom.session.clone())
    }

    async fn import_session(&self, state: &SessionState) -> Result<(), DriverError> {
        let mut dom = self.lock();
        dom.calls.push(DriverCall::ImportSession);
        dom.session = state.clone();
        Ok(())
    }
}

// ========================= Fake Calendar =========================

/// Emulates a Material datepicker bound to `opener`: clicking the opener shows
/// the month of `shown`; the period button switches to a 24-year page.
pub fn install_calendar(dom: &mut Dom, opener: &str, shown: NaiveDate) {
    let input = opener.to_string();
    dom.on_click(opener, move |dom| month_view(dom, &input, shown.year(), shown.month()));
    dom.on_key("Escape", |dom| dom.remove("calendar"));
}

fn calendar_frame(dom: &mut Dom, header: &str) {
    dom.remove("calendar");
    dom.add(Node::new("calendar").css(".mat-calendar"));
    dom.add(Node::new("period").css(".mat-calendar-period-button").text(header).parent("calendar"));
    dom.add(Node::new("cal-prev").css(".mat-calendar-previous-button").parent("calendar"));
    dom.add(Node::new("cal-next").css(".mat-calendar-next-button").parent("calendar"));
    dom.add(Node::new("cal-body").parent("calendar"));
}

fn body_cell(id: &str, text: &str) -> Node {
    Node::new(id).css(".mat-calendar-body-cell").text(text).parent("cal-body")
}

fn month_view(dom: &mut Dom, input: &str, year: i32, month: u32) {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return;
    };
    calendar_frame(dom, &format!("{} {year}", first.format("%b").to_string().to_uppercase()));
    for day in first.iter_days().take_while(|d| d.month() == month) {
        let id = format!("day-{}", day.day());
        dom.add(body_cell(&id, &day.day().to_string()).label(&day.format("%B %-d, %Y").to_string()));
        let input = input.to_string();
        dom.on_click(&id, move |dom| {
            if let Some(n) = dom.node_mut(&input) {
                n.value = day.format("%d/%m/%Y").to_string();
            }
            dom.remove("calendar");
        });
    }
    let prev = first.pred_opt().unwrap_or(first);
    let next = first + chrono::Months::new(1);
    let (a, b, c) = (input.to_string(), input.to_string(), input.to_string());
    dom.on_click("cal-prev", move |dom| month_view(dom, &a, prev.year(), prev.month()));
    dom.on_click("cal-next", move |dom| month_view(dom, &b, next.year(), next.month()));
    dom.on_click("period", move |dom| multi_year_view(dom, &c, year - year.rem_euclid(24)));
}

fn multi_year_view(dom: &mut Dom, input: &str, start: i32) {
    calendar_frame(dom, &format!("{start} – {}", start + 23));
    for year in start..start + 24 {
        let id = format!("year-{year}");
        dom.add(body_cell(&id, &year.to_string()));
        let input = input.to_string();
        dom.on_click(&id, move |dom| year_view(dom, &input, year));
    }
    let (a, b, c) = (input.to_string(), input.to_string(), input.to_string());
    dom.on_click("cal-prev", move |dom| multi_year_view(dom, &a, start - 24));
    dom.on_click("cal-next", move |dom| multi_year_view(dom, &b, start + 24));
    dom.on_click("period", move |dom| month_view(dom, &c, start, 1));
}

fn year_view(dom: &mut Dom, input: &str, year: i32) {
    calendar_frame(dom, &year.to_string());
    for month in 1..=12 {
        let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
            continue;
        };
        let abbr = first.format("%b").to_string().to_uppercase();
        let id = format!("month-{abbr}");
        dom.add(body_cell(&id, &abbr));
        let input = input.to_string();
        dom.on_click(&id, move |dom| month_view(dom, &input, year, month));
    }
    let (a, b, c) = (input.to_string(), input.to_string(), input.to_string());
    dom.on_click("cal-prev", move |dom| year_view(dom, &a, year - 1));
    dom.on_click("cal-next", move |dom| year_view(dom, &b, year + 1));
    dom.on_click("period", move |dom| multi_year_view(dom, &c, year - year.rem_euclid(24)));
}
