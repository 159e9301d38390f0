//! Chromium over CDP. [`Browser`] is the raw page; [`ChromiumDriver`] puts the
//! [`Driver`] capability set on top of it.
//!
//! Elements are addressed by a `data-qm-id` attribute the page script stamps on
//! every match, so handles survive across calls as long as the node does.
//! Child frames are reached through `contentDocument`, which limits frame
//! scopes to same-origin iframes.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::storage::{GetCookiesParams, SetCookiesParams};
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParamsBuilder};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::driver::{By, ClickOptions, Driver, DriverError, FrameId, Handle, Query, Rect, Scope};
use crate::intent::TextPattern;
use crate::session::{Cookie, OriginState, SessionState, StorageItem};

#[derive(Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true, user_agent: None }
    }
}

fn viewport() -> Result<SetDeviceMetricsOverrideParams> {
    SetDeviceMetricsOverrideParams::builder()
        .width(1280)
        .height(800)
        .device_scale_factor(1.0)
        .mobile(false)
        .build()
        .map_err(|e| anyhow!(e))
}

pub struct Browser {
    page: Page,
    context: BrowserContextId,
    browser: OxideBrowser,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Unique user data dir per instance; parallel workers would otherwise
        // fight over the ProcessSingleton profile lock.
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("qubemesh-profile-{}-{}", std::process::id(), ts));
        let _ = std::fs::create_dir_all(&profile_dir);
        builder = builder
            .user_data_dir(profile_dir)
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        Self::open_page(browser, cfg.user_agent).await
    }

    /// Attach to an already running Chromium (e.g. `CHROME_WS_URL`).
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (browser, mut handler) = OxideBrowser::connect(ws_url).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        Self::open_page(browser, None).await
    }

    async fn open_page(browser: OxideBrowser, user_agent: Option<String>) -> Result<Self> {
        // One context per page, also when several workers share one Chromium
        let context = browser.create_browser_context(CreateBrowserContextParams::default()).await?;
        let page = browser
            .new_page(CreateTargetParams { browser_context_id: Some(context.clone()), ..CreateTargetParams::new("about:blank") })
            .await?;
        if let Some(ua) = user_agent {
            page.set_user_agent(ua).await?;
        }
        // Non-zero viewport, screenshots fail on 0 width otherwise
        let _ = page.execute(viewport()?).await;
        debug!(context = %context.as_ref(), "page opened");
        Ok(Self { page, context, browser })
    }

    /// Dispose the browser context, closing its page.
    pub async fn close(&self) -> Result<()> {
        self.browser.dispose_browser_context(self.context.clone()).await?;
        Ok(())
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    pub async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    pub async fn click(&self, x: f64, y: f64) -> Result<()> {
        let cmd = DispatchMouseEventParams::builder()
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1);
        self.page
            .move_mouse(Point { x, y })
            .await?
            .execute(cmd.clone().r#type(DispatchMouseEventType::MousePressed).build().map_err(|e| anyhow!(e))?)
            .await?;
        self.page
            .execute(cmd.r#type(DispatchMouseEventType::MouseReleased).build().map_err(|e| anyhow!(e))?)
            .await?;
        Ok(())
    }

    pub async fn type_text(&self, text: &str) -> Result<()> {
        // Input.insertText feeds the focused element
        self.page.execute(InsertTextParams { text: text.to_string() }).await?;
        Ok(())
    }

    pub async fn keypress(&self, key: &str) -> Result<()> {
        let (key, code, vk, text) = key_definition(key);
        let down = DispatchKeyEventParams::builder()
            .r#type(if text.is_some() { DispatchKeyEventType::KeyDown } else { DispatchKeyEventType::RawKeyDown })
            .key(key)
            .code(code)
            .windows_virtual_key_code(vk);
        let down = match text {
            Some(t) => down.text(t),
            None => down,
        };
        self.page.execute(down.build().map_err(|e| anyhow!(e))?).await?;
        let up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key(key)
            .code(code)
            .windows_virtual_key_code(vk)
            .build()
            .map_err(|e| anyhow!(e))?;
        self.page.execute(up).await?;
        Ok(())
    }

    /// Evaluate an expression that yields a JSON string, and decode it.
    pub async fn eval_json<T: DeserializeOwned>(&self, expression: String) -> Result<T> {
        let eval = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .build()
            .map_err(|e| anyhow!(e))?;
        let resp = self.page.execute(eval).await?;
        if let Some(exc) = &resp.result.exception_details {
            let detail = exc.exception.as_ref().and_then(|o| o.description.clone()).unwrap_or_else(|| exc.text.clone());
            return Err(anyhow!("script exception: {detail}"));
        }
        let raw = match &resp.result.result.value {
            Some(Value::String(s)) => s.clone(),
            other => return Err(anyhow!("unexpected script result: {other:?}")),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn screenshot_b64(&self) -> Result<String> {
        let take = || async {
            self.page
                .screenshot(ScreenshotParamsBuilder::default().full_page(true).omit_background(true).build())
                .await
        };
        match take().await {
            Ok(bytes) => Ok(STANDARD.encode(bytes)),
            Err(e) => {
                let msg = format!("{}", e);
                if msg.contains("0 width") || msg.contains("0 height") {
                    // Force viewport and retry once
                    let _ = self.page.execute(viewport()?).await;
                    sleep(Duration::from_millis(50)).await;
                    let bytes = take().await?;
                    return Ok(STANDARD.encode(bytes));
                }
                Err(anyhow!(e))
            }
        }
    }

    /// Every cookie in the context, whatever host set it.
    pub async fn cookies(&self) -> Result<Vec<Cookie>> {
        let raw = self.browser.execute(export_params(&self.context)).await?.result.cookies;
        let mut out = Vec::with_capacity(raw.len());
        for c in raw {
            out.push(serde_json::from_value(serde_json::to_value(c)?)?);
        }
        Ok(out)
    }

    /// Storage.setCookies does not look at the page URL, so this works on a
    /// blank page before the first navigation.
    pub async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        if cookies.is_empty() {
            return Ok(());
        }
        self.browser.execute(import_params(cookies, &self.context)?).await?;
        Ok(())
    }

    /// Seed local storage for `origin` on every document loaded from now on.
    pub async fn seed_local_storage(&self, origin: &OriginState) -> Result<()> {
        let source = format!(
            "if (location.origin === {origin}) {{ for (const [k, v] of {items}) {{ try {{ localStorage.setItem(k, v); }} catch (e) {{}} }} }}",
            origin = serde_json::to_string(&origin.origin)?,
            items = serde_json::to_string(
                &origin.local_storage.iter().map(|i| (i.name.as_str(), i.value.as_str())).collect::<Vec<_>>()
            )?,
        );
        let params = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(source)
            .build()
            .map_err(|e| anyhow!(e))?;
        self.page.execute(params).await?;
        Ok(())
    }
}

fn key_definition(key: &str) -> (&str, &str, i64, Option<&'static str>) {
    match key {
        "Enter" => ("Enter", "Enter", 13, Some("\r")),
        "Escape" => ("Escape", "Escape", 27, None),
        "Tab" => ("Tab", "Tab", 9, None),
        "Space" | " " => (" ", "Space", 32, Some(" ")),
        "ArrowDown" => ("ArrowDown", "ArrowDown", 40, None),
        "ArrowUp" => ("ArrowUp", "ArrowUp", 38, None),
        other => (other, other, 0, None),
    }
}

fn export_params(context: &BrowserContextId) -> GetCookiesParams {
    GetCookiesParams { browser_context_id: Some(context.clone()) }
}

fn import_params(cookies: &[Cookie], context: &BrowserContextId) -> Result<SetCookiesParams> {
    let cookies = cookies.iter().map(cookie_param).collect::<Result<Vec<_>>>()?;
    Ok(SetCookiesParams { cookies, browser_context_id: Some(context.clone()) })
}

fn cookie_param(c: &Cookie) -> Result<CookieParam> {
    if c.domain.is_empty() {
        return Err(anyhow!("cookie {} has no domain", c.name));
    }
    let mut v = json!({
        "name": c.name,
        "value": c.value,
        "domain": c.domain,
        "path": c.path,
        "httpOnly": c.http_only,
        "secure": c.secure,
    });
    if c.expires >= 0.0 {
        v["expires"] = json!(c.expires);
    }
    if let Some(same_site) = &c.same_site {
        v["sameSite"] = json!(same_site);
    }
    Ok(serde_json::from_value(v)?)
}

// ========================= Page Script =========================

const PAGE_LIB: &str = r##"
const qm = (() => {
  const frameEl = (frame) => document.querySelector(`[data-qm-frame="${frame}"]`);
  const doc = (frame) => {
    if (!frame) return document;
    const f = frameEl(frame);
    try { return f ? f.contentDocument : null; } catch (e) { return null; }
  };
  const offset = (frame) => {
    if (!frame) return { x: 0, y: 0 };
    const f = frameEl(frame);
    if (!f) return { x: 0, y: 0 };
    const r = f.getBoundingClientRect();
    return { x: r.left, y: r.top };
  };
  const tag = (el) => {
    if (!el.hasAttribute('data-qm-id')) {
      window.__qmSeq = (window.__qmSeq || 0) + 1;
      el.setAttribute('data-qm-id', 'q' + window.__qmSeq);
    }
    return el.getAttribute('data-qm-id');
  };
  const get = (h) => {
    const d = doc(h.frame);
    return d ? d.querySelector(`[data-qm-id="${h.id}"]`) : null;
  };
  const textOf = (el) => (el.innerText ?? el.textContent ?? '').replace(/\s+/g, ' ').trim();
  const IMPLICIT = [
    ['button', 'button, input[type=button], input[type=submit], input[type=reset], summary'],
    ['link', 'a[href]'],
    ['checkbox', 'input[type=checkbox]'],
    ['radio', 'input[type=radio]'],
    ['combobox', 'select'],
    ['option', 'option'],
    ['row', 'tr'],
    ['columnheader', 'th'],
    ['progressbar', 'progress'],
    ['heading', 'h1, h2, h3, h4, h5, h6'],
    ['textbox', 'textarea, input:not([type]), input[type=text], input[type=email], input[type=search], input[type=tel], input[type=url], [contenteditable=""], [contenteditable=true]'],
  ];
  const roleOf = (el) => {
    const explicit = el.getAttribute('role');
    if (explicit) return explicit.trim().split(/\s+/)[0];
    for (const [role, sel] of IMPLICIT) if (el.matches(sel)) return role;
    return null;
  };
  const labelOf = (el) => {
    const aria = el.getAttribute('aria-label');
    if (aria) return aria.trim();
    const ids = el.getAttribute('aria-labelledby');
    if (ids) {
      return ids.split(/\s+/).map((i) => el.ownerDocument.getElementById(i)).filter(Boolean).map(textOf).join(' ');
    }
    if (el.labels && el.labels.length) return textOf(el.labels[0]);
    return '';
  };
  const nameOf = (el) => {
    const label = labelOf(el);
    if (label) return label;
    if (el.matches('input, textarea, select')) {
      return el.getAttribute('title') || el.getAttribute('placeholder') || (el.matches('input[type=submit], input[type=button]') ? el.value : '');
    }
    return textOf(el) || el.getAttribute('title') || '';
  };
  const disabled = (el) =>
    !!(el.disabled || el.getAttribute('aria-disabled') === 'true' || el.closest('fieldset[disabled]'));
  const visible = (el) => {
    if (!el || !el.isConnected) return false;
    const s = el.ownerDocument.defaultView.getComputedStyle(el);
    if (s.visibility === 'hidden' || s.display === 'none') return false;
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0;
  };
  const re = (p) => (p == null ? null : new RegExp(p, 'i'));
  const all = (scope) => [...scope.querySelectorAll('*')].filter((el) => !el.matches('script, style, head, head *'));

  const query = (q) => {
    const d = doc(q.frame);
    if (!d) return [];
    let scope = d;
    if (q.within) {
      scope = get(q.within);
      if (!scope) throw new Error('detached ' + q.within.id);
    }
    const name = re(q.name);
    const pattern = re(q.pattern);
    const hasText = re(q.has_text);
    let found;
    switch (q.kind) {
      case 'role':
        found = all(scope).filter((el) => roleOf(el) === q.role && (!name || name.test(nameOf(el))));
        break;
      case 'label':
        found = all(scope).filter((el) => { const l = labelOf(el); return l && pattern.test(l); });
        break;
      case 'placeholder':
        found = [...scope.querySelectorAll('[placeholder]')].filter((el) => pattern.test(el.getAttribute('placeholder')));
        break;
      case 'css':
        found = [...scope.querySelectorAll(q.selector)];
        break;
      case 'text':
        found = all(scope).filter((el) => pattern.test(textOf(el)) && ![...el.children].some((c) => pattern.test(textOf(c))));
        break;
      default:
        throw new Error('unknown query kind ' + q.kind);
    }
    return found
      .filter((el) => !hasText || hasText.test(textOf(el)))
      .filter((el) => !q.enabled_only || !disabled(el))
      .map(tag);
  };

  const frames = () =>
    [...document.querySelectorAll('iframe, frame')]
      .filter((f) => { try { return !!f.contentDocument; } catch (e) { return false; } })
      .map((f) => {
        if (!f.hasAttribute('data-qm-frame')) {
          window.__qmFrameSeq = (window.__qmFrameSeq || 0) + 1;
          f.setAttribute('data-qm-frame', 'f' + window.__qmFrameSeq);
        }
        return f.getAttribute('data-qm-frame');
      });

  const parent = (h) => {
    const el = get(h);
    if (!el) throw new Error('detached ' + h.id);
    return el.parentElement ? tag(el.parentElement) : null;
  };

  const describe = (h) => {
    const el = get(h);
    if (!el) return null;
    const r = el.getBoundingClientRect();
    const o = offset(h.frame);
    return {
      visible: visible(el),
      enabled: !disabled(el),
      text: textOf(el) || ('value' in el && typeof el.value === 'string' ? el.value : ''),
      rect: r.width > 0 || r.height > 0 ? { x: r.left + o.x, y: r.top + o.y, width: r.width, height: r.height } : null,
    };
  };

  const actionable = (h) => {
    const el = get(h);
    if (!el) return { ok: false, reason: 'detached' };
    el.scrollIntoView({ block: 'center', inline: 'center' });
    if (!visible(el)) return { ok: false, reason: 'not visible' };
    if (disabled(el)) return { ok: false, reason: 'disabled' };
    const r = el.getBoundingClientRect();
    const cx = r.left + r.width / 2;
    const cy = r.top + r.height / 2;
    const hit = el.ownerDocument.elementFromPoint(cx, cy);
    if (hit && hit !== el && !el.contains(hit)) {
      return { ok: false, reason: 'intercepted by <' + hit.tagName.toLowerCase() + '>' };
    }
    const o = offset(h.frame);
    return { ok: true, x: cx + o.x, y: cy + o.y };
  };

  const forceClick = (h) => {
    const el = get(h);
    if (!el) return false;
    el.scrollIntoView({ block: 'center', inline: 'center' });
    el.click();
    return true;
  };

  const clear = (h) => {
    const el = get(h);
    if (!el) return false;
    el.focus();
    if (el.isContentEditable) {
      el.textContent = '';
    } else if ('value' in el) {
      el.value = '';
      el.dispatchEvent(new Event('input', { bubbles: true }));
    }
    return true;
  };

  const focus = (h) => {
    const el = get(h);
    if (!el) return false;
    el.focus();
    return true;
  };

  const storage = () => ({
    origin: location.origin,
    items: Object.keys(localStorage).map((k) => ({ name: k, value: localStorage.getItem(k) })),
  });

  return { query, frames, parent, describe, actionable, forceClick, clear, focus, storage };
})();
"##;

fn script(call: &str) -> String {
    format!("(() => {{\n{PAGE_LIB}\nreturn JSON.stringify({{ v: qm.{call} }});\n}})()")
}

#[derive(Deserialize)]
struct Wrapped<T> {
    v: T,
}

#[derive(Deserialize)]
struct ElementState {
    visible: bool,
    enabled: bool,
    text: String,
    rect: Option<Rect>,
}

#[derive(Deserialize)]
struct Actionable {
    ok: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

#[derive(Deserialize)]
struct LocalStorage {
    origin: String,
    items: Vec<StorageItem>,
}

fn pattern_source(p: &TextPattern) -> String {
    p.as_str().to_string()
}

fn query_payload(scope: &Scope, q: &Query) -> Value {
    let mut v = json!({
        "frame": scope.frame.as_ref().map(|f| f.0.clone()),
        "within": scope.within.as_ref().map(handle_payload),
        "has_text": q.has_text.as_ref().map(pattern_source),
        "enabled_only": q.enabled_only,
    });
    match &q.by {
        By::Role { role, name } => {
            v["kind"] = json!("role");
            v["role"] = json!(role);
            v["name"] = json!(name.as_ref().map(pattern_source));
        }
        By::Label(p) => {
            v["kind"] = json!("label");
            v["pattern"] = json!(pattern_source(p));
        }
        By::Placeholder(p) => {
            v["kind"] = json!("placeholder");
            v["pattern"] = json!(pattern_source(p));
        }
        By::Css(sel) => {
            v["kind"] = json!("css");
            v["selector"] = json!(sel);
        }
        By::Text(p) => {
            v["kind"] = json!("text");
            v["pattern"] = json!(pattern_source(p));
        }
    }
    v
}

fn handle_payload(h: &Handle) -> Value {
    json!({ "id": h.id, "frame": h.frame.as_ref().map(|f| f.0.clone()) })
}

fn browser_err(e: anyhow::Error) -> DriverError {
    DriverError::Browser(e.to_string())
}

// ========================= Driver =========================

pub struct ChromiumDriver {
    browser: Browser,
}

impl ChromiumDriver {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        Ok(Self { browser: Browser::launch(cfg).await? })
    }

    pub async fn connect(ws_url: &str) -> Result<Self> {
        Ok(Self { browser: Browser::connect(ws_url).await? })
    }

    pub async fn close(&self) -> Result<()> {
        self.browser.close().await
    }

    /// Connect when a websocket URL is given, launch otherwise.
    pub async fn start(ws_url: Option<&str>, cfg: BrowserConfig) -> Result<Self> {
        match ws_url.map(str::trim).filter(|s| !s.is_empty()) {
            Some(ws) => Self::connect(ws).await,
            None => Self::launch(cfg).await,
        }
    }

    async fn call<T: DeserializeOwned>(&self, call: String) -> Result<T, DriverError> {
        let wrapped: Wrapped<T> = self.browser.eval_json(script(&call)).await.map_err(browser_err)?;
        Ok(wrapped.v)
    }

    async fn describe(&self, handle: &Handle) -> Result<ElementState, DriverError> {
        let state: Option<ElementState> = self.call(format!("describe({})", handle_payload(handle))).await?;
        state.ok_or_else(|| DriverError::Detached(handle.id.clone()))
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        self.browser.goto(url).await.map_err(|e| DriverError::Navigation(format!("{url}: {e}")))
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.browser.url().await.map_err(browser_err)
    }

    async fn query(&self, scope: &Scope, query: &Query) -> Result<Vec<Handle>, DriverError> {
        let ids: Vec<String> = self.call(format!("query({})", query_payload(scope, query))).await.map_err(|e| match e {
            DriverError::Browser(msg) if msg.contains("detached") => DriverError::Detached(msg),
            other => other,
        })?;
        Ok(ids.into_iter().map(|id| Handle::new(id, scope.frame.clone())).collect())
    }

    async fn frames(&self) -> Result<Vec<FrameId>, DriverError> {
        let ids: Vec<String> = self.call("frames()".to_string()).await?;
        Ok(ids.into_iter().map(FrameId).collect())
    }

    async fn parent(&self, handle: &Handle) -> Result<Option<Handle>, DriverError> {
        let id: Option<String> = self
            .call(format!("parent({})", handle_payload(handle)))
            .await
            .map_err(|_| DriverError::Detached(handle.id.clone()))?;
        Ok(id.map(|id| Handle::new(id, handle.frame.clone())))
    }

    async fn is_visible(&self, handle: &Handle) -> Result<bool, DriverError> {
        Ok(self.describe(handle).await?.visible)
    }

    async fn is_enabled(&self, handle: &Handle) -> Result<bool, DriverError> {
        Ok(self.describe(handle).await?.enabled)
    }

    async fn text(&self, handle: &Handle) -> Result<String, DriverError> {
        Ok(self.describe(handle).await?.text)
    }

    async fn bounding_box(&self, handle: &Handle) -> Result<Option<Rect>, DriverError> {
        Ok(self.describe(handle).await?.rect)
    }

    async fn click(&self, handle: &Handle, opts: ClickOptions) -> Result<(), DriverError> {
        if opts.force {
            let clicked: bool = self.call(format!("forceClick({})", handle_payload(handle))).await?;
            if !clicked {
                return Err(DriverError::Detached(handle.id.clone()));
            }
            return Ok(());
        }
        let check: Actionable = self.call(format!("actionable({})", handle_payload(handle))).await?;
        if !check.ok {
            let reason = check.reason.unwrap_or_default();
            debug!(element = %handle.id, %reason, "click refused");
            return Err(match reason.as_str() {
                "detached" => DriverError::Detached(handle.id.clone()),
                _ => DriverError::NotActionable(format!("{}: {}", handle.id, reason)),
            });
        }
        self.browser.click(check.x, check.y).await.map_err(browser_err)
    }

    async fn mouse_click(&self, x: f64, y: f64) -> Result<(), DriverError> {
        self.browser.click(x, y).await.map_err(browser_err)
    }

    async fn fill(&self, handle: &Handle, text: &str) -> Result<(), DriverError> {
        let cleared: bool = self.call(format!("clear({})", handle_payload(handle))).await?;
        if !cleared {
            return Err(DriverError::Detached(handle.id.clone()));
        }
        if text.is_empty() {
            return Ok(());
        }
        self.browser.type_text(text).await.map_err(browser_err)
    }

    async fn press(&self, target: Option<&Handle>, key: &str) -> Result<(), DriverError> {
        if let Some(handle) = target {
            let focused: bool = self.call(format!("focus({})", handle_payload(handle))).await?;
            if !focused {
                return Err(DriverError::Detached(handle.id.clone()));
            }
        }
        self.browser.keypress(key).await.map_err(browser_err)
    }

    async fn screenshot_b64(&self) -> Result<String, DriverError> {
        self.browser.screenshot_b64().await.map_err(browser_err)
    }

    async fn export_session(&self) -> Result<SessionState, DriverError> {
        let cookies = self.browser.cookies().await.map_err(browser_err)?;
        let mut origins = Vec::new();
        match self.call::<LocalStorage>("storage()".to_string()).await {
            Ok(ls) if ls.origin != "null" => origins.push(OriginState { origin: ls.origin, local_storage: ls.items }),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "local storage not readable"),
        }
        Ok(SessionState { cookies, origins })
    }

    async fn import_session(&self, state: &SessionState) -> Result<(), DriverError> {
        self.browser.set_cookies(&state.cookies).await.map_err(browser_err)?;
        for origin in &state.origins {
            self.browser.seed_local_storage(origin).await.map_err(browser_err)?;
        }
        debug!(cookies = state.cookies.len(), origins = state.origins.len(), "session imported");
        Ok(())
    }
}
