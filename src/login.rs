//! One-time login flow that produces the shared session artifact.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use crate::config::EnvConfig;
use crate::error::{FlowError, Soft};
use crate::harness::Harness;
use crate::intent::Intent;
use crate::session::{SessionState, SessionStore};
use crate::wait::{wait_until, Check, Poll, RaceArm};

fn login_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)login|signin").unwrap_or_else(|e| panic!("{e}")))
}

pub fn is_login_url(url: &str) -> bool {
    login_url_re().is_match(url)
}

fn faq_close() -> Intent {
    Intent::new("FAQ close button")
        .role("button", r"^\s*(close|×|x)\s*$")
        .css(".faq-close, .faq-dialog button.close")
}

fn user_field() -> Intent {
    Intent::new("user id field")
        .role("textbox", "username|user id|email")
        .label("username|user id|email")
        .placeholder("username|user id|email")
}

fn password_mode() -> Intent {
    Intent::new("login with password button").role("button", "login with password")
}

fn password_field() -> Intent {
    Intent::new("password field")
        .label("password")
        .placeholder("password")
        .css("input[type=\"password\"]")
}

fn submit() -> Intent {
    Intent::new("login submit button")
        .role("button", r"^\s*login\s*$")
        .role("button", "sign in|log in|submit|continue")
        .role("button", "login with password")
}

fn logout() -> Intent {
    Intent::new("logout control").role("button", "log ?out|sign ?out").role("link", "log ?out|sign ?out")
}

/// Fill the login form and wait until the application lets us in.
pub async fn login(h: &Harness, cfg: &EnvConfig) -> Result<(), FlowError> {
    info!(url = %cfg.base_url, user = %cfg.user_id, "logging in");
    h.driver.goto(&cfg.base_url).await?;

    if let Some(close) = h.waiter.visible_now(&faq_close()).await {
        h.exec.click(&close).await.soft("close FAQ dialog");
    }

    let user = h.waiter.visible(&user_field(), h.timeouts.login).await?;
    h.exec.fill(&user, &cfg.user_id, false).await?;

    // some tenants show the password field straight away
    let arms = [
        RaceArm::new(password_mode(), h.timeouts.action),
        RaceArm::new(password_field(), h.timeouts.action),
    ];
    if let Some((0, button)) = h.waiter.race(&arms).await {
        h.exec.click(&button).await?;
    }

    let password = h.waiter.visible(&password_field(), h.timeouts.login).await?;
    h.exec.fill(&password, &cfg.password, false).await?;
    h.exec.click_intent(&submit(), h.timeouts.action).await?;

    let signals = (user_field(), password_field(), logout());
    let signals = &signals;
    let (driver, waiter) = (&h.driver, &h.waiter);
    let signal = wait_until(Poll::new(h.timeouts.login), move || async move {
        let url = driver.current_url().await.unwrap_or_default();
        if !url.is_empty() && !is_login_url(&url) {
            return Check::Ready("left login page");
        }
        if waiter.visible_now(&signals.0).await.is_none() {
            return Check::Ready("user field gone");
        }
        if waiter.visible_now(&signals.1).await.is_none() {
            return Check::Ready("password field gone");
        }
        if waiter.visible_now(&signals.2).await.is_some() {
            return Check::Ready("logout visible");
        }
        Check::NotReady(Some(format!("url={url}")))
    })
    .await
    .require("login to complete")?;

    let url = h.driver.current_url().await?;
    if is_login_url(&url) {
        warn!(url = %url, signal, "login signal seen but still on a login URL");
        return Err(FlowError::Session(format!("still on login page: {url}")));
    }
    info!(url = %url, signal, "logged in");
    Ok(())
}

/// Log in once and persist the browser session for the workers.
pub async fn authenticate(h: &Harness, cfg: &EnvConfig, store: &SessionStore) -> Result<SessionState, FlowError> {
    store.ensure_placeholder().await?;
    login(h, cfg).await?;
    let state = h.driver.export_session().await?;
    store.save(&state).await?;
    info!(
        path = %store.path().display(),
        cookies = state.cookies.len(),
        origins = state.origins.len(),
        "session saved"
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_urls() {
        assert!(is_login_url("https://app.example.com/login"));
        assert!(is_login_url("https://app.example.com/#/SignIn?next=/"));
        assert!(!is_login_url("https://app.example.com/#/qube-mesh"));
    }
}
