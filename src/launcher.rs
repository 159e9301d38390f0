//! Opening Qube Mesh and handing the conversation to a named agent.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};
use url::Url;

use crate::error::{FlowError, Soft};
use crate::harness::Harness;
use crate::intent::{Intent, TextPattern};
use crate::wait::{wait_until, Check, Poll};

const ROUTE: &str = "qube-mesh";

/// Make sure the URL's hash route points at Qube Mesh.
pub fn ensure_route(raw: &str) -> Result<Url, FlowError> {
    let mut url = Url::parse(raw).map_err(|e| FlowError::Config(format!("QUBE_MESH_URL {raw:?}: {e}")))?;
    let fragment = url.fragment().unwrap_or("").to_string();
    if fragment.to_ascii_lowercase().contains(ROUTE) {
        return Ok(url);
    }
    let base = fragment.trim_start_matches('/').trim_end_matches('/');
    let route = if base.is_empty() { format!("/{ROUTE}") } else { format!("/{base}/{ROUTE}") };
    url.set_fragment(Some(&route));
    Ok(url)
}

/// Same host, and the current path and hash start with the target's.
pub fn url_matches(current: &str, target: &Url) -> bool {
    let Ok(current) = Url::parse(current) else {
        return false;
    };
    current.host_str() == target.host_str()
        && current.path().starts_with(target.path())
        && current
            .fragment()
            .unwrap_or("")
            .to_ascii_lowercase()
            .starts_with(&target.fragment().unwrap_or("").to_ascii_lowercase())
}

fn separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[_-]+").unwrap_or_else(|e| panic!("{e}")))
}

/// What gets typed into the agent search box.
pub fn search_text(agent_name: &str) -> String {
    separators().replace_all(agent_name, " ").trim().to_string()
}

/// Tokens of the name in order, anything in between.
pub fn token_pattern(agent_name: &str) -> TextPattern {
    let tokens: Vec<String> = search_text(agent_name).split_whitespace().map(regex::escape).collect();
    TextPattern::new(&tokens.join(".*"))
}

pub fn auto_invoke() -> Intent {
    Intent::new("Auto Invoke button")
        .role("button", "auto invoke")
        .role("button", "select agent")
        .css("button")
        .has_text("auto invoke")
        .in_frames()
}

fn agent_search() -> Intent {
    Intent::new("agent search field")
        .role("textbox", "agent search")
        .placeholder("search agent")
        .css("#agent-search")
}

fn agent_button(agent_name: &str) -> Intent {
    Intent::new(format!("agent {agent_name:?}"))
        .role("button", TextPattern::exact(agent_name))
        .role("button", TextPattern::exact(&search_text(agent_name)))
        .role("button", token_pattern(agent_name))
}

pub struct QubeMesh<'a> {
    h: &'a Harness,
}

impl<'a> QubeMesh<'a> {
    pub fn new(h: &'a Harness) -> Self {
        Self { h }
    }

    pub async fn open(&self, qube_mesh_url: &str) -> Result<(), FlowError> {
        let target = ensure_route(qube_mesh_url)?;
        info!(url = %target, "opening Qube Mesh");
        self.h.driver.goto(target.as_str()).await?;

        let driver = &self.h.driver;
        let target_ref = &target;
        wait_until(Poll::new(self.h.timeouts.navigation), move || async move {
            match driver.current_url().await {
                Ok(url) if url_matches(&url, target_ref) => Check::Ready(()),
                Ok(url) => Check::NotReady(Some(url)),
                Err(e) => Check::NotReady(Some(e.to_string())),
            }
        })
        .await
        .require("Qube Mesh route")?;

        self.h.waiter.visible(&auto_invoke(), self.h.timeouts.action).await.soft("Auto Invoke visible");
        Ok(())
    }

    pub async fn start_auto_invoke(&self) -> Result<(), FlowError> {
        self.h.exec.click_intent(&auto_invoke(), self.h.timeouts.navigation).await?;
        debug!("auto invoke started");
        Ok(())
    }

    pub async fn select_agent(&self, agent_name: &str) -> Result<(), FlowError> {
        if let Some(search) = self.h.waiter.visible(&agent_search(), self.h.timeouts.action).await.soft("agent search field") {
            self.h.exec.fill(&search, &search_text(agent_name), false).await?;
        }
        self.h.exec.click_intent(&agent_button(agent_name), self.h.timeouts.action).await?;
        info!(agent = %agent_name, "agent selected");
        Ok(())
    }

    /// Navigate, start Auto Invoke and pick the agent.
    pub async fn launch(&self, qube_mesh_url: &str, agent_name: &str) -> Result<(), FlowError> {
        self.open(qube_mesh_url).await?;
        self.start_auto_invoke().await?;
        self.select_agent(agent_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use crate::scripted::{Node, ScriptedDriver};
    use std::sync::Arc;

    #[test]
    fn route_is_added_to_the_hash() {
        assert_eq!(ensure_route("https://app.example.com/").unwrap().as_str(), "https://app.example.com/#/qube-mesh");
        assert_eq!(
            ensure_route("https://app.example.com/portal#/home/").unwrap().as_str(),
            "https://app.example.com/portal#/home/qube-mesh"
        );
        assert_eq!(
            ensure_route("https://app.example.com/#/qube-mesh?tab=1").unwrap().as_str(),
            "https://app.example.com/#/qube-mesh?tab=1"
        );
        assert!(ensure_route("not a url").is_err());
    }

    #[test]
    fn route_match_ignores_case() {
        let url = ensure_route("https://app.example.com/#/Qube-Mesh").unwrap();
        assert_eq!(url.as_str(), "https://app.example.com/#/Qube-Mesh");
        assert!(url_matches("https://app.example.com/#/qube-mesh/chat", &url));
    }

    #[test]
    fn url_predicate() {
        let target = ensure_route("https://app.example.com/portal").unwrap();
        assert!(url_matches("https://app.example.com/portal#/qube-mesh/chat", &target));
        assert!(!url_matches("https://other.example.com/portal#/qube-mesh", &target));
        assert!(!url_matches("https://app.example.com/portal#/home", &target));
    }

    #[test]
    fn agent_name_normalisation() {
        assert_eq!(search_text("Contract_Amend-Agent"), "Contract Amend Agent");
        assert!(token_pattern("contract_terminate").is_match("Contract Termination Agent (terminate)"));
        assert!(!token_pattern("terminate contract").is_match("Contract Terminate"));
    }

    #[tokio::test(start_paused = true)]
    async fn launch_selects_agent_by_tokens() {
        let driver = Arc::new(ScriptedDriver::new());
        driver.with_dom(|dom| {
            dom.on_goto(|dom| {
                dom.add(Node::new("invoke").role("button").name("Auto Invoke").frame("mesh"));
            });
            dom.on_click("invoke", |dom| {
                dom.add(Node::new("search").role("textbox").name("Agent search"));
                dom.add(Node::new("a1").role("button").name("Supplier Offboarding Agent"));
                dom.add(Node::new("a2").role("button").name("Contract Amendment Agent"));
            });
        });
        let h = Harness::new(driver.clone(), Timeouts::default());

        QubeMesh::new(&h)
            .launch("https://app.example.com/#/home", "contract_amendment")
            .await
            .unwrap();

        assert_eq!(driver.with_dom(|dom| dom.url().to_string()), "https://app.example.com/#/home/qube-mesh");
        assert_eq!(driver.with_dom(|dom| dom.value("search").map(String::from)), Some("contract amendment".into()));
        assert_eq!(driver.clicks_on("a2"), 1);
        assert_eq!(driver.clicks_on("a1"), 0);
    }
}
