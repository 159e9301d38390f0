//! Element resolver with fallback chain orchestration.
//!
//! Strategies run in a fixed priority order (role, label, placeholder, css,
//! text, then the same chain inside each child frame). The first strategy that
//! yields a non-empty match set wins and later ones are never consulted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::driver::{Driver, DriverError, Handle, Query, Scope};
use crate::error::FlowError;
use crate::intent::{Intent, StrategyKind};
use crate::wait::{wait_until, Check, Poll, DEFAULT_POLL_INTERVAL};

/// One rule for turning a scope into candidate handles. Must not interact with the page.
#[async_trait]
pub trait Finder: Send + Sync {
    async fn find(&self, driver: &dyn Driver, scope: &Scope) -> Result<Vec<Handle>, DriverError>;

    fn describe(&self) -> String;
}

pub struct QueryFinder {
    kind: StrategyKind,
    query: Query,
}

impl QueryFinder {
    pub fn new(kind: StrategyKind, query: Query) -> Self {
        Self { kind, query }
    }
}

#[async_trait]
impl Finder for QueryFinder {
    async fn find(&self, driver: &dyn Driver, scope: &Scope) -> Result<Vec<Handle>, DriverError> {
        driver.query(scope, &self.query).await
    }

    fn describe(&self) -> String {
        format!("{}:{:?}", self.kind.name(), self.query.by)
    }
}

/// First-non-empty-wins combinator. A finder that errors counts as zero matches.
pub struct FirstNonEmpty {
    finders: Vec<Box<dyn Finder>>,
}

impl FirstNonEmpty {
    pub fn new(finders: Vec<Box<dyn Finder>>) -> Self {
        Self { finders }
    }

    pub fn len(&self) -> usize {
        self.finders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.finders.is_empty()
    }
}

#[async_trait]
impl Finder for FirstNonEmpty {
    async fn find(&self, driver: &dyn Driver, scope: &Scope) -> Result<Vec<Handle>, DriverError> {
        for finder in &self.finders {
            match finder.find(driver, scope).await {
                Ok(found) if !found.is_empty() => {
                    debug!(strategy = %finder.describe(), matches = found.len(), "strategy matched");
                    return Ok(found);
                }
                Ok(_) => debug!(strategy = %finder.describe(), "strategy returned no candidates"),
                Err(e) => warn!(strategy = %finder.describe(), error = %e, "strategy failed"),
            }
        }
        Ok(Vec::new())
    }

    fn describe(&self) -> String {
        self.finders.iter().map(|f| f.describe()).collect::<Vec<_>>().join(" > ")
    }
}

/// Runs an inner chain inside every child frame, in frame order.
pub struct InFrames {
    inner: Arc<dyn Finder>,
}

impl InFrames {
    pub fn new(inner: Arc<dyn Finder>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Finder for InFrames {
    async fn find(&self, driver: &dyn Driver, scope: &Scope) -> Result<Vec<Handle>, DriverError> {
        // frame search only makes sense from the top document
        if scope.frame.is_some() || scope.within.is_some() {
            return Ok(Vec::new());
        }
        for frame in driver.frames().await? {
            let found = self.inner.find(driver, &Scope::frame(frame.clone())).await?;
            if !found.is_empty() {
                debug!(frame = %frame.0, matches = found.len(), "matched inside frame");
                return Ok(found);
            }
        }
        Ok(Vec::new())
    }

    fn describe(&self) -> String {
        format!("frames[{}]", self.inner.describe())
    }
}

/// Build the strategy chain for an intent.
pub fn chain_for(intent: &Intent) -> FirstNonEmpty {
    let build = || -> Vec<Box<dyn Finder>> {
        intent
            .queries()
            .into_iter()
            .map(|(kind, query)| Box::new(QueryFinder::new(kind, query)) as Box<dyn Finder>)
            .collect()
    };
    let mut finders = build();
    if intent.searches_frames() {
        let inner: Arc<dyn Finder> = Arc::new(FirstNonEmpty::new(build()));
        finders.push(Box::new(InFrames::new(inner)));
    }
    FirstNonEmpty::new(finders)
}

#[derive(Clone)]
pub struct Resolver {
    driver: Arc<dyn Driver>,
    interval: Duration,
}

impl Resolver {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver, interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Single pass over the chain; an empty result is not an error.
    pub async fn probe(&self, intent: &Intent) -> Result<Vec<Handle>, FlowError> {
        self.probe_in(intent, &Scope::page()).await
    }

    pub async fn probe_in(&self, intent: &Intent, scope: &Scope) -> Result<Vec<Handle>, FlowError> {
        let chain = chain_for(intent);
        Ok(chain.find(self.driver.as_ref(), scope).await?)
    }

    /// Resolve the full match set of the first strategy that matches, polling
    /// until `timeout`.
    pub async fn resolve(&self, intent: &Intent, timeout: Duration) -> Result<Vec<Handle>, FlowError> {
        self.resolve_in(intent, &Scope::page(), timeout).await
    }

    pub async fn resolve_in(
        &self,
        intent: &Intent,
        scope: &Scope,
        timeout: Duration,
    ) -> Result<Vec<Handle>, FlowError> {
        debug!(intent = %intent, "resolving element");
        let chain = chain_for(intent);
        let driver = self.driver.as_ref();
        let chain_ref = &chain;
        let outcome = wait_until(Poll::new(timeout).every(self.interval), move || async move {
            match chain_ref.find(driver, scope).await {
                Ok(found) if !found.is_empty() => Check::Ready(found),
                Ok(_) => Check::NotReady(None),
                Err(e) => Check::NotReady(Some(e.to_string())),
            }
        })
        .await;
        outcome.met().ok_or_else(|| {
            warn!(intent = %intent, "all strategies exhausted");
            FlowError::ElementNotFound { intent: intent.name().to_string(), tried: chain.describe() }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{Node, ScriptedDriver};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        ids: Vec<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Finder for Counting {
        async fn find(&self, _driver: &dyn Driver, _scope: &Scope) -> Result<Vec<Handle>, DriverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.ids.iter().map(|id| Handle::new(*id, None)).collect())
        }

        fn describe(&self) -> String {
            self.name.to_string()
        }
    }

    fn counting(name: &'static str, ids: Vec<&'static str>) -> (Box<dyn Finder>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Box::new(Counting { name, ids, calls: calls.clone() }), calls)
    }

    #[tokio::test]
    async fn later_strategies_are_not_consulted_after_a_match() {
        let driver = ScriptedDriver::new();
        let (empty, empty_calls) = counting("empty", vec![]);
        let (hit, hit_calls) = counting("hit", vec!["a", "b"]);
        let (other, other_calls) = counting("other", vec!["c"]);
        let chain = FirstNonEmpty::new(vec![empty, hit, other]);

        let found = chain.find(&driver, &Scope::page()).await.unwrap();

        // full match set of the winning strategy, nothing merged from others
        assert_eq!(found, vec![Handle::new("a", None), Handle::new("b", None)]);
        assert_eq!(empty_calls.load(Ordering::SeqCst), 1);
        assert_eq!(hit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(other_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn role_beats_placeholder_even_when_declared_later() {
        let driver = ScriptedDriver::new();
        driver.with_dom(|dom| {
            dom.add(Node::new("by-placeholder").placeholder("Ask me anything"));
            dom.add(Node::new("by-role").role("textbox").name("Prompt"));
        });
        let resolver = Resolver::new(Arc::new(driver));
        let intent = Intent::new("prompt field").placeholder("ask me anything").role("textbox", "^prompt$");

        let found = resolver.resolve(&intent, Duration::from_secs(1)).await.unwrap();
        assert_eq!(found, vec![Handle::new("by-role", None)]);
    }

    #[tokio::test]
    async fn resolution_is_deterministic_without_mutation() {
        let driver = ScriptedDriver::new();
        driver.with_dom(|dom| {
            dom.add(Node::new("b1").role("button").name("Proceed"));
            dom.add(Node::new("b2").role("button").name("Proceed with request"));
        });
        let resolver = Resolver::new(Arc::new(driver));
        let intent = Intent::new("proceed").role("button", "proceed");

        let first = resolver.probe(&intent).await.unwrap();
        for _ in 0..5 {
            assert_eq!(resolver.probe(&intent).await.unwrap(), first);
        }
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_frames_last() {
        let driver = ScriptedDriver::new();
        driver.with_dom(|dom| {
            dom.add(Node::new("framed").role("button").name("Auto Invoke").frame("f1"));
        });
        let resolver = Resolver::new(Arc::new(driver));

        let top_only = Intent::new("auto invoke").role("button", "auto invoke");
        assert!(resolver.probe(&top_only).await.unwrap().is_empty());

        let with_frames = top_only.clone().in_frames();
        let found = resolver.probe(&with_frames).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "framed");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_chain_reports_element_not_found() {
        let resolver = Resolver::new(Arc::new(ScriptedDriver::new()));
        let intent = Intent::new("grid").any_role("grid").css("[role=\"grid\"]");

        let err = resolver.resolve(&intent, Duration::from_secs(3)).await.unwrap_err();
        match err {
            FlowError::ElementNotFound { intent, tried } => {
                assert_eq!(intent, "grid");
                assert!(tried.starts_with("role:"));
                assert!(tried.contains("css:"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_waits_for_late_elements() {
        let driver = Arc::new(ScriptedDriver::new());
        let resolver = Resolver::new(driver.clone());
        let late = driver.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            late.with_dom(|dom| dom.add(Node::new("late").role("button").name("Create request")));
        });

        let intent = Intent::new("create request").role("button", "create request");
        let found = resolver.resolve(&intent, Duration::from_secs(5)).await.unwrap();
        assert_eq!(found[0].id, "late");
    }
}
