//! Condition waiter: bounded polling and first-satisfied races.
//!
//! Every wait is a timeout-capped suspension; nothing in the crate loops on the
//! page without going through here.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::driver::{Driver, Handle};
use crate::error::FlowError;
use crate::intent::Intent;
use crate::resolver::Resolver;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug)]
pub struct Poll {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Poll {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Result of a single predicate evaluation.
#[derive(Debug, Clone)]
pub enum Check<T> {
    Ready(T),
    NotReady(Option<String>),
}

#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Met(T),
    TimedOut { last_observed: Option<String>, elapsed: Duration },
}

impl<T> Outcome<T> {
    pub fn is_met(&self) -> bool {
        matches!(self, Outcome::Met(_))
    }

    pub fn met(self) -> Option<T> {
        match self {
            Outcome::Met(v) => Some(v),
            Outcome::TimedOut { .. } => None,
        }
    }

    /// Treat a timeout as fatal.
    pub fn require(self, condition: &str) -> Result<T, FlowError> {
        match self {
            Outcome::Met(v) => Ok(v),
            Outcome::TimedOut { last_observed, elapsed } => Err(FlowError::Timeout {
                condition: condition.to_string(),
                elapsed_ms: elapsed.as_millis(),
                last_observed,
            }),
        }
    }
}

/// Poll `check` until it is ready or `poll.timeout` elapses. The predicate runs
/// at least once, even with a zero timeout.
pub async fn wait_until<F, Fut, T>(poll: Poll, mut check: F) -> Outcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Check<T>>,
{
    let start = Instant::now();
    let deadline = start + poll.timeout;
    let mut last_observed = None;

    loop {
        match check().await {
            Check::Ready(v) => return Outcome::Met(v),
            Check::NotReady(obs) => {
                if obs.is_some() {
                    last_observed = obs;
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Outcome::TimedOut {
                last_observed,
                elapsed: now.saturating_duration_since(start),
            };
        }
        let remaining = deadline.saturating_duration_since(now);
        sleep(poll.interval.min(remaining)).await;
    }
}

/// One arm of a [`Waiter::race`]: an element becoming visible within its own timeout.
#[derive(Clone, Debug)]
pub struct RaceArm {
    pub intent: Intent,
    pub timeout: Duration,
}

impl RaceArm {
    pub fn new(intent: Intent, timeout: Duration) -> Self {
        Self { intent, timeout }
    }
}

#[derive(Clone)]
pub struct Waiter {
    driver: Arc<dyn Driver>,
    resolver: Resolver,
    interval: Duration,
}

impl Waiter {
    pub fn new(driver: Arc<dyn Driver>, resolver: Resolver) -> Self {
        Self { driver, resolver, interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn poll(&self, timeout: Duration) -> Poll {
        Poll::new(timeout).every(self.interval)
    }

    /// First visible element the intent resolves to, without waiting.
    pub async fn visible_now(&self, intent: &Intent) -> Option<Handle> {
        let handles = self.resolver.probe(intent).await.ok()?;
        for h in handles {
            if self.driver.is_visible(&h).await.unwrap_or(false) {
                return Some(h);
            }
        }
        None
    }

    /// Wait until the intent matches at least one visible element.
    pub async fn visible(&self, intent: &Intent, timeout: Duration) -> Result<Handle, FlowError> {
        let (driver, resolver) = (&self.driver, &self.resolver);
        wait_until(self.poll(timeout), move || async move {
            match resolver.probe(intent).await {
                Ok(handles) if handles.is_empty() => Check::NotReady(Some("no matches".into())),
                Ok(handles) => {
                    for h in &handles {
                        if driver.is_visible(h).await.unwrap_or(false) {
                            return Check::Ready(h.clone());
                        }
                    }
                    Check::NotReady(Some(format!("{} matches, none visible", handles.len())))
                }
                Err(e) => Check::NotReady(Some(e.to_string())),
            }
        })
        .await
        .require(&format!("{intent} to be visible"))
    }

    /// Wait until any of `intents` is visible. Earlier intents win when
    /// several are visible on the same poll.
    pub async fn first_visible(&self, intents: &[Intent], timeout: Duration) -> Result<(usize, Handle), FlowError> {
        let names = intents.iter().map(|i| i.name()).collect::<Vec<_>>().join(" | ");
        wait_until(self.poll(timeout), move || async move {
            for (idx, intent) in intents.iter().enumerate() {
                if let Some(h) = self.visible_now(intent).await {
                    return Check::Ready((idx, h));
                }
            }
            Check::NotReady(None)
        })
        .await
        .require(&format!("{names} to be visible"))
    }

    /// Wait until no element the intent resolves to is visible.
    pub async fn hidden(&self, intent: &Intent, timeout: Duration) -> Result<(), FlowError> {
        wait_until(self.poll(timeout), move || async move {
            match self.visible_now(intent).await {
                Some(_) => Check::NotReady(Some("still visible".into())),
                None => Check::Ready(()),
            }
        })
        .await
        .require(&format!("{intent} to be hidden"))
    }

    pub async fn enabled(&self, handle: &Handle, timeout: Duration) -> Result<(), FlowError> {
        let driver = &self.driver;
        wait_until(self.poll(timeout), move || async move {
            match driver.is_enabled(handle).await {
                Ok(true) => Check::Ready(()),
                Ok(false) => Check::NotReady(Some("disabled".into())),
                Err(e) => Check::NotReady(Some(e.to_string())),
            }
        })
        .await
        .require(&format!("element {} to be enabled", handle.id))
    }

    /// Wait until the intent's match set is non-empty, visible or not.
    pub async fn present(&self, intent: &Intent, timeout: Duration) -> Result<Vec<Handle>, FlowError> {
        let resolver = &self.resolver;
        wait_until(self.poll(timeout), move || async move {
            match resolver.probe(intent).await {
                Ok(handles) if !handles.is_empty() => Check::Ready(handles),
                Ok(_) => Check::NotReady(Some("no matches".into())),
                Err(e) => Check::NotReady(Some(e.to_string())),
            }
        })
        .await
        .require(&format!("{intent} to be present"))
    }

    /// First-satisfied race. Returns the index of the first arm whose element
    /// became visible, or `None` once every arm has timed out. Arms still
    /// pending when a winner settles are dropped.
    pub async fn race(&self, arms: &[RaceArm]) -> Option<(usize, Handle)> {
        let mut pending: FuturesUnordered<Pin<Box<dyn Future<Output = (usize, Option<Handle>)> + Send + '_>>> =
            FuturesUnordered::new();
        for (idx, arm) in arms.iter().enumerate() {
            pending.push(Box::pin(async move {
                let won = self.visible(&arm.intent, arm.timeout).await.ok();
                (idx, won)
            }));
        }
        while let Some((idx, won)) = pending.next().await {
            if let Some(handle) = won {
                debug!(arm = idx, intent = %arms[idx].intent, "race settled");
                return Some((idx, handle));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn wait_until_returns_value_once_ready() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let out = wait_until(Poll::new(Duration::from_secs(5)), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= 3 { Check::Ready(n) } else { Check::NotReady(Some(format!("n={n}"))) }
        })
        .await;
        assert_eq!(out.met(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_times_out_with_last_observation() {
        let start = Instant::now();
        let out: Outcome<()> = wait_until(Poll::new(Duration::from_secs(2)), || async {
            Check::NotReady(Some("badge hidden".into()))
        })
        .await;
        match out {
            Outcome::TimedOut { last_observed, elapsed } => {
                assert_eq!(last_observed.as_deref(), Some("badge hidden"));
                assert!(elapsed >= Duration::from_secs(2));
            }
            Outcome::Met(_) => panic!("should time out"),
        }
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_still_checks_once() {
        let out = wait_until(Poll::new(Duration::ZERO), || async { Check::Ready(7) }).await;
        assert_eq!(out.met(), Some(7));
    }

    #[tokio::test]
    async fn require_maps_timeout_to_error() {
        let out: Outcome<()> = Outcome::TimedOut { last_observed: None, elapsed: Duration::from_millis(10) };
        let err = out.require("prompt").unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("prompt"));
    }
}
