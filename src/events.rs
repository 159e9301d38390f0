//! Best-effort synchronization on the "AI Events (N)" badge.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::driver::Driver;
use crate::error::FlowError;
use crate::intent::Intent;
use crate::wait::{wait_until, Check, Outcome, Poll, Waiter};

/// Cap on how long a sync waits for the counter to move.
pub const MAX_CHANGE_WAIT: Duration = Duration::from_secs(10);

/// Last observed counter value, carried through a workflow run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_count: Option<u64>,
}

fn count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)AI Events\s*\((\d+)\)").unwrap_or_else(|e| panic!("{e}")))
}

pub fn parse_event_count(text: &str) -> Option<u64> {
    count_re().captures(text).and_then(|c| c[1].parse().ok())
}

pub fn badge_intent() -> Intent {
    Intent::new("AI events badge").text(r"AI Events\s*\(\d+\)")
}

#[derive(Clone)]
pub struct EventSync {
    driver: Arc<dyn Driver>,
    waiter: Waiter,
    badge: Intent,
    appear_timeout: Duration,
}

impl EventSync {
    pub fn new(driver: Arc<dyn Driver>, waiter: Waiter, appear_timeout: Duration) -> Self {
        Self { driver, waiter, badge: badge_intent(), appear_timeout }
    }

    pub async fn read(&self) -> Option<u64> {
        let handle = self.waiter.visible_now(&self.badge).await?;
        let text = self.driver.text(&handle).await.ok()?;
        parse_event_count(&text)
    }

    /// Wait for the badge, then briefly for its count to move off the last
    /// observed value. Only the badge appearing is required; a counter that
    /// never changes is logged and the run proceeds with the current value.
    pub async fn sync(&self, state: &mut SyncState) -> Result<Option<u64>, FlowError> {
        self.waiter.visible(&self.badge, self.appear_timeout).await?;

        let previous = state.last_count;
        let change = Poll::new(MAX_CHANGE_WAIT.min(self.appear_timeout));
        let outcome = wait_until(change, move || async move {
            match self.read().await {
                Some(n) if Some(n) != previous => Check::Ready(n),
                other => Check::NotReady(other.map(|n| format!("count={n}"))),
            }
        })
        .await;

        match outcome {
            Outcome::Met(n) => {
                debug!(previous = ?previous, current = n, "ai events advanced");
                state.last_count = Some(n);
            }
            Outcome::TimedOut { elapsed, .. } => {
                // the app sometimes reuses an event bucket; downstream prompt waits still gate progress
                state.last_count = self.read().await.or(previous);
                warn!(
                    previous = ?previous,
                    current = ?state.last_count,
                    waited_ms = elapsed.as_millis() as u64,
                    "ai events counter did not change; continuing"
                );
            }
        }
        Ok(state.last_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Resolver;
    use crate::scripted::{Node, ScriptedDriver};
    use tokio::time::Instant;

    fn setup(badge: Option<&str>) -> (Arc<ScriptedDriver>, EventSync) {
        let driver = Arc::new(ScriptedDriver::new());
        if let Some(text) = badge {
            driver.with_dom(|dom| dom.add(Node::new("badge").text(text)));
        }
        let resolver = Resolver::new(driver.clone());
        let waiter = Waiter::new(driver.clone(), resolver);
        let sync = EventSync::new(driver.clone(), waiter, Duration::from_secs(180));
        (driver, sync)
    }

    #[test]
    fn parses_badge_text() {
        assert_eq!(parse_event_count("AI Events (14)"), Some(14));
        assert_eq!(parse_event_count("ai events(3) new"), Some(3));
        assert_eq!(parse_event_count("AI Events"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_counter_does_not_block() {
        let (_driver, sync) = setup(Some("AI Events (4)"));
        let mut state = SyncState { last_count: Some(4) };

        let start = Instant::now();
        let out = sync.sync(&mut state).await.unwrap();

        assert_eq!(out, Some(4));
        assert_eq!(state.last_count, Some(4));
        let waited = start.elapsed();
        assert!(waited >= MAX_CHANGE_WAIT && waited < MAX_CHANGE_WAIT + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn picks_up_changed_counter() {
        let (driver, sync) = setup(Some("AI Events (4)"));
        let bump = driver.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            bump.with_dom(|dom| dom.set_text("badge", "AI Events (5)"));
        });

        let mut state = SyncState { last_count: Some(4) };
        assert_eq!(sync.sync(&mut state).await.unwrap(), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn first_sync_records_initial_count() {
        let (_driver, sync) = setup(Some("AI Events (1)"));
        let mut state = SyncState::default();
        assert_eq!(sync.sync(&mut state).await.unwrap(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_badge_is_a_timeout() {
        let (_driver, sync) = setup(None);
        let mut state = SyncState::default();
        let err = sync.sync(&mut state).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
