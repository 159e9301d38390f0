use std::sync::Arc;
use std::time::Duration;

use crate::config::Timeouts;
use crate::driver::Driver;
use crate::events::EventSync;
use crate::executor::Executor;
use crate::resolver::Resolver;
use crate::wait::Waiter;

/// Everything a flow needs to drive one page, built around a single driver.
#[derive(Clone)]
pub struct Harness {
    pub driver: Arc<dyn Driver>,
    pub resolver: Resolver,
    pub waiter: Waiter,
    pub exec: Executor,
    pub events: EventSync,
    pub timeouts: Timeouts,
}

impl Harness {
    pub fn new(driver: Arc<dyn Driver>, timeouts: Timeouts) -> Self {
        Self::with_interval(driver, timeouts, crate::wait::DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(driver: Arc<dyn Driver>, timeouts: Timeouts, interval: Duration) -> Self {
        let resolver = Resolver::new(driver.clone()).with_interval(interval);
        let waiter = Waiter::new(driver.clone(), resolver.clone()).with_interval(interval);
        let exec = Executor::new(driver.clone(), resolver.clone(), waiter.clone(), timeouts);
        let events = EventSync::new(driver.clone(), waiter.clone(), timeouts.events);
        Self { driver, resolver, waiter, exec, events, timeouts }
    }
}
