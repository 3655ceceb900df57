//! # Schedulers
//!
//! A [`Scheduler`] decides, once per main-loop tick, whether its callback should fire. The
//! container treats it as an opaque predicate; [`IntervalScheduler`] is the stock
//! implementation.

use std::time::{Duration, Instant};

/// Periodic trigger consulted by the scheduler loop.
pub trait Scheduler: Send + 'static {
    /// Called once per tick; must be cheap and safe to call repeatedly.
    fn should_fire_now(&mut self) -> bool;
}

impl<F> Scheduler for F
where
    F: FnMut() -> bool + Send + 'static,
{
    fn should_fire_now(&mut self) -> bool {
        (self)()
    }
}

/// Fires every `interval`, optionally on the very first tick.
///
/// The first call answers `execute_on_start`. Afterwards the scheduler waits until the
/// optional start delay has elapsed, arms its timer, and fires each time `interval` has
/// elapsed since the previous firing (or since arming).
#[derive(Debug, Clone)]
pub struct IntervalScheduler {
    interval: Duration,
    execute_on_start: bool,
    start_at: Option<Instant>,
    started: bool,
    next_fire: Option<Instant>,
}

impl IntervalScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            execute_on_start: false,
            start_at: None,
            started: false,
            next_fire: None,
        }
    }

    pub fn execute_on_start(mut self, execute_on_start: bool) -> Self {
        self.execute_on_start = execute_on_start;
        self
    }

    /// Delay before the scheduler starts counting intervals.
    pub fn start_after(mut self, delay: Duration) -> Self {
        self.start_at = Some(Instant::now() + delay);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn walk(&mut self, now: Instant) -> bool {
        if !self.started {
            self.started = true;
            return self.execute_on_start;
        }
        if self.start_at.is_some_and(|at| now < at) {
            return false;
        }
        let next = *self.next_fire.get_or_insert(now + self.interval);
        if next > now {
            return false;
        }
        self.next_fire = Some(now + self.interval);
        true
    }
}

impl Scheduler for IntervalScheduler {
    fn should_fire_now(&mut self) -> bool {
        self.walk(Instant::now())
    }
}
