//! # Dependency Locks
//!
//! An addon can declare that it must not become awake before other addons report themselves
//! ready. Each declaration is a [`LockRule`] recorded with [`LockTable::lock_on`]; the
//! coordinator ([`LockTable::wait_for_all`]) then polls every dependency's readiness through a
//! [`DependencyProbe`] until one full pass succeeds.
//!
//! ## Backoff
//!
//! After a failed pass the coordinator sleeps, starting at a small delay that grows
//! geometrically up to a ceiling. The delay only resets when a wait finishes. A probe that fails
//! (timeout, remote error) counts as "not ready"; nothing is ever thrown from the wait.
//!
//! ## Cancellation
//!
//! The wait observes the addon's `started` flag before every pass, during every readiness check
//! and while sleeping, and returns `false` as soon as the addon is stopped. A cancelled wait never
//! reports a blocking dependency.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::{AddonConfig, LockRetryPolicy};

/// Rules attached to one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRule {
    /// The dependency must be ready before the addon enters the awake state.
    pub start_after: bool,
    /// Reserved for callback-level gating.
    pub lock_callback: bool,
}

impl Default for LockRule {
    fn default() -> Self {
        Self {
            start_after: true,
            lock_callback: false,
        }
    }
}

/// How the coordinator learns whether a dependency is ready.
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// `true` only when the dependency answered with `ready: true`.
    async fn is_ready(&self, addon: &str) -> bool;

    /// Called with the dependency currently blocking the wait, or `None` once unlocked.
    fn locked_on(&self, _addon: Option<&str>) {}
}

/// Geometric backoff capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            factor,
            max,
        }
    }

    pub fn from_config(config: &AddonConfig) -> Self {
        Self::new(
            Duration::from_millis(config.lock_initial_delay_ms),
            config.lock_backoff_factor,
            Duration::from_millis(config.max_sleep_time_ms),
        )
    }

    /// Returns the delay to sleep now and grows the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.max);
        delay
    }
}

/// Dependency name → rule, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    rules: Vec<(String, LockRule)>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records or replaces the rule for `addon`.
    pub fn lock_on(&mut self, addon: impl Into<String>, rule: LockRule) {
        let addon = addon.into();
        match self.rules.iter_mut().find(|(name, _)| *name == addon) {
            Some(entry) => entry.1 = rule,
            None => self.rules.push((addon, rule)),
        }
    }

    pub fn rule(&self, addon: &str) -> Option<LockRule> {
        self.rules
            .iter()
            .find(|(name, _)| name == addon)
            .map(|(_, rule)| *rule)
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.rules.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Blocks until every relevant dependency is ready or the addon stops.
    ///
    /// With `as_start` only `start_after` rules are considered. Returns `true` when all
    /// dependencies answered ready, `false` when `started` turned false during the wait.
    pub async fn wait_for_all<P: DependencyProbe + ?Sized>(
        &self,
        probe: &P,
        mut started: watch::Receiver<bool>,
        as_start: bool,
        mut backoff: Backoff,
        policy: LockRetryPolicy,
    ) -> bool {
        let rules: Vec<&str> = self
            .rules
            .iter()
            .filter(|(_, rule)| !as_start || rule.start_after)
            .map(|(name, _)| name.as_str())
            .collect();
        let mut resolved: HashSet<&str> = HashSet::new();

        loop {
            if !*started.borrow() {
                debug!("Lock wait cancelled, addon stopped");
                return false;
            }

            let mut blocking = None;
            for &addon in &rules {
                if policy == LockRetryPolicy::FailingOnly && resolved.contains(addon) {
                    continue;
                }
                let ready = tokio::select! {
                    ready = probe.is_ready(addon) => ready,
                    _ = started.wait_for(|started| !*started) => {
                        debug!(dependency = addon, "Lock wait cancelled during a readiness check");
                        return false;
                    }
                };
                if ready {
                    resolved.insert(addon);
                } else {
                    blocking = Some(addon);
                    break;
                }
            }

            let Some(addon) = blocking else {
                probe.locked_on(None);
                return true;
            };

            let still_started = *started.borrow();
            if !still_started {
                debug!("Lock wait cancelled, addon stopped");
                return false;
            }
            probe.locked_on(Some(addon));
            let delay = backoff.next_delay();
            info!(dependency = addon, delay_ms = delay.as_millis() as u64, "Waiting for dependency");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = started.wait_for(|started| !*started) => {
                    debug!("Lock wait cancelled, addon stopped");
                    return false;
                }
            }
        }
    }
}
