//! # Interval Table
//!
//! User background tasks that run every `period` while the addon is awake. Entries are
//! dormant until [`IntervalTable::arm`] gives each of them a live timer; [`IntervalTable::disarm`]
//! stops the timers but keeps the entries for the next awake transition, and
//! [`IntervalTable::clear`] stops the timers before dropping every entry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::error::{AddonError, AddonResult};
use crate::event::EventBus;
use crate::periodic::PeriodicTask;

/// Opaque identifier returned by `register_interval`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntervalId(String);

impl IntervalId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IntervalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of an interval.
#[async_trait]
pub trait IntervalCallback: Send + Sync + 'static {
    async fn run(&self) -> AddonResult<()>;
}

#[async_trait]
impl<F, Fut> IntervalCallback for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AddonResult<()>> + Send + 'static,
{
    async fn run(&self) -> AddonResult<()> {
        (self)().await
    }
}

struct IntervalEntry {
    callback: Arc<dyn IntervalCallback>,
    period: Duration,
    timer: Option<PeriodicTask>,
}

#[derive(Default)]
pub struct IntervalTable {
    entries: HashMap<IntervalId, IntervalEntry>,
}

impl IntervalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        callback: impl IntervalCallback,
        period: Duration,
    ) -> AddonResult<IntervalId> {
        if period.is_zero() {
            return Err(AddonError::InvalidArgument(
                "interval period must be greater than 0".into(),
            ));
        }
        let id = IntervalId::generate();
        self.entries.insert(
            id.clone(),
            IntervalEntry {
                callback: Arc::new(callback),
                period,
                timer: None,
            },
        );
        Ok(id)
    }

    /// Starts a timer for every dormant entry. Failures are reported on `events`.
    pub(crate) fn arm(&mut self, events: &EventBus) {
        for (id, entry) in self.entries.iter_mut().filter(|(_, e)| e.timer.is_none()) {
            let callback = entry.callback.clone();
            let events = events.clone();
            let id = id.clone();
            entry.timer = Some(PeriodicTask::spawn("interval", entry.period, move || {
                let callback = callback.clone();
                let events = events.clone();
                let id = id.clone();
                async move {
                    if let Err(e) = callback.run().await {
                        error!(interval = %id, error = %e, "Interval failed");
                        events.error(AddonError::IntervalFailure {
                            id: id.to_string(),
                            source: Box::new(e),
                        });
                    }
                    true
                }
            }));
        }
        debug!(count = self.entries.len(), "Intervals armed");
    }

    /// Stops every live timer; entries stay registered.
    pub(crate) fn disarm(&mut self) {
        for entry in self.entries.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.cancel();
            }
        }
    }

    /// Stops every timer, then forgets every entry.
    pub(crate) fn clear(&mut self) {
        self.disarm();
        self.entries.clear();
    }

    pub fn contains(&self, id: &IntervalId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn is_armed(&self, id: &IntervalId) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.timer.is_some())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AddonEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl IntervalCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let callback = move || {
            let inner = inner.clone();
            async move {
                inner.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };
        (count, callback)
    }

    #[test]
    fn test_zero_period_is_invalid() {
        let mut table = IntervalTable::new();
        let (_, callback) = counter();
        let result = table.register(callback, Duration::ZERO);
        assert!(matches!(result, Err(AddonError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_entries_are_dormant_until_armed() {
        let events = EventBus::new();
        let mut table = IntervalTable::new();
        let (count, callback) = counter();
        let id = table.register(callback, Duration::from_millis(10)).unwrap();

        assert!(!table.is_armed(&id));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        table.arm(&events);
        assert!(table.is_armed(&id));
        tokio::time::sleep(Duration::from_millis(45)).await;
        assert!(count.load(Ordering::SeqCst) >= 2);

        table.disarm();
        assert!(table.contains(&id));
        assert!(!table.is_armed(&id));

        table.clear();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_failures_become_error_events_without_killing_timer() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let mut table = IntervalTable::new();
        table
            .register(
                || async { Err::<(), _>(AddonError::handler("oops")) },
                Duration::from_millis(10),
            )
            .unwrap();
        table.arm(&events);

        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                AddonEvent::Error(e) => {
                    assert!(matches!(&*e, AddonError::IntervalFailure { .. }));
                    assert!(e.to_string().contains("oops"));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        table.clear();
    }
}
