//! # Subscriptions
//!
//! Subject → local subscribers. Every call to [`Addon::of`](crate::Addon::of) adds one entry and
//! returns a [`SubjectStream`]; dropping the stream removes that entry only. Inbound events are
//! fanned out with [`SubscriptionTable::publish`], and [`SubscriptionTable::complete_all`] ends
//! every live stream when the addon stops.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

type Subscribers = HashMap<String, Vec<(u64, mpsc::UnboundedSender<Value>)>>;

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    subjects: Subscribers,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionTable {
    state: Arc<Mutex<State>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, subject: &str) -> SubjectStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state
            .subjects
            .entry(subject.to_string())
            .or_default()
            .push((id, sender));
        SubjectStream {
            id,
            subject: subject.to_string(),
            receiver,
            table: self.clone(),
        }
    }

    fn unsubscribe(&self, subject: &str, id: u64) {
        let mut state = self.lock();
        if let Some(subscribers) = state.subjects.get_mut(subject) {
            subscribers.retain(|(entry, _)| *entry != id);
            if subscribers.is_empty() {
                state.subjects.remove(subject);
            }
        }
    }

    /// Delivers `payload` to every live subscriber of `subject`. Returns how many received it.
    pub fn publish(&self, subject: &str, payload: Value) -> usize {
        let state = self.lock();
        let Some(subscribers) = state.subjects.get(subject) else {
            return 0;
        };
        let delivered = subscribers
            .iter()
            .filter(|(_, sender)| sender.send(payload.clone()).is_ok())
            .count();
        debug!(subject, delivered, "Event published");
        delivered
    }

    /// Ends every live stream. Their entries disappear as they are dropped.
    pub fn complete_all(&self) {
        let mut state = self.lock();
        state.subjects.clear();
    }

    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.lock().subjects.get(subject).map_or(0, Vec::len)
    }
}

/// Payloads published on one subject.
#[must_use = "dropping the stream unsubscribes"]
#[derive(Debug)]
pub struct SubjectStream {
    id: u64,
    subject: String,
    receiver: mpsc::UnboundedReceiver<Value>,
    table: SubscriptionTable,
}

impl SubjectStream {
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl Stream for SubjectStream {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for SubjectStream {
    fn drop(&mut self) {
        self.table.unsubscribe(&self.subject, self.id);
    }
}
