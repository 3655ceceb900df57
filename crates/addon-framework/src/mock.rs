//! # Mock Core & Testing Guide
//!
//! An addon never talks to other addons directly: every message goes through the Core, which
//! routes it and later answers through the sender's [`PendingTable`]. [`MockCore`] stands in for
//! that Core inside tests. It records every outbound message and replies according to
//! expectations set with a fluent API, so dependency locks, `send_one` round-trips and readiness
//! announcements can be tested without any other addon running.
//!
//! ## When to use the Mock vs a real Core
//!
//! | Feature | MockCore | Real Core (`addon-sample`) |
//! |---------|----------|----------------------------|
//! | **Peers** | None, replies are scripted | Real addons answering |
//! | **Determinism** | Replies known up front | Depends on the peers' state |
//! | **Use Case** | Testing one addon in isolation | End-to-end flows |
//! | **Error Injection** | Easy (`return_err`, `no_reply`) | Hard |
//!
//! ## Example
//!
//! ```rust
//! use addon_framework::mock::MockCore;
//! use addon_framework::{Addon, LockRule};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let core = MockCore::new();
//!     let addon = Addon::builder("cpu").transport(core.transport()).build().unwrap();
//!     core.attach(&addon);
//!
//!     core.expect("events.status").return_ok(json!({ "ready": true }));
//!     addon.lock_on("events", LockRule::default()).unwrap();
//!
//!     assert!(addon.start().await.unwrap());
//!     assert!(addon.is_awake());
//!     core.verify();
//! }
//! ```
//!
//! Replies for one target are consumed in order; the last one stays in place and answers every
//! further message to that target. Messages to targets without expectation are recorded and
//! left unanswered.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::addon::Addon;
use crate::message::{OutboundMessage, PendingTable, Transport};

#[derive(Debug, Clone)]
enum Reply {
    Ok(Value),
    Err(String),
    Silent,
}

#[derive(Debug, Default)]
struct Expectations {
    replies: HashMap<String, VecDeque<Reply>>,
    hit: HashSet<String>,
}

impl Expectations {
    fn next_reply(&mut self, target: &str) -> Option<Reply> {
        let queue = self.replies.get_mut(target)?;
        self.hit.insert(target.to_string());
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory Core with scripted replies.
pub struct MockCore {
    sender: mpsc::UnboundedSender<OutboundMessage>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<OutboundMessage>>>,
    expectations: Arc<Mutex<Expectations>>,
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    responder: Mutex<Option<JoinHandle<()>>>,
}

impl Default for MockCore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCore {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            expectations: Arc::new(Mutex::new(Expectations::default())),
            sent: Arc::new(Mutex::new(Vec::new())),
            responder: Mutex::new(None),
        }
    }

    /// Transport to hand to [`AddonBuilder::transport`](crate::AddonBuilder::transport).
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.sender.clone())
    }

    /// Starts answering the messages of `addon` through its pending table.
    ///
    /// Only the first attached addon is served.
    pub fn attach(&self, addon: &Addon) {
        let Some(mut receiver) = lock(&self.receiver).take() else {
            warn!(addon = addon.name(), "MockCore already attached, ignoring");
            return;
        };
        let pending: PendingTable = addon.pending().clone();
        let expectations = self.expectations.clone();
        let sent = self.sent.clone();

        let handle = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                lock(&sent).push(message.clone());
                let reply = lock(&expectations).next_reply(&message.target);
                debug!(target = %message.target, message_id = %message.message_id, ?reply, "MockCore received message");
                match reply {
                    Some(Reply::Ok(value)) => {
                        pending.next(&message.message_id, value);
                        pending.complete(&message.message_id);
                    }
                    Some(Reply::Err(error)) => {
                        pending.error(&message.message_id, error);
                    }
                    Some(Reply::Silent) | None => {}
                }
            }
        });
        *lock(&self.responder) = Some(handle);
    }

    /// Scripts the next reply for messages sent to `target`.
    pub fn expect(&self, target: impl Into<String>) -> ReplyBuilder {
        ReplyBuilder {
            target: target.into(),
            expectations: self.expectations.clone(),
        }
    }

    /// Every message received so far, in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        lock(&self.sent).clone()
    }

    pub fn sent_to(&self, target: &str) -> Vec<OutboundMessage> {
        lock(&self.sent)
            .iter()
            .filter(|message| message.target == target)
            .cloned()
            .collect()
    }

    /// Verifies that every scripted reply was used.
    pub fn verify(&self) {
        let expectations = lock(&self.expectations);
        let unmet: Vec<&String> = expectations
            .replies
            .iter()
            .filter(|(target, queue)| queue.len() > 1 || !expectations.hit.contains(*target))
            .map(|(target, _)| target)
            .collect();
        if !unmet.is_empty() {
            panic!("Not all expectations were met: {unmet:?}");
        }
    }
}

impl Drop for MockCore {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.responder).take() {
            handle.abort();
        }
    }
}

/// Builder returned by [`MockCore::expect`].
pub struct ReplyBuilder {
    target: String,
    expectations: Arc<Mutex<Expectations>>,
}

impl ReplyBuilder {
    fn push(self, reply: Reply) {
        lock(&self.expectations)
            .replies
            .entry(self.target)
            .or_default()
            .push_back(reply);
    }

    /// Answers with `value`, then completes the message.
    pub fn return_ok(self, value: Value) {
        self.push(Reply::Ok(value));
    }

    /// Fails the message with `error`.
    pub fn return_err(self, error: impl Into<String>) {
        self.push(Reply::Err(error.into()));
    }

    /// Never answers, leaving the message to time out.
    pub fn no_reply(self) {
        self.push(Reply::Silent);
    }
}
