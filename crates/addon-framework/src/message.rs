//! # Message Exchange
//!
//! Outbound messages and the tracking of their responses.
//!
//! ## Emission
//!
//! [`MessageExchange::send_message`] generates a unique message id and hands the
//! [`OutboundMessage`] to the [`Transport`] on a freshly spawned task, so the caller's
//! synchronous code always finishes before the Core sees the message.
//!
//! ## Responses
//!
//! The Core answers by calling [`PendingTable::next`], [`PendingTable::error`] or
//! [`PendingTable::complete`] with the message id. Each pending message owns one channel and
//! the returned [`MessageStream`] owns the receiving half. A single timeout timer is started
//! when the message is sent and is never re-armed. Whatever happens first (completion, error,
//! timeout or dropping the stream) removes the pending entry and stops the timer; later
//! deliveries for that id are ignored.
//!
//! ```text
//! send_message ──► PendingTable[id] ──► Transport::emit (next task)
//!                        ▲
//! Core ── next/complete ─┘──► MessageStream ──► subscriber
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{AddonError, AddonResult};

/// A message leaving the addon towards the Core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: String,
    /// Name of the sending addon.
    pub source: String,
    /// `"<addon>.<callback>"` path of the remote callback.
    pub target: String,
    pub args: Vec<Value>,
}

/// How messages physically reach the Core.
pub trait Transport: Send + Sync + 'static {
    fn emit(&self, message: OutboundMessage);
}

/// Transport used when no Core is connected: messages are logged and dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn emit(&self, message: OutboundMessage) {
        trace!(message_id = %message.message_id, target = %message.target, "No transport, message dropped");
    }
}

impl Transport for mpsc::UnboundedSender<OutboundMessage> {
    fn emit(&self, message: OutboundMessage) {
        if let Err(e) = self.send(message) {
            warn!(message_id = %e.0.message_id, target = %e.0.target, "Transport closed, message dropped");
        }
    }
}

/// Options of [`MessageExchange::send_message`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageOptions {
    pub args: Vec<Value>,
    /// Overrides the default response timeout.
    pub timeout: Option<Duration>,
    /// Emit only, do not track any response.
    pub no_return: bool,
}

impl MessageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn no_return(mut self) -> Self {
        self.no_return = true;
        self
    }
}

impl From<Vec<Value>> for MessageOptions {
    fn from(args: Vec<Value>) -> Self {
        Self::new().args(args)
    }
}

#[derive(Debug)]
enum Delivery {
    Next(Value),
    Error(String),
    Complete,
    Expired,
}

#[derive(Debug)]
struct PendingEntry {
    target: String,
    sender: mpsc::UnboundedSender<Delivery>,
    timer: Option<AbortHandle>,
}

impl PendingEntry {
    fn close(self, last: Delivery) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        let _ = self.sender.send(last);
    }
}

/// Messages waiting for a response, keyed by message id.
///
/// This is the consumption side used by the Core to deliver responses.
#[derive(Debug, Clone, Default)]
pub struct PendingTable {
    entries: Arc<Mutex<HashMap<String, PendingEntry>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, message_id: &str, target: &str) -> mpsc::UnboundedReceiver<Delivery> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().insert(
            message_id.to_string(),
            PendingEntry {
                target: target.to_string(),
                sender,
                timer: None,
            },
        );
        receiver
    }

    /// Starts the single timeout timer of a pending message.
    fn arm(&self, runtime: &Handle, message_id: &str, deadline: Instant) {
        let table = self.clone();
        let id = message_id.to_string();
        let timer = runtime
            .spawn(async move {
                tokio::time::sleep_until(deadline).await;
                table.expire(&id);
            })
            .abort_handle();
        match self.lock().get_mut(message_id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
    }

    fn expire(&self, message_id: &str) {
        let Some(entry) = self.lock().remove(message_id) else {
            return;
        };
        warn!(%message_id, target = %entry.target, "Message timed out");
        let _ = entry.sender.send(Delivery::Expired);
    }

    fn remove(&self, message_id: &str) -> bool {
        let entry = self.lock().remove(message_id);
        match entry {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Delivers one response value. Returns `false` if the message is no longer pending.
    pub fn next(&self, message_id: &str, value: Value) -> bool {
        match self.lock().get(message_id) {
            Some(entry) => entry.sender.send(Delivery::Next(value)).is_ok(),
            None => false,
        }
    }

    /// Fails the message and removes it.
    pub fn error(&self, message_id: &str, error: impl Into<String>) -> bool {
        let entry = self.lock().remove(message_id);
        match entry {
            Some(entry) => {
                entry.close(Delivery::Error(error.into()));
                true
            }
            None => false,
        }
    }

    /// Completes the message and removes it.
    pub fn complete(&self, message_id: &str) -> bool {
        let entry = self.lock().remove(message_id);
        match entry {
            Some(entry) => {
                entry.close(Delivery::Complete);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.lock().contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Response stream of one message.
///
/// The timeout runs from the moment the message is sent and is never extended by incoming
/// values. On expiry the pending entry is removed even if nobody polls the stream; the next poll
/// then yields [`AddonError::Timeout`]. Dropping the stream before the end unsubscribes,
/// cancelling the timer and the pending entry.
#[must_use = "dropping the stream cancels the pending message"]
pub struct MessageStream {
    message_id: String,
    source: String,
    target: String,
    timeout: Duration,
    deadline: Instant,
    armed: bool,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    pending: PendingTable,
    done: bool,
}

impl MessageStream {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    fn finish(&mut self) {
        self.done = true;
        self.receiver.close();
        self.pending.remove(&self.message_id);
    }

    fn timeout_error(&self) -> AddonError {
        AddonError::Timeout {
            message_id: self.message_id.clone(),
            from: self.source.clone(),
            target: self.target.clone(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

impl Stream for MessageStream {
    type Item = AddonResult<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        // Sent outside a runtime: the timer starts on the first poll, with the original deadline.
        if !this.armed {
            if let Ok(runtime) = Handle::try_current() {
                this.armed = true;
                this.pending.arm(&runtime, &this.message_id, this.deadline);
            }
        }

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(Delivery::Next(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(Delivery::Error(message))) => {
                this.finish();
                Poll::Ready(Some(Err(AddonError::Remote(message))))
            }
            Poll::Ready(Some(Delivery::Expired)) => {
                let error = this.timeout_error();
                this.finish();
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(Some(Delivery::Complete)) | Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        if !self.done && self.pending.remove(&self.message_id) {
            debug!(message_id = %self.message_id, "Message unsubscribed");
        }
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("message_id", &self.message_id)
            .field("target", &self.target)
            .field("timeout", &self.timeout)
            .field("done", &self.done)
            .finish()
    }
}

/// Outbound emission plus response tracking for one addon.
#[derive(Clone)]
pub struct MessageExchange {
    source: String,
    default_timeout: Duration,
    transport: Arc<dyn Transport>,
    pending: PendingTable,
}

impl MessageExchange {
    pub fn new(
        source: impl Into<String>,
        default_timeout: Duration,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            source: source.into(),
            default_timeout,
            transport,
            pending: PendingTable::new(),
        }
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Sends a message to `target`. Returns `None` when `options.no_return` is set.
    pub fn send_message(
        &self,
        target: &str,
        options: MessageOptions,
    ) -> AddonResult<Option<MessageStream>> {
        if target.trim().is_empty() || target.contains(char::is_whitespace) {
            return Err(AddonError::InvalidArgument(format!(
                "message target '{target}' is not a valid callback path"
            )));
        }
        let message_id = uuid::Uuid::new_v4().to_string();
        let runtime = Handle::try_current().ok();
        let stream = (!options.no_return).then(|| {
            let timeout = options.timeout.unwrap_or(self.default_timeout);
            let deadline = Instant::now() + timeout;
            let receiver = self.pending.insert(&message_id, target);
            if let Some(runtime) = &runtime {
                self.pending.arm(runtime, &message_id, deadline);
            }
            MessageStream {
                message_id: message_id.clone(),
                source: self.source.clone(),
                target: target.to_string(),
                timeout,
                deadline,
                armed: runtime.is_some(),
                receiver,
                pending: self.pending.clone(),
                done: false,
            }
        });

        debug!(%message_id, target, args = options.args.len(), "Sending message");
        let message = OutboundMessage {
            message_id,
            source: self.source.clone(),
            target: target.to_string(),
            args: options.args,
        };
        let transport = self.transport.clone();
        match runtime {
            Some(runtime) => {
                runtime.spawn(async move { transport.emit(message) });
            }
            None => transport.emit(message),
        }
        Ok(stream)
    }

    /// Sends a message and resolves with its first value (or `Null` if it completes empty).
    pub async fn send_one(
        &self,
        target: &str,
        options: impl Into<MessageOptions>,
    ) -> AddonResult<Value> {
        let Some(mut stream) = self.send_message(target, options.into())? else {
            return Ok(Value::Null);
        };
        match stream.next().await {
            Some(result) => result,
            None => Ok(Value::Null),
        }
    }
}

impl std::fmt::Debug for MessageExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageExchange")
            .field("source", &self.source)
            .field("default_timeout", &self.default_timeout)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exchange() -> (MessageExchange, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let exchange = MessageExchange::new("tester", Duration::from_secs(5), Arc::new(tx));
        (exchange, rx)
    }

    #[tokio::test]
    async fn test_invalid_target() {
        let (exchange, _rx) = exchange();
        assert!(matches!(
            exchange.send_message("", MessageOptions::new()),
            Err(AddonError::InvalidArgument(_))
        ));
        assert!(exchange.send_message("a b", MessageOptions::new()).is_err());
    }

    #[tokio::test]
    async fn test_emission_is_deferred() {
        let (exchange, mut rx) = exchange();
        let _stream = exchange
            .send_message("cpu.status", MessageOptions::new().args(vec![json!(1)]))
            .unwrap()
            .unwrap();
        // Nothing was emitted synchronously.
        assert!(rx.try_recv().is_err());

        let message = rx.recv().await.unwrap();
        assert_eq!(message.target, "cpu.status");
        assert_eq!(message.source, "tester");
        assert_eq!(message.args, vec![json!(1)]);
    }

    #[tokio::test]
    async fn test_no_return_is_not_tracked() {
        let (exchange, mut rx) = exchange();
        let stream = exchange
            .send_message("any", MessageOptions::new().no_return())
            .unwrap();
        assert!(stream.is_none());
        assert!(exchange.pending().is_empty());
        assert_eq!(rx.recv().await.unwrap().target, "any");
    }

    #[tokio::test]
    async fn test_values_then_completion() {
        let (exchange, mut rx) = exchange();
        let mut stream = exchange
            .send_message("any", MessageOptions::new())
            .unwrap()
            .unwrap();
        let id = rx.recv().await.unwrap().message_id;
        assert_eq!(id, stream.message_id());

        let pending = exchange.pending().clone();
        assert!(pending.next(&id, json!("a")));
        assert!(pending.next(&id, json!("b")));
        assert!(pending.complete(&id));
        assert!(!pending.complete(&id));

        assert_eq!(stream.next().await.unwrap().unwrap(), json!("a"));
        assert_eq!(stream.next().await.unwrap().unwrap(), json!("b"));
        assert!(stream.next().await.is_none());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_reports_message_and_leaves_nothing() {
        let (exchange, _rx) = exchange();
        let mut stream = exchange
            .send_message(
                "x",
                MessageOptions::new().timeout(Duration::from_millis(100)),
            )
            .unwrap()
            .unwrap();
        let id = stream.message_id().to_string();

        let started = std::time::Instant::now();
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(100));
        match err {
            AddonError::Timeout {
                message_id,
                from,
                target,
                timeout_ms,
            } => {
                assert_eq!(message_id, id);
                assert_eq!(from, "tester");
                assert_eq!(target, "x");
                assert_eq!(timeout_ms, 100);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
        assert!(exchange.pending().is_empty());
        // Late responses are ignored.
        assert!(!exchange.pending().next(&id, json!(1)));
    }

    #[tokio::test]
    async fn test_values_do_not_extend_the_timeout() {
        let (exchange, mut rx) = exchange();
        let mut stream = exchange
            .send_message(
                "x",
                MessageOptions::new().timeout(Duration::from_millis(150)),
            )
            .unwrap()
            .unwrap();
        let id = rx.recv().await.unwrap().message_id;
        let pending = exchange.pending().clone();

        let started = std::time::Instant::now();
        tokio::spawn(async move {
            for i in 0..10 {
                tokio::time::sleep(Duration::from_millis(40)).await;
                if !pending.next(&id, json!(i)) {
                    break;
                }
            }
        });

        let mut values = 0;
        loop {
            match stream.next().await {
                Some(Ok(_)) => values += 1,
                Some(Err(err)) => {
                    assert!(matches!(err, AddonError::Timeout { .. }));
                    break;
                }
                None => panic!("stream completed without timing out"),
            }
        }
        assert!(values >= 1 && values < 10);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(exchange.pending().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_removes_entry_of_unpolled_stream() {
        let (exchange, _rx) = exchange();
        let mut stream = exchange
            .send_message(
                "x",
                MessageOptions::new().timeout(Duration::from_millis(50)),
            )
            .unwrap()
            .unwrap();
        assert!(exchange.pending().contains(stream.message_id()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!exchange.pending().contains(stream.message_id()));
        assert!(!exchange.pending().next(stream.message_id(), json!(1)));

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, AddonError::Timeout { timeout_ms: 50, .. }));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let (exchange, _rx) = exchange();
        for _ in 0..3 {
            let stream = exchange.send_message("x", MessageOptions::new()).unwrap();
            assert_eq!(exchange.pending().len(), 1);
            drop(stream);
            assert!(exchange.pending().is_empty());
        }
    }

    #[tokio::test]
    async fn test_send_one_value_and_error() {
        let (exchange, mut rx) = exchange();
        let pending = exchange.pending().clone();
        tokio::spawn(async move {
            let first = rx.recv().await.unwrap();
            pending.next(&first.message_id, json!("hello"));
            let second = rx.recv().await.unwrap();
            pending.error(&second.message_id, "oh no!");
        });

        assert_eq!(exchange.send_one("any", MessageOptions::new()).await.unwrap(), json!("hello"));
        let err = exchange.send_one("any", MessageOptions::new()).await.unwrap_err();
        assert!(matches!(err, AddonError::Remote(ref m) if m == "oh no!"));
        assert!(exchange.pending().is_empty());
    }
}
