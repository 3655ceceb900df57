//! # System Lifecycle & Routing
//!
//! Addons never call each other: they emit [`OutboundMessage`]s and expect an external router,
//! the **Core**, to deliver them. This module provides [`CoreSystem`], a small in-process Core
//! that wires several addons together.
//!
//! ## Routing Rules
//!
//! Every message carries a `target`:
//!
//! | Target | Handling |
//! |--------|----------|
//! | `events.subscribe` | records `source` as a subscriber of the subject in `args[0]` |
//! | `gate.addon_ready` | records `source` as ready |
//! | `<addon>.<callback>` | executes the callback on the registered addon |
//!
//! The result of every routed message is delivered back to the sender's pending table: a value
//! followed by a completion, or an error.
//!
//! ## Concurrency
//!
//! The router task only reads the channel; every callback execution is spawned on its own task.
//! A slow callback (a `start` waiting for its dependencies, for example) never blocks routing.
//!
//! ```rust,ignore
//! let core = CoreSystem::new();
//! let events = events_addon::new(core.transport(), config)?;
//! core.register(&events)?;
//!
//! events.start().await?;
//! core.publish(subjects::ALARM_OPEN, json!({ "title": "disk" })).await?;
//! core.shutdown().await?;
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use addon_framework::constants::{READY_TARGET, SUBSCRIBE_TARGET};
use addon_framework::{Addon, CallbackHeader, OutboundMessage, Transport};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SampleError;

/// Name used as `from` when the Core itself calls an addon.
pub const CORE_NAME: &str = "core";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Splits `"<addon>.<callback>"`.
pub fn parse_target(target: &str) -> Result<(&str, &str), SampleError> {
    match target.split_once('.') {
        Some((addon, callback)) if !addon.is_empty() && !callback.is_empty() => {
            Ok((addon, callback))
        }
        _ => Err(SampleError::InvalidTarget(target.to_string())),
    }
}

#[derive(Default)]
struct Routes {
    addons: RwLock<HashMap<String, Addon>>,
    subscribers: Mutex<HashMap<String, BTreeSet<String>>>,
    ready: Mutex<BTreeSet<String>>,
}

impl Routes {
    fn addon(&self, name: &str) -> Option<Addon> {
        self.addons
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    async fn execute(
        &self,
        target: &str,
        header: CallbackHeader,
        args: Vec<Value>,
    ) -> Result<Value, SampleError> {
        let (name, callback) = parse_target(target)?;
        let addon = self
            .addon(name)
            .ok_or_else(|| SampleError::UnknownAddon(name.to_string()))?;
        Ok(addon.execute_callback(callback, header, args).await?)
    }

    async fn route(&self, message: OutboundMessage) {
        debug!(
            message_id = %message.message_id,
            source = %message.source,
            target = %message.target,
            "Routing message"
        );
        let result = match message.target.as_str() {
            SUBSCRIBE_TARGET => match message.args.first().and_then(Value::as_str) {
                Some(subject) => {
                    lock(&self.subscribers)
                        .entry(subject.to_string())
                        .or_default()
                        .insert(message.source.clone());
                    info!(addon = %message.source, subject, "Subscription registered");
                    Ok(json!(true))
                }
                None => Err(SampleError::InvalidTarget(format!(
                    "{SUBSCRIBE_TARGET} without subject"
                ))),
            },
            READY_TARGET => {
                lock(&self.ready).insert(message.source.clone());
                info!(addon = %message.source, "Addon announced ready");
                Ok(json!(true))
            }
            target => {
                let header =
                    CallbackHeader::new(message.source.clone()).with_id(message.message_id.clone());
                self.execute(target, header, message.args).await
            }
        };
        self.reply(&message.source, &message.message_id, result);
    }

    fn reply(&self, source: &str, message_id: &str, result: Result<Value, SampleError>) {
        let Some(sender) = self.addon(source) else {
            warn!(source, message_id, "Reply to unknown addon dropped");
            return;
        };
        let pending = sender.pending();
        match result {
            Ok(value) => {
                pending.next(message_id, value);
                pending.complete(message_id);
            }
            Err(e) => {
                debug!(source, message_id, error = %e, "Routed message failed");
                pending.error(message_id, e.to_string());
            }
        }
    }
}

/// In-process Core routing messages between registered addons.
pub struct CoreSystem {
    routes: Arc<Routes>,
    sender: mpsc::UnboundedSender<OutboundMessage>,
    shutdown: oneshot::Sender<()>,
    router: JoinHandle<()>,
}

impl CoreSystem {
    /// Creates the Core and spawns its router task.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<OutboundMessage>();
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let routes = Arc::new(Routes::default());

        let router_routes = routes.clone();
        let router = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    message = receiver.recv() => {
                        let Some(message) = message else { break };
                        let routes = router_routes.clone();
                        tokio::spawn(async move { routes.route(message).await });
                    }
                }
            }
            info!("Core router stopped");
        });

        Self {
            routes,
            sender,
            shutdown,
            router,
        }
    }

    /// Transport to give to every addon registered on this Core.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.sender.clone())
    }

    pub fn register(&self, addon: &Addon) -> Result<(), SampleError> {
        let mut addons = self
            .routes
            .addons
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if addons.contains_key(addon.name()) {
            return Err(SampleError::DuplicateAddon(addon.name().to_string()));
        }
        addons.insert(addon.name().to_string(), addon.clone());
        info!(addon = addon.name(), uid = addon.uid(), "Addon registered on core");
        Ok(())
    }

    pub fn addon(&self, name: &str) -> Option<Addon> {
        self.routes.addon(name)
    }

    /// Whether `name` announced itself ready.
    pub fn is_ready(&self, name: &str) -> bool {
        lock(&self.routes.ready).contains(name)
    }

    pub fn subscribers(&self, subject: &str) -> Vec<String> {
        lock(&self.routes.subscribers)
            .get(subject)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Executes `target` on behalf of the Core.
    pub async fn call(&self, target: &str, args: Vec<Value>) -> Result<Value, SampleError> {
        self.routes
            .execute(target, CallbackHeader::new(CORE_NAME), args)
            .await
    }

    /// Sends `payload` to every addon subscribed to `subject`. Returns the number of local
    /// subscribers reached.
    pub async fn publish(&self, subject: &str, payload: Value) -> Result<usize, SampleError> {
        let mut delivered = 0;
        for name in self.subscribers(subject) {
            let target = format!("{name}.event");
            let reached = self
                .call(&target, vec![json!(subject), payload.clone()])
                .await?;
            delivered += reached.as_u64().unwrap_or(0) as usize;
        }
        info!(subject, delivered, "Event published");
        Ok(delivered)
    }

    /// Stops every registered addon, then the router.
    pub async fn shutdown(self) -> Result<(), SampleError> {
        let addons: Vec<Addon> = self
            .routes
            .addons
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        for addon in &addons {
            addon.stop().await?;
        }
        self.routes
            .addons
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();

        let _ = self.shutdown.send(());
        if let Err(e) = self.router.await {
            warn!(error = %e, "Core router task failed");
        }
        info!("Core shut down");
        Ok(())
    }
}

impl Default for CoreSystem {
    fn default() -> Self {
        Self::new()
    }
}
