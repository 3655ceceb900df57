//! # Addon Container
//!
//! The [`Addon`] is the runtime container of one component. It owns every table of the crate
//! (callbacks, schedules, intervals, dependency locks, pending messages, subscriptions) and
//! drives them through a small lifecycle state machine:
//!
//! ```text
//! Stopped ──start──► Started ──locks resolved──► Awake ──sleep──► Started ──locks──► Awake
//!    ▲                  │                          │
//!    └──────stop────────┴──────────stop────────────┘
//! ```
//!
//! `ready` is an orthogonal flag, only settable while started and cleared by `stop`.
//!
//! # Architecture Note
//!
//! `start`, `stop` and `sleep` are serialized by a transition mutex, but the dependency wait of
//! `start`/`sleep` happens outside of it: the wait only observes the `started` watch channel, so
//! `stop` can always run and cancel it. Each start opens a new session (an epoch counter); a wait
//! that resolves after its session ended never re-awakens the container.
//!
//! The scheduler loop and the interval timers are plain spawned tasks. They only hold a weak
//! reference to the container, and they are stopped between ticks, never awaited, so a callback
//! that stops its own addon cannot deadlock.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::callback::{Callback, CallbackDef, Handler, NativeCallback};
use crate::config::{AddonConfig, AddonOptions};
use crate::constants::{is_reserved, Acl, CONTAINER_VERSION, READY_TARGET, SUBSCRIBE_TARGET};
use crate::context::{CallContext, CallbackHeader};
use crate::error::{AddonError, AddonResult};
use crate::event::{AddonEvent, EventBus};
use crate::interval::{IntervalCallback, IntervalId, IntervalTable};
use crate::lock::{Backoff, DependencyProbe, LockRule, LockTable};
use crate::message::{
    MessageExchange, MessageOptions, MessageStream, NullTransport, PendingTable, Transport,
};
use crate::periodic::PeriodicTask;
use crate::registry::CallbackRegistry;
use crate::schedule::ScheduleTable;
use crate::scheduler::Scheduler;
use crate::status::AddonStatus;
use crate::subscription::{SubjectStream, SubscriptionTable};

/// Async assertion evaluated by the native `health_check` callback.
#[async_trait]
pub trait Assertion: Send + Sync + 'static {
    async fn check(&self) -> AddonResult<()>;
}

#[async_trait]
impl<F, Fut> Assertion for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = AddonResult<()>> + Send + 'static,
{
    async fn check(&self) -> AddonResult<()> {
        (self)().await
    }
}

/// Observer awaited when the addon raises its `start` event, before dependencies are awaited.
#[async_trait]
pub trait StartHook: Send + Sync + 'static {
    async fn on_start(&self, addon: Addon) -> AddonResult<()>;
}

#[async_trait]
impl<F, Fut> StartHook for F
where
    F: Fn(Addon) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = AddonResult<()>> + Send + 'static,
{
    async fn on_start(&self, addon: Addon) -> AddonResult<()> {
        (self)(addon).await
    }
}

#[derive(Debug, Default)]
struct LifecycleState {
    started: bool,
    awake: bool,
    ready: bool,
    last_start: Option<u64>,
    last_stop: Option<u64>,
    current_locked_addon: Option<String>,
    session: u64,
    main_loop: Option<PeriodicTask>,
    callbacks_descriptor: Option<String>,
}

struct Inner {
    name: String,
    uid: String,
    options: AddonOptions,
    config: AddonConfig,
    registry: RwLock<CallbackRegistry>,
    schedules: Mutex<ScheduleTable>,
    intervals: Mutex<IntervalTable>,
    locks: Mutex<LockTable>,
    exchange: MessageExchange,
    subscriptions: SubscriptionTable,
    unannounced_subjects: Mutex<Vec<String>>,
    asserts: Mutex<Vec<Arc<dyn Assertion>>>,
    start_hooks: Mutex<Vec<Arc<dyn StartHook>>>,
    events: EventBus,
    state: Mutex<LifecycleState>,
    started: watch::Sender<bool>,
    transition: tokio::sync::Mutex<()>,
}

/// Locks a std mutex, recovering the data if a panicking thread poisoned it.
fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Builder returned by [`Addon::builder`].
pub struct AddonBuilder {
    name: String,
    options: AddonOptions,
    config: AddonConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl std::fmt::Debug for AddonBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonBuilder")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

impl AddonBuilder {
    pub fn options(mut self, options: AddonOptions) -> Self {
        self.options = options;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.options.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.options.description = description.into();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.options.verbose = verbose;
        self
    }

    pub fn config(mut self, config: AddonConfig) -> Self {
        self.config = config;
        self
    }

    /// Where outbound messages go. Defaults to [`NullTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> AddonResult<Addon> {
        if self.name.chars().count() <= 2 {
            return Err(AddonError::InvalidArgument(format!(
                "addon name '{}' must be longer than 2 characters",
                self.name
            )));
        }
        self.options.validate()?;
        self.config.validate()?;

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(NullTransport));
        let exchange =
            MessageExchange::new(self.name.clone(), self.config.message_timeout(), transport);
        let (started, _) = watch::channel(false);
        let uid = uuid::Uuid::new_v4().to_string();
        debug!(addon = %self.name, %uid, version = %self.options.version, "Addon created");

        Ok(Addon {
            inner: Arc::new(Inner {
                registry: RwLock::new(CallbackRegistry::new(self.config.naming_policy)),
                name: self.name,
                uid,
                options: self.options,
                config: self.config,
                schedules: Mutex::new(ScheduleTable::new()),
                intervals: Mutex::new(IntervalTable::new()),
                locks: Mutex::new(LockTable::new()),
                exchange,
                subscriptions: SubscriptionTable::new(),
                unannounced_subjects: Mutex::new(Vec::new()),
                asserts: Mutex::new(Vec::new()),
                start_hooks: Mutex::new(Vec::new()),
                events: EventBus::new(),
                state: Mutex::new(LifecycleState::default()),
                started,
                transition: tokio::sync::Mutex::new(()),
            }),
        })
    }
}

/// Runtime container of one component. Cheap to clone; clones share the same container.
#[derive(Clone)]
pub struct Addon {
    inner: Arc<Inner>,
}

/// Non-owning handle to an [`Addon`].
#[derive(Clone)]
pub struct WeakAddon {
    inner: Weak<Inner>,
}

impl WeakAddon {
    pub fn upgrade(&self) -> Option<Addon> {
        self.inner.upgrade().map(|inner| Addon { inner })
    }
}

impl Addon {
    pub fn builder(name: impl Into<String>) -> AddonBuilder {
        AddonBuilder {
            name: name.into(),
            options: AddonOptions::default(),
            config: AddonConfig::default(),
            transport: None,
        }
    }

    pub fn downgrade(&self) -> WeakAddon {
        WeakAddon {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn registry(&self) -> RwLockReadGuard<'_, CallbackRegistry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, CallbackRegistry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> MutexGuard<'_, LifecycleState> {
        guard(&self.inner.state)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn uid(&self) -> &str {
        &self.inner.uid
    }

    pub fn version(&self) -> &str {
        &self.inner.options.version
    }

    pub fn config(&self) -> &AddonConfig {
        &self.inner.config
    }

    pub fn is_started(&self) -> bool {
        self.state().started
    }

    pub fn is_awake(&self) -> bool {
        self.state().awake
    }

    pub fn is_ready(&self) -> bool {
        self.state().ready
    }

    pub fn last_start(&self) -> Option<u64> {
        self.state().last_start
    }

    pub fn last_stop(&self) -> Option<u64> {
        self.state().last_stop
    }

    /// Dependency currently blocking a lock wait.
    pub fn current_locked_addon(&self) -> Option<String> {
        self.state().current_locked_addon.clone()
    }

    /// Lifecycle events: `start`, `awake`, `sleep`, `stop`, `ready`, `error` and deprecation
    /// notices.
    pub fn events(&self) -> broadcast::Receiver<AddonEvent> {
        self.inner.events.subscribe()
    }

    /// Registers `handler` under `name` (decamelized) and returns the registered name.
    pub fn register_callback(
        &self,
        name: impl Into<String>,
        handler: impl Callback,
    ) -> AddonResult<String> {
        self.register(CallbackDef::new(name, handler))
    }

    /// Registers a normalized definition, usually built with [`callback!`](crate::callback!).
    pub fn register(&self, def: CallbackDef) -> AddonResult<String> {
        let name = self.registry_mut().register(def)?;
        debug!(addon = %self.inner.name, callback = %name, "Callback registered");
        Ok(name)
    }

    pub fn set_acl(&self, name: &str, acl: Acl) -> AddonResult<()> {
        self.registry_mut().set_acl(name, acl)
    }

    pub fn set_deprecated_alias<I, S>(&self, name: &str, aliases: I) -> AddonResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry_mut().set_deprecated_alias(name, aliases)
    }

    /// Records the path of the `.proto` file describing this addon's callbacks.
    pub fn set_callbacks_descriptor_file(&self, path: impl AsRef<Path>) -> AddonResult<()> {
        let path = path.as_ref();
        if path.extension().and_then(|ext| ext.to_str()) != Some("proto") {
            return Err(AddonError::InvalidArgument(format!(
                "callbacks descriptor '{}' must be a .proto file",
                path.display()
            )));
        }
        self.state().callbacks_descriptor = Some(path.display().to_string());
        Ok(())
    }

    /// Executes the callback `name` (or one of its deprecated aliases) on behalf of `header`.
    ///
    /// Handler failures are returned unchanged.
    pub async fn execute_callback(
        &self,
        name: &str,
        header: CallbackHeader,
        args: Vec<Value>,
    ) -> AddonResult<Value> {
        let resolved = self.registry().resolve(name)?;
        let handle = resolved.handle;
        if let Some(alias) = resolved.alias {
            warn!(
                addon = %self.inner.name,
                alias = %alias,
                callback = %handle.name(),
                "Callback invoked through a deprecated alias"
            );
            self.inner.events.emit(AddonEvent::Deprecated {
                alias,
                callback: handle.name().to_string(),
            });
        }

        let ctx = CallContext::new(header, &self.inner.name, handle.name());
        let span = info_span!(
            "callback",
            addon = %self.inner.name,
            callback = %handle.name(),
            from = %ctx.from()
        );
        let execution = match handle.handler() {
            Handler::Native(native) => self.run_native(*native, args),
            Handler::User(callback) => callback.call(ctx, args),
        };
        handle
            .track(self.inner.options.verbose, execution)
            .instrument(span)
            .await
    }

    fn run_native(
        &self,
        native: NativeCallback,
        args: Vec<Value>,
    ) -> BoxFuture<'_, AddonResult<Value>> {
        async move {
            match native {
                NativeCallback::Start => self.start().await.map(Value::Bool),
                NativeCallback::Stop => self.stop().await.map(Value::Bool),
                NativeCallback::Sleep => self.sleep().await.map(Value::Bool),
                NativeCallback::Status => {
                    serde_json::to_value(self.status()).map_err(AddonError::handler)
                }
                NativeCallback::Event => {
                    let mut args = args.into_iter();
                    let subject = match args.next() {
                        Some(Value::String(subject)) => subject,
                        _ => {
                            return Err(AddonError::InvalidArgument(
                                "event expects a subject string as first argument".into(),
                            ))
                        }
                    };
                    let payload = args.next().unwrap_or(Value::Null);
                    Ok(json!(self.inner.subscriptions.publish(&subject, payload)))
                }
                NativeCallback::HealthCheck => self.health_check().await.map(Value::Bool),
            }
        }
        .boxed()
    }

    /// Binds `scheduler` to the registered callback `name`.
    pub fn schedule(&self, name: &str, scheduler: impl Scheduler) -> AddonResult<()> {
        if is_reserved(name) {
            return Err(AddonError::InvalidArgument(format!(
                "container callback '{name}' cannot be scheduled"
            )));
        }
        if !self.registry().contains(name) {
            return Err(AddonError::NotFound(name.to_string()));
        }
        guard(&self.inner.schedules).insert(name.to_string(), Box::new(scheduler));
        debug!(addon = %self.inner.name, callback = name, "Callback scheduled");
        Ok(())
    }

    /// Binds `scheduler` to the most recently registered callback and returns its name.
    pub fn schedule_latest(&self, scheduler: impl Scheduler) -> AddonResult<String> {
        let name = self
            .registry()
            .last_registered()
            .map(str::to_string)
            .ok_or(AddonError::NoCallbackRegistered)?;
        self.schedule(&name, scheduler)?;
        Ok(name)
    }

    /// One main-loop tick: fires every due callback concurrently and reports failures as events.
    fn run_due_schedules(&self) -> BoxFuture<'_, ()> {
        async move {
            let due = guard(&self.inner.schedules).due();
            if due.is_empty() {
                return;
            }
            let batch = due.iter().map(|name| async move {
                let result = self
                    .execute_callback(name, CallbackHeader::local(), Vec::new())
                    .await;
                (name, result)
            });
            for (name, result) in join_all(batch).await {
                if let Err(e) = result {
                    self.inner.events.error(AddonError::ScheduledFailure {
                        callback: name.clone(),
                        source: Box::new(e),
                    });
                }
            }
        }
        .boxed()
    }

    fn spawn_main_loop(&self) -> PeriodicTask {
        let weak = self.downgrade();
        PeriodicTask::spawn("scheduler", self.inner.config.main_interval(), move || {
            let weak = weak.clone();
            async move {
                let Some(addon) = weak.upgrade() else {
                    return false;
                };
                addon.run_due_schedules().await;
                true
            }
        })
    }

    /// Registers a background task running every `period` while the addon is awake.
    pub fn register_interval(
        &self,
        callback: impl IntervalCallback,
        period: Duration,
    ) -> AddonResult<IntervalId> {
        let state = self.state();
        let mut intervals = guard(&self.inner.intervals);
        let id = intervals.register(callback, period)?;
        if state.awake {
            intervals.arm(&self.inner.events);
        }
        Ok(id)
    }

    pub fn has_interval(&self, id: &IntervalId) -> bool {
        guard(&self.inner.intervals).contains(id)
    }

    pub fn is_interval_armed(&self, id: &IntervalId) -> bool {
        guard(&self.inner.intervals).is_armed(id)
    }

    pub fn send_message(
        &self,
        target: &str,
        options: MessageOptions,
    ) -> AddonResult<Option<MessageStream>> {
        self.inner.exchange.send_message(target, options)
    }

    pub async fn send_one(
        &self,
        target: &str,
        options: impl Into<MessageOptions>,
    ) -> AddonResult<Value> {
        self.inner.exchange.send_one(target, options).await
    }

    /// Consumption side used by the Core to deliver responses.
    pub fn pending(&self) -> &PendingTable {
        self.inner.exchange.pending()
    }

    /// Declares that this addon depends on `addon`.
    pub fn lock_on(&self, addon: impl Into<String>, rule: LockRule) -> AddonResult<()> {
        let addon = addon.into();
        if addon.trim().is_empty() {
            return Err(AddonError::InvalidArgument(
                "dependency name must not be empty".into(),
            ));
        }
        guard(&self.inner.locks).lock_on(addon, rule);
        Ok(())
    }

    /// Waits until every dependency reports ready. Returns `false` if the addon stops first.
    pub async fn wait_for_all_locks(&self, as_start: bool) -> bool {
        let locks = guard(&self.inner.locks).clone();
        let config = &self.inner.config;
        let probe = StatusProbe {
            addon: self,
            session: self.state().session,
        };
        locks
            .wait_for_all(
                &probe,
                self.inner.started.subscribe(),
                as_start,
                Backoff::from_config(config),
                config.lock_retry_policy,
            )
            .await
    }

    /// Subscribes to `subject`. The Core is told about it now if started, else on next start.
    pub fn of(&self, subject: &str) -> SubjectStream {
        let stream = self.inner.subscriptions.subscribe(subject);
        if self.is_started() {
            self.announce_subscription(subject);
        } else {
            guard(&self.inner.unannounced_subjects).push(subject.to_string());
        }
        stream
    }

    fn announce_subscription(&self, subject: &str) {
        let options = MessageOptions::new().args(vec![json!(subject)]).no_return();
        if let Err(e) = self.inner.exchange.send_message(SUBSCRIBE_TARGET, options) {
            warn!(addon = %self.inner.name, subject, error = %e, "Failed to announce subscription");
        }
    }

    pub fn add_assert(&self, assertion: impl Assertion) {
        guard(&self.inner.asserts).push(Arc::new(assertion));
    }

    /// Runs every assertion concurrently; the first failure is returned.
    pub async fn health_check(&self) -> AddonResult<bool> {
        let asserts = guard(&self.inner.asserts).clone();
        let results = join_all(asserts.iter().map(|assertion| assertion.check())).await;
        results.into_iter().collect::<AddonResult<Vec<()>>>()?;
        Ok(true)
    }

    pub fn on_start(&self, hook: impl StartHook) {
        guard(&self.inner.start_hooks).push(Arc::new(hook));
    }

    /// Starts the addon. Returns `false` if it was already started.
    ///
    /// Resolves once the addon is awake, or once a `stop` cancelled the dependency wait.
    pub async fn start(&self) -> AddonResult<bool> {
        let session = {
            let _transition = self.inner.transition.lock().await;
            let session = {
                let mut state = self.state();
                if state.started {
                    return Ok(false);
                }
                state.started = true;
                state.last_start = Some(now_ms());
                state.session += 1;
                state.session
            };
            self.inner.started.send_replace(true);
            info!(addon = %self.inner.name, "Addon started");
            self.inner.events.emit(AddonEvent::Start);

            let subjects = std::mem::take(&mut *guard(&self.inner.unannounced_subjects));
            for subject in &subjects {
                self.announce_subscription(subject);
            }
            session
        };

        // Hooks run outside the transition mutex: they may stop or sleep the addon.
        let hooks = guard(&self.inner.start_hooks).clone();
        for hook in hooks {
            if !self.in_session(session) {
                debug!(addon = %self.inner.name, "Start interrupted while running start hooks");
                return Ok(true);
            }
            if let Err(e) = hook.on_start(self.clone()).await {
                warn!(addon = %self.inner.name, error = %e, "Start hook failed");
                self.inner.events.error(e);
            }
        }

        if !self.wait_for_all_locks(true).await {
            debug!(addon = %self.inner.name, "Start interrupted while waiting for dependencies");
            return Ok(true);
        }

        let _transition = self.inner.transition.lock().await;
        let mut state = self.state();
        if state.started && state.session == session && !state.awake {
            state.main_loop = Some(self.spawn_main_loop());
            self.wake(&mut state);
        }
        Ok(true)
    }

    fn in_session(&self, session: u64) -> bool {
        let state = self.state();
        state.started && state.session == session
    }

    /// Arms the intervals and enters the awake state. Caller holds the transition mutex.
    fn wake(&self, state: &mut LifecycleState) {
        guard(&self.inner.intervals).arm(&self.inner.events);
        state.awake = true;
        info!(addon = %self.inner.name, "Addon awake");
        self.inner.events.emit(AddonEvent::Awake);
    }

    /// Stops the addon. Returns `false` if it was not started.
    pub async fn stop(&self) -> AddonResult<bool> {
        let _transition = self.inner.transition.lock().await;
        let mut state = self.state();
        if !state.started {
            return Ok(false);
        }
        if state.awake {
            state.awake = false;
            self.inner.events.emit(AddonEvent::Sleep);
        }
        state.started = false;
        state.ready = false;
        state.current_locked_addon = None;
        state.last_stop = Some(now_ms());
        self.inner.started.send_replace(false);

        if let Some(main_loop) = state.main_loop.take() {
            main_loop.cancel();
        }
        guard(&self.inner.intervals).clear();
        drop(state);

        self.inner.subscriptions.complete_all();
        info!(addon = %self.inner.name, "Addon stopped");
        self.inner.events.emit(AddonEvent::Stop);
        Ok(true)
    }

    /// Leaves the awake state until the dependencies are ready again.
    ///
    /// Returns whether the addon was awake.
    pub async fn sleep(&self) -> AddonResult<bool> {
        let session = {
            let _transition = self.inner.transition.lock().await;
            let mut state = self.state();
            if !state.awake {
                return Ok(false);
            }
            guard(&self.inner.intervals).disarm();
            state.awake = false;
            info!(addon = %self.inner.name, "Addon sleeping");
            self.inner.events.emit(AddonEvent::Sleep);
            state.session
        };

        if self.wait_for_all_locks(false).await {
            let _transition = self.inner.transition.lock().await;
            let mut state = self.state();
            if state.started && state.session == session && !state.awake {
                self.wake(&mut state);
            }
        }
        Ok(true)
    }

    /// Marks the addon ready and announces it to the Core.
    ///
    /// Fails with [`AddonError::NotStarted`] if not started; returns `false` if already ready.
    pub async fn ready(&self) -> AddonResult<bool> {
        {
            let mut state = self.state();
            if !state.started {
                return Err(AddonError::NotStarted);
            }
            if state.ready {
                return Ok(false);
            }
            state.ready = true;
        }
        info!(addon = %self.inner.name, "Addon ready");
        self.inner.events.emit(AddonEvent::Ready);

        let addon = self.clone();
        tokio::spawn(async move {
            let name = json!(addon.inner.name);
            if let Err(e) = addon.send_one(READY_TARGET, vec![name]).await {
                warn!(addon = %addon.inner.name, error = %e, "Failed to announce readiness");
            }
        });
        Ok(true)
    }

    pub fn status(&self) -> AddonStatus {
        let callbacks = self.registry().descriptors();
        let lock_on = guard(&self.inner.locks).dependencies();
        let state = self.state();
        AddonStatus {
            uid: self.inner.uid.clone(),
            name: self.inner.name.clone(),
            version: self.inner.options.version.clone(),
            description: self.inner.options.description.clone(),
            container_version: CONTAINER_VERSION.to_string(),
            ready: state.ready,
            started: state.started,
            awake: state.awake,
            last_start: state.last_start,
            last_stop: state.last_stop,
            current_locked_addon: state.current_locked_addon.clone(),
            lock_on,
            callbacks_descriptor: state.callbacks_descriptor.clone(),
            callbacks,
        }
    }
}

/// Asks `<dependency>.status` through the addon's own message exchange.
struct StatusProbe<'a> {
    addon: &'a Addon,
    /// Lifecycle session the wait belongs to.
    session: u64,
}

#[async_trait]
impl<'a> DependencyProbe for StatusProbe<'a> {
    async fn is_ready(&self, dependency: &str) -> bool {
        let target = format!("{dependency}.status");
        match self.addon.send_one(&target, MessageOptions::new()).await {
            Ok(status) => status.get("ready").and_then(Value::as_bool).unwrap_or(false),
            Err(e) => {
                debug!(addon = %self.addon.inner.name, dependency, error = %e, "Dependency status unavailable");
                false
            }
        }
    }

    fn locked_on(&self, dependency: Option<&str>) {
        let mut state = self.addon.state();
        // A wait outliving its session must not report a lock on the next one.
        if state.session == self.session && (state.started || dependency.is_none()) {
            state.current_locked_addon = dependency.map(str::to_string);
        }
    }
}

impl std::fmt::Debug for Addon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Addon")
            .field("name", &self.inner.name)
            .field("uid", &self.inner.uid)
            .field("started", &state.started)
            .field("awake", &state.awake)
            .field("ready", &state.ready)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addon() -> Addon {
        Addon::builder("tester").build().unwrap()
    }

    #[test]
    fn test_builder_validation() {
        assert!(matches!(
            Addon::builder("ab").build(),
            Err(AddonError::InvalidArgument(_))
        ));
        assert!(Addon::builder("cpu").version("1.x").build().is_err());
        let config = AddonConfig {
            main_interval_ms: 0,
            ..AddonConfig::default()
        };
        assert!(Addon::builder("cpu").config(config).build().is_err());

        let addon = Addon::builder("cpu").version("2.1.0").build().unwrap();
        assert_eq!(addon.version(), "2.1.0");
        assert_eq!(addon.uid().len(), 36);
    }

    #[test]
    fn test_descriptor_file_must_be_proto() {
        let addon = addon();
        assert!(addon.set_callbacks_descriptor_file("callbacks.json").is_err());
        addon.set_callbacks_descriptor_file("callbacks.proto").unwrap();
        assert_eq!(
            addon.status().callbacks_descriptor.as_deref(),
            Some("callbacks.proto")
        );
    }

    #[test]
    fn test_schedule_validation() {
        let addon = addon();
        assert!(matches!(
            addon.schedule_latest(|| true),
            Err(AddonError::NoCallbackRegistered)
        ));
        assert!(matches!(
            addon.schedule("status", || true),
            Err(AddonError::InvalidArgument(_))
        ));
        assert!(matches!(
            addon.schedule("missing", || true),
            Err(AddonError::NotFound(_))
        ));

        addon
            .register_callback("tick", |_ctx: CallContext, _args: Vec<Value>| async {
                Ok(Value::Null)
            })
            .unwrap();
        assert_eq!(addon.schedule_latest(|| false).unwrap(), "tick");
    }

    #[tokio::test]
    async fn test_native_event_fans_out() {
        let addon = addon();
        let mut stream = addon.of("Alarm.open");
        let delivered = addon
            .execute_callback(
                "event",
                CallbackHeader::new("core"),
                vec![json!("Alarm.open"), json!({"id": 7})],
            )
            .await
            .unwrap();
        assert_eq!(delivered, json!(1));
        assert_eq!(
            futures::StreamExt::next(&mut stream).await,
            Some(json!({"id": 7}))
        );

        let err = addon
            .execute_callback("event", CallbackHeader::local(), vec![json!(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, AddonError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_health_check_reports_first_failure() {
        let addon = addon();
        assert!(addon.health_check().await.unwrap());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        addon.add_assert(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        addon.add_assert(|| async { Err::<(), _>(AddonError::handler("disk full")) });

        let err = addon
            .execute_callback("health_check", CallbackHeader::local(), vec![])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_hooks_run_in_order() {
        let addon = addon();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            addon.on_start(move |_addon: Addon| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(i);
                    Ok(())
                }
            });
        }
        assert!(addon.start().await.unwrap());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert!(addon.is_awake());
        addon.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_weak_handle_does_not_keep_addon_alive() {
        let addon = addon();
        let weak = addon.downgrade();
        assert!(weak.upgrade().is_some());
        drop(addon);
        assert!(weak.upgrade().is_none());
    }
}
