//! # Callback Handles
//!
//! A [`CallbackHandle`] is a named, ACL-tagged unit of work. User handlers implement the
//! [`Callback`] trait (any `async` closure taking `(CallContext, Vec<Value>)` does), while the
//! container's own callbacks are represented by [`NativeCallback`] and dispatched by the
//! [`Addon`](crate::Addon) itself.
//!
//! Every execution is tracked: the handle counts executions and failures and logs the elapsed
//! time inside a `callback` span.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::constants::Acl;
use crate::context::CallContext;
use crate::error::AddonResult;

/// An asynchronous unit of work that can be registered on an addon.
///
/// Closures are the usual way to provide one:
///
/// ```rust
/// use addon_framework::{Addon, AddonResult, CallContext};
/// use serde_json::{json, Value};
///
/// # fn main() -> AddonResult<()> {
/// let addon = Addon::builder("demo").build()?;
/// addon.register_callback("echo", |_ctx: CallContext, args: Vec<Value>| async move {
///     Ok(json!(args))
/// })?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Callback: Send + Sync + 'static {
    async fn call(&self, ctx: CallContext, args: Vec<Value>) -> AddonResult<Value>;
}

#[async_trait]
impl<F, Fut> Callback for F
where
    F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AddonResult<Value>> + Send + 'static,
{
    async fn call(&self, ctx: CallContext, args: Vec<Value>) -> AddonResult<Value> {
        (self)(ctx, args).await
    }
}

/// Callbacks implemented by the container itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeCallback {
    Start,
    Stop,
    Sleep,
    Status,
    Event,
    HealthCheck,
}

impl NativeCallback {
    pub const ALL: [NativeCallback; 6] = [
        Self::Start,
        Self::Stop,
        Self::Sleep,
        Self::Status,
        Self::Event,
        Self::HealthCheck,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Sleep => "sleep",
            Self::Status => "status",
            Self::Event => "event",
            Self::HealthCheck => "health_check",
        }
    }

    pub fn default_acl(self) -> Acl {
        match self {
            Self::Status | Self::HealthCheck => Acl::Read,
            Self::Event => Acl::Write,
            Self::Start | Self::Stop | Self::Sleep => Acl::Super,
        }
    }
}

/// What runs when a handle is executed.
#[derive(Clone)]
pub enum Handler {
    Native(NativeCallback),
    User(Arc<dyn Callback>),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(native) => write!(f, "Native({})", native.name()),
            Self::User(_) => write!(f, "User(..)"),
        }
    }
}

/// A registered callback with its access level and execution counters.
#[derive(Debug)]
pub struct CallbackHandle {
    name: String,
    handler: Handler,
    acl: AtomicU8,
    executions: AtomicU64,
    failures: AtomicU64,
}

impl CallbackHandle {
    pub fn new(name: impl Into<String>, handler: Handler, acl: Acl) -> Self {
        Self {
            name: name.into(),
            handler,
            acl: AtomicU8::new(acl.level()),
            executions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn native(native: NativeCallback) -> Self {
        Self::new(native.name(), Handler::Native(native), native.default_acl())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn acl(&self) -> Acl {
        Acl::try_from(self.acl.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub(crate) fn set_acl(&self, acl: Acl) {
        self.acl.store(acl.level(), Ordering::Relaxed);
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Runs `fut` as one tracked execution of this handle.
    pub(crate) async fn track<F>(&self, verbose: bool, fut: F) -> AddonResult<Value>
    where
        F: Future<Output = AddonResult<Value>>,
    {
        self.executions.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let result = fut.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) if verbose => info!(callback = %self.name, elapsed_ms, "Callback executed"),
            Ok(_) => debug!(callback = %self.name, elapsed_ms, "Callback executed"),
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(callback = %self.name, elapsed_ms, error = %e, "Callback failed");
            }
        }
        result
    }
}

/// Normalized registration record: `(name, handler, acl)`.
///
/// Built either from an explicit name ([`CallbackDef::new`]) or from a bare function through the
/// [`callback!`](crate::callback!) macro.
pub struct CallbackDef {
    pub(crate) name: String,
    pub(crate) handler: Arc<dyn Callback>,
    pub(crate) acl: Acl,
}

impl CallbackDef {
    pub fn new(name: impl Into<String>, handler: impl Callback) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            acl: Acl::default(),
        }
    }

    pub fn acl(mut self, acl: Acl) -> Self {
        self.acl = acl;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builds a [`CallbackDef`] named after a function identifier.
///
/// ```rust
/// use addon_framework::{callback, AddonResult, CallContext};
/// use serde_json::Value;
///
/// async fn get_world(_ctx: CallContext, _args: Vec<Value>) -> AddonResult<Value> {
///     Ok(Value::from(10))
/// }
///
/// let def = callback!(get_world);
/// assert_eq!(def.name(), "get_world");
/// ```
#[macro_export]
macro_rules! callback {
    ($func:ident) => {
        $crate::CallbackDef::new(stringify!($func), $func)
    };
    ($func:ident, $acl:expr) => {
        $crate::CallbackDef::new(stringify!($func), $func).acl($acl)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallbackHeader;
    use crate::error::AddonError;
    use serde_json::json;

    #[test]
    fn test_native_names_are_reserved() {
        for native in NativeCallback::ALL {
            assert!(crate::constants::is_reserved(native.name()));
        }
    }

    #[tokio::test]
    async fn test_track_counts_executions_and_failures() {
        let handle = CallbackHandle::new(
            "flaky",
            Handler::Native(NativeCallback::Status),
            Acl::Write,
        );
        assert_eq!(handle.acl(), Acl::Write);

        let ok = handle.track(false, async { Ok(json!(1)) }).await;
        assert_eq!(ok.unwrap(), json!(1));
        let err = handle
            .track(false, async { Err(AddonError::handler("boom")) })
            .await;
        assert!(err.is_err());

        assert_eq!(handle.executions(), 2);
        assert_eq!(handle.failures(), 1);
    }

    #[tokio::test]
    async fn test_closure_is_a_callback() {
        let cb = |ctx: CallContext, args: Vec<Value>| async move {
            Ok(json!({ "from": ctx.from(), "args": args }))
        };
        let ctx = CallContext::new(CallbackHeader::new("core"), "demo", "cb");
        let ret = cb.call(ctx, vec![json!(1)]).await.unwrap();
        assert_eq!(ret, json!({ "from": "core", "args": [1] }));
    }
}
