//! # Addon Framework
//!
//! This crate provides the runtime container for **addons**: independently deployable
//! components that participate in a larger message-routed system. Addons never talk to each
//! other directly. They send messages to an external router (the **Core**), which forwards
//! them to `"<addon>.<callback>"` targets and routes the responses back.
//!
//! ## What the Container Does
//!
//! An [`Addon`] bundles everything a component needs to live inside that system:
//!
//! - **Callbacks**: named async handlers with an access level ([`Acl`]) and deprecated aliases
//! - **Scheduling**: a main loop asking each [`Scheduler`] whether its callback should fire
//! - **Intervals**: background tasks running while the addon is awake
//! - **Messaging**: outbound messages with response streams and timeouts
//! - **Dependencies**: "do not wake up before addon X is ready" locks with backoff
//! - **Subscriptions**: local fan-out of events published on a subject
//! - **Lifecycle**: `start`, `stop`, `sleep`, `ready` and the matching [`AddonEvent`]s
//!
//! ## Lifecycle
//!
//! ```text
//! Stopped ──start──► Started ──locks resolved──► Awake ⇄ sleep
//!    ▲                                             │
//!    └──────────────────────stop───────────────────┘
//! ```
//!
//! The scheduler loop only runs between `start` and `stop`; intervals only run while awake.
//! `ready` is an orthogonal flag announced to the Core and cleared by `stop`.
//!
//! ## Quick Start
//!
//! ```rust
//! use addon_framework::{Addon, AddonResult, CallContext, CallbackHeader, IntervalScheduler};
//! use serde_json::{json, Value};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> AddonResult<()> {
//!     let addon = Addon::builder("demo").version("1.2.0").build()?;
//!
//!     // Handlers receive the caller identity explicitly.
//!     addon.register_callback("sayHello", |ctx: CallContext, _args: Vec<Value>| async move {
//!         Ok(json!(format!("hello {}", ctx.from())))
//!     })?;
//!     addon.schedule_latest(IntervalScheduler::new(Duration::from_secs(10)))?;
//!
//!     addon.start().await?;
//!
//!     // camelCase names are registered as snake_case.
//!     let ret = addon
//!         .execute_callback("say_hello", CallbackHeader::new("core"), vec![])
//!         .await?;
//!     assert_eq!(ret, json!("hello core"));
//!
//!     addon.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Talking to the Core
//!
//! Outbound messages leave through a [`Transport`]; responses come back through the addon's
//! [`PendingTable`] ([`Addon::pending`]). The `addon-sample` crate contains a complete in-process
//! Core, and the [`mock`] module offers [`mock::MockCore`] for tests.
//!
//! ## Concurrency Model
//!
//! - Callback executions run concurrently; each one gets its own [`CallContext`]
//! - Lifecycle transitions of one addon are serialized
//! - The dependency wait never blocks `stop`, which cancels it
//! - Scheduled callbacks due on the same tick run as one concurrent batch
//! - Background failures become [`AddonEvent::Error`] events and never stop a loop

pub mod addon;
pub mod callback;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod event;
pub mod interval;
pub mod lock;
pub mod message;
pub mod mock;
mod periodic;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod status;
pub mod subscription;
pub mod tracing;

// Re-export core types for convenience
pub use addon::{Addon, AddonBuilder, Assertion, StartHook, WeakAddon};
pub use callback::{Callback, CallbackDef, CallbackHandle, NativeCallback};
pub use config::{AddonConfig, AddonOptions, LockRetryPolicy, NamingPolicy};
pub use constants::{subjects, Acl, CONTAINER_VERSION, RESERVED_CALLBACK_NAMES};
pub use context::{CallContext, CallbackHeader};
pub use error::{AddonError, AddonResult};
pub use event::AddonEvent;
pub use interval::{IntervalCallback, IntervalId};
pub use lock::{LockRule, LockTable};
pub use message::{
    MessageExchange, MessageOptions, MessageStream, NullTransport, OutboundMessage,
    PendingTable, Transport,
};
pub use registry::{decamelize, CallbackDescriptor};
pub use scheduler::{IntervalScheduler, Scheduler};
pub use status::AddonStatus;
pub use subscription::SubjectStream;
