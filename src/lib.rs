//! # Addon Recipe
//!
//! > **A runtime container for message-routed components, in Rust.**
//!
//! This crate bundles the two members of the workspace:
//!
//! - [`framework`] (`addon-framework`): the container itself. An [`Addon`] owns named callbacks
//!   with access levels, a scheduler loop, intervals, outbound messages with timeouts, dependency
//!   locks, subject subscriptions and the `start` / `stop` / `sleep` / `ready` lifecycle.
//! - [`sample`] (`addon-sample`): an in-process Core routing `"<addon>.<callback>"` messages and
//!   two demo addons, `events` and `cpu`.
//!
//! ## Architecture Notes
//!
//! ### 1. Addons never call each other
//! Every exchange goes through the Core. An addon emits an `OutboundMessage` on its `Transport`;
//! the Core executes the target callback and answers through the sender's pending table.
//!
//! ### 2. Explicit call context
//! Handlers receive a `CallContext` value carrying the caller identity. Nothing is read from
//! task-local storage, so a handler can pass its context to any spawned work.
//!
//! ### 3. Dependencies are waited for, never assumed
//! `lock_on("events", ..)` makes `start` poll `events.status` with exponential backoff until it
//! reports ready. `stop` cancels the wait at any time.
//!
//! ### 4. Observability
//! `tracing` everywhere, with structured fields and one span per callback execution. See
//! [`framework::tracing`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use addon_recipe::{boot, framework::AddonConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), addon_recipe::sample::SampleError> {
//!     let recipe = boot(AddonConfig::default()).await?;
//!     let usage = recipe.core.call("cpu.get_usage", vec![]).await?;
//!     println!("{usage}");
//!     recipe.core.shutdown().await
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

pub use addon_framework as framework;
pub use addon_sample as sample;

pub use addon_framework::{Addon, AddonConfig, AddonError, AddonEvent, AddonResult};

use addon_sample::cpu_addon::{self, CpuState};
use addon_sample::{events_addon, CoreSystem, SampleError};
use tracing::info;

/// A running Core with the `events` and `cpu` addons started and ready.
pub struct Recipe {
    pub core: CoreSystem,
    pub events: Addon,
    pub cpu: Addon,
    pub cpu_state: Arc<CpuState>,
}

/// Starts both sample addons in dependency order.
///
/// `cpu` is started concurrently with `events` and wakes up as soon as `events` announced itself
/// ready.
pub async fn boot(config: AddonConfig) -> Result<Recipe, SampleError> {
    let core = CoreSystem::new();
    let events = events_addon::new(core.transport(), config.clone())?;
    let sample_every = Duration::from_millis(config.main_interval_ms.max(1) * 2);
    let (cpu, cpu_state) = cpu_addon::new(core.transport(), config, sample_every)?;
    core.register(&events)?;
    core.register(&cpu)?;

    let cpu_start = tokio::spawn({
        let cpu = cpu.clone();
        async move { cpu.start().await }
    });
    events.start().await?;
    events.ready().await?;
    cpu_start.await??;
    cpu.ready().await?;

    info!(events = events.uid(), cpu = cpu.uid(), "Recipe booted");
    Ok(Recipe {
        core,
        events,
        cpu,
        cpu_state,
    })
}
