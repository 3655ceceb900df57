//! # CPU Addon
//!
//! Samples a (simulated) CPU load and listens to alarms. It shows the container features an addon
//! usually combines:
//!
//! - a callback implemented as a struct ([`GetUsage`]) instead of a closure
//! - a scheduled `sample` callback driven by an [`IntervalScheduler`]
//! - a heartbeat interval that only runs while the addon is awake
//! - a dependency lock on the `events` addon
//! - a start hook subscribing to `Alarm.open`
//!
//! The addon does not wake up before `events` reports itself ready.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use addon_framework::{
    subjects, Addon, AddonConfig, AddonError, AddonResult, CallContext, Callback, CallbackDef,
    IntervalScheduler, LockRule, Transport,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::events_addon;
use crate::model::CpuUsage;

pub const NAME: &str = "cpu";

/// Counters shared by the callbacks, the heartbeat and the alarm listener.
#[derive(Debug, Default)]
pub struct CpuState {
    samples: AtomicU64,
    /// Last load, in hundredths of a percent.
    load: AtomicU64,
    heartbeats: AtomicU64,
    alarms_seen: AtomicU64,
}

impl CpuState {
    /// Takes one measurement. The load follows a fixed saw-tooth so runs are reproducible.
    fn sample(&self) -> f64 {
        let samples = self.samples.fetch_add(1, Ordering::Relaxed) + 1;
        let load = (samples * 1_337) % 10_000;
        self.load.store(load, Ordering::Relaxed);
        load as f64 / 100.0
    }

    pub fn usage(&self) -> CpuUsage {
        CpuUsage {
            percent: self.load.load(Ordering::Relaxed) as f64 / 100.0,
            samples: self.samples.load(Ordering::Relaxed),
            alarms_seen: self.alarms_seen.load(Ordering::Relaxed),
        }
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }
}

/// `get_usage`: answers the last [`CpuUsage`].
pub struct GetUsage {
    state: Arc<CpuState>,
}

#[async_trait]
impl Callback for GetUsage {
    async fn call(&self, ctx: CallContext, _args: Vec<Value>) -> AddonResult<Value> {
        debug!(from = ctx.from(), "Usage requested");
        serde_json::to_value(self.state.usage()).map_err(AddonError::handler)
    }
}

/// Creates the `cpu` addon and the state it updates.
pub fn new(
    transport: Arc<dyn Transport>,
    config: AddonConfig,
    sample_every: Duration,
) -> AddonResult<(Addon, Arc<CpuState>)> {
    let addon = Addon::builder(NAME)
        .version("1.0.0")
        .description("CPU load sampler")
        .config(config)
        .transport(transport)
        .build()?;
    let state = Arc::new(CpuState::default());

    addon.register(CallbackDef::new(
        "getUsage",
        GetUsage {
            state: state.clone(),
        },
    ))?;

    let sample_state = state.clone();
    addon.register_callback("sample", move |_ctx: CallContext, _args: Vec<Value>| {
        let state = sample_state.clone();
        async move { Ok(Value::from(state.sample())) }
    })?;
    addon.schedule_latest(IntervalScheduler::new(sample_every).execute_on_start(true))?;

    let heartbeat_state = state.clone();
    addon.register_interval(
        move || {
            let state = heartbeat_state.clone();
            async move {
                state.heartbeats.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        },
        sample_every,
    )?;

    let health_state = state.clone();
    addon.add_assert(move || {
        let state = health_state.clone();
        async move {
            if state.usage().percent > 99.0 {
                return Err(AddonError::handler("cpu load above 99%"));
            }
            Ok(())
        }
    });

    addon.lock_on(events_addon::NAME, LockRule::default())?;

    let alarm_state = state.clone();
    addon.on_start(move |addon: Addon| {
        let state = alarm_state.clone();
        async move {
            let mut alarms = addon.of(subjects::ALARM_OPEN);
            tokio::spawn(async move {
                while let Some(alarm) = alarms.next().await {
                    let seen = state.alarms_seen.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(%alarm, seen, "Alarm received");
                }
                debug!("Alarm subscription ended");
            });
            Ok(())
        }
    });

    Ok((addon, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_updates_usage() {
        let state = CpuState::default();
        assert_eq!(state.usage().samples, 0);

        let first = state.sample();
        let second = state.sample();
        assert_eq!(first, 13.37);
        assert_eq!(second, 26.74);
        assert_eq!(state.usage().samples, 2);
        assert_eq!(state.usage().percent, second);
    }
}
