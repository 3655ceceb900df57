//! # Addon Recipe Demo
//!
//! Wires two addons through an in-process Core:
//!
//! 1. `events` starts and announces itself ready.
//! 2. `cpu` starts, waits for `events` through its dependency lock, then wakes up.
//! 3. An alarm is opened on `events` and published on `Alarm.open`, which `cpu` listens to.
//! 4. `cpu.get_usage` is called through the Core.
//! 5. The Core stops every addon.
//!
//! Run with `RUST_LOG=debug` to see every routed message.

use std::time::Duration;

use addon_framework::{subjects, AddonConfig};
use addon_sample::{cpu_addon, events_addon, CoreSystem, SampleError};
use serde_json::json;
use tracing::{info, Instrument};
use tracing_subscriber::EnvFilter;

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<(), SampleError> {
    setup_tracing();

    let config = AddonConfig {
        main_interval_ms: 100,
        lock_initial_delay_ms: 100,
        ..AddonConfig::default()
    };

    let core = CoreSystem::new();
    let events = events_addon::new(core.transport(), config.clone())?;
    let (cpu, cpu_state) =
        cpu_addon::new(core.transport(), config, Duration::from_millis(200))?;
    core.register(&events)?;
    core.register(&cpu)?;

    // cpu waits for events: start it first in the background.
    let cpu_start = tokio::spawn({
        let cpu = cpu.clone();
        async move { cpu.start().await }
    });

    events.start().await?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    events.ready().await?;

    cpu_start.await??;
    cpu.ready().await?;
    info!(locked = ?cpu.current_locked_addon(), awake = cpu.is_awake(), "cpu is up");

    let span = tracing::info_span!("alarm");
    async {
        let alarm = core
            .call(
                "events.open_alarm",
                vec![json!({ "title": "disk almost full", "level": "warning" })],
            )
            .await?;
        let delivered = core.publish(subjects::ALARM_OPEN, alarm).await?;
        info!(delivered, "Alarm published");
        Ok::<_, SampleError>(())
    }
    .instrument(span)
    .await?;

    tokio::time::sleep(Duration::from_millis(500)).await;

    let usage = core.call("cpu.get_usage", vec![]).await?;
    info!(%usage, heartbeats = cpu_state.heartbeats(), "Usage collected");

    let status = core.call("cpu.status", vec![]).await?;
    info!(%status, "cpu status");

    core.shutdown().await?;
    info!("Application completed successfully");
    Ok(())
}
