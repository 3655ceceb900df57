use std::time::Duration;

use addon_framework::tracing::setup_tracing;
use addon_framework::{subjects, AddonConfig, AddonError, MessageOptions};
use addon_sample::{cpu_addon, events_addon, CoreSystem, SampleError};
use serde_json::json;

fn fast_config() -> AddonConfig {
    AddonConfig {
        main_interval_ms: 20,
        message_timeout_ms: 500,
        lock_initial_delay_ms: 10,
        max_sleep_time_ms: 40,
        ..AddonConfig::default()
    }
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Full end-to-end flow with both addons routed through the Core.
#[tokio::test]
async fn test_full_system_integration() {
    setup_tracing();
    let core = CoreSystem::new();
    let events = events_addon::new(core.transport(), fast_config()).unwrap();
    let (cpu, state) =
        cpu_addon::new(core.transport(), fast_config(), Duration::from_millis(30)).unwrap();
    core.register(&events).unwrap();
    core.register(&cpu).unwrap();

    assert!(events.start().await.unwrap());
    assert!(events.ready().await.unwrap());
    eventually("events readiness", || core.is_ready(events_addon::NAME)).await;

    assert!(cpu.start().await.unwrap());
    assert!(cpu.is_awake());
    assert!(cpu.current_locked_addon().is_none());

    eventually("alarm subscription", || {
        core.subscribers(subjects::ALARM_OPEN) == vec![cpu_addon::NAME.to_string()]
    })
    .await;

    let alarm = core
        .call("events.open_alarm", vec![json!({ "title": "fan failure" })])
        .await
        .unwrap();
    assert_eq!(alarm["opened_by"], json!("core"));

    let delivered = core.publish(subjects::ALARM_OPEN, alarm).await.unwrap();
    assert_eq!(delivered, 1);
    eventually("alarm delivery", || state.usage().alarms_seen == 1).await;

    // execute_on_start fires `sample` on the first tick.
    eventually("first sample", || state.usage().samples >= 1).await;
    eventually("heartbeat", || state.heartbeats() >= 1).await;

    let usage = core.call("cpu.get_usage", vec![]).await.unwrap();
    assert_eq!(usage["alarms_seen"], json!(1));
    assert!(usage["samples"].as_u64().unwrap() >= 1);

    assert_eq!(
        core.call("cpu.health_check", vec![]).await.unwrap(),
        json!(true)
    );

    core.shutdown().await.unwrap();
    assert!(!cpu.is_started());
    assert!(!events.is_started());
}

#[tokio::test]
async fn test_cpu_waits_for_events_readiness() {
    setup_tracing();
    let core = CoreSystem::new();
    let events = events_addon::new(core.transport(), fast_config()).unwrap();
    let (cpu, _state) =
        cpu_addon::new(core.transport(), fast_config(), Duration::from_millis(30)).unwrap();
    core.register(&events).unwrap();
    core.register(&cpu).unwrap();

    let pending_start = tokio::spawn({
        let cpu = cpu.clone();
        async move { cpu.start().await }
    });

    // events is not even started: its status reports not ready.
    eventually("cpu locked on events", || {
        cpu.current_locked_addon().as_deref() == Some(events_addon::NAME)
    })
    .await;
    assert!(cpu.is_started());
    assert!(!cpu.is_awake());

    events.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!cpu.is_awake());

    events.ready().await.unwrap();
    assert!(pending_start.await.unwrap().unwrap());
    assert!(cpu.is_awake());
    assert!(cpu.current_locked_addon().is_none());

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_cancels_a_pending_dependency_wait() {
    let core = CoreSystem::new();
    let (cpu, _state) =
        cpu_addon::new(core.transport(), fast_config(), Duration::from_millis(30)).unwrap();
    core.register(&cpu).unwrap();

    let pending_start = tokio::spawn({
        let cpu = cpu.clone();
        async move { cpu.start().await }
    });
    eventually("cpu locked on events", || {
        cpu.current_locked_addon().is_some()
    })
    .await;

    core.shutdown().await.unwrap();
    assert!(pending_start.await.unwrap().unwrap());
    assert!(!cpu.is_started());
    assert!(!cpu.is_awake());
}

#[tokio::test]
async fn test_addon_to_addon_messages_are_answered() {
    let core = CoreSystem::new();
    let events = events_addon::new(core.transport(), fast_config()).unwrap();
    let (cpu, _state) =
        cpu_addon::new(core.transport(), fast_config(), Duration::from_millis(30)).unwrap();
    core.register(&events).unwrap();
    core.register(&cpu).unwrap();

    let opened = cpu
        .send_one(
            "events.open_alarm",
            MessageOptions::new().args(vec![json!({ "title": "hot", "level": "critical" })]),
        )
        .await
        .unwrap();
    assert_eq!(opened["opened_by"], json!("cpu"));

    let listed = cpu
        .send_one("events.list_alarms", MessageOptions::new())
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let err = cpu
        .send_one("nobody.status", MessageOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AddonError::Remote(ref m) if m.contains("Unknown addon")));

    let err = cpu
        .send_one("events.missing", MessageOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AddonError::Remote(_)));
    assert!(cpu.pending().is_empty());

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_core_call_errors() {
    let core = CoreSystem::new();
    let events = events_addon::new(core.transport(), fast_config()).unwrap();
    core.register(&events).unwrap();

    assert!(matches!(
        core.call("ghost.status", vec![]).await,
        Err(SampleError::UnknownAddon(ref name)) if name == "ghost"
    ));
    assert!(matches!(
        core.call("events", vec![]).await,
        Err(SampleError::InvalidTarget(_))
    ));
    assert!(matches!(
        core.call("events.start_engines", vec![]).await,
        Err(SampleError::Addon(AddonError::NotFound(_)))
            | Err(SampleError::Addon(AddonError::CallbackNotFound(_)))
    ));

    // Nobody subscribed: nothing delivered.
    assert_eq!(
        core.publish(subjects::ALARM_CLOSE, json!({})).await.unwrap(),
        0
    );

    core.shutdown().await.unwrap();
}
