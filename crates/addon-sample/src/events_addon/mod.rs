//! # Events Addon
//!
//! Keeps the list of open alarms. Other addons depend on it (`cpu` locks on `events`), so it is
//! the first addon to start and announce itself ready.
//!
//! ## Callbacks
//!
//! | Name | ACL | Args | Returns |
//! |------|-----|------|---------|
//! | `open_alarm` (alias `createAlarm`) | Write | [`AlarmCreate`] | the stored [`Alarm`] |
//! | `list_alarms` | Read | none | every [`Alarm`], oldest first |
//! | `close_alarm` | Write | alarm id | `true` if the alarm existed |
//!
//! ```rust,ignore
//! let events = events_addon::new(core.transport(), config)?;
//! core.register(&events)?;
//! events.start().await?;
//! events.ready().await?;
//!
//! let alarm = core.call("events.open_alarm", vec![json!({ "title": "disk full" })]).await?;
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use addon_framework::{
    Acl, Addon, AddonConfig, AddonError, AddonResult, CallContext, CallbackDef, Transport,
};
use serde_json::{json, Value};
use tracing::info;

use crate::model::{Alarm, AlarmCreate, AlarmId};

pub const NAME: &str = "events";

#[derive(Debug, Default)]
struct AlarmStore {
    next_id: AtomicU32,
    alarms: Mutex<Vec<Alarm>>,
}

impl AlarmStore {
    fn alarms(&self) -> std::sync::MutexGuard<'_, Vec<Alarm>> {
        self.alarms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open(&self, params: AlarmCreate, opened_by: &str) -> Alarm {
        let id = AlarmId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let alarm = Alarm::new(id, params, opened_by);
        self.alarms().push(alarm.clone());
        alarm
    }

    fn close(&self, id: &AlarmId) -> bool {
        let mut alarms = self.alarms();
        let before = alarms.len();
        alarms.retain(|alarm| &alarm.id != id);
        alarms.len() != before
    }
}

fn first_arg<T: serde::de::DeserializeOwned>(args: &[Value]) -> AddonResult<T> {
    let value = args
        .first()
        .cloned()
        .ok_or_else(|| AddonError::InvalidArgument("missing argument".into()))?;
    serde_json::from_value(value).map_err(|e| AddonError::InvalidArgument(e.to_string()))
}

/// Creates the `events` addon.
pub fn new(transport: Arc<dyn Transport>, config: AddonConfig) -> AddonResult<Addon> {
    let addon = Addon::builder(NAME)
        .version("1.0.0")
        .description("Alarm registry")
        .config(config)
        .transport(transport)
        .build()?;
    let store = Arc::new(AlarmStore::default());

    let open_store = store.clone();
    let open = addon.register(
        CallbackDef::new("openAlarm", move |ctx: CallContext, args: Vec<Value>| {
            let store = open_store.clone();
            async move {
                let params: AlarmCreate = first_arg(&args)?;
                let alarm = store.open(params, ctx.from());
                info!(alarm_id = %alarm.id, opened_by = %alarm.opened_by, "Alarm opened");
                serde_json::to_value(alarm).map_err(AddonError::handler)
            }
        })
        .acl(Acl::Write),
    )?;
    addon.set_deprecated_alias(&open, ["createAlarm"])?;

    let list_store = store.clone();
    addon.register_callback("list_alarms", move |_ctx: CallContext, _args: Vec<Value>| {
        let store = list_store.clone();
        async move { serde_json::to_value(store.alarms().clone()).map_err(AddonError::handler) }
    })?;

    let close_store = store;
    addon.register(
        CallbackDef::new("close_alarm", move |_ctx: CallContext, args: Vec<Value>| {
            let store = close_store.clone();
            async move {
                let id: AlarmId = first_arg(&args)?;
                Ok(json!(store.close(&id)))
            }
        })
        .acl(Acl::Write),
    )?;

    Ok(addon)
}
