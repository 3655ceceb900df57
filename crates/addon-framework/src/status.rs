//! Snapshot returned by the native `status` callback.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::registry::CallbackDescriptor;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddonStatus {
    pub uid: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub container_version: String,
    pub ready: bool,
    pub started: bool,
    pub awake: bool,
    /// Milliseconds since the Unix epoch.
    pub last_start: Option<u64>,
    pub last_stop: Option<u64>,
    pub current_locked_addon: Option<String>,
    pub lock_on: Vec<String>,
    pub callbacks_descriptor: Option<String>,
    pub callbacks: BTreeMap<String, CallbackDescriptor>,
}
