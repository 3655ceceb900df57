//! # Static Configuration Constants
//!
//! Read-only values shared by every addon of the process: reserved callback names,
//! access levels and the well-known event subjects.

use serde::{Deserialize, Serialize};

/// Version of this container, reported by `status` as `container_version`.
pub const CONTAINER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Callback names owned by the container itself.
pub const RESERVED_CALLBACK_NAMES: [&str; 6] =
    ["start", "stop", "sleep", "status", "event", "health_check"];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_CALLBACK_NAMES.contains(&name)
}

/// Access level attached to a callback. Enforcement happens in the Core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acl {
    #[default]
    Read = 0,
    Write = 1,
    Admin = 2,
    Super = 3,
}

impl Acl {
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Acl {
    type Error = crate::AddonError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::Read),
            1 => Ok(Self::Write),
            2 => Ok(Self::Admin),
            3 => Ok(Self::Super),
            other => Err(crate::AddonError::InvalidArgument(format!(
                "unknown ACL level {other}"
            ))),
        }
    }
}

/// Well-known subjects that addons can listen to with [`Addon::of`](crate::Addon::of).
pub mod subjects {
    pub const READY: &str = "Addon.ready";
    pub const ALARM_OPEN: &str = "Alarm.open";
    pub const ALARM_UPDATE: &str = "Alarm.update";
    pub const ALARM_CLOSE: &str = "Alarm.close";
    pub const MIC_CREATE: &str = "Metric.create";
    pub const MIC_UPDATE: &str = "Metric.update";
}

/// Target used to announce a subscription to the Core.
pub const SUBSCRIBE_TARGET: &str = "events.subscribe";

/// Target used to announce readiness to the Core.
pub const READY_TARGET: &str = "gate.addon_ready";
