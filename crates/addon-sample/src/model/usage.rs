use serde::{Deserialize, Serialize};

/// One CPU measurement taken by the `cpu` addon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    /// Load in percent, `0.0..=100.0`.
    pub percent: f64,
    /// Number of samples taken since the addon started.
    pub samples: u64,
    /// Alarms seen on `Alarm.open` since the addon started.
    pub alarms_seen: u64,
}
