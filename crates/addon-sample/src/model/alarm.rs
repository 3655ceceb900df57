/// An alarm raised through the `events` addon.
///
/// Alarms travel as JSON between addons: `open_alarm` takes an [`AlarmCreate`] and answers the
/// stored [`Alarm`], which is also the payload published on `Alarm.open`.
use serde::{Deserialize, Serialize};

use std::fmt::Display;

/// Type-safe identifier for Alarms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlarmId(pub u32);

impl From<u32> for AlarmId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl Display for AlarmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "alarm_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmLevel {
    #[default]
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub title: String,
    pub level: AlarmLevel,
    /// Name of the addon that opened the alarm.
    pub opened_by: String,
}

impl Alarm {
    pub fn new(id: AlarmId, params: AlarmCreate, opened_by: impl Into<String>) -> Self {
        Self {
            id,
            title: params.title,
            level: params.level,
            opened_by: opened_by.into(),
        }
    }
}

/// DTO for Alarm creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmCreate {
    pub title: String,
    #[serde(default)]
    pub level: AlarmLevel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_defaults_to_info_level() {
        let params: AlarmCreate = serde_json::from_value(json!({ "title": "disk" })).unwrap();
        assert_eq!(params.level, AlarmLevel::Info);

        let alarm = Alarm::new(AlarmId(7), params, "cpu");
        assert_eq!(alarm.id.to_string(), "alarm_7");
        assert_eq!(
            serde_json::to_value(&alarm).unwrap(),
            json!({ "id": 7, "title": "disk", "level": "info", "opened_by": "cpu" })
        );
    }
}
