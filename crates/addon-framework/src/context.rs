//! # Call Context
//!
//! The caller identity travels with every callback execution as an explicit, immutable
//! [`CallContext`] value. Handlers that perform further asynchronous work pass the context
//! (or a clone of it) along instead of reading it from task-local storage.

use serde::{Deserialize, Serialize};

/// Identity of whoever asked for a callback execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackHeader {
    /// Name of the calling addon, or `"self"` for local executions.
    pub from: String,
    /// Message id when the execution was requested through the Core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl CallbackHeader {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Header used when the addon invokes one of its own callbacks.
    pub fn local() -> Self {
        Self::new("self")
    }
}

impl Default for CallbackHeader {
    fn default() -> Self {
        Self::local()
    }
}

/// Execution scope handed to a callback handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    header: CallbackHeader,
    addon: String,
    callback: String,
}

impl CallContext {
    pub(crate) fn new(header: CallbackHeader, addon: &str, callback: &str) -> Self {
        Self {
            header,
            addon: addon.to_string(),
            callback: callback.to_string(),
        }
    }

    pub fn header(&self) -> &CallbackHeader {
        &self.header
    }

    /// Shortcut for `header().from`.
    pub fn from(&self) -> &str {
        &self.header.from
    }

    /// Name of the addon executing the callback.
    pub fn addon(&self) -> &str {
        &self.addon
    }

    /// Canonical name of the executing callback (never an alias).
    pub fn callback(&self) -> &str {
        &self.callback
    }
}
