//! # Framework Errors
//!
//! This module defines the single error type used throughout the addon container.
//! Validation errors are returned synchronously by the call that detected them, handler
//! failures travel back to whoever executed the callback, and background failures
//! (scheduled callbacks, intervals) are wrapped and published as `error` events instead of
//! being returned to anyone.

/// Convenience alias used by every public operation of the container.
pub type AddonResult<T> = Result<T, AddonError>;

/// Errors that can occur within the addon container.
#[derive(Debug, thiserror::Error)]
pub enum AddonError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unknown callback with name {0}")]
    NotFound(String),
    #[error("Unable to found callback with name '{0}'")]
    CallbackNotFound(String),
    #[error("Callback name '{0}' is reserved by the container")]
    ReservedName(String),
    #[error("No custom callback has been registered yet")]
    NoCallbackRegistered,
    #[error("Addon should be started before being ready")]
    NotStarted,
    #[error(
        "Failed to receive response for message id {message_id} ({from} -> {target}) in a delay of {timeout_ms}ms"
    )]
    Timeout {
        message_id: String,
        from: String,
        target: String,
        timeout_ms: u64,
    },
    #[error("Handler failure: {0}")]
    HandlerFailure(Box<dyn std::error::Error + Send + Sync>),
    /// An error delivered by the Core for a pending message.
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Scheduled callback '{callback}' failed: {source}")]
    ScheduledFailure {
        callback: String,
        #[source]
        source: Box<AddonError>,
    },
    #[error("Interval {id} failed: {source}")]
    IntervalFailure {
        id: String,
        #[source]
        source: Box<AddonError>,
    },
}

impl AddonError {
    /// Builds a [`AddonError::HandlerFailure`] from anything that converts into a boxed error,
    /// including plain strings.
    pub fn handler(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::HandlerFailure(error.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
