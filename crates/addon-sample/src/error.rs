//! Errors of the sample Core and its addons.

use addon_framework::AddonError;

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error(transparent)]
    Addon(#[from] AddonError),
    #[error("Unknown addon {0}")]
    UnknownAddon(String),
    #[error("Addon {0} is already registered")]
    DuplicateAddon(String),
    #[error("Target '{0}' is not an <addon>.<callback> path")]
    InvalidTarget(String),
    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
