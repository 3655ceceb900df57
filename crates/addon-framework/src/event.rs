//! Lifecycle events observable by the embedding application.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::AddonError;

/// Capacity of the lifecycle event channel. Slow receivers observe `Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum AddonEvent {
    Start,
    Awake,
    Sleep,
    Stop,
    Ready,
    /// A background failure (scheduled callback or interval).
    Error(Arc<AddonError>),
    /// A callback was invoked through one of its deprecated aliases.
    Deprecated { alias: String, callback: String },
}

impl AddonEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Awake => "awake",
            Self::Sleep => "sleep",
            Self::Stop => "stop",
            Self::Ready => "ready",
            Self::Error(_) => "error",
            Self::Deprecated { .. } => "deprecated",
        }
    }
}

/// Sending half of the event channel. Emitting without receivers is not an error.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<AddonEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn emit(&self, event: AddonEvent) {
        let _ = self.sender.send(event);
    }

    pub(crate) fn error(&self, error: AddonError) {
        self.emit(AddonEvent::Error(Arc::new(error)));
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<AddonEvent> {
        self.sender.subscribe()
    }
}
