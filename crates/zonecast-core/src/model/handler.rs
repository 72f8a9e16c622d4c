// ── Subscriber callbacks ──

use std::fmt;
use std::sync::Arc;

use super::{EntitySnapshot, HandlerId, RealtimeEvent};

/// Error a handler may return; it is logged and never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type EventFn = dyn Fn(&RealtimeEvent) -> Result<(), HandlerError> + Send + Sync;
type SnapshotFn = dyn Fn(&EntitySnapshot) -> Result<(), HandlerError> + Send + Sync;

/// A subscriber callback with a stable identity.
///
/// Clone the handler (not the closure) to register the same logical
/// handler more than once; the invariant checker and the dispatcher use
/// the shared [`HandlerId`] to detect and collapse duplicates.
#[derive(Clone)]
pub struct EventHandler {
    id: HandlerId,
    callback: Arc<EventFn>,
}

impl EventHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&RealtimeEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            id: HandlerId::next(),
            callback: Arc::new(callback),
        }
    }

    /// Wrap an infallible closure.
    pub fn infallible<F>(callback: F) -> Self
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        Self::new(move |event| {
            callback(event);
            Ok(())
        })
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn call(&self, event: &RealtimeEvent) -> Result<(), HandlerError> {
        (self.callback)(event)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Callback invoked after a snapshot has been stored for an entity.
#[derive(Clone)]
pub struct SnapshotHandler {
    callback: Arc<SnapshotFn>,
}

impl SnapshotHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&EntitySnapshot) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub fn call(&self, snapshot: &EntitySnapshot) -> Result<(), HandlerError> {
        (self.callback)(snapshot)
    }
}

impl fmt::Debug for SnapshotHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotHandler").finish_non_exhaustive()
    }
}
