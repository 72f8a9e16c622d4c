// ── Transport accessor ──
//
// Availability is polled, not pushed: the core calls `current()` whenever it
// needs a transport and treats `None` as "queue and retry later".

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;

use super::{PushTransport, TransportRef};

/// Polled source of the currently installed transport instance.
pub trait TransportAccessor: Send + Sync {
    fn current(&self) -> Option<TransportRef>;
}

/// Lock-free holder for the active transport.
///
/// The application installs a fresh transport on every (re)connect and
/// clears the slot when the connection is torn down.
#[derive(Default)]
pub struct TransportSlot {
    current: ArcSwapOption<TransportRef>,
    generation: AtomicU64,
}

impl TransportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `transport` as the current instance. Returns its generation.
    pub fn install(&self, transport: Arc<dyn PushTransport>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.current
            .store(Some(Arc::new(TransportRef::new(transport, generation))));
        tracing::debug!(generation, "push transport installed");
        generation
    }

    /// Remove the current instance, if any.
    pub fn clear(&self) {
        if self.current.swap(None).is_some() {
            tracing::debug!("push transport cleared");
        }
    }

    pub fn is_available(&self) -> bool {
        self.current.load().is_some()
    }
}

impl TransportAccessor for TransportSlot {
    fn current(&self) -> Option<TransportRef> {
        self.current.load_full().map(|handle| (*handle).clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::push::MemoryTransport;

    #[test]
    fn empty_slot_has_no_transport() {
        let slot = TransportSlot::new();
        assert!(slot.current().is_none());
        assert!(!slot.is_available());
    }

    #[test]
    fn install_bumps_generation() {
        let slot = TransportSlot::new();
        let first = slot.install(Arc::new(MemoryTransport::new()));
        let second = slot.install(Arc::new(MemoryTransport::new()));
        assert!(second > first);
        assert_eq!(slot.current().unwrap().generation(), second);
    }

    #[test]
    fn clear_removes_transport() {
        let slot = TransportSlot::new();
        slot.install(Arc::new(MemoryTransport::new()));
        slot.clear();
        assert!(slot.current().is_none());
    }
}
