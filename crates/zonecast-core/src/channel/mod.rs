// ── Physical channel control ──
//
// A `ChannelControl` is the runtime's record of one transport channel: its
// binding to a transport instance and the listeners attached to it. The
// manager decides when records are created, checked, rebuilt, or released;
// the global registry pools application-wide channels across subscribers.

mod global;
mod manager;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;
use zonecast_api::{PushChannel, PushTransport, RawCallback, TransportRef};

use crate::error::CoreError;
use crate::model::{ChannelType, SubscriptionKind};

pub use global::{GlobalChannelEntry, GlobalChannelPatterns, GlobalRegistry};
pub use manager::{ChannelControlManager, ResubscribeReport};

/// Builds the transport callback for `(channel, event)`.
pub type ListenerFactory = Arc<dyn Fn(&str, &str) -> RawCallback + Send + Sync>;

/// Result of [`ChannelControlManager::ensure_channel_control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// A live control already existed.
    Reused,
    /// The control was (re)created and its listeners attached.
    Created,
    /// No transport is installed; the caller should queue the request.
    Unavailable,
}

impl EnsureOutcome {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Reused | Self::Created)
    }
}

// ── ListenerHandles ─────────────────────────────────────────────────

/// Event name -> callback currently bound on the transport.
#[derive(Default, Clone)]
pub struct ListenerHandles(IndexMap<String, RawCallback>);

impl ListenerHandles {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Debug for ListenerHandles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.keys()).finish()
    }
}

// ── TransportBinding ────────────────────────────────────────────────

/// Exclusive handle on an opened transport channel.
struct TransportBinding {
    channel: Arc<dyn PushChannel>,
    transport: Arc<dyn PushTransport>,
    generation: u64,
    listeners: ListenerHandles,
}

// ── ChannelControl ──────────────────────────────────────────────────

/// The runtime's record of one physical channel.
pub struct ChannelControl {
    name: String,
    channel_type: ChannelType,
    kind: SubscriptionKind,
    binding: Option<TransportBinding>,
}

impl ChannelControl {
    pub fn new(name: impl Into<String>, kind: SubscriptionKind, channel_type: ChannelType) -> Self {
        Self {
            name: name.into(),
            channel_type,
            kind,
            binding: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Generation of the transport this control is bound to.
    pub fn generation(&self) -> Option<u64> {
        self.binding.as_ref().map(|b| b.generation)
    }

    pub fn listeners(&self) -> Option<&ListenerHandles> {
        self.binding.as_ref().map(|b| &b.listeners)
    }

    /// Liveness check.
    ///
    /// Live means: bound, at least one listener attached, bound to the
    /// transport generation that is current right now, and the transport's
    /// own bookkeeping still holds bindings for the channel.
    pub fn is_live(&self, current: &TransportRef) -> bool {
        let Some(binding) = &self.binding else {
            return false;
        };
        !binding.listeners.is_empty()
            && binding.generation == current.generation()
            && current.has_bindings(&self.name)
    }

    /// Bind to `transport` and attach listeners for the control's kind.
    ///
    /// Any previous binding is released first. If any listener fails to
    /// attach, everything attached so far is removed, the channel is left,
    /// and the control ends up unbound.
    pub fn attach(
        &mut self,
        transport: &TransportRef,
        factory: &ListenerFactory,
    ) -> Result<(), CoreError> {
        self.release();

        let channel = match self.channel_type {
            ChannelType::Private => transport.private(&self.name),
            ChannelType::Public => transport.channel(&self.name),
        }?;

        let mut listeners = ListenerHandles::default();
        for event in self.kind.event_names() {
            channel.stop_listening(event);
            let callback = factory(&self.name, event);
            if let Err(e) = channel.listen(event, Arc::clone(&callback)) {
                for bound in listeners.event_names() {
                    channel.stop_listening(bound);
                }
                transport.leave(&self.name);
                return Err(e.into());
            }
            listeners.0.insert((*event).to_owned(), callback);
        }

        debug!(
            channel = %self.name,
            generation = transport.generation(),
            listeners = listeners.len(),
            "channel attached"
        );
        self.binding = Some(TransportBinding {
            channel,
            transport: Arc::clone(transport.transport()),
            generation: transport.generation(),
            listeners,
        });
        Ok(())
    }

    /// Stop listening and leave the channel. Idempotent.
    pub fn release(&mut self) {
        let Some(binding) = self.binding.take() else {
            return;
        };
        for event in binding.listeners.event_names() {
            binding.channel.stop_listening(event);
        }
        binding.transport.leave(&self.name);
        debug!(channel = %self.name, generation = binding.generation, "channel released");
    }
}

impl Drop for ChannelControl {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ChannelControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelControl")
            .field("name", &self.name)
            .field("channel_type", &self.channel_type)
            .field("kind", &self.kind)
            .field("generation", &self.generation())
            .field("listeners", &self.listeners())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use zonecast_api::{MemoryTransport, TransportAccessor, TransportSlot};

    use super::*;
    use crate::model::COMMAND_STATUS_UPDATED;

    pub(crate) fn counting_factory() -> (Arc<AtomicUsize>, ListenerFactory) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&hits);
        let factory: ListenerFactory = Arc::new(move |_, _| {
            let hits = Arc::clone(&inner);
            Arc::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        });
        (hits, factory)
    }

    pub(crate) fn install(memory: &MemoryTransport) -> (TransportSlot, TransportRef) {
        let slot = TransportSlot::new();
        slot.install(Arc::new(memory.clone()));
        let current = slot.current().unwrap();
        (slot, current)
    }

    #[test]
    fn attach_binds_kind_events() {
        let memory = MemoryTransport::new();
        let (_slot, current) = install(&memory);
        let (hits, factory) = counting_factory();

        let mut control = ChannelControl::new(
            "commands.10",
            SubscriptionKind::EntityEvents,
            ChannelType::Private,
        );
        control.attach(&current, &factory).unwrap();

        assert!(control.is_live(&current));
        assert_eq!(control.listeners().unwrap().len(), 2);
        memory.publish("commands.10", COMMAND_STATUS_UPDATED, &json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn silent_binding_drop_is_not_live() {
        let memory = MemoryTransport::new();
        let (_slot, current) = install(&memory);
        let (_, factory) = counting_factory();

        let mut control =
            ChannelControl::new("commands.3", SubscriptionKind::EntityEvents, ChannelType::Public);
        control.attach(&current, &factory).unwrap();
        memory.drop_all_bindings();

        assert!(control.is_bound());
        assert!(!control.is_live(&current));
    }

    #[test]
    fn newer_generation_is_not_live() {
        let memory = MemoryTransport::new();
        let (slot, current) = install(&memory);
        let (_, factory) = counting_factory();

        let mut control =
            ChannelControl::new("commands.3", SubscriptionKind::EntityEvents, ChannelType::Public);
        control.attach(&current, &factory).unwrap();

        slot.install(Arc::new(memory.clone()));
        let next = slot.current().unwrap();
        assert!(!control.is_live(&next));
    }

    #[test]
    fn failed_attach_leaves_control_unbound() {
        let memory = MemoryTransport::new();
        let (_slot, current) = install(&memory);
        let (_, factory) = counting_factory();
        memory.reject_next("commands.4");

        let mut control =
            ChannelControl::new("commands.4", SubscriptionKind::EntityEvents, ChannelType::Private);
        let err = control.attach(&current, &factory).unwrap_err();

        assert!(matches!(err, CoreError::ChannelCreation { .. }));
        assert!(!control.is_bound());
        assert!(memory.open_channels().is_empty());
    }

    #[test]
    fn release_stops_listeners_and_leaves() {
        let memory = MemoryTransport::new();
        let (_slot, current) = install(&memory);
        let (_, factory) = counting_factory();

        let mut control =
            ChannelControl::new("commands.5", SubscriptionKind::EntityEvents, ChannelType::Private);
        control.attach(&current, &factory).unwrap();
        control.release();
        control.release();

        assert!(!control.is_bound());
        assert_eq!(memory.listener_count("commands.5", COMMAND_STATUS_UPDATED), 0);
        assert_eq!(memory.churn(), (1, 1));
    }

    #[test]
    fn reattach_does_not_duplicate_listeners() {
        let memory = MemoryTransport::new();
        let (_slot, current) = install(&memory);
        let (hits, factory) = counting_factory();

        let mut control =
            ChannelControl::new("commands.6", SubscriptionKind::EntityEvents, ChannelType::Public);
        control.attach(&current, &factory).unwrap();
        control.attach(&current, &factory).unwrap();

        memory.publish("commands.6", COMMAND_STATUS_UPDATED, &json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
