// ── Channel Control Manager ──
//
// Owns every ChannelControl. Per-entity controls live in a plain map and
// are discarded on their last detach; global channels live in the pooled
// registry. Liveness is never cached: every ensure asks the transport.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use zonecast_api::TransportRef;

use super::{
    ChannelControl, EnsureOutcome, GlobalChannelEntry, GlobalChannelPatterns, GlobalRegistry,
    ListenerFactory,
};
use crate::error::CoreError;
use crate::model::{ChannelType, SubscriptionKind};

/// Outcome of a full rebuild after reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResubscribeReport {
    /// Channels detached and re-attached against the current transport.
    pub rebuilt: Vec<String>,
    /// Global entries without subscribers, left released.
    pub idle_globals: usize,
    /// Channels whose re-attach failed; they stay unbound until the next
    /// ensure.
    pub failed: Vec<String>,
}

/// Lifecycle owner for all physical channels.
pub struct ChannelControlManager {
    controls: HashMap<String, ChannelControl>,
    globals: GlobalRegistry,
    patterns: GlobalChannelPatterns,
    factory: ListenerFactory,
}

impl ChannelControlManager {
    pub fn new(
        patterns: GlobalChannelPatterns,
        global_capacity: usize,
        factory: ListenerFactory,
    ) -> Self {
        Self {
            controls: HashMap::new(),
            globals: GlobalRegistry::new(global_capacity),
            patterns,
            factory,
        }
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.patterns.is_global(name)
    }

    pub fn control(&self, name: &str) -> Option<&ChannelControl> {
        self.controls
            .get(name)
            .or_else(|| self.globals.get(name).map(GlobalChannelEntry::control))
    }

    pub fn global(&self, name: &str) -> Option<&GlobalChannelEntry> {
        self.globals.get(name)
    }

    pub fn globals(&self) -> &GlobalRegistry {
        &self.globals
    }

    /// Names of the per-entity controls, sorted.
    pub fn entity_channels(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.controls.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_live(&self, name: &str, transport: Option<&TransportRef>) -> bool {
        match (self.control(name), transport) {
            (Some(control), Some(current)) => control.is_live(current),
            _ => false,
        }
    }

    // ── Ensure ───────────────────────────────────────────────────────

    /// Make sure `name` has a live control bound to `transport`.
    ///
    /// Idempotent: a live control or an authorized live global entry is
    /// reused untouched. A missing transport is `Ok(Unavailable)`, not an
    /// error. On attach failure the control is left unbound (a brand new
    /// per-entity record is discarded) and the error is returned.
    pub fn ensure_channel_control(
        &mut self,
        name: &str,
        kind: SubscriptionKind,
        channel_type: ChannelType,
        transport: Option<&TransportRef>,
    ) -> Result<EnsureOutcome, CoreError> {
        let Some(current) = transport else {
            debug!(channel = %name, "no transport, channel unavailable");
            return Ok(EnsureOutcome::Unavailable);
        };

        if self.patterns.is_global(name) {
            let entry = self.globals.touch(name, kind, channel_type);
            if entry.authorized && entry.control.is_live(current) {
                return Ok(EnsureOutcome::Reused);
            }
            if let Err(e) = entry.control.attach(current, &self.factory) {
                entry.authorized = false;
                warn!(channel = %name, error = %e, "global channel attach failed");
                return Err(e);
            }
            entry.authorized = true;
            info!(channel = %name, refs = entry.ref_count, "global channel authorized");
            return Ok(EnsureOutcome::Created);
        }

        let is_new = !self.controls.contains_key(name);
        let control = self
            .controls
            .entry(name.to_owned())
            .or_insert_with(|| ChannelControl::new(name, kind, channel_type));
        if control.is_live(current) {
            return Ok(EnsureOutcome::Reused);
        }
        if control.kind() != kind {
            debug!(channel = %name, bound = %control.kind(), requested = %kind, "kind mismatch, keeping bound kind");
        }

        match control.attach(current, &self.factory) {
            Ok(()) => Ok(EnsureOutcome::Created),
            Err(e) => {
                warn!(channel = %name, error = %e, "channel attach failed");
                if is_new {
                    self.controls.remove(name);
                }
                Err(e)
            }
        }
    }

    // ── Detach ───────────────────────────────────────────────────────

    /// Release listeners and the transport handle of `name`.
    ///
    /// Per-entity records are removed when `remove_entry` is set. Global
    /// entries are always kept: they end up unauthorized with their ref
    /// count untouched.
    pub fn detach_channel(&mut self, name: &str, remove_entry: bool) {
        if let Some(entry) = self.globals.get_mut(name) {
            entry.control.release();
            entry.authorized = false;
            debug!(channel = %name, refs = entry.ref_count, "global channel detached");
            return;
        }

        if remove_entry {
            if let Some(mut control) = self.controls.remove(name) {
                control.release();
                debug!(channel = %name, "channel detached and discarded");
            }
        } else if let Some(control) = self.controls.get_mut(name) {
            control.release();
        }
    }

    // ── Global ref counting ──────────────────────────────────────────

    /// Bind one more subscription to global channel `name`. Only
    /// GlobalEvents subscriptions move the ref count, which is returned.
    pub(crate) fn retain_global(
        &mut self,
        name: &str,
        kind: SubscriptionKind,
        channel_type: ChannelType,
    ) -> usize {
        let entry = self.globals.touch(name, kind, channel_type);
        entry.bound += 1;
        if kind == SubscriptionKind::GlobalEvents {
            entry.ref_count += 1;
        }
        entry.ref_count
    }

    /// Unbind one subscription of `kind` from global channel `name`.
    pub(crate) fn release_global(&mut self, name: &str, kind: SubscriptionKind) -> Option<usize> {
        let entry = self.globals.get_mut(name)?;
        entry.bound = entry.bound.saturating_sub(1);
        if kind == SubscriptionKind::GlobalEvents {
            entry.ref_count = entry.ref_count.saturating_sub(1);
        }
        Some(entry.ref_count)
    }

    // ── Rebuild ──────────────────────────────────────────────────────

    /// Destructively rebuild every known channel against `transport`.
    ///
    /// Every control is detached and re-attached. Global entries with no
    /// subscribers are released and stay unauthorized.
    pub fn resubscribe_all_channels(&mut self, transport: &TransportRef) -> ResubscribeReport {
        let mut report = ResubscribeReport::default();
        let factory = &self.factory;

        let mut names: Vec<&String> = self.controls.keys().collect();
        names.sort_unstable();
        let names: Vec<String> = names.into_iter().cloned().collect();
        for name in names {
            let Some(control) = self.controls.get_mut(&name) else {
                continue;
            };
            control.release();
            match control.attach(transport, factory) {
                Ok(()) => report.rebuilt.push(name),
                Err(e) => {
                    warn!(channel = %name, error = %e, "channel rebuild failed");
                    report.failed.push(name);
                }
            }
        }

        for (name, entry) in self.globals.iter_mut() {
            entry.control.release();
            if entry.is_idle() {
                entry.authorized = false;
                report.idle_globals += 1;
                continue;
            }
            match entry.control.attach(transport, factory) {
                Ok(()) => {
                    entry.authorized = true;
                    report.rebuilt.push(name.clone());
                }
                Err(e) => {
                    entry.authorized = false;
                    warn!(channel = %name, error = %e, "global channel rebuild failed");
                    report.failed.push(name.clone());
                }
            }
        }

        info!(
            generation = transport.generation(),
            rebuilt = report.rebuilt.len(),
            failed = report.failed.len(),
            idle_globals = report.idle_globals,
            "channels resubscribed"
        );
        report
    }

    /// Release every channel and forget all per-entity controls.
    pub fn release_all(&mut self) {
        for control in self.controls.values_mut() {
            control.release();
        }
        self.controls.clear();
        for (_, entry) in self.globals.iter_mut() {
            entry.control.release();
            entry.authorized = false;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use zonecast_api::{MemoryTransport, TransportAccessor};

    use super::*;
    use crate::channel::tests::{counting_factory, install};
    use crate::model::{COMMAND_STATUS_UPDATED, EVENT_CREATED};

    fn manager() -> (ChannelControlManager, Arc<std::sync::atomic::AtomicUsize>) {
        let (hits, factory) = counting_factory();
        let patterns = GlobalChannelPatterns::new(["events.global", "broadcast.*"]);
        (ChannelControlManager::new(patterns, 4, factory), hits)
    }

    #[test]
    fn ensure_without_transport_is_unavailable() {
        let (mut channels, _) = manager();
        let outcome = channels
            .ensure_channel_control(
                "commands.1",
                SubscriptionKind::EntityEvents,
                ChannelType::Private,
                None,
            )
            .unwrap();
        assert_eq!(outcome, EnsureOutcome::Unavailable);
        assert!(channels.control("commands.1").is_none());
    }

    #[test]
    fn ensure_is_idempotent() {
        let memory = MemoryTransport::new();
        let (_slot, current) = install(&memory);
        let (mut channels, _) = manager();

        let first = channels
            .ensure_channel_control(
                "commands.1",
                SubscriptionKind::EntityEvents,
                ChannelType::Private,
                Some(&current),
            )
            .unwrap();
        let second = channels
            .ensure_channel_control(
                "commands.1",
                SubscriptionKind::EntityEvents,
                ChannelType::Private,
                Some(&current),
            )
            .unwrap();

        assert_eq!(first, EnsureOutcome::Created);
        assert_eq!(second, EnsureOutcome::Reused);
        assert_eq!(memory.listener_count("commands.1", COMMAND_STATUS_UPDATED), 1);
    }

    #[test]
    fn ensure_recreates_after_silent_drop() {
        let memory = MemoryTransport::new();
        let (_slot, current) = install(&memory);
        let (mut channels, hits) = manager();

        channels
            .ensure_channel_control(
                "commands.2",
                SubscriptionKind::EntityEvents,
                ChannelType::Public,
                Some(&current),
            )
            .unwrap();
        memory.drop_all_bindings();
        assert!(!channels.is_live("commands.2", Some(&current)));

        let outcome = channels
            .ensure_channel_control(
                "commands.2",
                SubscriptionKind::EntityEvents,
                ChannelType::Public,
                Some(&current),
            )
            .unwrap();
        assert_eq!(outcome, EnsureOutcome::Created);

        memory.publish("commands.2", COMMAND_STATUS_UPDATED, &json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_creation_discards_new_record() {
        let memory = MemoryTransport::new();
        let (_slot, current) = install(&memory);
        let (mut channels, _) = manager();
        memory.reject_next("commands.9");

        let result = channels.ensure_channel_control(
            "commands.9",
            SubscriptionKind::EntityEvents,
            ChannelType::Private,
            Some(&current),
        );
        assert!(matches!(result, Err(CoreError::ChannelCreation { .. })));
        assert!(channels.control("commands.9").is_none());
    }

    #[test]
    fn detach_global_keeps_entry_unauthorized() {
        let memory = MemoryTransport::new();
        let (_slot, current) = install(&memory);
        let (mut channels, _) = manager();

        channels
            .ensure_channel_control(
                "events.global",
                SubscriptionKind::GlobalEvents,
                ChannelType::Public,
                Some(&current),
            )
            .unwrap();
        channels.retain_global("events.global", SubscriptionKind::GlobalEvents, ChannelType::Public);
        channels.release_global("events.global", SubscriptionKind::GlobalEvents);
        channels.detach_channel("events.global", true);

        let entry = channels.global("events.global").unwrap();
        assert_eq!(entry.ref_count(), 0);
        assert!(!entry.is_authorized());
        assert!(!entry.control().is_bound());
        assert_eq!(memory.listener_count("events.global", EVENT_CREATED), 0);
    }

    #[test]
    fn resubscribe_rebuilds_against_new_generation() {
        let memory = MemoryTransport::new();
        let (slot, current) = install(&memory);
        let (mut channels, _) = manager();

        channels
            .ensure_channel_control(
                "commands.1",
                SubscriptionKind::EntityEvents,
                ChannelType::Private,
                Some(&current),
            )
            .unwrap();
        channels
            .ensure_channel_control(
                "broadcast.alerts",
                SubscriptionKind::GlobalEvents,
                ChannelType::Public,
                Some(&current),
            )
            .unwrap();

        slot.install(Arc::new(memory.clone()));
        let next = slot.current().unwrap();
        assert!(!channels.is_live("commands.1", Some(&next)));

        let report = channels.resubscribe_all_channels(&next);
        assert_eq!(report.rebuilt, vec!["commands.1".to_owned()]);
        assert_eq!(report.idle_globals, 1);
        assert!(channels.is_live("commands.1", Some(&next)));
        assert!(!channels.global("broadcast.alerts").unwrap().is_authorized());
        assert_eq!(memory.listener_count("commands.1", COMMAND_STATUS_UPDATED), 1);
    }
}
