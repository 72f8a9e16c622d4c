// ── Global channel pool ──
//
// Application-wide channels are shared by every component that listens to
// them. Each entry counts its GlobalEvents subscribers separately from
// everything bound to it. Once nothing is bound it is released and marked
// unauthorized but kept, so the next subscriber can re-attach without
// losing its place. The pool is bounded: past capacity, the least recently
// used idle entries are evicted.

use indexmap::IndexMap;
use tracing::debug;

use super::ChannelControl;
use crate::model::{ChannelType, SubscriptionKind};

// ── GlobalChannelPatterns ───────────────────────────────────────────

/// Matcher for channel names that should be pooled.
#[derive(Debug, Clone, Default)]
pub struct GlobalChannelPatterns {
    exact: Vec<String>,
    prefixes: Vec<String>,
}

impl GlobalChannelPatterns {
    /// Build from config entries; a trailing `*` makes an entry a prefix.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            match entry.strip_suffix('*') {
                Some(prefix) => patterns.prefixes.push(prefix.to_owned()),
                None => patterns.exact.push(entry.to_owned()),
            }
        }
        patterns
    }

    pub fn is_global(&self, channel: &str) -> bool {
        self.exact.iter().any(|name| name == channel)
            || self.prefixes.iter().any(|p| channel.starts_with(p.as_str()))
    }
}

// ── GlobalChannelEntry ──────────────────────────────────────────────

/// A pooled global channel.
#[derive(Debug)]
pub struct GlobalChannelEntry {
    pub(crate) control: ChannelControl,
    /// Active GlobalEvents subscriptions.
    pub(crate) ref_count: usize,
    /// Active subscriptions of any kind.
    pub(crate) bound: usize,
    pub(crate) authorized: bool,
}

impl GlobalChannelEntry {
    fn new(name: &str, kind: SubscriptionKind, channel_type: ChannelType) -> Self {
        Self {
            control: ChannelControl::new(name, kind, channel_type),
            ref_count: 0,
            bound: 0,
            authorized: false,
        }
    }

    pub fn control(&self) -> &ChannelControl {
        &self.control
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// No subscription of any kind is bound to this entry.
    pub fn is_idle(&self) -> bool {
        self.bound == 0
    }
}

// ── GlobalRegistry ──────────────────────────────────────────────────

/// Recency-ordered pool of global channel entries.
#[derive(Debug)]
pub struct GlobalRegistry {
    entries: IndexMap<String, GlobalChannelEntry>,
    capacity: usize,
}

impl GlobalRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&GlobalChannelEntry> {
        self.entries.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut GlobalChannelEntry> {
        self.entries.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GlobalChannelEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut GlobalChannelEntry)> {
        self.entries.iter_mut()
    }

    /// Fetch `name`, creating an unauthorized entry if needed, and mark it
    /// most recently used. May evict idle entries.
    pub(crate) fn touch(
        &mut self,
        name: &str,
        kind: SubscriptionKind,
        channel_type: ChannelType,
    ) -> &mut GlobalChannelEntry {
        let entry = self
            .entries
            .shift_remove(name)
            .unwrap_or_else(|| GlobalChannelEntry::new(name, kind, channel_type));
        self.make_room();
        let (index, _) = self.entries.insert_full(name.to_owned(), entry);
        &mut self.entries[index]
    }

    /// Evict least recently used idle entries so one more fits.
    fn make_room(&mut self) {
        while self.entries.len() >= self.capacity {
            let Some(victim) = self
                .entries
                .iter()
                .find(|(_, entry)| entry.is_idle())
                .map(|(name, _)| name.clone())
            else {
                break;
            };
            if self.entries.shift_remove(&victim).is_some() {
                debug!(channel = %victim, capacity = self.capacity, "evicted idle global channel");
            }
        }
    }
}
