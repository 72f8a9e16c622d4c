// ── Invariant checker ──
//
// Development-time bookkeeping that catches duplicate handler
// registrations and subscription leaks. It only ever warns, once per
// offending key, and is a no-op when disabled.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::model::HandlerId;

/// One handler registration on one `(channel, event)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantRecord {
    pub channel_name: String,
    pub event_name: String,
    pub handler_id: HandlerId,
    pub component_tag: String,
    pub timestamp: DateTime<Utc>,
    /// Registrations currently outstanding for this handler.
    pub registrations: usize,
}

/// A detected inconsistency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    DuplicateHandler {
        channel: String,
        handler_id: HandlerId,
        component_tag: String,
    },
    SubscriptionLeak {
        channel: String,
        count: usize,
        threshold: usize,
    },
    RefCountMismatch {
        channel: String,
        recorded: usize,
        actual: usize,
    },
}

impl InvariantViolation {
    fn key(&self) -> String {
        match self {
            Self::DuplicateHandler {
                channel,
                handler_id,
                ..
            } => format!("duplicate:{channel}:{handler_id}"),
            Self::SubscriptionLeak { channel, .. } => format!("leak:{channel}"),
            Self::RefCountMismatch { channel, .. } => format!("refcount:{channel}"),
        }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateHandler {
                channel,
                handler_id,
                component_tag,
            } => write!(
                f,
                "{handler_id} registered twice on '{channel}' (component {component_tag})"
            ),
            Self::SubscriptionLeak {
                channel,
                count,
                threshold,
            } => write!(
                f,
                "'{channel}' has {count} subscriptions (threshold {threshold}), probable leak"
            ),
            Self::RefCountMismatch {
                channel,
                recorded,
                actual,
            } => write!(
                f,
                "global channel '{channel}' ref count {recorded} but {actual} global-events subscriptions"
            ),
        }
    }
}

/// Registration tracker keyed by `(channel, event)`.
#[derive(Debug)]
pub struct InvariantChecker {
    enabled: bool,
    leak_threshold: usize,
    records: HashMap<(String, String), HashMap<HandlerId, InvariantRecord>>,
    warned: HashSet<String>,
}

impl InvariantChecker {
    pub fn new(enabled: bool, leak_threshold: usize) -> Self {
        Self {
            enabled,
            leak_threshold,
            records: HashMap::new(),
            warned: HashSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of distinct warnings emitted so far.
    pub fn warning_count(&self) -> usize {
        self.warned.len()
    }

    pub fn records(&self, channel: &str, event: &str) -> Vec<&InvariantRecord> {
        self.records
            .get(&(channel.to_owned(), event.to_owned()))
            .map(|handlers| handlers.values().collect())
            .unwrap_or_default()
    }

    /// Record a subscription's handler on each of its events. Returns the
    /// duplicate violation if the handler was already registered there.
    pub fn register_subscription(
        &mut self,
        channel: &str,
        events: &[&str],
        handler_id: HandlerId,
        component_tag: &str,
    ) -> Option<InvariantViolation> {
        if !self.enabled {
            return None;
        }

        let mut duplicate = false;
        for event in events {
            let record = self
                .records
                .entry((channel.to_owned(), (*event).to_owned()))
                .or_default()
                .entry(handler_id)
                .or_insert_with(|| InvariantRecord {
                    channel_name: channel.to_owned(),
                    event_name: (*event).to_owned(),
                    handler_id,
                    component_tag: component_tag.to_owned(),
                    timestamp: Utc::now(),
                    registrations: 0,
                });
            record.registrations += 1;
            duplicate |= record.registrations > 1;
        }

        if !duplicate {
            return None;
        }
        let violation = InvariantViolation::DuplicateHandler {
            channel: channel.to_owned(),
            handler_id,
            component_tag: component_tag.to_owned(),
        };
        self.warn_once(&violation);
        Some(violation)
    }

    pub fn unregister_subscription(&mut self, channel: &str, events: &[&str], handler_id: HandlerId) {
        if !self.enabled {
            return;
        }
        for event in events {
            let key = (channel.to_owned(), (*event).to_owned());
            let Some(handlers) = self.records.get_mut(&key) else {
                continue;
            };
            if let Some(record) = handlers.get_mut(&handler_id) {
                record.registrations = record.registrations.saturating_sub(1);
                if record.registrations == 0 {
                    handlers.remove(&handler_id);
                }
            }
            if handlers.is_empty() {
                self.records.remove(&key);
            }
        }
    }

    /// Check per-channel subscription counts and global ref counts.
    ///
    /// `channel_counts` yields `(channel, subscriptions)`; `global_refs`
    /// yields `(channel, recorded ref count, active GlobalEvents subscriptions)`.
    pub fn check<'a>(
        &mut self,
        channel_counts: impl IntoIterator<Item = (&'a str, usize)>,
        global_refs: impl IntoIterator<Item = (&'a str, usize, usize)>,
    ) -> Vec<InvariantViolation> {
        if !self.enabled {
            return Vec::new();
        }

        let mut violations: Vec<InvariantViolation> = channel_counts
            .into_iter()
            .filter(|(_, count)| *count > self.leak_threshold)
            .map(|(channel, count)| InvariantViolation::SubscriptionLeak {
                channel: channel.to_owned(),
                count,
                threshold: self.leak_threshold,
            })
            .collect();
        violations.extend(
            global_refs
                .into_iter()
                .filter(|(_, recorded, actual)| recorded != actual)
                .map(|(channel, recorded, actual)| InvariantViolation::RefCountMismatch {
                    channel: channel.to_owned(),
                    recorded,
                    actual,
                }),
        );

        for violation in &violations {
            self.warn_once(violation);
        }
        violations
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    fn warn_once(&mut self, violation: &InvariantViolation) {
        if self.warned.insert(violation.key()) {
            warn!(violation = %violation, "realtime invariant violated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS: &[&str] = &["CommandStatusUpdated", "CommandFailed"];
    const NO_GLOBALS: [(&str, usize, usize); 0] = [];

    #[test]
    fn duplicate_registration_warns_once() {
        let mut checker = InvariantChecker::new(true, 25);
        let handler = HandlerId(1);

        assert!(checker.register_subscription("commands.1", EVENTS, handler, "Panel").is_none());
        assert!(checker.register_subscription("commands.1", EVENTS, handler, "Panel").is_some());
        assert!(checker.register_subscription("commands.1", EVENTS, handler, "Panel").is_some());

        assert_eq!(checker.warning_count(), 1);
        assert_eq!(checker.records("commands.1", "CommandFailed")[0].registrations, 3);
    }

    #[test]
    fn unregister_clears_duplicate_state() {
        let mut checker = InvariantChecker::new(true, 25);
        let handler = HandlerId(2);
        checker.register_subscription("commands.2", EVENTS, handler, "Panel");
        checker.unregister_subscription("commands.2", EVENTS, handler);

        assert!(checker.register_subscription("commands.2", EVENTS, handler, "Panel").is_none());
        assert_eq!(checker.warning_count(), 0);
    }

    #[test]
    fn leak_and_refcount_checks() {
        let mut checker = InvariantChecker::new(true, 2);
        let violations = checker.check(
            [("commands.1", 3), ("commands.2", 2)],
            [("events.global", 1, 1), ("commands.global", 2, 1)],
        );

        assert_eq!(violations.len(), 2);
        assert!(matches!(
            violations[0],
            InvariantViolation::SubscriptionLeak { count: 3, .. }
        ));
        assert!(matches!(
            violations[1],
            InvariantViolation::RefCountMismatch { recorded: 2, actual: 1, .. }
        ));

        checker.check([("commands.1", 3)], NO_GLOBALS);
        assert_eq!(checker.warning_count(), 2);
    }

    #[test]
    fn disabled_checker_is_noop() {
        let mut checker = InvariantChecker::new(false, 0);
        let handler = HandlerId(3);
        checker.register_subscription("c", EVENTS, handler, "Panel");
        assert!(checker.register_subscription("c", EVENTS, handler, "Panel").is_none());
        assert!(checker.check([("c", 10)], NO_GLOBALS).is_empty());
        assert_eq!(checker.warning_count(), 0);
    }
}
