// ── Runtime tuning ──
//
// Timing and sizing knobs for the realtime runtime. Like the rest of the
// core this never touches disk; zonecast-config builds one of these from
// the user's config file and hands it in.

use std::time::Duration;

/// Tuning for [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Quiet period after a reconnect before channels are rebuilt. A second
    /// reconnect inside the window restarts it.
    pub resubscribe_debounce: Duration,
    /// Delay before the first retry of a freshly queued subscription.
    pub pending_retry_delay: Duration,
    /// Period of the pending-queue poll loop.
    pub pending_poll_interval: Duration,
    /// Subscriptions per channel above which the invariant checker reports a
    /// probable leak.
    pub leak_threshold: usize,
    /// Channel names treated as pooled global channels. An entry ending in
    /// `*` matches by prefix.
    pub global_channels: Vec<String>,
    /// Maximum number of global registry entries kept around. Only entries
    /// with no subscribers are ever evicted.
    pub global_registry_capacity: usize,
    /// Force the invariant checker on or off. `None` enables it in debug
    /// builds only.
    pub invariant_checks: Option<bool>,
}

impl RealtimeConfig {
    pub fn invariant_checks_enabled(&self) -> bool {
        self.invariant_checks.unwrap_or(cfg!(debug_assertions))
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            resubscribe_debounce: Duration::from_millis(500),
            pending_retry_delay: Duration::from_millis(100),
            pending_poll_interval: Duration::from_millis(250),
            leak_threshold: 25,
            global_channels: vec!["events.global".into(), "commands.global".into()],
            global_registry_capacity: 32,
            invariant_checks: None,
        }
    }
}
