// ── In-process push transport ──
//
// Keeps channel bindings in a plain map and delivers published payloads
// synchronously. Used by tests and by the CLI replay tool; it also lets
// callers simulate the failure modes a real socket exhibits (silently
// dropped bindings after reconnect, rejected channel authorization).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{PushChannel, PushTransport, RawCallback};
use crate::error::Error;

const PRIVATE_PREFIX: &str = "private-";

#[derive(Default)]
struct MemoryState {
    /// Internal channel name -> event name -> bound callbacks.
    channels: HashMap<String, HashMap<String, Vec<RawCallback>>>,
    /// Channel names whose next open attempt is rejected.
    rejected: HashSet<String>,
    opened: u64,
    left: u64,
}

/// Synchronous, in-memory [`PushTransport`].
#[derive(Default, Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, internal: String, requested: &str) -> Result<Arc<dyn PushChannel>, Error> {
        let mut state = self.lock();
        if state.rejected.remove(requested) {
            return Err(Error::ChannelUnavailable {
                channel: requested.to_owned(),
                reason: "authorization rejected".into(),
            });
        }
        if !state.channels.contains_key(&internal) {
            state.channels.insert(internal.clone(), HashMap::new());
            state.opened += 1;
        }
        drop(state);

        Ok(Arc::new(MemoryChannel {
            name: internal,
            state: Arc::clone(&self.state),
        }))
    }

    /// Deliver `payload` to every callback bound to `event` on `channel`
    /// (public or private variant). Returns the number of callbacks invoked.
    ///
    /// Callbacks run after the internal lock is released, so they may freely
    /// call back into the transport.
    pub fn publish(&self, channel: &str, event: &str, payload: &serde_json::Value) -> usize {
        let callbacks: Vec<RawCallback> = {
            let state = self.lock();
            [channel.to_owned(), format!("{PRIVATE_PREFIX}{channel}")]
                .iter()
                .filter_map(|name| state.channels.get(name))
                .filter_map(|events| events.get(event))
                .flat_map(|cbs| cbs.iter().cloned())
                .collect()
        };

        for cb in &callbacks {
            cb(payload);
        }
        callbacks.len()
    }

    /// Forget every event binding while keeping channels "open", which is
    /// what a socket does when it reconnects underneath its subscribers.
    pub fn drop_all_bindings(&self) {
        let mut state = self.lock();
        for events in state.channels.values_mut() {
            events.clear();
        }
    }

    /// Make the next `channel()`/`private()` call for `name` fail.
    pub fn reject_next(&self, name: &str) {
        self.lock().rejected.insert(name.to_owned());
    }

    /// Number of callbacks currently bound to `event` on `channel`.
    pub fn listener_count(&self, channel: &str, event: &str) -> usize {
        let state = self.lock();
        [channel.to_owned(), format!("{PRIVATE_PREFIX}{channel}")]
            .iter()
            .filter_map(|name| state.channels.get(name))
            .filter_map(|events| events.get(event))
            .map(Vec::len)
            .sum()
    }

    /// Internal names of every open channel, sorted.
    pub fn open_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total channel opens and leaves since creation.
    pub fn churn(&self) -> (u64, u64) {
        let state = self.lock();
        (state.opened, state.left)
    }
}

impl PushTransport for MemoryTransport {
    fn channel(&self, name: &str) -> Result<Arc<dyn PushChannel>, Error> {
        self.open(name.to_owned(), name)
    }

    fn private(&self, name: &str) -> Result<Arc<dyn PushChannel>, Error> {
        self.open(format!("{PRIVATE_PREFIX}{name}"), name)
    }

    fn leave(&self, name: &str) {
        let mut state = self.lock();
        let public = state.channels.remove(name).is_some();
        let private = state
            .channels
            .remove(&format!("{PRIVATE_PREFIX}{name}"))
            .is_some();
        if public || private {
            state.left += 1;
        }
    }

    fn has_bindings(&self, name: &str) -> bool {
        let state = self.lock();
        [name.to_owned(), format!("{PRIVATE_PREFIX}{name}")]
            .iter()
            .filter_map(|n| state.channels.get(n))
            .any(|events| events.values().any(|cbs| !cbs.is_empty()))
    }
}

// ── MemoryChannel ────────────────────────────────────────────────────

struct MemoryChannel {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

impl PushChannel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn listen(&self, event: &str, callback: RawCallback) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(events) = state.channels.get_mut(&self.name) else {
            return Err(Error::ListenFailed {
                channel: self.name.clone(),
                event: event.to_owned(),
                reason: "channel has been left".into(),
            });
        };
        events.entry(event.to_owned()).or_default().push(callback);
        Ok(())
    }

    fn stop_listening(&self, event: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(events) = state.channels.get_mut(&self.name) {
            events.remove(event);
        }
    }
}
