// ── In-memory snapshot source ──
//
// Serves canned envelopes per entity. Fetches can be held open until the
// caller releases them, which is how tests force out-of-order resolution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::{SnapshotEnvelope, SnapshotSource};
use crate::BoxFuture;
use crate::error::Error;

#[derive(Clone)]
enum Canned {
    Envelope(SnapshotEnvelope),
    Failure { status: u16, message: String },
}

#[derive(Default)]
struct SourceState {
    canned: HashMap<u64, Canned>,
    held: HashMap<u64, Arc<Notify>>,
    fetches: HashMap<u64, u64>,
}

/// [`SnapshotSource`] backed by a map of prepared responses.
#[derive(Default, Clone)]
pub struct MemorySnapshotSource {
    state: Arc<Mutex<SourceState>>,
}

impl MemorySnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `envelope` for `entity_id` from now on.
    pub fn insert(&self, entity_id: u64, envelope: SnapshotEnvelope) {
        self.lock()
            .canned
            .insert(entity_id, Canned::Envelope(envelope));
    }

    /// Answer fetches for `entity_id` with an HTTP error.
    pub fn fail(&self, entity_id: u64, status: u16, message: impl Into<String>) {
        self.lock().canned.insert(
            entity_id,
            Canned::Failure {
                status,
                message: message.into(),
            },
        );
    }

    /// Hold the next fetch for `entity_id` until the returned `Notify` fires.
    pub fn hold(&self, entity_id: u64) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().held.insert(entity_id, Arc::clone(&gate));
        gate
    }

    /// How many times `entity_id` has been fetched.
    pub fn fetch_count(&self, entity_id: u64) -> u64 {
        self.lock().fetches.get(&entity_id).copied().unwrap_or(0)
    }

    async fn resolve(&self, entity_id: u64) -> Result<SnapshotEnvelope, Error> {
        let gate = {
            let mut state = self.lock();
            *state.fetches.entry(entity_id).or_insert(0) += 1;
            state.held.remove(&entity_id)
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let canned = self.lock().canned.get(&entity_id).cloned();
        match canned {
            Some(Canned::Envelope(envelope)) => Ok(envelope),
            Some(Canned::Failure { status, message }) => Err(Error::Http { status, message }),
            None => Err(Error::Http {
                status: 404,
                message: format!("no snapshot for entity {entity_id}"),
            }),
        }
    }
}

impl SnapshotSource for MemorySnapshotSource {
    fn fetch_snapshot(&self, entity_id: u64) -> BoxFuture<'_, Result<SnapshotEnvelope, Error>> {
        Box::pin(self.resolve(entity_id))
    }
}
