// ── Snapshot reconciliation ──
//
// Holds the most recent consistent snapshot per entity and answers the one
// question the dispatcher asks: is this event older than what we already
// know? Fetch failures never disturb existing state.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use zonecast_api::{SnapshotEnvelope, SnapshotSource};

use crate::dispatch::panic_message;
use crate::error::CoreError;
use crate::model::{EntityId, EntitySnapshot, SnapshotHandler};
use crate::normalize::coerce_timestamp;

/// Per-entity results of a bulk re-sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: Vec<EntityId>,
    pub failed: Vec<EntityId>,
}

/// Latest snapshot per entity, plus the apply handlers interested in them.
pub struct SnapshotRegistry {
    source: Option<Arc<dyn SnapshotSource>>,
    snapshots: DashMap<EntityId, Arc<EntitySnapshot>>,
    handlers: DashMap<EntityId, SnapshotHandler>,
}

impl SnapshotRegistry {
    pub fn new(source: Option<Arc<dyn SnapshotSource>>) -> Self {
        Self {
            source,
            snapshots: DashMap::new(),
            handlers: DashMap::new(),
        }
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn get(&self, entity_id: EntityId) -> Option<Arc<EntitySnapshot>> {
        self.snapshots.get(&entity_id).map(|s| Arc::clone(s.value()))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Install `handler` for `entity_id`, replacing any previous one.
    pub fn register_handler(&self, entity_id: EntityId, handler: SnapshotHandler) {
        self.handlers.insert(entity_id, handler);
    }

    pub fn remove_handler(&self, entity_id: EntityId) -> bool {
        self.handlers.remove(&entity_id).is_some()
    }

    /// Store `snapshot` (overwriting) and run the entity's apply handler.
    pub fn apply(&self, snapshot: EntitySnapshot) -> Arc<EntitySnapshot> {
        let entity_id = snapshot.entity_id;
        let snapshot = Arc::new(snapshot);
        self.snapshots.insert(entity_id, Arc::clone(&snapshot));
        debug!(
            entity_id = %entity_id,
            snapshot_id = %snapshot.snapshot_id,
            server_ts = ?snapshot.server_ts,
            "snapshot stored"
        );

        let handler = self.handlers.get(&entity_id).map(|h| h.value().clone());
        if let Some(handler) = handler {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.call(&snapshot))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(entity_id = %entity_id, error = %e, "snapshot apply handler failed");
                }
                Err(payload) => {
                    warn!(
                        entity_id = %entity_id,
                        panic = %panic_message(payload.as_ref()),
                        "snapshot apply handler panicked"
                    );
                }
            }
        }
        snapshot
    }

    /// Fetch, validate, store, and apply the snapshot for `entity_id`.
    ///
    /// Failures are logged and returned; existing state is left untouched.
    pub async fn fetch_and_apply_snapshot(
        &self,
        entity_id: EntityId,
    ) -> Result<Arc<EntitySnapshot>, CoreError> {
        let Some(source) = self.source.as_ref() else {
            return Err(CoreError::SnapshotSourceMissing);
        };

        let envelope = match source.fetch_snapshot(entity_id.get()).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "snapshot fetch failed");
                return Err(CoreError::snapshot_fetch(entity_id.get(), &e));
            }
        };

        match validate_envelope(entity_id, envelope) {
            Ok(snapshot) => Ok(self.apply(snapshot)),
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "snapshot rejected");
                Err(e)
            }
        }
    }

    /// True only when a snapshot exists for the entity and `server_ts` is
    /// strictly older than it.
    pub fn is_stale_event(&self, entity_id: Option<EntityId>, server_ts: Option<i64>) -> bool {
        let (Some(entity_id), Some(ts)) = (entity_id, server_ts) else {
            return false;
        };
        self.snapshots
            .get(&entity_id)
            .and_then(|snapshot| snapshot.server_ts)
            .is_some_and(|watermark| ts < watermark)
    }

    /// Re-fetch every id concurrently; each fetch succeeds or fails alone.
    pub async fn sync_entities(&self, entity_ids: &[EntityId]) -> SyncReport {
        let results = join_all(
            entity_ids
                .iter()
                .map(|id| async move { (*id, self.fetch_and_apply_snapshot(*id).await) }),
        )
        .await;

        let mut report = SyncReport::default();
        for (id, result) in results {
            match result {
                Ok(_) => report.applied.push(id),
                Err(_) => report.failed.push(id),
            }
        }
        info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            "snapshot sync finished"
        );
        report
    }

    pub(crate) fn clear(&self) {
        self.snapshots.clear();
        self.handlers.clear();
    }
}

/// Check an envelope and turn it into an [`EntitySnapshot`].
///
/// Requires `status == "ok"`, a data body, a non-empty snapshot id, and an
/// entity id equal to the one requested.
pub fn validate_envelope(
    requested: EntityId,
    envelope: SnapshotEnvelope,
) -> Result<EntitySnapshot, CoreError> {
    let invalid = |reason: String| CoreError::InvalidSnapshot {
        entity_id: requested.get(),
        reason,
    };

    if envelope.status != "ok" {
        let detail = envelope.message.unwrap_or_default();
        return Err(invalid(format!("status '{}' {detail}", envelope.status)
            .trim_end()
            .to_owned()));
    }
    let Some(data) = envelope.data else {
        return Err(invalid("missing data".into()));
    };

    let snapshot_id = match data.snapshot_id {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return Err(invalid("missing snapshot_id".into())),
    };

    match data.entity_id.as_ref().and_then(EntityId::from_json) {
        Some(id) if id == requested => {}
        Some(id) => return Err(invalid(format!("entity id mismatch (got {id})"))),
        None => return Err(invalid("missing entity id".into())),
    }

    Ok(EntitySnapshot {
        snapshot_id,
        entity_id: requested,
        server_ts: data.server_ts.as_ref().and_then(coerce_timestamp),
        payload: data.payload,
    })
}

// ── SnapshotFocus ───────────────────────────────────────────────────

/// Tracks which entity a view is looking at and publishes that entity's
/// snapshot, discarding results of fetches that were overtaken by a later
/// focus change.
pub struct SnapshotFocus {
    registry: Arc<SnapshotRegistry>,
    generation: AtomicU64,
    current: watch::Sender<Option<Arc<EntitySnapshot>>>,
    focused: watch::Sender<Option<EntityId>>,
}

impl SnapshotFocus {
    pub fn new(registry: Arc<SnapshotRegistry>) -> Self {
        let (current, _) = watch::channel(None);
        let (focused, _) = watch::channel(None);
        Self {
            registry,
            generation: AtomicU64::new(0),
            current,
            focused,
        }
    }

    pub fn focused(&self) -> Option<EntityId> {
        *self.focused.borrow()
    }

    /// Snapshot published for the current focus, if any.
    pub fn current(&self) -> Option<Arc<EntitySnapshot>> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<EntitySnapshot>>> {
        self.current.subscribe()
    }

    /// Move focus to `entity_id` and fetch its snapshot.
    ///
    /// Returns `Ok(None)` when focus moved again before the fetch resolved;
    /// the late result is not published.
    pub async fn focus(
        &self,
        entity_id: EntityId,
    ) -> Result<Option<Arc<EntitySnapshot>>, CoreError> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.focused.send_replace(Some(entity_id));
        self.current.send_replace(self.registry.get(entity_id));

        let snapshot = self.registry.fetch_and_apply_snapshot(entity_id).await?;
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(entity_id = %entity_id, "focus moved during fetch, discarding snapshot");
            return Ok(None);
        }
        self.current.send_replace(Some(Arc::clone(&snapshot)));
        Ok(Some(snapshot))
    }

    /// Drop the focus; in-flight fetches are discarded.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.focused.send_replace(None);
        self.current.send_replace(None);
    }
}
