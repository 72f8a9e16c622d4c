use serde::{Deserialize, Serialize};

use super::EntityId;

/// The most recently fetched consistent state of one entity.
///
/// `server_ts` is the staleness watermark: push events for the same entity
/// stamped earlier than it are discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub snapshot_id: String,
    pub entity_id: EntityId,
    /// Epoch milliseconds.
    pub server_ts: Option<i64>,
    pub payload: serde_json::Map<String, serde_json::Value>,
}
