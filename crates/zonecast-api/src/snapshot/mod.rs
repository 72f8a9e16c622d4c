// ── Snapshot endpoint surface ──
//
// Wire types for `GET /entities/{id}/snapshot` and the object-safe source
// trait the core fetches through. Shape validation is deliberately left to
// the core: these types accept whatever the server sends.

mod client;
mod memory;

use serde::{Deserialize, Serialize};

use crate::BoxFuture;
use crate::error::Error;

pub use client::{SnapshotClient, SnapshotClientConfig};
pub use memory::MemorySnapshotSource;

/// Response envelope: `{ "status": "ok", "data": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub status: String,

    #[serde(default)]
    pub data: Option<RawSnapshot>,

    /// Human-readable reason on non-`ok` responses.
    #[serde(default)]
    pub message: Option<String>,
}

impl SnapshotEnvelope {
    /// Convenience constructor for a successful envelope.
    pub fn ok(data: RawSnapshot) -> Self {
        Self {
            status: "ok".into(),
            data: Some(data),
            message: None,
        }
    }
}

/// Snapshot body exactly as the server sent it.
///
/// `snapshot_id` may be a string or a number and `server_ts` may be a
/// number, numeric string, or ISO-8601 string; everything else lands in
/// `payload`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSnapshot {
    #[serde(default)]
    pub snapshot_id: Option<serde_json::Value>,

    #[serde(default)]
    pub server_ts: Option<serde_json::Value>,

    #[serde(default, alias = "zone_id")]
    pub entity_id: Option<serde_json::Value>,

    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Anything that can produce a snapshot envelope for an entity.
pub trait SnapshotSource: Send + Sync {
    fn fetch_snapshot(&self, entity_id: u64) -> BoxFuture<'_, Result<SnapshotEnvelope, Error>>;
}
