// ── Core error types ──
//
// Errors surfaced by zonecast-core. Most failures in this crate are logged
// and absorbed (a missing transport just queues the request); the variants
// below are what the few fallible entry points hand back to callers. The
// `From<zonecast_api::Error>` impl translates collaborator errors.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Channel errors ───────────────────────────────────────────────
    #[error("Failed to create channel '{channel}': {reason}")]
    ChannelCreation { channel: String, reason: String },

    #[error("Push transport is not available")]
    TransportUnavailable,

    // ── Snapshot errors ──────────────────────────────────────────────
    #[error("No snapshot source configured")]
    SnapshotSourceMissing,

    #[error("Snapshot fetch for entity {entity_id} failed: {reason}")]
    SnapshotFetch {
        entity_id: u64,
        reason: String,
        /// HTTP status code (if the endpoint answered at all).
        status: Option<u16>,
    },

    #[error("Invalid snapshot for entity {entity_id}: {reason}")]
    InvalidSnapshot { entity_id: u64, reason: String },

    // ── Runtime errors ───────────────────────────────────────────────
    #[error("No async runtime available: {0}")]
    NoAsyncRuntime(String),

    #[error("Realtime runtime has been shut down")]
    ShutDown,

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Wrap a collaborator error raised while fetching `entity_id`.
    pub fn snapshot_fetch(entity_id: u64, err: &zonecast_api::Error) -> Self {
        let status = match err {
            zonecast_api::Error::Http { status, .. } => Some(*status),
            zonecast_api::Error::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        };
        Self::SnapshotFetch {
            entity_id,
            reason: err.to_string(),
            status,
        }
    }
}

// ── Conversion from collaborator errors ──────────────────────────────

impl From<zonecast_api::Error> for CoreError {
    fn from(err: zonecast_api::Error) -> Self {
        match err {
            zonecast_api::Error::ChannelUnavailable { channel, reason } => {
                CoreError::ChannelCreation { channel, reason }
            }
            zonecast_api::Error::ListenFailed {
                channel,
                event,
                reason,
            } => CoreError::ChannelCreation {
                channel,
                reason: format!("listen '{event}': {reason}"),
            },
            zonecast_api::Error::TransportClosed => CoreError::TransportUnavailable,
            zonecast_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            zonecast_api::Error::Http { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            zonecast_api::Error::Transport(ref e) => CoreError::Api {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            },
            zonecast_api::Error::Timeout { timeout_secs } => CoreError::Api {
                message: format!("request timed out after {timeout_secs}s"),
                status: None,
            },
            zonecast_api::Error::Tls(msg) => CoreError::Api {
                message: format!("TLS error: {msg}"),
                status: None,
            },
            zonecast_api::Error::Deserialization { message, body: _ } => CoreError::Api {
                message: format!("Deserialization error: {message}"),
                status: None,
            },
        }
    }
}
