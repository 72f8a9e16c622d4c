use thiserror::Error;

/// Top-level error type for the `zonecast-api` crate.
///
/// Covers every failure mode of the collaborator surfaces: the push
/// transport (channel creation, listener binding) and the snapshot HTTP
/// endpoint. `zonecast-core` maps these into its own error type.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport (HTTP) ────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Snapshot endpoint ───────────────────────────────────────────
    /// Non-success HTTP status from the snapshot endpoint.
    #[error("Snapshot endpoint returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Push transport ──────────────────────────────────────────────
    /// The transport refused to open (or authorize) a channel.
    #[error("Channel '{channel}' unavailable: {reason}")]
    ChannelUnavailable { channel: String, reason: String },

    /// Binding a listener on an open channel failed.
    #[error("Failed to listen for '{event}' on '{channel}': {reason}")]
    ListenFailed {
        channel: String,
        event: String,
        reason: String,
    },

    /// The transport instance backing a channel has gone away.
    #[error("Push transport closed")]
    TransportClosed,
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. }
            | Self::ChannelUnavailable { .. }
            | Self::ListenFailed { .. }
            | Self::TransportClosed => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Http { status: 404, .. } => true,
            _ => false,
        }
    }
}
