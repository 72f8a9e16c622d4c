// ── Push transport surface ──
//
// Object-safe traits modelling a channel-based push connection, plus the
// polled accessor the core uses to find the current transport instance.

mod memory;
mod slot;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub use memory::MemoryTransport;
pub use slot::{TransportAccessor, TransportSlot};

/// Callback bound to one event on one channel.
///
/// Receives the raw JSON payload exactly as the transport decoded it.
pub type RawCallback = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// A live publish/subscribe connection.
///
/// Implementations own their per-channel bookkeeping; the core never caches
/// liveness and instead asks [`has_bindings`](Self::has_bindings) every time,
/// because a reconnecting transport may drop channels without telling anyone.
pub trait PushTransport: Send + Sync {
    /// Open (or return the already-open) public channel `name`.
    fn channel(&self, name: &str) -> Result<Arc<dyn PushChannel>, Error>;

    /// Open (or return the already-open) private channel `name`.
    ///
    /// Authorization is the transport's concern; a rejected handshake
    /// surfaces as [`Error::ChannelUnavailable`].
    fn private(&self, name: &str) -> Result<Arc<dyn PushChannel>, Error>;

    /// Leave channel `name` (public and private variants).
    fn leave(&self, name: &str);

    /// Whether the transport currently holds at least one event binding
    /// for channel `name`.
    fn has_bindings(&self, name: &str) -> bool;
}

/// One opened channel.
pub trait PushChannel: Send + Sync {
    /// Channel name as the transport knows it (private channels carry the
    /// `private-` prefix).
    fn name(&self) -> &str;

    /// Bind `callback` to `event`.
    fn listen(&self, event: &str, callback: RawCallback) -> Result<(), Error>;

    /// Remove every callback bound to `event`.
    fn stop_listening(&self, event: &str);
}

// ── TransportRef ─────────────────────────────────────────────────────

/// A transport instance tagged with the generation it was installed under.
///
/// Every [`TransportSlot::install`] bumps the generation, so a binding made
/// against an older instance can be recognised as dead even if the new
/// instance happens to know a channel of the same name.
#[derive(Clone)]
pub struct TransportRef {
    transport: Arc<dyn PushTransport>,
    generation: u64,
}

impl TransportRef {
    pub fn new(transport: Arc<dyn PushTransport>, generation: u64) -> Self {
        Self {
            transport,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transport(&self) -> &Arc<dyn PushTransport> {
        &self.transport
    }
}

impl Deref for TransportRef {
    type Target = dyn PushTransport;

    fn deref(&self) -> &Self::Target {
        self.transport.as_ref()
    }
}

impl fmt::Debug for TransportRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRef")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// ── TransportStatus ──────────────────────────────────────────────────

/// Connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Connected,
    Connecting,
    Disconnected,
    Failed,
    Unavailable,
}

impl TransportStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}
