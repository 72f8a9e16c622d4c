//! Collaborator surfaces for the zonecast realtime layer.
//!
//! Nothing in here knows about subscriptions, reference counts, or staleness.
//! This crate only describes (and provides test-grade implementations of)
//! the two things the core consumes:
//!
//! - **Push transport** ([`push`]): a channel-based publish/subscribe
//!   connection in the style of Pusher/Echo: `channel(name)`,
//!   `private(name)`, `listen(event, cb)`, `stop_listening(event)`,
//!   `leave(name)`. [`push::TransportSlot`] is the polled accessor for the
//!   currently installed transport; [`push::MemoryTransport`] is an
//!   in-process implementation.
//!
//! - **Snapshot endpoint** ([`snapshot`]): `GET /entities/{id}/snapshot`,
//!   served by [`snapshot::SnapshotClient`] over `reqwest`.

pub mod error;
pub mod push;
pub mod snapshot;
pub mod transport;

use std::future::Future;
use std::pin::Pin;

pub use error::Error;
pub use push::{
    MemoryTransport, PushChannel, PushTransport, RawCallback, TransportAccessor, TransportRef,
    TransportSlot, TransportStatus,
};
pub use snapshot::{
    MemorySnapshotSource, RawSnapshot, SnapshotClient, SnapshotClientConfig, SnapshotEnvelope,
    SnapshotSource,
};

/// Boxed, `Send` future used at object-safe trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
