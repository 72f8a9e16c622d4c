//! Client-side realtime subscription and reconciliation layer.
//!
//! Sits between a channel-based push transport (`zonecast-api::push`) and
//! UI components that want domain events for the zones they display:
//!
//! - **[`Runtime`]**: Central facade. [`subscribe()`](Runtime::subscribe)
//!   never fails: requests made before the transport exists are queued and
//!   promoted by a poll loop. Transport status reports drive a debounced
//!   rebuild of every channel after a reconnect, followed by a snapshot
//!   re-sync.
//!
//! - **Channel control** ([`channel`]): One [`ChannelControl`] per channel
//!   name, with a generation-aware liveness check that catches bindings a
//!   reconnecting socket dropped silently. Global channels are shared through
//!   a bounded, reference-counted registry.
//!
//! - **[`SubscriptionRegistry`]**: Who listens where, per component
//!   instance, so a [`ComponentScope`] can tear down everything it owns.
//!
//! - **Snapshots** ([`snapshot`]): Authoritative per-entity state fetched
//!   over HTTP. Its `server_ts` watermark marks older push events as stale;
//!   [`SnapshotFocus`] keeps a view on the last-requested entity even when
//!   fetches resolve out of order.
//!
//! - **Dispatch** ([`normalize`], [`dispatch`]): Raw payloads become typed
//!   [`RealtimeEvent`]s; each handler runs isolated from its siblings.
//!
//! - **[`InvariantChecker`]**: Dev-time warnings for duplicate handlers,
//!   subscription leaks, and ref-count drift. Never blocks delivery.

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod invariants;
pub mod model;
pub mod normalize;
pub mod pending;
pub mod registry;
pub mod resubscribe;
pub mod runtime;
pub mod scheduler;
pub mod snapshot;

// ── Primary re-exports ──────────────────────────────────────────────
pub use channel::{ChannelControl, ChannelControlManager, EnsureOutcome, GlobalChannelPatterns};
pub use config::RealtimeConfig;
pub use error::CoreError;
pub use invariants::{InvariantChecker, InvariantViolation};
pub use pending::PendingQueue;
pub use registry::SubscriptionRegistry;
pub use resubscribe::{ResubscribeCoordinator, StatusTransition};
pub use runtime::{
    ComponentScope, ConnectionState, Runtime, RuntimeBuilder, StateListenerHandle,
    SubscriptionHandle, SubscriptionRequest,
};
pub use scheduler::{ManualScheduler, Scheduler, TimerHandle, TokioScheduler};
pub use snapshot::{SnapshotFocus, SnapshotRegistry, SyncReport};

pub use model::{
    ChannelStats, ChannelType, CommandStatus, CommandStatusEvent, DomainEvent, EntityId,
    EntitySnapshot, EventCounters, EventHandler, HandlerError, HandlerId, InstanceId,
    RealtimeEvent, SnapshotHandler, SubscriptionId, SubscriptionKind, SubscriptionStats,
};
