// ── Domain model ──

mod event;
mod handler;
mod ids;
mod snapshot;
mod subscription;

pub use event::{
    COMMAND_FAILED, COMMAND_STATUS_UPDATED, ChannelType, CommandStatus, CommandStatusEvent,
    DomainEvent, EVENT_CREATED, RealtimeEvent, SubscriptionKind,
};
pub use handler::{EventHandler, HandlerError, SnapshotHandler};
pub(crate) use ids::SubscriptionIdGen;
pub use ids::{EntityId, HandlerId, InstanceId, SubscriptionId};
pub use snapshot::EntitySnapshot;
pub use subscription::{
    ActiveSubscription, ChannelStats, EventCounters, PendingSubscription, SubscriptionStats,
};
