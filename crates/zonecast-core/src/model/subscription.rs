use std::sync::Arc;

use serde::Serialize;

use super::{ChannelType, EventHandler, InstanceId, SubscriptionId, SubscriptionKind};

/// A subscription bound to a live (or being rebuilt) channel.
#[derive(Debug, Clone)]
pub struct ActiveSubscription {
    pub id: SubscriptionId,
    pub channel_name: String,
    pub kind: SubscriptionKind,
    pub handler: EventHandler,
    pub component_tag: Arc<str>,
    pub instance_id: InstanceId,
}

/// A subscribe request waiting for the transport.
#[derive(Debug, Clone)]
pub struct PendingSubscription {
    pub id: SubscriptionId,
    pub channel_name: String,
    pub kind: SubscriptionKind,
    pub channel_type: ChannelType,
    pub handler: EventHandler,
    pub component_tag: Arc<str>,
    pub instance_id: InstanceId,
}

impl PendingSubscription {
    /// Promote to an active subscription, keeping the id.
    pub fn into_active(self) -> ActiveSubscription {
        ActiveSubscription {
            id: self.id,
            channel_name: self.channel_name,
            kind: self.kind,
            handler: self.handler,
            component_tag: self.component_tag,
            instance_id: self.instance_id,
        }
    }
}

/// Point-in-time view of one channel, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub name: String,
    pub kind: SubscriptionKind,
    pub global: bool,
    pub subscribers: usize,
    pub live: bool,
    /// Global channels only.
    pub ref_count: Option<usize>,
    /// Global channels only.
    pub authorized: Option<bool>,
}

/// Inbound event counters since the runtime started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounters {
    /// Raw payloads that reached at least one subscriber's channel.
    pub received: u64,
    /// Successful handler invocations.
    pub delivered: u64,
    /// Events dropped as older than the entity's snapshot.
    pub stale: u64,
    /// Payloads that could not be normalized.
    pub dropped: u64,
    pub handler_failures: u64,
}

/// Aggregate counters returned by [`Runtime::subscription_stats`](crate::Runtime::subscription_stats).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    pub active: usize,
    pub pending: usize,
    pub channels: Vec<ChannelStats>,
    pub snapshots: usize,
    pub resubscribe_runs: u64,
    pub events: EventCounters,
}
