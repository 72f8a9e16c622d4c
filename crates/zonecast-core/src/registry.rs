// ── Subscription Lifecycle Registry ──
//
// Maps logical subscriptions onto channels. Tracks, per channel, the
// ordered subscriber list (delivery order is subscription order) and, per
// component instance, how many subscriptions it holds on each channel. The
// last subscriber leaving a channel detaches it.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use tracing::debug;

use crate::channel::ChannelControlManager;
use crate::dispatch::HandlerTarget;
use crate::invariants::InvariantChecker;
use crate::model::{
    ActiveSubscription, ChannelType, EntityId, InstanceId, SubscriptionId, SubscriptionKind,
};
use crate::normalize::entity_id_from_channel;

/// Owner of every active subscription.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<SubscriptionId, ActiveSubscription>,
    by_channel: IndexMap<String, Vec<SubscriptionId>>,
    instance_usage: HashMap<InstanceId, HashMap<String, usize>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&ActiveSubscription> {
        self.subscriptions.get(&id)
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    /// Subscriptions on `channel`, in subscription order.
    pub fn subscribers(&self, channel: &str) -> impl Iterator<Item = &ActiveSubscription> {
        self.by_channel
            .get(channel)
            .into_iter()
            .flatten()
            .filter_map(|id| self.subscriptions.get(id))
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.by_channel.get(channel).map_or(0, Vec::len)
    }

    /// GlobalEvents subscriptions on `channel`.
    pub fn global_events_count(&self, channel: &str) -> usize {
        self.subscribers(channel)
            .filter(|sub| sub.kind == SubscriptionKind::GlobalEvents)
            .count()
    }

    /// Channels with at least one subscriber, in first-subscribed order.
    pub fn channels(&self) -> impl Iterator<Item = (&str, usize)> {
        self.by_channel.iter().map(|(name, ids)| (name.as_str(), ids.len()))
    }

    /// Per-channel subscription counts held by `instance`.
    pub fn instance_usage(&self, instance: InstanceId) -> Option<&HashMap<String, usize>> {
        self.instance_usage.get(&instance)
    }

    /// Handlers that should see `event_name` on `channel`, in delivery order.
    pub fn targets_for(&self, channel: &str, event_name: &str) -> Vec<HandlerTarget> {
        self.subscribers(channel)
            .filter(|sub| sub.kind.handles(event_name))
            .map(HandlerTarget::from)
            .collect()
    }

    /// Distinct entity ids referenced by entity-event subscriptions.
    pub fn active_entity_ids(&self) -> Vec<EntityId> {
        let ids: BTreeSet<EntityId> = self
            .subscriptions
            .values()
            .filter(|sub| sub.kind == SubscriptionKind::EntityEvents)
            .filter_map(|sub| entity_id_from_channel(&sub.channel_name))
            .collect();
        ids.into_iter().collect()
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Record `sub` against its channel.
    ///
    /// The channel control must already have been ensured. Global channels
    /// count every binding and bump their ref count for GlobalEvents only;
    /// the invariant checker sees every registration.
    pub fn add_subscription(
        &mut self,
        sub: ActiveSubscription,
        channel_type: ChannelType,
        channels: &mut ChannelControlManager,
        invariants: &mut InvariantChecker,
    ) {
        let channel = sub.channel_name.clone();
        if channels.is_global(&channel) {
            let refs = channels.retain_global(&channel, sub.kind, channel_type);
            debug!(channel = %channel, refs, "global channel retained");
        }

        invariants.register_subscription(
            &channel,
            sub.kind.event_names(),
            sub.handler.id(),
            &sub.component_tag,
        );

        *self
            .instance_usage
            .entry(sub.instance_id)
            .or_default()
            .entry(channel.clone())
            .or_insert(0) += 1;
        self.by_channel.entry(channel.clone()).or_default().push(sub.id);

        debug!(
            subscription = %sub.id,
            channel = %channel,
            component = %sub.component_tag,
            subscribers = self.subscriber_count(&channel),
            "subscription added"
        );
        self.subscriptions.insert(sub.id, sub);
    }

    /// Remove subscription `id`. Detaches the channel when it was the last
    /// subscriber: global entries survive at ref 0 and unauthorized,
    /// per-entity controls are discarded.
    pub fn remove_subscription(
        &mut self,
        id: SubscriptionId,
        channels: &mut ChannelControlManager,
        invariants: &mut InvariantChecker,
    ) -> Option<ActiveSubscription> {
        let sub = self.subscriptions.remove(&id)?;
        let channel = sub.channel_name.as_str();

        invariants.unregister_subscription(channel, sub.kind.event_names(), sub.handler.id());

        if let Some(usage) = self.instance_usage.get_mut(&sub.instance_id) {
            if let Some(count) = usage.get_mut(channel) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    usage.remove(channel);
                }
            }
            if usage.is_empty() {
                self.instance_usage.remove(&sub.instance_id);
            }
        }

        let remaining = match self.by_channel.get_mut(channel) {
            Some(ids) => {
                ids.retain(|other| *other != id);
                ids.len()
            }
            None => 0,
        };

        if channels.is_global(channel) {
            channels.release_global(channel, sub.kind);
        }
        if remaining == 0 {
            self.by_channel.shift_remove(channel);
            channels.detach_channel(channel, true);
        }

        debug!(subscription = %id, channel = %channel, remaining, "subscription removed");
        Some(sub)
    }

    /// Remove every subscription owned by `instance`, one at a time.
    pub fn remove_subscriptions_by_instance(
        &mut self,
        instance: InstanceId,
        channels: &mut ChannelControlManager,
        invariants: &mut InvariantChecker,
    ) -> Vec<ActiveSubscription> {
        let mut ids: Vec<SubscriptionId> = self
            .subscriptions
            .values()
            .filter(|sub| sub.instance_id == instance)
            .map(|sub| sub.id)
            .collect();
        ids.sort_unstable();

        ids.into_iter()
            .filter_map(|id| self.remove_subscription(id, channels, invariants))
            .collect()
    }

    /// Forget everything without touching channels.
    pub(crate) fn clear(&mut self) {
        self.subscriptions.clear();
        self.by_channel.clear();
        self.instance_usage.clear();
    }
}
