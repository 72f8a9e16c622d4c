// ── Pending subscription queue ──
//
// Subscribe requests that could not be bound yet (no transport, or channel
// creation failed) wait here in arrival order. The runtime drains the
// queue from a short retry timer and a poll loop; this type only owns the
// entries and the timer handles.

use indexmap::IndexMap;
use tracing::debug;

use crate::model::{InstanceId, PendingSubscription, SubscriptionId};
use crate::scheduler::TimerHandle;

#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: IndexMap<SubscriptionId, PendingSubscription>,
    retry: Option<TimerHandle>,
    poll: Option<TimerHandle>,
    /// Whether the last poll tick found a transport.
    transport_seen: bool,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&PendingSubscription> {
        self.entries.get(&id)
    }

    /// Ids in arrival order.
    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingSubscription> {
        self.entries.values()
    }

    pub fn enqueue(&mut self, entry: PendingSubscription) {
        debug!(
            subscription = %entry.id,
            channel = %entry.channel_name,
            queued = self.entries.len() + 1,
            "subscription queued"
        );
        self.entries.insert(entry.id, entry);
    }

    /// Remove an entry for promotion.
    pub fn take(&mut self, id: SubscriptionId) -> Option<PendingSubscription> {
        self.entries.shift_remove(&id)
    }

    /// Cancel a queued request. Returns whether it was queued.
    pub fn cancel(&mut self, id: SubscriptionId) -> bool {
        let removed = self.entries.shift_remove(&id).is_some();
        if removed {
            debug!(subscription = %id, "pending subscription cancelled");
        }
        if self.entries.is_empty() {
            self.stop_timers();
        }
        removed
    }

    /// Cancel every request owned by `instance`.
    pub fn cancel_instance(&mut self, instance: InstanceId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.instance_id != instance);
        if self.entries.is_empty() {
            self.stop_timers();
        }
        before - self.entries.len()
    }

    // ── Timers ───────────────────────────────────────────────────────

    pub fn retry_scheduled(&self) -> bool {
        self.retry.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    pub fn poll_running(&self) -> bool {
        self.poll.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    pub(crate) fn set_retry(&mut self, timer: TimerHandle) {
        self.retry = Some(timer);
    }

    pub(crate) fn clear_retry(&mut self) {
        self.retry = None;
    }

    pub(crate) fn set_poll(&mut self, timer: TimerHandle) {
        self.poll = Some(timer);
    }

    /// Stop the poll loop (and any pending retry).
    pub fn stop_timers(&mut self) {
        if self.poll.take().is_some() {
            debug!("pending poll loop stopped");
        }
        self.retry = None;
    }

    /// Record whether a transport is available on this poll tick. Returns
    /// `true` when a transport seen on an earlier tick has gone away.
    pub fn observe_transport(&mut self, present: bool) -> bool {
        let lost = self.transport_seen && !present;
        self.transport_seen = present;
        lost
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.stop_timers();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{ChannelType, EventHandler, SubscriptionKind};

    fn entry(id: u64, instance: InstanceId) -> PendingSubscription {
        PendingSubscription {
            id: SubscriptionId(id),
            channel_name: format!("commands.{id}"),
            kind: SubscriptionKind::EntityEvents,
            channel_type: ChannelType::Private,
            handler: EventHandler::infallible(|_| {}),
            component_tag: Arc::from("Panel"),
            instance_id: instance,
        }
    }

    #[test]
    fn keeps_arrival_order() {
        let mut queue = PendingQueue::new();
        let instance = InstanceId::new();
        queue.enqueue(entry(3, instance));
        queue.enqueue(entry(1, instance));
        queue.enqueue(entry(2, instance));
        assert_eq!(
            queue.ids(),
            vec![SubscriptionId(3), SubscriptionId(1), SubscriptionId(2)]
        );
    }

    #[test]
    fn take_keeps_id_for_promotion() {
        let mut queue = PendingQueue::new();
        queue.enqueue(entry(5, InstanceId::new()));
        let active = queue.take(SubscriptionId(5)).map(PendingSubscription::into_active);
        assert_eq!(active.map(|a| a.id), Some(SubscriptionId(5)));
        assert!(queue.is_empty());
    }

    #[test]
    fn cancel_by_id_and_instance() {
        let mut queue = PendingQueue::new();
        let a = InstanceId::new();
        let b = InstanceId::new();
        queue.enqueue(entry(1, a));
        queue.enqueue(entry(2, a));
        queue.enqueue(entry(3, b));

        assert!(queue.cancel(SubscriptionId(3)));
        assert!(!queue.cancel(SubscriptionId(3)));
        assert_eq!(queue.cancel_instance(a), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn transport_loss_only_after_one_was_seen() {
        let mut queue = PendingQueue::new();
        assert!(!queue.observe_transport(false));
        assert!(!queue.observe_transport(false));
        assert!(!queue.observe_transport(true));
        assert!(queue.observe_transport(false));
        assert!(!queue.observe_transport(false));
    }
}
