#![allow(clippy::unwrap_used)]
// End-to-end tests for `Runtime` over the in-memory transport, driven by a
// manual clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use zonecast_api::{
    MemorySnapshotSource, MemoryTransport, RawSnapshot, SnapshotEnvelope, TransportSlot,
    TransportStatus,
};
use zonecast_core::model::{COMMAND_STATUS_UPDATED, EVENT_CREATED};
use zonecast_core::{
    CommandStatus, EntityId, EventHandler, InstanceId, ManualScheduler, RealtimeConfig,
    RealtimeEvent, Runtime, SubscriptionHandle, SubscriptionKind,
};

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    slot: Arc<TransportSlot>,
    memory: MemoryTransport,
    scheduler: ManualScheduler,
    snapshots: MemorySnapshotSource,
    rt: Runtime,
}

impl Harness {
    fn new() -> Self {
        let harness = Self::offline();
        harness.slot.install(Arc::new(harness.memory.clone()));
        harness
    }

    /// No transport installed yet.
    fn offline() -> Self {
        let slot = Arc::new(TransportSlot::new());
        let scheduler = ManualScheduler::new();
        let snapshots = MemorySnapshotSource::new();
        let rt = Runtime::builder(slot.clone())
            .config(RealtimeConfig {
                invariant_checks: Some(true),
                ..RealtimeConfig::default()
            })
            .scheduler(Arc::new(scheduler.clone()))
            .snapshot_source(Arc::new(snapshots.clone()))
            .build()
            .unwrap();
        Self {
            slot,
            memory: MemoryTransport::new(),
            scheduler,
            snapshots,
            rt,
        }
    }

    fn subscribe(
        &self,
        channel: &str,
        kind: SubscriptionKind,
        handler: EventHandler,
    ) -> SubscriptionHandle {
        self.rt
            .subscribe(channel, kind, handler, "ZonePanel", InstanceId::new())
    }

    fn publish(&self, channel: &str, event: &str, payload: &Value) -> usize {
        self.memory.publish(channel, event, payload)
    }

    fn connect_cycle(&self) {
        self.rt.handle_transport_status(TransportStatus::Disconnected);
        self.rt.handle_transport_status(TransportStatus::Connected);
    }
}

fn recorder() -> (Arc<Mutex<Vec<RealtimeEvent>>>, EventHandler) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let handler = EventHandler::infallible(move |event: &RealtimeEvent| {
        log.lock().unwrap().push(event.clone());
    });
    (seen, handler)
}

fn counter() -> (Arc<AtomicUsize>, EventHandler) {
    let hits = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&hits);
    let handler = EventHandler::infallible(move |_: &RealtimeEvent| {
        inner.fetch_add(1, Ordering::SeqCst);
    });
    (hits, handler)
}

fn snapshot(entity: u64, id: &str, server_ts: i64) -> SnapshotEnvelope {
    SnapshotEnvelope::ok(RawSnapshot {
        snapshot_id: Some(json!(id)),
        server_ts: Some(json!(server_ts)),
        entity_id: Some(json!(entity)),
        ..RawSnapshot::default()
    })
}

// ── Global channels ─────────────────────────────────────────────────

#[test]
fn global_ref_count_tracks_subscribers() {
    let h = Harness::new();
    let (_, first) = counter();
    let (_, second) = counter();

    let a = h.subscribe("events.global", SubscriptionKind::GlobalEvents, first);
    let b = h.subscribe("events.global", SubscriptionKind::GlobalEvents, second);

    let stats = h.rt.subscription_stats();
    let global = stats.channels.iter().find(|c| c.name == "events.global").unwrap();
    assert_eq!(global.ref_count, Some(2));
    assert_eq!(global.authorized, Some(true));
    assert!(global.live);
    assert!(h.rt.check_invariants().is_empty());

    assert!(a.unsubscribe());
    assert!(!a.unsubscribe());
    let stats = h.rt.subscription_stats();
    let global = stats.channels.iter().find(|c| c.name == "events.global").unwrap();
    assert_eq!(global.ref_count, Some(1));

    assert!(b.unsubscribe());
    let stats = h.rt.subscription_stats();
    let global = stats.channels.iter().find(|c| c.name == "events.global").unwrap();
    assert_eq!(global.ref_count, Some(0));
    assert_eq!(global.authorized, Some(false));
    assert!(!global.live);
    assert!(h.rt.check_invariants().is_empty());
}

#[test]
fn global_channel_is_shared_not_reopened() {
    let h = Harness::new();
    let (hits_a, a) = counter();
    let (hits_b, b) = counter();

    h.subscribe("events.global", SubscriptionKind::GlobalEvents, a);
    h.subscribe("events.global", SubscriptionKind::GlobalEvents, b);

    assert_eq!(h.memory.churn(), (1, 0));
    assert_eq!(h.memory.listener_count("events.global", EVENT_CREATED), 1);

    h.publish("events.global", EVENT_CREATED, &json!({ "id": "e1", "type": "zone.updated" }));
    assert_eq!(hits_a.load(Ordering::SeqCst), 1);
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);
}

// ── Dispatch ────────────────────────────────────────────────────────

#[test]
fn duplicate_handler_is_delivered_once_and_warned_once() {
    let h = Harness::new();
    let (hits, handler) = counter();

    h.subscribe("commands.10", SubscriptionKind::EntityEvents, handler.clone());
    h.subscribe("commands.10", SubscriptionKind::EntityEvents, handler.clone());
    h.subscribe("commands.10", SubscriptionKind::EntityEvents, handler);

    h.publish("commands.10", COMMAND_STATUS_UPDATED, &json!({ "id": 5, "status": "RUNNING" }));

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(h.rt.invariant_warnings(), 1);
    assert_eq!(h.rt.subscription_stats().active, 3);
}

#[test]
fn handler_failures_do_not_reach_siblings() {
    let h = Harness::new();
    let (hits, good) = counter();
    let panicky = EventHandler::infallible(|_: &RealtimeEvent| panic!("render bug"));
    let failing = EventHandler::new(|_: &RealtimeEvent| Err("bad state".into()));

    h.subscribe("commands.3", SubscriptionKind::EntityEvents, panicky);
    h.subscribe("commands.3", SubscriptionKind::EntityEvents, failing);
    h.subscribe("commands.3", SubscriptionKind::EntityEvents, good);

    h.publish("commands.3", COMMAND_STATUS_UPDATED, &json!({ "id": 1, "status": "DONE" }));
    h.publish("commands.3", COMMAND_STATUS_UPDATED, &json!({ "id": 2, "status": "DONE" }));

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    let events = h.rt.subscription_stats().events;
    assert_eq!(events.received, 2);
    assert_eq!(events.delivered, 2);
    assert_eq!(events.handler_failures, 4);
}

#[test]
fn malformed_events_are_dropped_and_unknown_status_delivered() {
    let h = Harness::new();
    let (seen, handler) = recorder();
    h.subscribe("commands.7", SubscriptionKind::EntityEvents, handler);

    h.publish("commands.7", COMMAND_STATUS_UPDATED, &json!({ "status": "DONE" }));
    h.publish("commands.7", COMMAND_STATUS_UPDATED, &json!("not an object"));
    h.publish("commands.7", COMMAND_STATUS_UPDATED, &json!({ "id": 9, "status": "PARKED" }));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    match &seen[0] {
        RealtimeEvent::CommandStatus(event) => {
            assert_eq!(event.command_id, "9");
            assert_eq!(event.status, CommandStatus::Unknown);
            assert_eq!(event.raw_status.as_deref(), Some("PARKED"));
            assert_eq!(event.entity_id, Some(EntityId(7)));
        }
        other => panic!("expected command status, got {other:?}"),
    }
    assert_eq!(h.rt.subscription_stats().events.dropped, 2);
}

// ── Staleness ───────────────────────────────────────────────────────

#[tokio::test]
async fn events_older_than_snapshot_are_dropped() {
    let h = Harness::new();
    h.snapshots.insert(10, snapshot(10, "s1", 2000));
    let (seen, handler) = recorder();
    h.subscribe("commands.10", SubscriptionKind::EntityEvents, handler);

    h.rt.fetch_and_apply_snapshot(EntityId(10)).await.unwrap();

    for ts in [1999, 2000, 2001] {
        h.publish(
            "commands.10",
            COMMAND_STATUS_UPDATED,
            &json!({ "id": ts, "status": "DONE", "server_ts": ts }),
        );
    }

    let delivered: Vec<Option<i64>> = seen
        .lock()
        .unwrap()
        .iter()
        .map(RealtimeEvent::server_ts)
        .collect();
    assert_eq!(delivered, vec![Some(2000), Some(2001)]);
    assert_eq!(h.rt.subscription_stats().events.stale, 1);
    assert!(h.rt.is_stale_event(Some(EntityId(10)), Some(1999)));
    assert!(!h.rt.is_stale_event(Some(EntityId(11)), Some(1)));
    assert!(!h.rt.is_stale_event(Some(EntityId(10)), None));
}

#[tokio::test]
async fn focus_switch_discards_late_snapshot() {
    let h = Harness::new();
    h.snapshots.insert(10, snapshot(10, "ten", 100));
    h.snapshots.insert(11, snapshot(11, "eleven", 200));
    let gate = h.snapshots.hold(10);
    let focus = Arc::new(h.rt.snapshot_focus());

    let slow = tokio::spawn({
        let focus = Arc::clone(&focus);
        async move { focus.focus(EntityId(10)).await }
    });
    while h.snapshots.fetch_count(10) == 0 {
        tokio::task::yield_now().await;
    }

    let fast = focus.focus(EntityId(11)).await.unwrap().unwrap();
    assert_eq!(fast.snapshot_id, "eleven");

    gate.notify_one();
    let late = slow.await.unwrap().unwrap();
    assert!(late.is_none());

    assert_eq!(focus.focused(), Some(EntityId(11)));
    assert_eq!(focus.current().unwrap().snapshot_id, "eleven");
    // The late snapshot is still stored, just not published.
    assert!(h.rt.snapshots().get(EntityId(10)).is_some());
}

#[test]
fn global_ref_count_ignores_entity_subscribers() {
    let h = Harness::new();
    h.rt.handle_transport_status(TransportStatus::Connected);
    let (_, feed_handler) = counter();
    let (_, panel_handler) = counter();

    let feed = h.subscribe("events.global", SubscriptionKind::GlobalEvents, feed_handler);
    let _panel = h.subscribe("events.global", SubscriptionKind::EntityEvents, panel_handler);

    let stats = h.rt.subscription_stats();
    let global = stats.channels.iter().find(|c| c.name == "events.global").unwrap();
    assert_eq!(global.ref_count, Some(1));
    assert_eq!(global.subscribers, 2);
    assert!(h.rt.check_invariants().is_empty());

    assert!(feed.unsubscribe());
    let stats = h.rt.subscription_stats();
    let global = stats.channels.iter().find(|c| c.name == "events.global").unwrap();
    assert_eq!(global.ref_count, Some(0));
    assert_eq!(global.authorized, Some(true));
    assert!(global.live);
    assert!(h.rt.check_invariants().is_empty());

    // still bound, so a rebuild re-attaches it despite ref 0
    h.connect_cycle();
    h.scheduler.advance(Duration::from_millis(500));
    let stats = h.rt.subscription_stats();
    let global = stats.channels.iter().find(|c| c.name == "events.global").unwrap();
    assert_eq!(global.authorized, Some(true));
    assert!(global.live);
}

// ── Reconnect ───────────────────────────────────────────────────────

#[test]
fn rapid_reconnects_rebuild_once() {
    let h = Harness::new();
    let (hits, handler) = counter();
    h.rt.handle_transport_status(TransportStatus::Connected);
    h.subscribe("commands.10", SubscriptionKind::EntityEvents, handler);

    h.memory.drop_all_bindings();
    assert_eq!(h.publish("commands.10", COMMAND_STATUS_UPDATED, &json!({ "id": 1 })), 0);

    h.connect_cycle();
    h.scheduler.advance(Duration::from_millis(200));
    h.connect_cycle();

    h.scheduler.advance(Duration::from_millis(499));
    assert_eq!(h.rt.resubscribe_runs(), 0);
    h.scheduler.advance(Duration::from_millis(1));
    assert_eq!(h.rt.resubscribe_runs(), 1);
    h.scheduler.advance(Duration::from_secs(5));
    assert_eq!(h.rt.resubscribe_runs(), 1);

    h.publish("commands.10", COMMAND_STATUS_UPDATED, &json!({ "id": 2 }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn rebuild_binds_to_newly_installed_transport() {
    let h = Harness::new();
    let (hits, handler) = counter();
    h.rt.handle_transport_status(TransportStatus::Connected);
    h.subscribe("commands.4", SubscriptionKind::EntityEvents, handler);

    let replacement = MemoryTransport::new();
    h.slot.install(Arc::new(replacement.clone()));
    h.connect_cycle();
    h.scheduler.advance(Duration::from_millis(500));

    assert_eq!(replacement.publish("commands.4", COMMAND_STATUS_UPDATED, &json!({ "id": 1 })), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let stats = h.rt.subscription_stats();
    assert!(stats.channels.iter().all(|c| c.live));
}

#[tokio::test]
async fn reconnect_resyncs_active_snapshots() {
    let h = Harness::new();
    h.snapshots.insert(10, snapshot(10, "s1", 50));
    let (_, handler) = counter();
    h.rt.handle_transport_status(TransportStatus::Connected);
    h.subscribe("commands.10", SubscriptionKind::EntityEvents, handler);

    h.connect_cycle();
    h.scheduler.advance(Duration::from_millis(500));
    h.rt.wait_idle().await;

    assert_eq!(h.snapshots.fetch_count(10), 1);
    assert_eq!(h.rt.snapshots().get(EntityId(10)).unwrap().server_ts, Some(50));
}

// ── Liveness ────────────────────────────────────────────────────────

#[test]
fn silently_dropped_bindings_are_reattached_on_subscribe() {
    let h = Harness::new();
    let (hits_a, a) = counter();
    let (hits_b, b) = counter();

    h.subscribe("commands.12", SubscriptionKind::EntityEvents, a);
    h.memory.drop_all_bindings();
    assert!(!h.rt.subscription_stats().channels[0].live);

    h.subscribe("commands.12", SubscriptionKind::EntityEvents, b);
    assert!(h.rt.subscription_stats().channels[0].live);

    h.publish("commands.12", COMMAND_STATUS_UPDATED, &json!({ "id": 1 }));
    assert_eq!(hits_a.load(Ordering::SeqCst), 1);
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);
    assert_eq!(h.memory.listener_count("commands.12", COMMAND_STATUS_UPDATED), 1);
}

#[test]
fn last_unsubscribe_leaves_entity_channel() {
    let h = Harness::new();
    let (_, a) = counter();
    let (_, b) = counter();

    let first = h.subscribe("commands.20", SubscriptionKind::EntityEvents, a);
    let second = h.subscribe("commands.20", SubscriptionKind::EntityEvents, b);
    assert_eq!(h.memory.open_channels(), vec!["private-commands.20".to_owned()]);

    first.unsubscribe();
    assert_eq!(h.memory.open_channels().len(), 1);
    second.unsubscribe();
    assert!(h.memory.open_channels().is_empty());
    assert!(h.rt.subscription_stats().channels.is_empty());
}

// ── Pending queue ───────────────────────────────────────────────────

#[test]
fn pending_subscription_promotes_on_first_connect() {
    let h = Harness::offline();
    let (hits, handler) = counter();
    let handle = h.subscribe("commands.10", SubscriptionKind::EntityEvents, handler);
    assert!(handle.is_pending());
    assert_eq!(h.rt.subscription_stats().pending, 1);

    // Retry and poll both find no transport; the poll loop stops itself.
    h.scheduler.advance(Duration::from_millis(300));
    assert_eq!(h.scheduler.pending_timers(), 0);
    assert!(handle.is_pending());

    h.slot.install(Arc::new(h.memory.clone()));
    h.rt.handle_transport_status(TransportStatus::Connected);
    assert!(!handle.is_pending());
    assert!(handle.is_active());

    h.publish("commands.10", COMMAND_STATUS_UPDATED, &json!({ "id": 1 }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn pending_queue_drains_in_order_once_transport_appears() {
    let h = Harness::offline();
    let (seen, handler) = recorder();
    let handles: Vec<_> = (1..=3)
        .map(|n| {
            h.subscribe(
                &format!("commands.{n}"),
                SubscriptionKind::EntityEvents,
                handler.clone(),
            )
        })
        .collect();

    h.slot.install(Arc::new(h.memory.clone()));
    h.scheduler.advance(Duration::from_millis(100));

    assert!(handles.iter().all(|handle| !handle.is_pending()));
    assert_eq!(h.scheduler.pending_timers(), 0);
    for n in 1..=3 {
        h.publish(&format!("commands.{n}"), COMMAND_STATUS_UPDATED, &json!({ "id": n }));
    }
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[test]
fn poll_keeps_waiting_for_late_transport() {
    let h = Harness::offline();
    let (hits, handler) = counter();
    let handle = h.subscribe("commands.10", SubscriptionKind::EntityEvents, handler);

    // retry at 100ms and first poll tick at 250ms both find no transport
    h.scheduler.advance(Duration::from_millis(300));
    assert!(handle.is_pending());
    assert_eq!(h.scheduler.pending_timers(), 1);

    h.slot.install(Arc::new(h.memory.clone()));
    h.scheduler.advance(Duration::from_millis(250));

    assert!(!handle.is_pending());
    assert_eq!(h.scheduler.pending_timers(), 0);
    h.publish("commands.10", COMMAND_STATUS_UPDATED, &json!({ "id": 1 }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn poll_stops_when_seen_transport_goes_away() {
    let h = Harness::new();
    let (hits, handler) = counter();
    h.memory.reject_next("commands.10");
    let handle = h.subscribe("commands.10", SubscriptionKind::EntityEvents, handler);
    assert!(handle.is_pending());

    h.memory.reject_next("commands.10");
    h.scheduler.advance(Duration::from_millis(100));
    h.memory.reject_next("commands.10");
    h.scheduler.advance(Duration::from_millis(150));
    assert!(handle.is_pending());
    assert_eq!(h.scheduler.pending_timers(), 1);

    h.slot.clear();
    h.scheduler.advance(Duration::from_millis(250));
    assert!(handle.is_pending());
    assert_eq!(h.scheduler.pending_timers(), 0);

    h.slot.install(Arc::new(h.memory.clone()));
    h.rt.handle_transport_status(TransportStatus::Connected);
    assert!(!handle.is_pending());
    h.publish("commands.10", COMMAND_STATUS_UPDATED, &json!({ "id": 1 }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn cancelling_pending_subscription_stops_timers() {
    let h = Harness::offline();
    let (_, handler) = counter();
    let handle = h.subscribe("commands.10", SubscriptionKind::EntityEvents, handler);
    assert_eq!(h.scheduler.pending_timers(), 2);

    assert!(handle.unsubscribe());
    assert_eq!(h.scheduler.pending_timers(), 0);
    assert_eq!(h.rt.subscription_stats().pending, 0);
}

#[test]
fn rejected_channel_stays_queued_until_retry_succeeds() {
    let h = Harness::new();
    h.memory.reject_next("commands.30");
    let (hits, handler) = counter();

    let handle = h.subscribe("commands.30", SubscriptionKind::EntityEvents, handler);
    assert!(handle.is_pending());

    h.scheduler.advance(Duration::from_millis(100));
    assert!(!handle.is_pending());
    h.publish("commands.30", COMMAND_STATUS_UPDATED, &json!({ "id": 1 }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ── Component scope ─────────────────────────────────────────────────

#[test]
fn dropping_scope_removes_active_and_pending() {
    let h = Harness::new();
    let scope = h.rt.scope("ZoneDetail");
    let (hits, handler) = counter();

    scope.subscribe("commands.10", SubscriptionKind::EntityEvents, handler.clone());
    scope.subscribe("events.global", SubscriptionKind::GlobalEvents, handler.clone());
    h.memory.reject_next("commands.11");
    let queued = scope.subscribe("commands.11", SubscriptionKind::EntityEvents, handler);
    assert!(queued.is_pending());

    let other = h.rt.scope("Sidebar");
    let (_, keep) = counter();
    other.subscribe("events.global", SubscriptionKind::GlobalEvents, keep);

    drop(scope);

    let stats = h.rt.subscription_stats();
    assert_eq!(stats.active, 1);
    assert_eq!(stats.pending, 0);
    let global = stats.channels.iter().find(|c| c.name == "events.global").unwrap();
    assert_eq!(global.ref_count, Some(1));
    assert!(h.rt.check_invariants().is_empty());

    h.publish("commands.10", COMMAND_STATUS_UPDATED, &json!({ "id": 1 }));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn connection_state_stream_starts_with_current_state() {
    use tokio_stream::StreamExt;

    let h = Harness::new();
    let mut states = h.rt.connection_state_stream();
    assert_eq!(states.next().await, Some(TransportStatus::Disconnected));

    h.rt.handle_transport_status(TransportStatus::Connected);
    assert_eq!(states.next().await, Some(TransportStatus::Connected));
}

// ── Shutdown ────────────────────────────────────────────────────────

#[test]
fn subscribe_after_shutdown_is_inert() {
    let h = Harness::new();
    h.rt.shutdown();

    let (hits, handler) = counter();
    let handle = h.subscribe("commands.1", SubscriptionKind::EntityEvents, handler);
    assert!(!handle.is_active());
    assert_eq!(h.publish("commands.1", COMMAND_STATUS_UPDATED, &json!({ "id": 1 })), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
