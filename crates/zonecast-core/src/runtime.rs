// ── Realtime runtime ──
//
// The facade UI code talks to. Owns the channel manager, subscription
// registry, pending queue, and invariant checker behind one mutex, plus the
// snapshot registry and the resubscribe coordinator. Transport callbacks
// hold a `Weak` reference, so a dropped runtime never sees another event.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use indexmap::IndexMap;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};
use zonecast_api::{SnapshotSource, TransportAccessor, TransportRef, TransportStatus};

use crate::channel::{
    ChannelControl, ChannelControlManager, GlobalChannelEntry, GlobalChannelPatterns,
    ListenerFactory,
};
use crate::config::RealtimeConfig;
use crate::dispatch::{deliver, panic_message};
use crate::error::CoreError;
use crate::invariants::{InvariantChecker, InvariantViolation};
use crate::model::{
    ActiveSubscription, ChannelStats, ChannelType, EntityId, EntitySnapshot, EventCounters,
    EventHandler, InstanceId, PendingSubscription, SnapshotHandler, SubscriptionId,
    SubscriptionIdGen, SubscriptionKind, SubscriptionStats,
};
use crate::normalize::{extract_server_ts, normalize_event, resolve_entity_id};
use crate::pending::PendingQueue;
use crate::registry::SubscriptionRegistry;
use crate::resubscribe::{ResubscribeCoordinator, StatusTransition};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::snapshot::{SnapshotFocus, SnapshotRegistry, SyncReport};

/// Connection state as observed by the runtime.
pub type ConnectionState = TransportStatus;

type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

// ── SubscriptionRequest ──────────────────────────────────────────

/// Everything needed to subscribe, with defaults for the optional parts.
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub channel: String,
    pub kind: SubscriptionKind,
    pub channel_type: ChannelType,
    pub handler: EventHandler,
    pub component_tag: Arc<str>,
    pub instance_id: InstanceId,
}

impl SubscriptionRequest {
    pub fn new(channel: impl Into<String>, kind: SubscriptionKind, handler: EventHandler) -> Self {
        Self {
            channel: channel.into(),
            kind,
            channel_type: kind.default_channel_type(),
            handler,
            component_tag: Arc::from("anonymous"),
            instance_id: InstanceId::new(),
        }
    }

    pub fn channel_type(mut self, channel_type: ChannelType) -> Self {
        self.channel_type = channel_type;
        self
    }

    pub fn component(mut self, tag: &str, instance_id: InstanceId) -> Self {
        self.component_tag = Arc::from(tag);
        self.instance_id = instance_id;
        self
    }
}

// ── Runtime ──────────────────────────────────────────────────────

/// The realtime subscription runtime.
///
/// Cheaply cloneable via `Arc<RuntimeInner>`.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeState {
    channels: ChannelControlManager,
    registry: SubscriptionRegistry,
    pending: PendingQueue,
    invariants: InvariantChecker,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    delivered: AtomicU64,
    stale: AtomicU64,
    dropped: AtomicU64,
    handler_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> EventCounters {
        EventCounters {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

struct RuntimeInner {
    config: RealtimeConfig,
    transport: Arc<dyn TransportAccessor>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<RuntimeState>,
    snapshots: Arc<SnapshotRegistry>,
    coordinator: ResubscribeCoordinator,
    ids: SubscriptionIdGen,
    connection_state: watch::Sender<ConnectionState>,
    state_listeners: Mutex<IndexMap<u64, StateListener>>,
    next_listener: AtomicU64,
    counters: Counters,
    /// Background work (snapshot re-syncs) spawned by the runtime.
    tasks: TaskTracker,
    cancel: CancellationToken,
    shut_down: AtomicBool,
}

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    config: RealtimeConfig,
    transport: Arc<dyn TransportAccessor>,
    scheduler: Option<Arc<dyn Scheduler>>,
    snapshot_source: Option<Arc<dyn SnapshotSource>>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: RealtimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn snapshot_source(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.snapshot_source = Some(source);
        self
    }

    /// Build the runtime. Without an explicit scheduler this needs to run
    /// inside a tokio runtime.
    pub fn build(self) -> Result<Runtime, CoreError> {
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TokioScheduler::current()?),
        };
        let config = self.config;
        let transport = self.transport;
        let snapshots = Arc::new(SnapshotRegistry::new(self.snapshot_source));
        let (connection_state, _) = watch::channel(TransportStatus::Disconnected);

        let inner = Arc::new_cyclic(|weak: &Weak<RuntimeInner>| {
            let channels = ChannelControlManager::new(
                GlobalChannelPatterns::new(&config.global_channels),
                config.global_registry_capacity,
                listener_factory(weak.clone()),
            );
            RuntimeInner {
                state: Mutex::new(RuntimeState {
                    channels,
                    registry: SubscriptionRegistry::new(),
                    pending: PendingQueue::new(),
                    invariants: InvariantChecker::new(
                        config.invariant_checks_enabled(),
                        config.leak_threshold,
                    ),
                }),
                coordinator: ResubscribeCoordinator::new(config.resubscribe_debounce),
                config,
                transport,
                scheduler,
                snapshots,
                ids: SubscriptionIdGen::default(),
                connection_state,
                state_listeners: Mutex::new(IndexMap::new()),
                next_listener: AtomicU64::new(1),
                counters: Counters::default(),
                tasks: TaskTracker::new(),
                cancel: CancellationToken::new(),
                shut_down: AtomicBool::new(false),
            }
        });

        debug!(
            invariant_checks = inner.config.invariant_checks_enabled(),
            snapshot_source = inner.snapshots.has_source(),
            "realtime runtime created"
        );
        Ok(Runtime { inner })
    }
}

fn widen(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Transport callbacks route back into the runtime through a weak handle.
fn listener_factory(weak: Weak<RuntimeInner>) -> ListenerFactory {
    Arc::new(move |channel: &str, event: &str| {
        let weak = weak.clone();
        let channel = channel.to_owned();
        let event = event.to_owned();
        Arc::new(move |payload: &serde_json::Value| {
            if let Some(inner) = weak.upgrade() {
                inner.on_raw_event(&channel, &event, payload);
            }
        })
    })
}

impl Runtime {
    pub fn builder(transport: Arc<dyn TransportAccessor>) -> RuntimeBuilder {
        RuntimeBuilder {
            config: RealtimeConfig::default(),
            transport,
            scheduler: None,
            snapshot_source: None,
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Subscribe `handler` to `channel`.
    ///
    /// Never fails: if the transport is missing or the channel cannot be
    /// created yet, the request is queued and retried.
    pub fn subscribe(
        &self,
        channel: &str,
        kind: SubscriptionKind,
        handler: EventHandler,
        component_tag: &str,
        instance_id: InstanceId,
    ) -> SubscriptionHandle {
        self.subscribe_with(
            SubscriptionRequest::new(channel, kind, handler).component(component_tag, instance_id),
        )
    }

    pub fn subscribe_with(&self, request: SubscriptionRequest) -> SubscriptionHandle {
        self.inner.subscribe(request)
    }

    /// Remove one subscription (active or still queued).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    /// A component-lifetime scope; dropping it tears down every
    /// subscription made through it.
    pub fn scope(&self, component_tag: &str) -> ComponentScope {
        ComponentScope {
            runtime: Arc::downgrade(&self.inner),
            tag: Arc::from(component_tag),
            instance_id: InstanceId::new(),
        }
    }

    /// Remove every subscription (active and queued) owned by `instance`.
    pub fn remove_subscriptions_by_instance(&self, instance: InstanceId) -> usize {
        self.inner.remove_subscriptions_by_instance(instance)
    }

    // ── Connection state ─────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Connection states as a `Stream`, starting with the current one.
    pub fn connection_state_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.inner.connection_state.subscribe())
    }

    /// Call `listener` on every connection state change. Listener panics are
    /// contained.
    pub fn on_connection_state_change<F>(&self, listener: F) -> StateListenerHandle
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .state_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(listener));
        StateListenerHandle {
            id,
            runtime: Arc::downgrade(&self.inner),
        }
    }

    /// Feed one transport status report into the runtime.
    pub fn handle_transport_status(&self, status: TransportStatus) {
        self.inner.handle_transport_status(status);
    }

    /// Follow a transport status channel until shutdown.
    pub fn attach_status_source(
        &self,
        mut source: watch::Receiver<TransportStatus>,
    ) -> Result<(), CoreError> {
        let handle = Handle::try_current().map_err(|e| CoreError::NoAsyncRuntime(e.to_string()))?;
        let initial = *source.borrow_and_update();
        self.inner.handle_transport_status(initial);

        let weak = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.child_token();
        handle.spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    changed = source.changed() => {
                        if changed.is_err() {
                            debug!("transport status source closed");
                            break;
                        }
                        let status = *source.borrow_and_update();
                        let Some(inner) = weak.upgrade() else { break };
                        inner.handle_transport_status(status);
                    }
                }
            }
        });
        Ok(())
    }

    // ── Snapshots ────────────────────────────────────────────────

    pub fn snapshots(&self) -> &Arc<SnapshotRegistry> {
        &self.inner.snapshots
    }

    pub fn register_snapshot_handler(&self, entity_id: EntityId, handler: SnapshotHandler) {
        self.inner.snapshots.register_handler(entity_id, handler);
    }

    pub async fn fetch_and_apply_snapshot(
        &self,
        entity_id: EntityId,
    ) -> Result<Arc<EntitySnapshot>, CoreError> {
        self.inner.snapshots.fetch_and_apply_snapshot(entity_id).await
    }

    /// Re-fetch snapshots for every entity with a live entity subscription.
    pub async fn sync_active_zone_snapshots(&self) -> SyncReport {
        self.inner.sync_active_zone_snapshots().await
    }

    pub fn is_stale_event(&self, entity_id: Option<EntityId>, server_ts: Option<i64>) -> bool {
        self.inner.snapshots.is_stale_event(entity_id, server_ts)
    }

    /// A focus tracker bound to this runtime's snapshot registry.
    pub fn snapshot_focus(&self) -> SnapshotFocus {
        SnapshotFocus::new(Arc::clone(&self.inner.snapshots))
    }

    // ── Diagnostics ──────────────────────────────────────────────

    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.inner.subscription_stats()
    }

    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        self.inner.check_invariants()
    }

    /// Number of distinct invariant warnings emitted so far.
    pub fn invariant_warnings(&self) -> usize {
        self.inner.lock_state().invariants.warning_count()
    }

    pub fn resubscribe_runs(&self) -> u64 {
        self.inner.coordinator.runs()
    }

    /// Wait for background work spawned so far (snapshot re-syncs).
    pub async fn wait_idle(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Release every channel, drop all subscriptions and pending requests,
    /// and stop timers and background tasks. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}

// ── RuntimeInner ─────────────────────────────────────────────────

impl RuntimeInner {
    fn lock_state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_transport(&self) -> Option<TransportRef> {
        self.transport.current()
    }

    fn subscribe(self: &Arc<Self>, request: SubscriptionRequest) -> SubscriptionHandle {
        let id = self.ids.next();
        let handle = SubscriptionHandle {
            id,
            runtime: Arc::downgrade(self),
        };
        if self.shut_down.load(Ordering::Acquire) {
            warn!(channel = %request.channel, "subscribe after shutdown ignored");
            return handle;
        }

        let transport = self.current_transport();
        let mut state = self.lock_state();
        let RuntimeState {
            channels,
            registry,
            pending,
            invariants,
        } = &mut *state;

        let outcome = channels.ensure_channel_control(
            &request.channel,
            request.kind,
            request.channel_type,
            transport.as_ref(),
        );
        let queued = match outcome {
            Ok(outcome) if outcome.is_ready() => {
                registry.add_subscription(
                    ActiveSubscription {
                        id,
                        channel_name: request.channel,
                        kind: request.kind,
                        handler: request.handler,
                        component_tag: request.component_tag,
                        instance_id: request.instance_id,
                    },
                    request.channel_type,
                    channels,
                    invariants,
                );
                false
            }
            result => {
                if let Err(e) = result {
                    warn!(channel = %request.channel, error = %e, "channel creation failed, queueing");
                }
                pending.enqueue(PendingSubscription {
                    id,
                    channel_name: request.channel,
                    kind: request.kind,
                    channel_type: request.channel_type,
                    handler: request.handler,
                    component_tag: request.component_tag,
                    instance_id: request.instance_id,
                });
                true
            }
        };

        if queued {
            self.ensure_pending_timers(pending);
        }
        handle
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock_state();
        let RuntimeState {
            channels,
            registry,
            pending,
            invariants,
        } = &mut *state;
        if pending.cancel(id) {
            return true;
        }
        registry.remove_subscription(id, channels, invariants).is_some()
    }

    fn remove_subscriptions_by_instance(&self, instance: InstanceId) -> usize {
        let mut state = self.lock_state();
        let RuntimeState {
            channels,
            registry,
            pending,
            invariants,
        } = &mut *state;
        let cancelled = pending.cancel_instance(instance);
        let removed = registry.remove_subscriptions_by_instance(instance, channels, invariants);
        debug!(
            instance = %instance,
            removed = removed.len(),
            cancelled,
            "component subscriptions torn down"
        );
        removed.len() + cancelled
    }

    // ── Pending queue ────────────────────────────────────────────

    /// Start the short retry and the poll loop unless already running.
    fn ensure_pending_timers(self: &Arc<Self>, pending: &mut PendingQueue) {
        if pending.is_empty() {
            return;
        }
        if !pending.retry_scheduled() {
            let weak = Arc::downgrade(self);
            let timer = self.scheduler.schedule_once(
                self.config.pending_retry_delay,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.lock_state().pending.clear_retry();
                        inner.drain_pending();
                    }
                }),
            );
            pending.set_retry(timer);
        }
        if !pending.poll_running() {
            let weak = Arc::downgrade(self);
            let timer = self.scheduler.schedule_repeating(
                self.config.pending_poll_interval,
                Arc::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.poll_pending();
                    }
                }),
            );
            pending.set_poll(timer);
            debug!(
                interval_ms = self.config.pending_poll_interval.as_millis(),
                "pending poll loop started"
            );
        }
    }

    /// One poll tick. Keeps waiting while no transport has ever appeared;
    /// stops once the queue empties or a previously seen transport is gone.
    /// The next subscribe or connect restarts the timers.
    fn poll_pending(&self) {
        let present = self.current_transport().is_some();
        {
            let mut state = self.lock_state();
            let lost = state.pending.observe_transport(present);
            if state.pending.is_empty() || lost {
                if lost {
                    debug!(queued = state.pending.len(), "transport lost while subscriptions pending");
                }
                state.pending.stop_timers();
                return;
            }
            if !present {
                trace!(queued = state.pending.len(), "pending poll waiting for transport");
                return;
            }
        }
        self.drain_pending();
    }

    /// Try to promote every queued request, in arrival order. Returns the
    /// number promoted.
    fn drain_pending(&self) -> usize {
        let Some(transport) = self.current_transport() else {
            return 0;
        };

        let mut state = self.lock_state();
        let RuntimeState {
            channels,
            registry,
            pending,
            invariants,
        } = &mut *state;

        let mut promoted = 0;
        for id in pending.ids() {
            let Some(entry) = pending.get(id) else {
                continue;
            };
            let (channel, kind, channel_type) =
                (entry.channel_name.clone(), entry.kind, entry.channel_type);

            match channels.ensure_channel_control(&channel, kind, channel_type, Some(&transport)) {
                Ok(outcome) if outcome.is_ready() => {
                    if let Some(entry) = pending.take(id) {
                        registry.add_subscription(
                            entry.into_active(),
                            channel_type,
                            channels,
                            invariants,
                        );
                        promoted += 1;
                    }
                }
                Ok(_) => break,
                Err(e) => {
                    debug!(subscription = %id, channel = %channel, error = %e, "pending subscription still blocked");
                }
            }
        }

        if pending.is_empty() {
            pending.stop_timers();
        }
        if promoted > 0 {
            info!(promoted, remaining = pending.len(), "pending subscriptions promoted");
        }
        promoted
    }

    // ── Transport status ─────────────────────────────────────────

    fn handle_transport_status(self: &Arc<Self>, status: TransportStatus) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }

        let changed = self.connection_state.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!(status = %status, "transport status changed");
            self.notify_state_listeners(status);
        }

        match self.coordinator.observe(status) {
            StatusTransition::FirstConnect => {
                self.drain_pending();
                let mut state = self.lock_state();
                self.ensure_pending_timers(&mut state.pending);
            }
            StatusTransition::Reconnect => {
                let weak = Arc::downgrade(self);
                self.coordinator.trigger(
                    self.scheduler.as_ref(),
                    Box::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.run_resubscribe();
                        }
                    }),
                );
            }
            StatusTransition::Lost => {
                debug!(status = %status, "transport lost, channels rebuild on reconnect");
            }
            StatusTransition::Unchanged => {}
        }
    }

    fn notify_state_listeners(&self, status: ConnectionState) {
        let listeners: Vec<StateListener> = self
            .state_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(status))) {
                warn!(
                    status = %status,
                    panic = %panic_message(payload.as_ref()),
                    "connection state listener panicked"
                );
            }
        }
    }

    /// Debounced rebuild: recreate every channel, then drain the queue and
    /// re-sync snapshots.
    fn run_resubscribe(self: &Arc<Self>) {
        let ran = self.coordinator.run_guarded(|| {
            let Some(transport) = self.current_transport() else {
                warn!("transport gone before resubscribe, skipping rebuild");
                return;
            };
            let report = self
                .lock_state()
                .channels
                .resubscribe_all_channels(&transport);
            if !report.failed.is_empty() {
                warn!(failed = ?report.failed, "some channels could not be rebuilt");
            }
        });
        if !ran {
            return;
        }

        self.drain_pending();
        {
            let mut state = self.lock_state();
            self.ensure_pending_timers(&mut state.pending);
        }
        self.spawn_snapshot_sync();
    }

    fn spawn_snapshot_sync(self: &Arc<Self>) {
        if !self.snapshots.has_source() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            debug!("no async runtime, snapshot re-sync skipped");
            return;
        };
        let inner = Arc::clone(self);
        let cancel = self.cancel.clone();
        self.tasks.spawn_on(
            async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    report = inner.sync_active_zone_snapshots() => {
                        trace!(applied = report.applied.len(), "post-resubscribe snapshot sync done");
                    }
                }
            },
            &handle,
        );
    }

    async fn sync_active_zone_snapshots(&self) -> SyncReport {
        let ids = self.lock_state().registry.active_entity_ids();
        if ids.is_empty() {
            return SyncReport::default();
        }
        self.snapshots.sync_entities(&ids).await
    }

    // ── Inbound events ───────────────────────────────────────────

    fn on_raw_event(&self, channel: &str, event_name: &str, payload: &serde_json::Value) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }

        let targets = self.lock_state().registry.targets_for(channel, event_name);
        if targets.is_empty() {
            trace!(channel = %channel, event = %event_name, "no subscribers for event");
            return;
        }
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let entity_id = resolve_entity_id(channel, payload);
        let server_ts = extract_server_ts(payload);
        if self.snapshots.is_stale_event(entity_id, server_ts) {
            self.counters.stale.fetch_add(1, Ordering::Relaxed);
            debug!(
                channel = %channel,
                event = %event_name,
                entity_id = ?entity_id,
                server_ts = ?server_ts,
                "stale event dropped"
            );
            return;
        }

        let event = match normalize_event(channel, event_name, payload, entity_id, server_ts) {
            Ok(event) => event,
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %channel, event = %event_name, reason = %e, "event dropped");
                return;
            }
        };

        let report = deliver(&event, &targets);
        self.counters
            .delivered
            .fetch_add(widen(report.delivered), Ordering::Relaxed);
        self.counters
            .handler_failures
            .fetch_add(widen(report.failed), Ordering::Relaxed);
    }

    // ── Diagnostics ──────────────────────────────────────────────

    fn subscription_stats(&self) -> SubscriptionStats {
        let transport = self.current_transport();
        let state = self.lock_state();

        let mut channels: Vec<ChannelStats> = state
            .registry
            .channels()
            .map(|(name, subscribers)| {
                let global = state.channels.global(name);
                ChannelStats {
                    name: name.to_owned(),
                    kind: state
                        .channels
                        .control(name)
                        .map_or(SubscriptionKind::EntityEvents, ChannelControl::kind),
                    global: global.is_some(),
                    subscribers,
                    live: state.channels.is_live(name, transport.as_ref()),
                    ref_count: global.map(GlobalChannelEntry::ref_count),
                    authorized: global.map(GlobalChannelEntry::is_authorized),
                }
            })
            .collect();
        for (name, entry) in state.channels.globals().iter() {
            if state.registry.subscriber_count(name) == 0 {
                channels.push(ChannelStats {
                    name: name.to_owned(),
                    kind: entry.control().kind(),
                    global: true,
                    subscribers: 0,
                    live: transport
                        .as_ref()
                        .is_some_and(|t| entry.control().is_live(t)),
                    ref_count: Some(entry.ref_count()),
                    authorized: Some(entry.is_authorized()),
                });
            }
        }
        channels.sort_by(|a, b| a.name.cmp(&b.name));

        SubscriptionStats {
            active: state.registry.len(),
            pending: state.pending.len(),
            channels,
            snapshots: self.snapshots.len(),
            resubscribe_runs: self.coordinator.runs(),
            events: self.counters.snapshot(),
        }
    }

    fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut state = self.lock_state();
        let RuntimeState {
            channels,
            registry,
            invariants,
            ..
        } = &mut *state;

        let counts: Vec<(&str, usize)> = registry.channels().collect();
        let globals: Vec<(&str, usize, usize)> = channels
            .globals()
            .iter()
            .map(|(name, entry)| (name, entry.ref_count(), registry.global_events_count(name)))
            .collect();
        invariants.check(counts, globals)
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        self.coordinator.reset();

        let mut state = self.lock_state();
        state.pending.clear();
        state.registry.clear();
        state.invariants.clear();
        state.channels.release_all();
        drop(state);

        self.snapshots.clear();
        self.state_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("realtime runtime shut down");
    }
}

// ── Handles ──────────────────────────────────────────────────────

/// Handle for one subscription. Unsubscribing is explicit; dropping the
/// handle keeps the subscription alive.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    runtime: Weak<RuntimeInner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether the subscription is active or still queued.
    pub fn is_active(&self) -> bool {
        self.runtime.upgrade().is_some_and(|inner| {
            let state = inner.lock_state();
            state.registry.contains(self.id) || state.pending.contains(self.id)
        })
    }

    /// Whether the subscription is still waiting for its channel.
    pub fn is_pending(&self) -> bool {
        self.runtime
            .upgrade()
            .is_some_and(|inner| inner.lock_state().pending.contains(self.id))
    }

    /// Remove the subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        self.runtime
            .upgrade()
            .is_some_and(|inner| inner.unsubscribe(self.id))
    }
}

impl std::fmt::Debug for RuntimeInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeInner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Handle for a connection state listener.
#[derive(Debug)]
pub struct StateListenerHandle {
    id: u64,
    runtime: Weak<RuntimeInner>,
}

impl StateListenerHandle {
    pub fn remove(self) -> bool {
        self.runtime.upgrade().is_some_and(|inner| {
            inner
                .state_listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .shift_remove(&self.id)
                .is_some()
        })
    }
}

/// Subscriptions owned by one mounted component instance.
///
/// Dropping the scope removes every subscription made through it, active or
/// queued, exactly as if each had been unsubscribed in turn.
#[derive(Debug)]
pub struct ComponentScope {
    runtime: Weak<RuntimeInner>,
    tag: Arc<str>,
    instance_id: InstanceId,
}

impl ComponentScope {
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn subscribe(
        &self,
        channel: &str,
        kind: SubscriptionKind,
        handler: EventHandler,
    ) -> SubscriptionHandle {
        self.subscribe_with(SubscriptionRequest::new(channel, kind, handler))
    }

    /// Subscribe with a custom request; its component tag and instance are
    /// overridden by the scope's.
    pub fn subscribe_with(&self, mut request: SubscriptionRequest) -> SubscriptionHandle {
        request.component_tag = Arc::clone(&self.tag);
        request.instance_id = self.instance_id;
        match self.runtime.upgrade() {
            Some(inner) => inner.subscribe(request),
            None => {
                debug!(
                    channel = %request.channel,
                    component = %self.tag,
                    "runtime dropped, scope subscribe ignored"
                );
                SubscriptionHandle {
                    id: SubscriptionId(0),
                    runtime: Weak::new(),
                }
            }
        }
    }
}

impl Drop for ComponentScope {
    fn drop(&mut self) {
        if let Some(inner) = self.runtime.upgrade() {
            inner.remove_subscriptions_by_instance(self.instance_id);
        }
    }
}
