//! `zonecast replay`: drive a scripted session through the runtime.
//!
//! The session runs against an in-memory transport, an in-memory snapshot
//! source, and a manual clock, so a given file always produces the same
//! deliveries and final statistics.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use tracing::{debug, info};

use zonecast_api::{
    MemorySnapshotSource, MemoryTransport, RawSnapshot, SnapshotEnvelope, TransportSlot,
    TransportStatus,
};
use zonecast_core::{
    ChannelStats, ChannelType, ComponentScope, EntityId, EventHandler, InvariantViolation,
    ManualScheduler, RealtimeEvent, Runtime, SubscriptionHandle, SubscriptionKind,
    SubscriptionRequest, SubscriptionStats,
};

use crate::cli::{GlobalOpts, OutputFormat, ReplayArgs};
use crate::error::CliError;
use crate::output;

const DEFAULT_COMPONENT: &str = "replay";

// ── Session operations ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
enum Op {
    /// Report a transport status.
    State { status: TransportStatus },
    /// Install a fresh transport instance (new generation).
    Install,
    /// Remove the installed transport.
    Clear,
    Subscribe {
        channel: String,
        #[serde(default = "default_kind")]
        kind: SubscriptionKind,
        channel_type: Option<ChannelType>,
        #[serde(default = "default_component")]
        component: String,
        /// Label used in output and by `unsubscribe`.
        #[serde(rename = "as")]
        label: Option<String>,
    },
    Unsubscribe {
        #[serde(rename = "as")]
        label: String,
    },
    /// Drop a component scope and everything subscribed through it.
    Unmount { component: String },
    /// Serve a snapshot and fetch it through the runtime.
    Snapshot {
        entity_id: u64,
        snapshot_id: serde_json::Value,
        server_ts: Option<serde_json::Value>,
        #[serde(default)]
        payload: serde_json::Map<String, serde_json::Value>,
    },
    Publish {
        channel: String,
        event: String,
        #[serde(default = "empty_object")]
        payload: serde_json::Value,
    },
    /// Silently forget every binding, as a reconnecting socket does.
    DropBindings,
    /// Fail the next open of `channel`.
    Reject { channel: String },
    Advance { ms: u64 },
    /// Re-fetch snapshots for every subscribed entity.
    Sync,
}

fn default_kind() -> SubscriptionKind {
    SubscriptionKind::EntityEvents
}

fn default_component() -> String {
    DEFAULT_COMPONENT.into()
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

// ── Report types ─────────────────────────────────────────────────────

/// One event as seen by one subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub line: usize,
    pub subscriber: String,
    pub component: String,
    pub event: RealtimeEvent,
}

#[derive(Tabled)]
struct DeliveryRow {
    #[tabled(rename = "Line")]
    line: usize,
    #[tabled(rename = "Subscriber")]
    subscriber: String,
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Zone")]
    zone: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

#[derive(Tabled)]
struct ChannelRow {
    #[tabled(rename = "Channel")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Subs")]
    subscribers: usize,
    #[tabled(rename = "Live")]
    live: String,
    #[tabled(rename = "Refs")]
    refs: String,
}

impl From<&ChannelStats> for ChannelRow {
    fn from(c: &ChannelStats) -> Self {
        Self {
            name: c.name.clone(),
            kind: c.kind.to_string(),
            subscribers: c.subscribers,
            live: if c.live { "yes" } else { "no" }.into(),
            refs: c.ref_count.map(|r| r.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ReplayReport<'a> {
    deliveries: &'a [Delivery],
    stats: &'a SubscriptionStats,
    violations: &'a [InvariantViolation],
}

// ── Session state ────────────────────────────────────────────────────

struct Session {
    runtime: Runtime,
    slot: Arc<TransportSlot>,
    scheduler: ManualScheduler,
    snapshots: MemorySnapshotSource,
    memory: Option<MemoryTransport>,
    scopes: IndexMap<String, ComponentScope>,
    handles: HashMap<String, SubscriptionHandle>,
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    line: Arc<Mutex<usize>>,
    color: bool,
}

impl Session {
    fn new(runtime_config: zonecast_core::RealtimeConfig, color: bool) -> Result<Self, CliError> {
        let slot = Arc::new(TransportSlot::new());
        let scheduler = ManualScheduler::new();
        let snapshots = MemorySnapshotSource::new();
        let runtime = Runtime::builder(slot.clone())
            .config(runtime_config)
            .scheduler(Arc::new(scheduler.clone()))
            .snapshot_source(Arc::new(snapshots.clone()))
            .build()?;
        Ok(Self {
            runtime,
            slot,
            scheduler,
            snapshots,
            memory: None,
            scopes: IndexMap::new(),
            handles: HashMap::new(),
            deliveries: Arc::new(Mutex::new(Vec::new())),
            line: Arc::new(Mutex::new(0)),
            color,
        })
    }

    fn transport(&self, op: &str) -> Result<&MemoryTransport, String> {
        self.memory
            .as_ref()
            .ok_or_else(|| format!("'{op}' needs an installed transport (add {{\"op\":\"install\"}})"))
    }

    fn recorder(&self, subscriber: String, component: String) -> EventHandler {
        let deliveries = Arc::clone(&self.deliveries);
        let line = Arc::clone(&self.line);
        EventHandler::infallible(move |event: &RealtimeEvent| {
            let line = *line.lock().unwrap_or_else(PoisonError::into_inner);
            deliveries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Delivery {
                    line,
                    subscriber: subscriber.clone(),
                    component: component.clone(),
                    event: event.clone(),
                });
        })
    }

    async fn apply(&mut self, line: usize, op: Op) -> Result<(), String> {
        *self.line.lock().unwrap_or_else(PoisonError::into_inner) = line;
        debug!(line, op = ?op, "replay op");

        match op {
            Op::State { status } => self.runtime.handle_transport_status(status),
            Op::Install => {
                let memory = MemoryTransport::new();
                let generation = self.slot.install(Arc::new(memory.clone()));
                info!(generation, "replay transport installed");
                self.memory = Some(memory);
            }
            Op::Clear => {
                self.slot.clear();
                self.memory = None;
            }
            Op::Subscribe {
                channel,
                kind,
                channel_type,
                component,
                label,
            } => {
                let label = label.unwrap_or_else(|| format!("{component}@{line}"));
                if self.handles.contains_key(&label) {
                    return Err(format!("subscriber '{label}' already exists"));
                }
                let handler = self.recorder(label.clone(), component.clone());
                let mut request = SubscriptionRequest::new(channel, kind, handler);
                if let Some(channel_type) = channel_type {
                    request = request.channel_type(channel_type);
                }
                let scope = self
                    .scopes
                    .entry(component.clone())
                    .or_insert_with(|| self.runtime.scope(&component));
                let handle = scope.subscribe_with(request);
                self.handles.insert(label, handle);
            }
            Op::Unsubscribe { label } => {
                let handle = self
                    .handles
                    .remove(&label)
                    .ok_or_else(|| format!("unknown subscriber '{label}'"))?;
                handle.unsubscribe();
            }
            Op::Unmount { component } => {
                if self.scopes.shift_remove(&component).is_none() {
                    return Err(format!("unknown component '{component}'"));
                }
            }
            Op::Snapshot {
                entity_id,
                snapshot_id,
                server_ts,
                payload,
            } => {
                self.snapshots.insert(
                    entity_id,
                    SnapshotEnvelope::ok(RawSnapshot {
                        snapshot_id: Some(snapshot_id),
                        server_ts,
                        entity_id: Some(serde_json::Value::from(entity_id)),
                        payload,
                    }),
                );
                self.runtime
                    .fetch_and_apply_snapshot(EntityId(entity_id))
                    .await
                    .map_err(|e| e.to_string())?;
            }
            Op::Publish {
                channel,
                event,
                payload,
            } => {
                let callbacks = self.transport("publish")?.publish(&channel, &event, &payload);
                debug!(channel = %channel, event = %event, callbacks, "replay publish");
            }
            Op::DropBindings => self.transport("drop_bindings")?.drop_all_bindings(),
            Op::Reject { channel } => self.transport("reject")?.reject_next(&channel),
            Op::Advance { ms } => {
                let ran = self.scheduler.advance(Duration::from_millis(ms));
                debug!(ms, timers = ran, "replay clock advanced");
            }
            Op::Sync => {
                let report = self.runtime.sync_active_zone_snapshots().await;
                debug!(applied = report.applied.len(), failed = report.failed.len(), "replay sync");
            }
        }

        self.runtime.wait_idle().await;
        Ok(())
    }

    fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn delivery_row(&self, d: &Delivery) -> DeliveryRow {
        let detail = match &d.event {
            RealtimeEvent::CommandStatus(e) => format!(
                "{} {}",
                e.command_id,
                output::paint_status(e.status, self.color)
            ),
            RealtimeEvent::Domain(e) => e.event_type.clone(),
        };
        DeliveryRow {
            line: d.line,
            subscriber: d.subscriber.clone(),
            channel: d.event.channel().to_owned(),
            event: d.event.event_name().to_owned(),
            zone: d
                .event
                .entity_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            detail,
        }
    }
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(args: ReplayArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = zonecast_config::load_config_or_default();
    let mut runtime_config = zonecast_config::realtime_config(&cfg)?;
    runtime_config.invariant_checks.get_or_insert(true);

    let path_label = args.file.display().to_string();
    let reader: Box<dyn BufRead> = if args.file == Path::new("-") {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        Box::new(BufReader::new(std::fs::File::open(&args.file)?))
    };

    let mut session = Session::new(runtime_config, output::should_color(&global.color))?;
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let text = line?;
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let replay_err = |reason: String| CliError::Replay {
            path: path_label.clone(),
            line: line_no,
            reason,
        };
        let op: Op = serde_json::from_str(trimmed).map_err(|e| replay_err(e.to_string()))?;
        session.apply(line_no, op).await.map_err(replay_err)?;
    }

    let deliveries = session.deliveries();
    let stats = session.runtime.subscription_stats();
    let violations = session.runtime.check_invariants();
    session.runtime.shutdown();

    render(&args, global, &session, &deliveries, &stats, &violations)?;

    if args.strict && !violations.is_empty() {
        return Err(CliError::InvariantViolations {
            count: violations.len(),
        });
    }
    Ok(())
}

fn render(
    args: &ReplayArgs,
    global: &GlobalOpts,
    session: &Session,
    deliveries: &[Delivery],
    stats: &SubscriptionStats,
    violations: &[InvariantViolation],
) -> Result<(), CliError> {
    match global.output {
        OutputFormat::Table => {
            if !args.stats_only {
                let rows: Vec<DeliveryRow> =
                    deliveries.iter().map(|d| session.delivery_row(d)).collect();
                output::print_output(&output::render_table(&rows), global.quiet);
            }
            if !args.events_only {
                let rows: Vec<ChannelRow> = stats.channels.iter().map(ChannelRow::from).collect();
                output::print_output(&output::render_table(&rows), global.quiet);
                output::print_output(&summary(stats, violations), global.quiet);
            }
        }
        OutputFormat::Plain => {
            let out = output::render_list(
                &global.output,
                deliveries,
                |d| session.delivery_row(d),
                |d| format!("{} {} {}", d.subscriber, d.event.channel(), d.event),
            )?;
            output::print_output(&out, global.quiet);
        }
        _ => {
            let report = ReplayReport {
                deliveries,
                stats,
                violations,
            };
            let out = output::render_single(&global.output, &report, |_| String::new(), |_| String::new())?;
            output::print_output(&out, global.quiet);
        }
    }
    Ok(())
}

fn summary(stats: &SubscriptionStats, violations: &[InvariantViolation]) -> String {
    let e = &stats.events;
    let mut out = format!(
        "active {}  pending {}  snapshots {}  resubscribes {}\n\
         received {}  delivered {}  stale {}  dropped {}  handler failures {}",
        stats.active,
        stats.pending,
        stats.snapshots,
        stats.resubscribe_runs,
        e.received,
        e.delivered,
        e.stale,
        e.dropped,
        e.handler_failures,
    );
    for violation in violations {
        out.push_str(&format!("\nwarning: {violation}"));
    }
    out
}
