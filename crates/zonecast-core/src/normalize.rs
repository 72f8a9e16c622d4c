// ── Event normalization ──
//
// Coerces heterogeneous raw payloads into the canonical `RealtimeEvent`
// shapes. Server emitters disagree on field casing and timestamp formats,
// so every lookup below tries the known spellings in order.

use chrono::DateTime;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{
    COMMAND_FAILED, COMMAND_STATUS_UPDATED, CommandStatus, CommandStatusEvent, DomainEvent,
    EVENT_CREATED, EntityId, RealtimeEvent,
};

const ENTITY_ID_KEYS: &[&str] = &["zone_id", "zoneId", "entity_id", "entityId"];
const SERVER_TS_KEYS: &[&str] = &["server_ts", "serverTs"];
const COMMAND_ID_KEYS: &[&str] = &["command_id", "commandId", "id"];
const EVENT_ID_KEYS: &[&str] = &["event_id", "eventId", "id"];
const EVENT_TYPE_KEYS: &[&str] = &["type", "event_type", "eventType", "kind"];

/// Why a raw payload was not turned into an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("unsupported event '{0}'")]
    UnsupportedEvent(String),
    #[error("command status payload has no command id")]
    MissingCommandId,
}

// ── Field resolution ────────────────────────────────────────────────

/// Entity id encoded as the numeric last segment of a channel name
/// (`commands.10` -> 10).
pub fn entity_id_from_channel(channel: &str) -> Option<EntityId> {
    channel
        .rsplit(['.', ':', '/'])
        .next()
        .and_then(|segment| segment.parse().ok())
}

/// Resolve the entity an event belongs to. The channel name wins over
/// payload fields.
pub fn resolve_entity_id(channel: &str, payload: &Value) -> Option<EntityId> {
    entity_id_from_channel(channel)
        .or_else(|| first_field(payload, ENTITY_ID_KEYS).and_then(EntityId::from_json))
}

/// Interpret a timestamp as epoch milliseconds.
///
/// Accepts integers, floats (truncated), numeric strings, and RFC 3339 /
/// ISO-8601 strings.
pub fn coerce_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(truncate_ms)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(ms) = s.parse::<i64>() {
                return Some(ms);
            }
            if let Ok(f) = s.parse::<f64>() {
                return f.is_finite().then(|| truncate_ms(f));
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn truncate_ms(f: f64) -> i64 {
    f.trunc() as i64
}

/// The payload's server timestamp, if it carries a usable one.
pub fn extract_server_ts(payload: &Value) -> Option<i64> {
    first_field(payload, SERVER_TS_KEYS).and_then(coerce_timestamp)
}

fn first_field<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let object = payload.as_object()?;
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

fn string_field(payload: &Value, keys: &[&str]) -> Option<String> {
    match first_field(payload, keys)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Normalization ───────────────────────────────────────────────────

/// Build the canonical event for `event_name` received on `channel`.
///
/// `entity_id` and `server_ts` are passed in because the dispatcher has
/// already resolved them for the staleness check.
pub fn normalize_event(
    channel: &str,
    event_name: &str,
    payload: &Value,
    entity_id: Option<EntityId>,
    server_ts: Option<i64>,
) -> Result<RealtimeEvent, NormalizeError> {
    if !payload.is_object() {
        return Err(NormalizeError::NotAnObject);
    }

    match event_name {
        COMMAND_STATUS_UPDATED | COMMAND_FAILED => {
            let command_id =
                string_field(payload, COMMAND_ID_KEYS).ok_or(NormalizeError::MissingCommandId)?;
            let raw_status = string_field(payload, &["status", "state"]);
            let status = match (&raw_status, event_name) {
                (Some(raw), _) => CommandStatus::parse_lenient(raw),
                (None, COMMAND_FAILED) => CommandStatus::Failed,
                (None, _) => CommandStatus::Unknown,
            };
            Ok(RealtimeEvent::CommandStatus(CommandStatusEvent {
                channel: channel.to_owned(),
                event_name: event_name.to_owned(),
                command_id,
                entity_id,
                status,
                raw_status,
                message: string_field(payload, &["message", "error", "reason"]),
                server_ts,
            }))
        }
        EVENT_CREATED => {
            let data = match first_field(payload, &["data", "payload"]) {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            Ok(RealtimeEvent::Domain(DomainEvent {
                channel: channel.to_owned(),
                event_name: event_name.to_owned(),
                event_id: string_field(payload, EVENT_ID_KEYS),
                event_type: string_field(payload, EVENT_TYPE_KEYS)
                    .unwrap_or_else(|| "unknown".to_owned()),
                entity_id,
                server_ts,
                data,
            }))
        }
        other => Err(NormalizeError::UnsupportedEvent(other.to_owned())),
    }
}
