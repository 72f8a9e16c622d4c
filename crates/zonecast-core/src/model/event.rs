// ── Canonical realtime events ──
//
// The only shapes that ever reach subscriber handlers. Raw transport
// payloads are converted by `normalize` and never travel further.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::EntityId;

// ── SubscriptionKind ────────────────────────────────────────────────

/// Which family of events a subscription (and its channel) carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionKind {
    /// Per-entity command traffic (`commands.{id}`).
    EntityEvents,
    /// Application-wide activity feed.
    GlobalEvents,
}

impl SubscriptionKind {
    /// Transport event names bound for this kind.
    pub fn event_names(self) -> &'static [&'static str] {
        match self {
            Self::EntityEvents => &[COMMAND_STATUS_UPDATED, COMMAND_FAILED],
            Self::GlobalEvents => &[EVENT_CREATED, COMMAND_STATUS_UPDATED],
        }
    }

    pub fn handles(self, event_name: &str) -> bool {
        self.event_names().contains(&event_name)
    }

    /// Channel type used when a caller does not pick one explicitly.
    pub fn default_channel_type(self) -> ChannelType {
        match self {
            Self::EntityEvents => ChannelType::Private,
            Self::GlobalEvents => ChannelType::Public,
        }
    }
}

pub const COMMAND_STATUS_UPDATED: &str = "CommandStatusUpdated";
pub const COMMAND_FAILED: &str = "CommandFailed";
pub const EVENT_CREATED: &str = "EventCreated";

/// Whether a channel requires transport-side authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelType {
    Private,
    Public,
}

// ── CommandStatus ───────────────────────────────────────────────────

/// Lifecycle status of a device command. Parsing is case-insensitive and
/// anything unrecognised becomes [`Unknown`](Self::Unknown).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum CommandStatus {
    Queued,
    Sent,
    Accepted,
    Done,
    Failed,
    Invalid,
    Busy,
    NoEffect,
    Timeout,
    SendFailed,
    Unknown,
}

impl CommandStatus {
    pub fn parse_lenient(raw: &str) -> Self {
        raw.trim().parse().unwrap_or(Self::Unknown)
    }

    /// Whether the command has reached a final state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::Sent | Self::Accepted)
    }
}

// ── Event records ───────────────────────────────────────────────────

/// Status change of one device command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStatusEvent {
    pub channel: String,
    pub event_name: String,
    pub command_id: String,
    pub entity_id: Option<EntityId>,
    pub status: CommandStatus,
    /// The status string as received, kept when it mapped to `Unknown`.
    pub raw_status: Option<String>,
    pub message: Option<String>,
    /// Server timestamp in epoch milliseconds.
    pub server_ts: Option<i64>,
}

/// A domain activity record from the global feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub channel: String,
    pub event_name: String,
    pub event_id: Option<String>,
    pub event_type: String,
    pub entity_id: Option<EntityId>,
    pub server_ts: Option<i64>,
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Normalized event delivered to subscriber handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RealtimeEvent {
    CommandStatus(CommandStatusEvent),
    Domain(DomainEvent),
}

impl RealtimeEvent {
    pub fn channel(&self) -> &str {
        match self {
            Self::CommandStatus(e) => &e.channel,
            Self::Domain(e) => &e.channel,
        }
    }

    pub fn event_name(&self) -> &str {
        match self {
            Self::CommandStatus(e) => &e.event_name,
            Self::Domain(e) => &e.event_name,
        }
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            Self::CommandStatus(e) => e.entity_id,
            Self::Domain(e) => e.entity_id,
        }
    }

    pub fn server_ts(&self) -> Option<i64> {
        match self {
            Self::CommandStatus(e) => e.server_ts,
            Self::Domain(e) => e.server_ts,
        }
    }
}

impl fmt::Display for RealtimeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandStatus(e) => {
                write!(f, "{} command {} -> {}", e.channel, e.command_id, e.status)
            }
            Self::Domain(e) => write!(f, "{} {}", e.channel, e.event_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!(CommandStatus::parse_lenient("done"), CommandStatus::Done);
        assert_eq!(CommandStatus::parse_lenient("NO_EFFECT"), CommandStatus::NoEffect);
        assert_eq!(CommandStatus::parse_lenient("send_failed"), CommandStatus::SendFailed);
    }

    #[test]
    fn unrecognised_status_is_unknown() {
        assert_eq!(CommandStatus::parse_lenient("EXPLODED"), CommandStatus::Unknown);
        assert_eq!(CommandStatus::parse_lenient("unknown"), CommandStatus::Unknown);
    }

    #[test]
    fn kinds_share_command_status_updates() {
        assert!(SubscriptionKind::EntityEvents.handles(COMMAND_STATUS_UPDATED));
        assert!(SubscriptionKind::GlobalEvents.handles(COMMAND_STATUS_UPDATED));
        assert!(!SubscriptionKind::EntityEvents.handles(EVENT_CREATED));
        assert!(!SubscriptionKind::GlobalEvents.handles(COMMAND_FAILED));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!CommandStatus::Sent.is_terminal());
        assert!(CommandStatus::Timeout.is_terminal());
    }
}
