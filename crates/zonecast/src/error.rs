//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use zonecast_config::ConfigError;
use zonecast_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const INVARIANT: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach snapshot endpoint for zone {entity_id}")]
    #[diagnostic(
        code(zonecast::connection_failed),
        help(
            "Check that the endpoint is running and accessible.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { entity_id: u64, reason: String },

    #[error("Snapshot endpoint rejected the request (HTTP {status})")]
    #[diagnostic(
        code(zonecast::auth_failed),
        help(
            "Verify the API token for this profile.\n\
             Set one with: zonecast config set api_token_env <VAR>"
        )
    )]
    AuthFailed { status: u16 },

    // ── Resources ────────────────────────────────────────────────────
    #[error("No snapshot for zone {entity_id}")]
    #[diagnostic(code(zonecast::not_found))]
    NotFound { entity_id: u64 },

    #[error("Invalid snapshot for zone {entity_id}: {reason}")]
    #[diagnostic(
        code(zonecast::invalid_snapshot),
        help("Inspect the raw response with: zonecast snapshot {entity_id} --raw")
    )]
    InvalidSnapshot { entity_id: u64, reason: String },

    // ── Replay ───────────────────────────────────────────────────────
    #[error("{path}:{line}: {reason}")]
    #[diagnostic(
        code(zonecast::replay),
        help(
            "Each line must be one JSON object with an \"op\" field:\n\
             state, install, clear, subscribe, unsubscribe, unmount, snapshot,\n\
             publish, drop_bindings, reject, advance, sync"
        )
    )]
    Replay {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("{count} invariant violation(s) at end of replay")]
    #[diagnostic(code(zonecast::invariants))]
    InvariantViolations { count: usize },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(zonecast::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(zonecast::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: zonecast config init --endpoint <URL>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No snapshot endpoint configured")]
    #[diagnostic(
        code(zonecast::no_config),
        help(
            "Pass --endpoint, set ZONECAST_ENDPOINT, or create a profile with:\n\
             zonecast config init --endpoint <URL>\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Config file already exists at {path}")]
    #[diagnostic(code(zonecast::config_exists), help("Use --force to overwrite it."))]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(zonecast::config))]
    Config(Box<ConfigError>),

    #[error(transparent)]
    #[diagnostic(code(zonecast::runtime))]
    Core(Box<CoreError>),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(zonecast::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::Replay { .. } | Self::ConfigExists { .. } => {
                exit_code::USAGE
            }
            Self::InvariantViolations { .. } => exit_code::INVARIANT,
            _ => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::UnknownProfile(name) => Self::ProfileNotFound {
                name,
                available: String::new(),
            },
            other => Self::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::SnapshotFetch {
                entity_id,
                status: Some(404),
                ..
            } => Self::NotFound { entity_id },

            CoreError::SnapshotFetch {
                status: Some(status @ (401 | 403)),
                ..
            } => Self::AuthFailed { status },

            CoreError::SnapshotFetch {
                entity_id, reason, ..
            } => Self::ConnectionFailed { entity_id, reason },

            CoreError::InvalidSnapshot { entity_id, reason } => {
                Self::InvalidSnapshot { entity_id, reason }
            }

            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },

            other => Self::Core(Box::new(other)),
        }
    }
}
