//! Clap derive structures for the `zonecast` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// zonecast -- inspect and exercise the realtime subscription layer
#[derive(Debug, Parser)]
#[command(
    name = "zonecast",
    version,
    about = "Replay realtime sessions and inspect zone snapshots",
    long_about = "Tools for the zonecast realtime layer.\n\n\
        `replay` drives a scripted session through the full subscription runtime\n\
        against an in-memory transport; `snapshot` fetches and validates a zone\n\
        snapshot from the configured endpoint.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Endpoint profile to use
    #[arg(long, short = 'p', env = "ZONECAST_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Snapshot API root (overrides profile)
    #[arg(long, short = 'e', env = "ZONECAST_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// API token
    #[arg(long, env = "ZONECAST_API_TOKEN", global = true, hide_env = true)]
    pub api_token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "ZONECAST_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "ZONECAST_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "ZONECAST_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a JSON-lines session through the subscription runtime
    #[command(alias = "r")]
    Replay(ReplayArgs),

    /// Fetch and validate a zone snapshot
    #[command(alias = "snap")]
    Snapshot(SnapshotArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Replay ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Session file, one JSON operation per line (`-` for stdin)
    pub file: PathBuf,

    /// Print only the final statistics
    #[arg(long, conflicts_with = "events_only")]
    pub stats_only: bool,

    /// Print only delivered events
    #[arg(long)]
    pub events_only: bool,

    /// Exit non-zero if any invariant violation is found at the end
    #[arg(long)]
    pub strict: bool,
}

// ── Snapshot ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Zone (entity) id
    pub entity_id: u64,

    /// Print the raw envelope instead of the validated snapshot
    #[arg(long)]
    pub raw: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display current resolved configuration
    Show,

    /// Write a config file with one profile
    Init {
        /// Snapshot API root for the profile
        #[arg(long)]
        endpoint: String,

        /// Environment variable holding the API token
        #[arg(long)]
        token_env: Option<String>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Set a profile value
    Set {
        /// Profile key (endpoint, api_token_env, insecure, timeout, ca_cert)
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
