//! Shared configuration for the zonecast CLI and embedding applications.
//!
//! TOML profiles, API token resolution (env var or plaintext), and
//! translation to `zonecast_core::RealtimeConfig` and
//! `zonecast_api::SnapshotClientConfig`. The CLI layers its `GlobalOpts`
//! overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use zonecast_api::SnapshotClientConfig;
use zonecast_api::transport::{TlsMode, TransportConfig};
use zonecast_core::RealtimeConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{0}' not found")]
    UnknownProfile(String),

    #[error("environment variable '{var}' for profile '{profile}' is not set")]
    MissingToken { profile: String, var: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Runtime tuning shared by every profile.
    #[serde(default)]
    pub realtime: RealtimeSection,

    /// Named snapshot endpoint profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            realtime: RealtimeSection::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    10
}

/// `[realtime]` table. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RealtimeSection {
    pub resubscribe_debounce_ms: u64,
    pub pending_retry_ms: u64,
    pub pending_poll_ms: u64,
    pub leak_threshold: usize,
    /// Exact names, or prefixes ending in `*`.
    pub global_channels: Vec<String>,
    pub global_registry_capacity: usize,
    /// Unset means "on in debug builds".
    pub invariant_checks: Option<bool>,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        let defaults = RealtimeConfig::default();
        Self {
            resubscribe_debounce_ms: millis(defaults.resubscribe_debounce),
            pending_retry_ms: millis(defaults.pending_retry_delay),
            pending_poll_ms: millis(defaults.pending_poll_interval),
            leak_threshold: defaults.leak_threshold,
            global_channels: defaults.global_channels,
            global_registry_capacity: defaults.global_registry_capacity,
            invariant_checks: defaults.invariant_checks,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A named snapshot endpoint profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// API root (e.g., "https://greenhouse.local/api").
    pub endpoint: String,

    /// API token (plaintext; prefer `api_token_env`).
    pub api_token: Option<String>,

    /// Environment variable name containing the API token.
    pub api_token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Accept invalid TLS certificates.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "zonecast", "zonecast").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("zonecast");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + `ZONECAST_*` environment variables.
///
/// Nested keys use a double underscore:
/// `ZONECAST_REALTIME__LEAK_THRESHOLD=50`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ZONECAST_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profiles ────────────────────────────────────────────────────────

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_owned()))
    }
}

/// Resolve the API token for a profile.
///
/// A named env var wins over plaintext; naming a var that is not set is an
/// error rather than a silent fallback. No token at all is fine.
pub fn resolve_api_token(
    profile: &Profile,
    profile_name: &str,
) -> Result<Option<SecretString>, ConfigError> {
    if let Some(ref var) = profile.api_token_env {
        return match std::env::var(var) {
            Ok(val) if !val.is_empty() => Ok(Some(SecretString::from(val))),
            _ => Err(ConfigError::MissingToken {
                profile: profile_name.into(),
                var: var.clone(),
            }),
        };
    }
    Ok(profile.api_token.clone().map(SecretString::from))
}

// ── Translation ─────────────────────────────────────────────────────

/// Build the runtime tuning from the `[realtime]` table.
pub fn realtime_config(cfg: &Config) -> Result<RealtimeConfig, ConfigError> {
    let section = &cfg.realtime;
    if section.pending_poll_ms == 0 {
        return Err(ConfigError::Validation {
            field: "realtime.pending_poll_ms".into(),
            reason: "must be greater than zero".into(),
        });
    }
    if section.global_registry_capacity == 0 {
        return Err(ConfigError::Validation {
            field: "realtime.global_registry_capacity".into(),
            reason: "must be at least 1".into(),
        });
    }

    Ok(RealtimeConfig {
        resubscribe_debounce: Duration::from_millis(section.resubscribe_debounce_ms),
        pending_retry_delay: Duration::from_millis(section.pending_retry_ms),
        pending_poll_interval: Duration::from_millis(section.pending_poll_ms),
        leak_threshold: section.leak_threshold,
        global_channels: section.global_channels.clone(),
        global_registry_capacity: section.global_registry_capacity,
        invariant_checks: section.invariant_checks,
    })
}

/// Build a `SnapshotClientConfig` from a profile, without CLI flag overrides.
pub fn profile_to_snapshot_config(
    cfg: &Config,
    profile: &Profile,
    profile_name: &str,
) -> Result<SnapshotClientConfig, ConfigError> {
    let base_url: url::Url = profile
        .endpoint
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "endpoint".into(),
            reason: format!("invalid URL: {}", profile.endpoint),
        })?;

    let tls = if profile.insecure.unwrap_or(false) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };
    let timeout = Duration::from_secs(profile.timeout.unwrap_or(cfg.defaults.timeout));

    Ok(SnapshotClientConfig {
        base_url,
        transport: TransportConfig { tls, timeout },
        api_token: resolve_api_token(profile, profile_name)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    fn profile(endpoint: &str) -> Profile {
        Profile {
            endpoint: endpoint.into(),
            api_token: None,
            api_token_env: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
        }
    }

    #[test]
    fn realtime_section_defaults_match_core() {
        let cfg = Config::default();
        assert_eq!(realtime_config(&cfg).unwrap(), RealtimeConfig::default());
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let mut cfg = Config::default();
        cfg.realtime.pending_poll_ms = 0;
        let err = realtime_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "realtime.pending_poll_ms"));
    }

    #[test]
    fn plaintext_token_used_without_env_var() {
        let mut p = profile("https://zones.local/api");
        p.api_token = Some("plain".into());
        let token = resolve_api_token(&p, "default").unwrap().unwrap();
        assert_eq!(token.expose_secret(), "plain");
    }

    #[test]
    fn unset_token_env_var_is_an_error() {
        let mut p = profile("https://zones.local/api");
        p.api_token = Some("plain".into());
        p.api_token_env = Some("ZONECAST_TEST_TOKEN_THAT_IS_NEVER_SET".into());
        assert!(matches!(
            resolve_api_token(&p, "lab"),
            Err(ConfigError::MissingToken { ref var, .. }) if var == "ZONECAST_TEST_TOKEN_THAT_IS_NEVER_SET"
        ));
    }

    #[test]
    fn snapshot_config_picks_tls_and_timeout() {
        let cfg = Config::default();
        let mut p = profile("https://zones.local/api");
        p.insecure = Some(true);

        let client = profile_to_snapshot_config(&cfg, &p, "default").unwrap();
        assert_eq!(client.transport.tls, TlsMode::DangerAcceptInvalid);
        assert_eq!(client.transport.timeout, Duration::from_secs(10));
        assert!(client.api_token.is_none());

        p.insecure = None;
        p.ca_cert = Some(PathBuf::from("/etc/zonecast/ca.pem"));
        p.timeout = Some(3);
        let client = profile_to_snapshot_config(&cfg, &p, "default").unwrap();
        assert_eq!(client.transport.tls, TlsMode::CustomCa(PathBuf::from("/etc/zonecast/ca.pem")));
        assert_eq!(client.transport.timeout, Duration::from_secs(3));
    }

    #[test]
    fn bad_endpoint_rejected() {
        let cfg = Config::default();
        let err = profile_to_snapshot_config(&cfg, &profile("not a url"), "default").unwrap_err();
        assert!(err.to_string().contains("invalid endpoint"));
    }

    #[test]
    fn unknown_profile_reported_by_name() {
        let cfg = Config::default();
        let err = cfg.profile(Some("lab")).unwrap_err();
        assert_eq!(err.to_string(), "profile 'lab' not found");
    }
}
