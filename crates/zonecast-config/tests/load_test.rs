#![allow(clippy::unwrap_used)]
// File-backed config loading and saving.

use std::time::Duration;

use pretty_assertions::assert_eq;
use zonecast_config::{
    Config, ConfigError, Profile, load_config_from, profile_to_snapshot_config, realtime_config,
    save_config_to,
};

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(cfg.defaults.output, "table");
    assert_eq!(cfg.default_profile.as_deref(), Some("default"));
    assert!(cfg.profiles.is_empty());
}

#[test]
fn realtime_table_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
default_profile = "lab"

[realtime]
resubscribe_debounce_ms = 1000
global_channels = ["events.global", "alerts.*"]
invariant_checks = false

[profiles.lab]
endpoint = "https://lab.zones.local/api"
api_token = "t0ken"
timeout = 5
"#,
    )
    .unwrap();

    let cfg = load_config_from(&path).unwrap();
    let realtime = realtime_config(&cfg).unwrap();
    assert_eq!(realtime.resubscribe_debounce, Duration::from_secs(1));
    assert_eq!(realtime.pending_poll_interval, Duration::from_millis(250));
    assert_eq!(realtime.global_channels, vec!["events.global", "alerts.*"]);
    assert!(!realtime.invariant_checks_enabled());

    let (name, profile) = cfg.profile(None).unwrap();
    assert_eq!(name, "lab");
    let client = profile_to_snapshot_config(&cfg, profile, name).unwrap();
    assert_eq!(client.base_url.as_str(), "https://lab.zones.local/api");
    assert_eq!(client.transport.timeout, Duration::from_secs(5));
    assert!(client.api_token.is_some());
}

#[test]
fn malformed_toml_is_a_figment_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[realtime\nleak_threshold = ").unwrap();

    assert!(matches!(load_config_from(&path), Err(ConfigError::Figment(_))));
}

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut cfg = Config::default();
    cfg.realtime.leak_threshold = 40;
    cfg.profiles.insert(
        "default".into(),
        Profile {
            endpoint: "http://127.0.0.1:8080/api".into(),
            api_token: None,
            api_token_env: Some("ZONECAST_TOKEN".into()),
            ca_cert: None,
            insecure: None,
            timeout: None,
        },
    );
    save_config_to(&cfg, &path).unwrap();

    let loaded = load_config_from(&path).unwrap();
    assert_eq!(loaded, cfg);
}
