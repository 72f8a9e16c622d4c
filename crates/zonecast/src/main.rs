mod cli;
mod commands;
mod error;
mod output;

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use zonecast_api::SnapshotClientConfig;
use zonecast_api::transport::{TlsMode, TransportConfig};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "zonecast", &mut std::io::stdout());
            Ok(())
        }

        // Replay runs entirely in memory
        Command::Replay(args) => commands::replay::handle(args, &cli.global).await,

        Command::Snapshot(args) => {
            let client_config = build_snapshot_config(&cli.global)?;
            tracing::debug!(endpoint = %client_config.base_url, "snapshot endpoint resolved");
            commands::snapshot::handle(args, &client_config, &cli.global).await
        }
    }
}

/// Build a `SnapshotClientConfig` from the config file, profile, and CLI
/// overrides.
fn build_snapshot_config(global: &GlobalOpts) -> Result<SnapshotClientConfig, CliError> {
    let cfg = zonecast_config::load_config_or_default();

    // An explicit endpoint skips profile lookup entirely
    if let Some(ref endpoint) = global.endpoint {
        let base_url: url::Url = endpoint.parse().map_err(|_| CliError::Validation {
            field: "endpoint".into(),
            reason: format!("invalid URL: {endpoint}"),
        })?;
        let tls = if global.insecure {
            TlsMode::DangerAcceptInvalid
        } else {
            TlsMode::System
        };
        return Ok(SnapshotClientConfig {
            base_url,
            transport: TransportConfig {
                tls,
                timeout: Duration::from_secs(global.timeout.unwrap_or(cfg.defaults.timeout)),
            },
            api_token: global
                .api_token
                .clone()
                .map(secrecy::SecretString::from),
        });
    }

    if cfg.profiles.is_empty() {
        return Err(CliError::NoConfig {
            path: zonecast_config::config_path().display().to_string(),
        });
    }

    let (name, profile) = cfg.profile(global.profile.as_deref()).map_err(|e| match e {
        zonecast_config::ConfigError::UnknownProfile(name) => {
            let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
            available.sort_unstable();
            CliError::ProfileNotFound {
                name,
                available: available.join(", "),
            }
        }
        other => other.into(),
    })?;

    let mut config = zonecast_config::profile_to_snapshot_config(&cfg, profile, name)?;
    if global.insecure {
        config.transport.tls = TlsMode::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        config.transport.timeout = Duration::from_secs(secs);
    }
    if let Some(ref token) = global.api_token {
        config.api_token = Some(secrecy::SecretString::from(token.clone()));
    }
    Ok(config)
}
