//! `zonecast snapshot <id>`: fetch one zone snapshot and validate it.

use zonecast_api::{SnapshotClient, SnapshotClientConfig};
use zonecast_core::{CoreError, EntityId, EntitySnapshot};

use crate::cli::{GlobalOpts, SnapshotArgs};
use crate::error::CliError;
use crate::output;

fn snapshot_detail(s: &EntitySnapshot) -> String {
    let mut lines = vec![
        format!("Zone:        {}", s.entity_id),
        format!("Snapshot:    {}", s.snapshot_id),
        format!(
            "Server time: {}",
            s.server_ts.map_or_else(|| "-".into(), |ts| ts.to_string())
        ),
    ];
    if !s.payload.is_empty() {
        let mut keys: Vec<&str> = s.payload.keys().map(String::as_str).collect();
        keys.sort_unstable();
        lines.push(format!("Payload:     {}", keys.join(", ")));
    }
    lines.join("\n")
}

pub async fn handle(
    args: SnapshotArgs,
    config: &SnapshotClientConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let client = SnapshotClient::new(config)
        .map_err(|e| CliError::from(CoreError::snapshot_fetch(args.entity_id, &e)))?;
    let envelope = client
        .get_snapshot(args.entity_id)
        .await
        .map_err(|e| CliError::from(CoreError::snapshot_fetch(args.entity_id, &e)))?;

    if args.raw {
        let out = output::render_single(
            &global.output,
            &envelope,
            |e| serde_json::to_string_pretty(e).unwrap_or_default(),
            |e| e.status.clone(),
        )?;
        output::print_output(&out, global.quiet);
        return Ok(());
    }

    let snapshot = zonecast_core::snapshot::validate_envelope(EntityId(args.entity_id), envelope)?;
    let out = output::render_single(&global.output, &snapshot, snapshot_detail, |s| {
        s.snapshot_id.clone()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
