//! Checkpoint command: list and reset extraction cursors

use anyhow::{Context, Result};
use dl_meta::CheckpointStore;
use std::sync::Arc;

use crate::cli::{CheckpointArgs, CheckpointCommands, GlobalArgs};
use crate::commands::common::{self, Workspace};

/// Execute the checkpoint command
pub async fn execute(args: &CheckpointArgs, global: &GlobalArgs) -> Result<()> {
    let workspace = Workspace::load(global)?;
    let meta = Arc::new(workspace.open_meta()?);
    let store = CheckpointStore::new(meta, workspace.config.checkpoint.default_timestamp);

    match &args.command {
        CheckpointCommands::List => {
            let checkpoints = store.list().context("Failed to read checkpoints")?;
            if checkpoints.is_empty() {
                println!("No checkpoints recorded");
                return Ok(());
            }
            let rows: Vec<Vec<String>> = checkpoints
                .iter()
                .map(|c| {
                    vec![
                        c.entity.to_string(),
                        c.load_mode.to_string(),
                        common::format_ts(c.watermark.timestamp),
                        c.watermark.identifier.clone(),
                        c.records_loaded.to_string(),
                        common::format_ts(c.updated_at),
                    ]
                })
                .collect();
            common::print_table(
                &["ENTITY", "MODE", "TIMESTAMP", "IDENTIFIER", "RECORDS", "UPDATED"],
                &rows,
            );
        }
        CheckpointCommands::Reset(reset) => {
            workspace
                .config
                .require_entity(&reset.entity)
                .context("Cannot reset checkpoint")?;
            if store.reset(&reset.entity)? {
                println!("Checkpoint for {} reset", reset.entity);
            } else {
                println!("No checkpoint recorded for {}", reset.entity);
            }
        }
    }
    Ok(())
}
