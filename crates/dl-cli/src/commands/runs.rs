//! Runs command: list recent runs, abort a stuck one

use anyhow::{Context, Result};
use dl_meta::RunRecord;
use dl_pipeline::RunTracker;
use std::sync::Arc;

use crate::cli::{AbortArgs, GlobalArgs, RunsArgs, RunsCommands};
use crate::commands::common::{self, Workspace};

/// Execute the runs command
pub async fn execute(args: &RunsArgs, global: &GlobalArgs) -> Result<()> {
    let workspace = Workspace::load(global)?;
    let checksum = workspace.config.checksum()?;
    let meta = Arc::new(workspace.open_meta()?);
    let tracker = RunTracker::new(meta, &workspace.config.name, &checksum);

    match &args.command {
        Some(RunsCommands::Abort(abort)) => execute_abort(&tracker, abort),
        None => execute_list(&tracker, args.limit, args.json),
    }
}

fn execute_abort(tracker: &RunTracker, args: &AbortArgs) -> Result<()> {
    let run = tracker
        .abort_run(&args.run_id, &args.reason)
        .with_context(|| format!("Failed to abort run {}", args.run_id))?;
    println!("Run {} for {} marked {}", run.run_id, run.entity, run.status);
    Ok(())
}

fn execute_list(tracker: &RunTracker, limit: usize, json: bool) -> Result<()> {
    let runs = tracker.recent_runs(limit).context("Failed to read runs")?;
    if json {
        return common::print_json(&runs);
    }
    if runs.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = runs.iter().map(run_row).collect();
    common::print_table(
        &[
            "RUN_ID", "ENTITY", "MODE", "STATUS", "STARTED", "EXTRACTED", "REJECTED", "WRITTEN",
            "QUALITY", "ERROR",
        ],
        &rows,
    );
    println!("\n({} runs)", runs.len());
    Ok(())
}

fn run_row(run: &RunRecord) -> Vec<String> {
    let counts = &run.counts;
    let written = counts.inserted + counts.updated + counts.expired + counts.facts_written;
    vec![
        run.run_id.clone(),
        run.entity.to_string(),
        run.load_mode.to_string(),
        run.status.to_string(),
        common::format_ts(run.started_at),
        counts.extracted.to_string(),
        counts.rejected.to_string(),
        written.to_string(),
        run.quality_score
            .map(|s| format!("{s:.1}"))
            .unwrap_or_else(|| "-".to_string()),
        run.error_message.clone().unwrap_or_default(),
    ]
}
