//! Run command implementation

use anyhow::{Context, Result};
use dl_core::{EntityKind, LoadMode};
use dl_db::CsvExtractor;
use dl_pipeline::{CancellationFlag, Pipeline, PipelineResult, RunReport};
use std::sync::Arc;
use std::time::Instant;

use crate::cli::{GlobalArgs, RunArgs};
use crate::commands::common::{ExitCode, Workspace};

/// Execute the run command
pub async fn execute(args: &RunArgs, global: &GlobalArgs) -> Result<()> {
    let start_time = Instant::now();
    let workspace = Workspace::load(global)?;
    let mode = args
        .mode
        .map(LoadMode::from)
        .unwrap_or(workspace.config.load_mode);

    let names: Vec<String> = args
        .entities
        .as_deref()
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let warehouse = Arc::new(workspace.open_warehouse()?);
    let meta = Arc::new(workspace.open_meta()?);
    let extractor = Arc::new(
        CsvExtractor::new(&workspace.base_dir).context("Failed to create CSV extractor")?,
    );

    let cancel = CancellationFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, cancelling at the next phase boundary");
            on_interrupt.cancel();
        }
    });

    let pipeline = Pipeline::new(workspace.config, warehouse, extractor, meta)
        .context("Failed to build pipeline")?
        .with_cancellation(cancel);

    println!("Loading in {mode} mode...\n");
    let results = pipeline.run_many(&names, mode).await?;

    let mut success_count = 0;
    let mut failure_count = 0;
    for result in &results {
        if print_result(&pipeline, result) {
            success_count += 1;
        } else {
            failure_count += 1;
        }
    }

    println!();
    println!("Completed: {success_count} succeeded, {failure_count} failed");
    println!("Total time: {}ms", start_time.elapsed().as_millis());

    if failure_count > 0 {
        return Err(ExitCode(4).into());
    }
    Ok(())
}

/// Print one line per entity; returns whether the run succeeded
fn print_result(pipeline: &Pipeline, result: &PipelineResult<RunReport>) -> bool {
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            println!("  ✗ {e}");
            return false;
        }
    };
    let run = &report.run;
    let counts = &run.counts;
    let millis = run.duration().map_or(0, |d| d.num_milliseconds());

    if let Some(error) = &run.error_message {
        println!("  ✗ {} - {} [{}ms]", run.entity, error, millis);
        return false;
    }

    let kind = pipeline
        .config()
        .entity(&run.entity)
        .map(|e| e.kind)
        .unwrap_or(EntityKind::Dimension);
    let detail = match kind {
        EntityKind::Dimension => format!(
            "inserted: {}, updated: {}, expired: {}, unchanged: {}",
            counts.inserted, counts.updated, counts.expired, counts.unchanged
        ),
        EntityKind::Fact => format!(
            "written: {}, duplicates: {}, unresolved: {}",
            counts.facts_written, counts.duplicates, counts.unresolved
        ),
    };
    let quality = run
        .quality_score
        .map(|s| format!(", quality: {s:.1}"))
        .unwrap_or_default();
    println!(
        "  ✓ {} ({detail}, rejected: {}{quality}) [{millis}ms]",
        run.entity, counts.rejected
    );
    report.succeeded()
}
