//! Quality command: persisted rule results of one run

use anyhow::{Context, Result};

use crate::cli::{GlobalArgs, QualityArgs};
use crate::commands::common::{self, Workspace};

/// Execute the quality command
pub async fn execute(args: &QualityArgs, global: &GlobalArgs) -> Result<()> {
    let workspace = Workspace::load(global)?;
    let meta = workspace.open_meta()?;

    let Some(run) = meta.get_run(&args.run_id)? else {
        anyhow::bail!("Run {} not found", args.run_id);
    };
    let results = meta
        .quality_results(&args.run_id)
        .context("Failed to read quality results")?;

    if args.json {
        return common::print_json(&results);
    }

    println!(
        "Run {} ({}, {}) quality score: {}\n",
        run.run_id,
        run.entity,
        run.status,
        run.quality_score
            .map(|s| format!("{s:.2}"))
            .unwrap_or_else(|| "-".to_string())
    );
    if results.is_empty() {
        println!("(0 rules)");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = results
        .iter()
        .map(|r| {
            vec![
                r.rule.clone(),
                r.field.clone(),
                r.check.clone(),
                r.severity.clone(),
                format!("{}/{}", r.records_failed, r.records_checked),
                format!("{:.2}", r.score),
                if r.passed { "pass" } else { "fail" }.to_string(),
            ]
        })
        .collect();
    common::print_table(
        &["RULE", "FIELD", "CHECK", "SEVERITY", "FAILED", "SCORE", "RESULT"],
        &rows,
    );
    println!("\n({} rules)", results.len());
    Ok(())
}
