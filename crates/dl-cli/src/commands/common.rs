//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dl_core::Config;
use dl_db::DuckDbWarehouse;
use dl_meta::MetaDb;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::cli::GlobalArgs;

const IN_MEMORY: &str = ":memory:";

/// Error type representing a non-zero process exit code.
///
/// Use `return Err(ExitCode(N).into())` instead of `std::process::exit(N)`
/// so that RAII destructors run and cleanup happens properly.
#[derive(Debug)]
pub(crate) struct ExitCode(pub(crate) i32);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Control flow only; nothing user-facing to print
        write!(f, "")
    }
}

impl std::error::Error for ExitCode {}

/// Loaded configuration plus the directory relative paths resolve against
pub(crate) struct Workspace {
    pub(crate) config: Config,
    pub(crate) base_dir: PathBuf,
}

impl Workspace {
    pub(crate) fn load(global: &GlobalArgs) -> Result<Self> {
        let path = Path::new(&global.config);
        let config = Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self { config, base_dir })
    }

    pub(crate) fn resolve(&self, path: &str) -> PathBuf {
        self.base_dir.join(path)
    }

    pub(crate) fn open_meta(&self) -> Result<MetaDb> {
        let path = &self.config.meta.path;
        if path == IN_MEMORY {
            return MetaDb::open_memory().context("Failed to open in-memory meta database");
        }
        let path = self.resolve(path);
        MetaDb::open(&path)
            .with_context(|| format!("Failed to open meta database {}", path.display()))
    }

    pub(crate) fn open_warehouse(&self) -> Result<DuckDbWarehouse> {
        let path = &self.config.warehouse.path;
        if path == IN_MEMORY {
            return DuckDbWarehouse::in_memory().context("Failed to open in-memory warehouse");
        }
        let path = self.resolve(path);
        DuckDbWarehouse::from_path(&path)
            .with_context(|| format!("Failed to open warehouse {}", path.display()))
    }
}

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn calculate_column_widths(headers: &[&str], rows: &[Vec<String>]) -> Vec<usize> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    widths
}

pub(crate) fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let widths = calculate_column_widths(headers, rows);

    let header_parts: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, &w)| format!("{:<width$}", h, width = w))
        .collect();
    println!("{}", header_parts.join("  "));

    let sep_parts: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep_parts.join("  "));

    for row in rows {
        let row_parts: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{:<width$}", cell, width = w))
            .collect();
        println!("{}", row_parts.join("  "));
    }
}

pub(crate) fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context("Failed to serialize JSON output")?;
    println!("{output}");
    Ok(())
}

#[cfg(test)]
#[path = "common_test.rs"]
mod tests;
