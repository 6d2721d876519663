//! Terminal rendering for snaplog records and reports.
//!
//! Table output is for people; JSON and YAML dump the command's report
//! structure unchanged.

use anyhow::{bail, Result};
use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use snaplog_core::events::EntityKey;
use snaplog_core::protocol::SnapshotMetadata;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable sections and tables
    #[default]
    Table,
    /// The full report as JSON
    Json,
    /// The full report as YAML
    Yaml,
}

impl OutputFormat {
    pub fn is_table(self) -> bool {
        matches!(self, OutputFormat::Table)
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), msg);
}

/// Serialize a command's report. Only valid for the JSON and YAML formats.
pub fn print_report<T: Serialize>(report: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(report)?),
        OutputFormat::Table => bail!("table output has no serialized report"),
    }
    Ok(())
}

/// A titled table of entries or replicas.
pub fn print_section<T: Tabled>(title: &str, rows: &[T]) {
    println!();
    println!("{}", title.bold().underline());
    if rows.is_empty() {
        println!("  {}", "(none)".dimmed());
        return;
    }
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::right()))
        .to_string();
    println!("{}", table);
}

/// One aligned `name: value` line.
pub fn print_field(name: &str, value: impl std::fmt::Display) {
    let label = format!("{:<18}", format!("{}:", name));
    println!("  {} {}", label.cyan(), value);
}

/// Versions and snapshot bookkeeping of a primary record.
pub fn print_record<V, E>(
    title: &str,
    key: &EntityKey,
    etag: Option<&str>,
    metadata: &SnapshotMetadata<V, E>,
) {
    println!();
    println!("{}", title.bold().underline());
    print_field("Entity", key);
    if let Some(etag) = etag {
        print_field("ETag", etag);
    }
    print_field("Snapshot version", metadata.snapshot_version);
    print_field("Global version", metadata.global_version);
    print_field(
        "Cached entries",
        format!(
            "{} (from version {})",
            metadata.log.len(),
            metadata.cache_start()
        ),
    );
    print_field(
        "Snapshot taken",
        metadata
            .snapshot_updated_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string()),
    );
    print_field("Write vector", metadata.write_vector.encode());
}
