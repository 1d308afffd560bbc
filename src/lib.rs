//! # Formato Library
//!
//! Batch image format converter core library.
//!
//! The heart of the crate is [`ImageConverter`], which turns one source image
//! into one JPEG, PNG, WEBP, BMP or TIFF file (resizing, flattening alpha and
//! carrying EXIF along as requested). [`FormatoCore`] drives it over a batch of
//! files in parallel and aggregates the outcome into a [`ConversionReport`].

pub mod config;
pub mod converter;
pub mod core;
pub mod error;
pub mod format;
pub mod logging;
pub mod progress;
pub mod stats;
pub mod utils;

// Re-export commonly used types
pub use config::{BatchOptions, Config, ProfileConfig};
pub use converter::{convert, ConversionRequest, ConversionResult, ImageConverter};
pub use self::core::{spawn_batch, BatchHandle, FormatoCore};
pub use error::{ConversionError, ErrorKind};
pub use format::TargetFormat;
pub use progress::{BatchEvent, ProgressReporter};
pub use stats::{ConversionStats, FailureRecord};
pub use utils::format_duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Summary of one batch run
#[derive(Debug, Serialize, Clone)]
pub struct ConversionReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Duration,
    pub inputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub total_files: u64,
    pub converted_files: u64,
    pub failed_files: u64,
    pub skipped_files: u64,
    /// Set when the batch was stopped before every file was attempted
    pub cancelled: bool,
    pub original_size: u64,
    pub converted_size: u64,
    pub size_ratio: f64,
    pub files_per_second: f64,
    pub thread_count: usize,
    pub target_format: String,
    pub quality: u8,
    pub format_stats: HashMap<String, u64>,
    pub failures: Vec<FailureRecord>,
}

/// Report output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Csv,
}

impl FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            other => bail!("Unknown report format '{other}' (expected json or csv)"),
        }
    }
}

/// What the batch driver does when a destination file already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Write next to it as `<stem>_converted.<ext>` (numbered if needed)
    #[default]
    Rename,
    /// Replace the existing file
    Overwrite,
    /// Leave the existing file and count the input as skipped
    Skip,
}

impl FromStr for ConflictPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rename" => Ok(ConflictPolicy::Rename),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "skip" => Ok(ConflictPolicy::Skip),
            other => bail!("Unknown conflict policy '{other}' (expected rename, overwrite or skip)"),
        }
    }
}

/// Write `report` into `dir` and return the file path
pub fn generate_report(report: &ConversionReport, format: ReportFormat, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;

    match format {
        ReportFormat::Json => generate_json_report(report, &dir.join("formato_report.json")),
        ReportFormat::Csv => generate_csv_report(report, &dir.join("formato_report.csv")),
    }
}

fn generate_json_report(report: &ConversionReport, path: &Path) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(path.to_path_buf())
}

fn generate_csv_report(report: &ConversionReport, path: &Path) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create report: {}", path.display()))?;

    let rows: Vec<(&str, String)> = vec![
        ("start_time", report.start_time.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ("end_time", report.end_time.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ("duration_seconds", format!("{:.3}", report.duration.as_secs_f64())),
        ("output_dir", report.output_dir.display().to_string()),
        ("total_files", report.total_files.to_string()),
        ("converted_files", report.converted_files.to_string()),
        ("failed_files", report.failed_files.to_string()),
        ("skipped_files", report.skipped_files.to_string()),
        ("cancelled", report.cancelled.to_string()),
        ("original_size_bytes", report.original_size.to_string()),
        ("converted_size_bytes", report.converted_size.to_string()),
        ("size_ratio", format!("{:.4}", report.size_ratio)),
        ("files_per_second", format!("{:.2}", report.files_per_second)),
        ("thread_count", report.thread_count.to_string()),
        ("target_format", report.target_format.clone()),
        ("quality", report.quality.to_string()),
    ];

    writer.write_record(["metric", "value"])?;
    for (metric, value) in &rows {
        writer.write_record([*metric, value.as_str()])?;
    }
    for failure in &report.failures {
        let value = format!("{}: {}: {}", failure.file, failure.kind, failure.message);
        writer.write_record(["failure", value.as_str()])?;
    }
    writer.flush()?;

    Ok(path.to_path_buf())
}
