use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, ValueEnum};
use std::path::PathBuf;

use formato::{
    config::BatchOptions, generate_report, logging, utils::parse_color, Config, ConflictPolicy,
    ConversionReport, FormatoCore, ReportFormat, TargetFormat,
};

#[cfg(feature = "cli")]
use formato::progress::ConsoleProgressReporter;

/// formato - Batch image format converter
///
/// Converts JPEG, PNG, WEBP, BMP and TIFF images into any of those formats in parallel
#[derive(Parser)]
#[command(name = "formato")]
#[command(about = "formato - Batch image format converter")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = r#"
formato converts batches of images between JPEG, PNG, WEBP, BMP and TIFF.

Features:
• Parallel conversion across all CPU cores
• Optional resize to a target width, keeping the aspect ratio
• Transparency flattened onto a chosen background for JPEG output
• EXIF metadata carried over into JPEG output
• One unreadable file never stops the rest of the batch
• JSON or CSV conversion reports
"#)]
pub struct Args {
    /// Image files and/or folders to convert
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output directory path (defaults to ./formato_output)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Target format
    #[arg(short, long, value_enum)]
    pub format: Option<TargetFormatArg>,

    /// Quality for JPEG and WEBP output (1-100)
    #[arg(short, long, value_name = "QUALITY", value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,

    /// Resize to this width, keeping the aspect ratio
    #[arg(short, long, value_name = "PIXELS", value_parser = clap::value_parser!(u32).range(1..))]
    pub width: Option<u32>,

    /// Do not carry EXIF metadata into JPEG output
    #[arg(long)]
    pub no_metadata: bool,

    /// Background for flattening transparency, as "R,G,B" or "#RRGGBB"
    #[arg(long, value_name = "COLOR")]
    pub background: Option<String>,

    /// What to do when a destination file already exists
    #[arg(long, value_enum, value_name = "POLICY")]
    pub on_conflict: Option<ConflictPolicyArg>,

    /// Overwrite existing files (same as --on-conflict overwrite)
    #[arg(long, conflicts_with = "on_conflict")]
    pub overwrite: bool,

    /// Descend into sub-folders of input folders
    #[arg(short, long)]
    pub recursive: bool,

    /// Number of parallel threads (defaults to CPU core count)
    #[arg(short, long, value_name = "NUM")]
    pub threads: Option<usize>,

    /// Verbose output mode
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (results only)
    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Generate conversion report in the output directory
    #[arg(long)]
    pub report: bool,

    /// Report output format
    #[arg(long, value_enum)]
    pub report_format: Option<ReportFormatArg>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use a predefined configuration profile
    #[arg(long, value_name = "PROFILE")]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TargetFormatArg {
    #[value(alias = "jpg")]
    Jpeg,
    Png,
    Webp,
    Bmp,
    #[value(alias = "tif")]
    Tiff,
}

impl From<TargetFormatArg> for TargetFormat {
    fn from(format: TargetFormatArg) -> Self {
        match format {
            TargetFormatArg::Jpeg => TargetFormat::Jpeg,
            TargetFormatArg::Png => TargetFormat::Png,
            TargetFormatArg::Webp => TargetFormat::WebP,
            TargetFormatArg::Bmp => TargetFormat::Bmp,
            TargetFormatArg::Tiff => TargetFormat::Tiff,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConflictPolicyArg {
    /// Write `<name>_converted.<ext>` next to the existing file
    Rename,
    /// Replace the existing file
    Overwrite,
    /// Leave the existing file alone
    Skip,
}

impl From<ConflictPolicyArg> for ConflictPolicy {
    fn from(policy: ConflictPolicyArg) -> Self {
        match policy {
            ConflictPolicyArg::Rename => ConflictPolicy::Rename,
            ConflictPolicyArg::Overwrite => ConflictPolicy::Overwrite,
            ConflictPolicyArg::Skip => ConflictPolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReportFormatArg {
    Json,
    Csv,
}

impl From<ReportFormatArg> for ReportFormat {
    fn from(format: ReportFormatArg) -> Self {
        match format {
            ReportFormatArg::Json => ReportFormat::Json,
            ReportFormatArg::Csv => ReportFormat::Csv,
        }
    }
}

fn main() -> Result<()> {
    if std::env::args().len() == 1 {
        Args::command().print_help()?;
        println!();
        std::process::exit(0);
    }

    let args = Args::parse();

    let config = load_config(&args)?;
    let (verbose, quiet) = match &config {
        Some(config) => config.verbosity(args.verbose, args.quiet),
        None => (args.verbose, args.quiet),
    };

    let logger = logging::init(logging::level_for(verbose, quiet));
    let options = build_options(&args, config.as_ref())?;
    log::debug!("Batch options: {:?}", options);

    let mut core = FormatoCore::new(options.clone());
    // Per-file engine records duplicate the progress lines unless asked for
    if verbose {
        core = core.with_logger(logger);
    }

    #[cfg(feature = "cli")]
    let progress_reporter = if !quiet {
        Some(Box::new(ConsoleProgressReporter::new()) as Box<dyn formato::ProgressReporter>)
    } else {
        None
    };

    #[cfg(not(feature = "cli"))]
    let progress_reporter = None;

    let report = core.run_with_progress(progress_reporter)?;

    if options.generate_report {
        let path = generate_report(&report, options.report_format, &options.output_dir)?;
        log::info!("Report saved to: {}", path.display());
    }

    if !quiet {
        print_results_summary(&report);
    }

    Ok(())
}

/// The `--config` file, else the one at the default location if present
fn load_config(args: &Args) -> Result<Option<Config>> {
    match &args.config {
        Some(path) => Config::load(path).map(Some),
        None => Config::load_default(),
    }
}

/// Defaults, then the config file, then the profile, then explicit flags
fn build_options(args: &Args, config: Option<&Config>) -> Result<BatchOptions> {
    let mut options = BatchOptions::new(args.inputs.clone());

    match config {
        Some(config) => options = config.apply(options, args.profile.as_deref())?,
        None if args.profile.is_some() => {
            anyhow::bail!("--profile needs a config file (pass one with --config)")
        }
        None => {}
    }

    if let Some(output) = &args.output {
        options = options.with_output_dir(output.clone());
    }
    if let Some(format) = args.format {
        options = options.with_format(format.into());
    }
    if let Some(quality) = args.quality {
        options = options.with_quality(quality);
    }
    if let Some(width) = args.width {
        options = options.with_resize_width(Some(width));
    }
    if args.no_metadata {
        options = options.with_preserve_metadata(false);
    }
    if let Some(color) = &args.background {
        let background = parse_color(color).context("Invalid --background")?;
        options = options.with_background(background);
    }
    if args.overwrite {
        options = options.with_conflict_policy(ConflictPolicy::Overwrite);
    } else if let Some(policy) = args.on_conflict {
        options = options.with_conflict_policy(policy.into());
    }
    if args.recursive {
        options = options.with_recursive(true);
    }
    if let Some(threads) = args.threads {
        options = options.with_threads(threads);
    }
    if args.report {
        options.generate_report = true;
    }
    if let Some(format) = args.report_format {
        options.report_format = format.into();
    }

    Ok(options)
}

fn print_results_summary(report: &ConversionReport) {
    use humansize::{format_size, DECIMAL};

    if report.cancelled {
        println!("\n🛑 Conversion stopped early");
    } else {
        println!("\n🎉 Conversion completed!");
    }
    println!("📊 Results Summary ({}, quality {}):", report.target_format, report.quality);
    println!("  ✅ Converted: {} files", report.converted_files);
    if report.failed_files > 0 {
        println!("  ❌ Failed: {} files", report.failed_files);
    }
    if report.skipped_files > 0 {
        println!("  ⏭️ Skipped: {} files", report.skipped_files);
    }
    println!("  📁 Output: {}", report.output_dir.display());

    if report.original_size > 0 {
        println!("\n💾 Size:");
        println!("  📦 Original size: {}", format_size(report.original_size, DECIMAL));
        println!("  🗜️ Converted size: {}", format_size(report.converted_size, DECIMAL));
        println!("  📐 Output/input ratio: {:.1}%", report.size_ratio * 100.0);
    }

    println!("\n⏱️ Performance:");
    println!("  🕐 Duration: {}", formato::format_duration(report.duration));
    println!("  🚀 Speed: {:.1} files/sec", report.files_per_second);
    println!("  🧵 Threads used: {}", report.thread_count);

    if !report.failures.is_empty() && report.failures.len() <= 5 {
        println!("\n❌ Errors:");
        for failure in &report.failures {
            println!("  • {}: {}: {}", failure.file, failure.kind, failure.message);
        }
    } else if report.failures.len() > 5 {
        println!(
            "\n❌ {} errors occurred (use --report for full details)",
            report.failures.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "formato", "a.png", "photos", "-f", "webp", "-q", "60", "-w", "320", "--no-metadata",
            "--background", "0,0,0", "--on-conflict", "skip", "-t", "3", "--report",
            "--report-format", "csv", "-c", "/nonexistent/formato.toml",
        ])
        .unwrap();
        assert_eq!(args.inputs.len(), 2);
        assert!(matches!(args.format, Some(TargetFormatArg::Webp)));
        assert!(matches!(args.on_conflict, Some(ConflictPolicyArg::Skip)));
        assert!(load_config(&args).is_err());

        let args = Args::try_parse_from([
            "formato", "a.png", "-f", "jpg", "-q", "60", "-w", "320", "--no-metadata",
            "--background", "#000000", "--overwrite", "-t", "3", "--report-format", "csv",
        ])
        .unwrap();
        assert_eq!(TargetFormat::from(args.format.unwrap()), TargetFormat::Jpeg);
        assert_eq!(args.quality, Some(60));
        assert_eq!(args.width, Some(320));
        assert!(args.no_metadata);
        assert!(args.overwrite);
        assert_eq!(ConflictPolicy::from(ConflictPolicyArg::Overwrite), ConflictPolicy::Overwrite);
    }

    #[test]
    fn flags_win_over_the_config_file() {
        let config: Config = toml::from_str(
            "[conversion]\nformat = \"png\"\nquality = 50\n[output]\nquiet = true",
        )
        .unwrap();
        let args = Args::try_parse_from(["formato", "a.png", "-q", "90"]).unwrap();

        let options = build_options(&args, Some(&config)).unwrap();
        assert_eq!(options.format, TargetFormat::Png);
        assert_eq!(options.quality, 90);
        assert_eq!(config.verbosity(args.verbose, args.quiet), (false, true));

        let args = Args::try_parse_from(["formato", "a.png", "--profile", "web"]).unwrap();
        assert!(build_options(&args, None).is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(Args::try_parse_from(["formato", "a.png", "-q", "0"]).is_err());
        assert!(Args::try_parse_from(["formato", "a.png", "-q", "101"]).is_err());
        assert!(Args::try_parse_from(["formato", "a.png", "-w", "0"]).is_err());
        assert!(Args::try_parse_from(["formato", "a.png", "-f", "gif"]).is_err());
        assert!(Args::try_parse_from(["formato", "a.png", "--overwrite", "--on-conflict", "skip"]).is_err());
        assert!(Args::try_parse_from(["formato"]).is_err());
    }

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }
}
