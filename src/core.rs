use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver};
use log::Log;
use rayon::prelude::*;
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use walkdir::WalkDir;

use crate::{
    config::BatchOptions,
    converter::ImageConverter,
    format::TargetFormat,
    generate_report,
    progress::{BatchEvent, ChannelProgressReporter, ProgressReporter},
    stats::ConversionStats,
    utils::{file_extension, fit_to_width, is_supported_input},
    ConflictPolicy, ConversionReport,
};

/// What happens to one input file
#[derive(Debug, Clone, PartialEq, Eq)]
enum PlannedJob {
    Convert { source: PathBuf, destination: PathBuf },
    Skip { source: PathBuf, destination: PathBuf },
}

/// Batch driver: enumerates inputs, picks destinations and runs the
/// conversion engine once per file
pub struct FormatoCore {
    options: BatchOptions,
    stats: ConversionStats,
    converter: ImageConverter,
    cancel: Arc<AtomicBool>,
}

impl FormatoCore {
    /// Create a new batch driver with the given options
    pub fn new(options: BatchOptions) -> Self {
        Self {
            options,
            stats: ConversionStats::new(),
            converter: ImageConverter::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hand the engine a logger
    pub fn with_logger(mut self, logger: Arc<dyn Log>) -> Self {
        self.converter = ImageConverter::new().with_logger(logger);
        self
    }

    /// Flag that stops the batch before the next file starts.
    /// Files already being converted run to completion.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the complete conversion process
    pub fn run(&mut self) -> Result<ConversionReport> {
        self.run_with_progress(None)
    }

    /// Run the conversion process with progress reporting
    pub fn run_with_progress(
        &mut self,
        progress_reporter: Option<Box<dyn ProgressReporter>>,
    ) -> Result<ConversionReport> {
        let start_time = Instant::now();
        let start_time_utc = Utc::now();
        self.stats = ConversionStats::new();

        let output_dir = self.options.output_dir.clone();
        std::fs::create_dir_all(&output_dir).with_context(|| {
            format!("Failed to create output directory: {}", output_dir.display())
        })?;

        let files = self.collect_input_files();
        let jobs = self.plan_jobs(&files, &output_dir);
        log::info!(
            "Converting {} file(s) to {} in {}",
            jobs.len(),
            self.options.format,
            output_dir.display()
        );

        let reporter = progress_reporter.as_deref();
        if let Some(reporter) = reporter {
            reporter.set_total_files(jobs.len());
            reporter.start_conversion();
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.get_thread_count())
            .build()
            .context("Failed to build conversion thread pool")?;
        let thread_count = pool.current_num_threads();

        pool.install(|| self.convert_all(&jobs, reporter));

        if let Some(reporter) = reporter {
            reporter.finish_conversion();
        }

        let duration = start_time.elapsed();
        let converted_files = self.stats.converted_count.load(Ordering::Relaxed);
        let completed = self.stats.completed();
        let cancelled = self.cancel.load(Ordering::Relaxed) && completed < jobs.len() as u64;
        if cancelled {
            log::warn!("Batch cancelled after {} of {} file(s)", completed, jobs.len());
        }

        let files_per_second = if duration.as_secs_f64() > 0.0 {
            converted_files as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Ok(ConversionReport {
            start_time: start_time_utc,
            end_time: Utc::now(),
            duration,
            inputs: self.options.inputs.clone(),
            output_dir,
            total_files: jobs.len() as u64,
            converted_files,
            failed_files: self.stats.error_count.load(Ordering::Relaxed),
            skipped_files: self.stats.skipped_count.load(Ordering::Relaxed),
            cancelled,
            original_size: self.stats.original_size.load(Ordering::Relaxed),
            converted_size: self.stats.converted_size.load(Ordering::Relaxed),
            size_ratio: self.stats.get_size_ratio(),
            files_per_second,
            thread_count,
            target_format: self.options.format.to_string(),
            quality: self.options.quality,
            format_stats: self.stats.get_format_stats(),
            failures: self.stats.get_failures(),
        })
    }

    /// Expand folders into their image files; plain files are kept as given
    /// so that unreadable ones surface as failures instead of vanishing.
    fn collect_input_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut seen = HashSet::new();
        let max_depth = if self.options.recursive { usize::MAX } else { 1 };

        for input in &self.options.inputs {
            if !input.is_dir() {
                if seen.insert(input.clone()) {
                    files.push(input.clone());
                }
                continue;
            }

            for entry in WalkDir::new(input)
                .max_depth(max_depth)
                .follow_links(false)
                .sort_by_file_name()
            {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::warn!("Failed to read directory entry under {}: {}", input.display(), e);
                        continue;
                    }
                };

                let path = entry.path();
                if entry.file_type().is_file()
                    && is_supported_input(path)
                    && seen.insert(path.to_path_buf())
                {
                    files.push(path.to_path_buf());
                }
            }
        }

        files
    }

    /// Assign every input a destination, applying the conflict policy.
    /// Runs before any conversion so parallel workers never race for a name.
    fn plan_jobs(&self, files: &[PathBuf], output_dir: &Path) -> Vec<PlannedJob> {
        self.plan_jobs_into(files, output_dir, ClaimedPaths::new(CASE_INSENSITIVE_FS))
    }

    fn plan_jobs_into(
        &self,
        files: &[PathBuf],
        output_dir: &Path,
        mut claimed: ClaimedPaths,
    ) -> Vec<PlannedJob> {
        let mut jobs = Vec::with_capacity(files.len());

        for source in files {
            let preferred = destination_for(source, output_dir, self.options.format);

            let job = if claimed.contains(&preferred) {
                // Two inputs share a stem; never let one overwrite the other
                PlannedJob::Convert {
                    source: source.clone(),
                    destination: free_alternative(&preferred, &claimed),
                }
            } else if !preferred.exists() {
                PlannedJob::Convert {
                    source: source.clone(),
                    destination: preferred,
                }
            } else {
                match self.options.conflict {
                    ConflictPolicy::Overwrite => PlannedJob::Convert {
                        source: source.clone(),
                        destination: preferred,
                    },
                    ConflictPolicy::Skip => PlannedJob::Skip {
                        source: source.clone(),
                        destination: preferred,
                    },
                    ConflictPolicy::Rename => PlannedJob::Convert {
                        source: source.clone(),
                        destination: free_alternative(&preferred, &claimed),
                    },
                }
            };

            if let PlannedJob::Convert { destination, .. } = &job {
                claimed.insert(destination);
            }
            jobs.push(job);
        }

        jobs
    }

    /// Convert images with parallel processing
    fn convert_all(&self, jobs: &[PlannedJob], reporter: Option<&dyn ProgressReporter>) {
        jobs.par_iter().for_each(|job| {
            if self.cancel.load(Ordering::Relaxed) {
                return;
            }

            match job {
                PlannedJob::Skip {
                    source,
                    destination,
                } => {
                    self.stats.record_skip();
                    log::info!("Skipping {}: {} already exists", source.display(), destination.display());
                    if let Some(reporter) = reporter {
                        reporter.report_skip(source, destination);
                    }
                }
                PlannedJob::Convert {
                    source,
                    destination,
                } => self.convert_one(source, destination, reporter),
            }

            if let Some(reporter) = reporter {
                reporter.update_progress(
                    self.stats.completed() as usize,
                    self.stats.error_count.load(Ordering::Relaxed) as usize,
                );
            }
        });
    }

    /// Process a single file conversion
    fn convert_one(&self, source: &Path, destination: &Path, reporter: Option<&dyn ProgressReporter>) {
        if let Some(extension) = file_extension(source) {
            self.stats.record_format(&extension);
        }

        let resize = self.resize_target(source);
        let request = self.options.request_for(source, destination, resize);

        match self.converter.convert(&request) {
            Ok(()) => {
                let original_size = file_size(source);
                let converted_size = file_size(destination);
                self.stats.record_success(original_size, converted_size);
                if let Some(reporter) = reporter {
                    reporter.report_success(source, destination, original_size, converted_size);
                }
            }
            Err(e) => {
                self.stats.record_error(source.display().to_string(), &e);
                if let Some(detail) = e.detail() {
                    log::debug!("Conversion of {} failed:\n{}", source.display(), detail);
                }
                if let Some(reporter) = reporter {
                    reporter.report_error(source, &e);
                }
            }
        }
    }

    /// Exact engine resize target that keeps the source's aspect ratio
    fn resize_target(&self, source: &Path) -> Option<(u32, u32)> {
        let width = self.options.resize_width?;
        match read_dimensions(source) {
            Ok(dimensions) => Some(fit_to_width(width, dimensions)),
            Err(e) => {
                log::debug!("Not resizing {}: {:#}", source.display(), e);
                None
            }
        }
    }

    /// Get current conversion statistics
    pub fn get_stats(&self) -> &ConversionStats {
        &self.stats
    }
}

/// Default filesystems on Windows and macOS ignore case in file names
const CASE_INSENSITIVE_FS: bool = cfg!(any(target_os = "windows", target_os = "macos"));

/// Destinations already handed out in the current plan
#[derive(Debug)]
struct ClaimedPaths {
    fold_case: bool,
    keys: HashSet<PathBuf>,
}

impl ClaimedPaths {
    fn new(fold_case: bool) -> Self {
        Self {
            fold_case,
            keys: HashSet::new(),
        }
    }

    fn key(&self, path: &Path) -> PathBuf {
        if self.fold_case {
            PathBuf::from(path.to_string_lossy().to_lowercase())
        } else {
            path.to_path_buf()
        }
    }

    fn contains(&self, path: &Path) -> bool {
        self.keys.contains(&self.key(path))
    }

    fn insert(&mut self, path: &Path) {
        let key = self.key(path);
        self.keys.insert(key);
    }
}

/// `<output_dir>/<source stem>.<target extension>`
fn destination_for(source: &Path, output_dir: &Path, format: TargetFormat) -> PathBuf {
    let stem = source.file_stem().unwrap_or_else(|| OsStr::new("image"));
    output_dir.join(with_suffix_and_extension(stem, "", format.extension()))
}

/// First `<stem>_converted[_N].<ext>` next to `preferred` that is free
fn free_alternative(preferred: &Path, claimed: &ClaimedPaths) -> PathBuf {
    let parent = preferred.parent().unwrap_or_else(|| Path::new(""));
    let stem = preferred.file_stem().unwrap_or_else(|| OsStr::new("image"));
    let extension = preferred
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut attempt = 1u32;
    loop {
        let suffix = if attempt == 1 {
            "_converted".to_string()
        } else {
            format!("_converted_{attempt}")
        };
        let candidate = parent.join(with_suffix_and_extension(stem, &suffix, &extension));
        if !claimed.contains(&candidate) && !candidate.exists() {
            return candidate;
        }
        attempt += 1;
    }
}

fn with_suffix_and_extension(stem: &OsStr, suffix: &str, extension: &str) -> OsString {
    let mut name = stem.to_os_string();
    name.push(suffix);
    if !extension.is_empty() {
        name.push(".");
        name.push(extension);
    }
    name
}

fn read_dimensions(path: &Path) -> Result<(u32, u32)> {
    let reader = image::ImageReader::open(path)?.with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// A batch running on a background thread
pub struct BatchHandle {
    /// Progress stream; ends with `Finished` or `Aborted`
    pub events: Receiver<BatchEvent>,
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl BatchHandle {
    /// Stop before the next file starts
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker thread to exit
    pub fn join(self) {
        if self.thread.join().is_err() {
            log::error!("Batch thread panicked");
        }
    }
}

/// Run a batch on its own thread and stream its progress over a channel,
/// so an event loop can poll for updates without blocking.
pub fn spawn_batch(options: BatchOptions, logger: Option<Arc<dyn Log>>) -> BatchHandle {
    let (sender, receiver) = unbounded();
    let report_format = options.generate_report.then_some(options.report_format);
    let report_dir = options.output_dir.clone();

    let mut core = FormatoCore::new(options);
    if let Some(logger) = logger {
        core = core.with_logger(logger);
    }
    let cancel = core.cancel_handle();

    let thread = thread::spawn(move || {
        let reporter = Box::new(ChannelProgressReporter::new(sender.clone())) as Box<dyn ProgressReporter>;

        let event = match core.run_with_progress(Some(reporter)) {
            Ok(report) => {
                if let Some(format) = report_format {
                    match generate_report(&report, format, &report_dir) {
                        Ok(path) => log::info!("Report saved to: {}", path.display()),
                        Err(e) => log::warn!("Failed to write report: {:#}", e),
                    }
                }
                BatchEvent::Finished(Box::new(report))
            }
            Err(e) => BatchEvent::Aborted(format!("{e:#}")),
        };

        let _ = sender.send(event);
    });

    BatchHandle {
        events: receiver,
        cancel,
        thread,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 7) as u8, (y * 11) as u8, 90]))
            .save(path)
            .unwrap();
    }

    fn options_for(tmp: &TempDir, inputs: Vec<PathBuf>) -> BatchOptions {
        BatchOptions::new(inputs)
            .with_output_dir(tmp.path().join("out"))
            .with_threads(2)
    }

    #[test]
    fn destinations_use_the_target_extension() {
        let destination = destination_for(Path::new("in/photo.final.png"), Path::new("out"), TargetFormat::Jpeg);
        assert_eq!(destination, PathBuf::from("out/photo.final.jpg"));
    }

    #[test]
    fn renames_pick_the_first_free_name() {
        let tmp = TempDir::new().unwrap();
        let preferred = tmp.path().join("a.jpg");
        fs::write(&preferred, b"x").unwrap();
        fs::write(tmp.path().join("a_converted.jpg"), b"x").unwrap();

        let mut claimed = ClaimedPaths::new(false);
        claimed.insert(&tmp.path().join("a_converted_2.jpg"));

        assert_eq!(free_alternative(&preferred, &claimed), tmp.path().join("a_converted_3.jpg"));
    }

    #[test]
    fn conflict_policy_shapes_the_plan() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("taken.jpg"), b"old").unwrap();
        let files = vec![tmp.path().join("taken.png")];

        let plan = |policy| {
            FormatoCore::new(options_for(&tmp, files.clone()).with_conflict_policy(policy))
                .plan_jobs(&files, &out)
        };

        assert_eq!(
            plan(ConflictPolicy::Overwrite),
            vec![PlannedJob::Convert {
                source: files[0].clone(),
                destination: out.join("taken.jpg")
            }]
        );
        assert_eq!(
            plan(ConflictPolicy::Skip),
            vec![PlannedJob::Skip {
                source: files[0].clone(),
                destination: out.join("taken.jpg")
            }]
        );
        assert_eq!(
            plan(ConflictPolicy::Rename),
            vec![PlannedJob::Convert {
                source: files[0].clone(),
                destination: out.join("taken_converted.jpg")
            }]
        );
    }

    #[test]
    fn shared_stems_within_a_batch_get_distinct_destinations() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let files = vec![tmp.path().join("a.png"), tmp.path().join("a.bmp")];
        let core = FormatoCore::new(
            options_for(&tmp, files.clone()).with_conflict_policy(ConflictPolicy::Overwrite),
        );

        let plan = core.plan_jobs(&files, &out);
        assert_eq!(
            plan,
            vec![
                PlannedJob::Convert {
                    source: files[0].clone(),
                    destination: out.join("a.jpg")
                },
                PlannedJob::Convert {
                    source: files[1].clone(),
                    destination: out.join("a_converted.jpg")
                },
            ]
        );
    }

    #[test]
    fn stems_differing_only_in_case_collide_when_case_is_folded() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let files = vec![tmp.path().join("Photo.png"), tmp.path().join("photo.png")];
        let core = FormatoCore::new(
            options_for(&tmp, files.clone()).with_conflict_policy(ConflictPolicy::Overwrite),
        );

        let folded = core.plan_jobs_into(&files, &out, ClaimedPaths::new(true));
        assert_eq!(
            folded[1],
            PlannedJob::Convert {
                source: files[1].clone(),
                destination: out.join("photo_converted.jpg")
            }
        );

        let exact = core.plan_jobs_into(&files, &out, ClaimedPaths::new(false));
        assert_eq!(
            exact[1],
            PlannedJob::Convert {
                source: files[1].clone(),
                destination: out.join("photo.jpg")
            }
        );
    }

    #[test]
    fn folders_are_scanned_by_extension() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("in");
        write_png(&input.join("one.png"), 4, 4);
        write_png(&input.join("nested").join("two.png"), 4, 4);
        fs::write(input.join("notes.txt"), "hello").unwrap();
        let direct = tmp.path().join("direct.dat");
        fs::write(&direct, "not an image either").unwrap();

        let flat = FormatoCore::new(options_for(&tmp, vec![input.clone(), direct.clone(), input.clone()]));
        assert_eq!(flat.collect_input_files(), vec![input.join("one.png"), direct.clone()]);

        let deep = FormatoCore::new(options_for(&tmp, vec![input.clone()]).with_recursive(true));
        let files = deep.collect_input_files();
        assert_eq!(files.len(), 2);
        assert!(files.contains(&input.join("nested").join("two.png")));
    }

    #[test]
    fn one_bad_file_does_not_stop_the_batch() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("good.png");
        let bad = tmp.path().join("bad.png");
        write_png(&good, 8, 8);
        fs::write(&bad, "this is text").unwrap();

        let mut core = FormatoCore::new(options_for(&tmp, vec![bad.clone(), good.clone()]));
        let report = core.run().unwrap();

        assert_eq!(report.total_files, 2);
        assert_eq!(report.converted_files, 1);
        assert_eq!(report.failed_files, 1);
        assert!(!report.cancelled);
        assert!(tmp.path().join("out").join("good.jpg").is_file());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, ErrorKind::UnrecognizedImage);
        assert_eq!(report.failures[0].file, bad.display().to_string());
        assert_eq!(report.format_stats.get("png"), Some(&2));
        assert!(report.converted_size > 0);
        assert_eq!(core.get_stats().completed(), 2);
    }

    #[test]
    fn resize_width_keeps_aspect_ratio() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("wide.png");
        write_png(&source, 40, 20);

        let options = options_for(&tmp, vec![source])
            .with_format(TargetFormat::Png)
            .with_resize_width(Some(10));
        FormatoCore::new(options).run().unwrap();

        let output = image::open(tmp.path().join("out").join("wide.png")).unwrap();
        assert_eq!((output.width(), output.height()), (10, 5));
    }

    #[test]
    fn existing_outputs_are_skipped_when_asked() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("pic.png");
        write_png(&source, 4, 4);
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("pic.jpg"), b"keep me").unwrap();

        let options = options_for(&tmp, vec![source]).with_conflict_policy(ConflictPolicy::Skip);
        let report = FormatoCore::new(options).run().unwrap();

        assert_eq!(report.skipped_files, 1);
        assert_eq!(report.converted_files, 0);
        assert_eq!(fs::read(out.join("pic.jpg")).unwrap(), b"keep me");
    }

    #[test]
    fn cancelled_batches_start_nothing() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("pic.png");
        write_png(&source, 4, 4);

        let mut core = FormatoCore::new(options_for(&tmp, vec![source]));
        core.cancel_handle().store(true, Ordering::Relaxed);
        let report = core.run().unwrap();

        assert!(report.cancelled);
        assert_eq!(report.converted_files, 0);
        assert!(!tmp.path().join("out").join("pic.jpg").exists());
    }

    #[test]
    fn background_batches_stream_events() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("pic.png");
        write_png(&source, 4, 4);

        let options = options_for(&tmp, vec![source]).with_report(Some(crate::ReportFormat::Json));
        let handle = spawn_batch(options, None);
        let events: Vec<BatchEvent> = handle.events.iter().collect();

        assert!(matches!(events.first(), Some(BatchEvent::Started { total: 1 })));
        assert!(events.iter().any(|e| matches!(e, BatchEvent::Converted { .. })));
        match events.last() {
            Some(BatchEvent::Finished(report)) => assert_eq!(report.converted_files, 1),
            other => panic!("unexpected final event: {other:?}"),
        }
        assert!(tmp.path().join("out").join("formato_report.json").is_file());
    }
}
