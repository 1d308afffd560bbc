use crossbeam_channel::Sender;
use std::path::{Path, PathBuf};

use crate::error::ConversionError;
use crate::ConversionReport;

/// Trait for reporting conversion progress
/// This allows different interfaces (CLI, GUI) to implement their own progress display
pub trait ProgressReporter: Send + Sync {
    /// Set the total number of files to be processed
    fn set_total_files(&self, total: usize);

    /// Update current progress; `completed` includes failed and skipped files
    fn update_progress(&self, completed: usize, failed: usize);

    /// Report that conversion has started
    fn start_conversion(&self) {}

    /// Report that conversion has finished
    fn finish_conversion(&self) {}

    /// Report an error for a specific file
    fn report_error(&self, _source: &Path, _error: &ConversionError) {}

    /// Report successful conversion of a file
    fn report_success(
        &self,
        _source: &Path,
        _destination: &Path,
        _original_size: u64,
        _converted_size: u64,
    ) {
    }

    /// Report a file left alone because its destination already exists
    fn report_skip(&self, _source: &Path, _destination: &Path) {}
}

/// Messages streamed from a background batch to its presentation layer
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started { total: usize },
    Progress { completed: usize, failed: usize },
    Converted { source: PathBuf, destination: PathBuf },
    Failed { source: PathBuf, error: ConversionError },
    Skipped { source: PathBuf, destination: PathBuf },
    /// The batch ran to the end (possibly with per-file failures)
    Finished(Box<ConversionReport>),
    /// The batch could not run at all
    Aborted(String),
}

/// Forwards progress callbacks over a channel.
///
/// Sends never block and are dropped silently once the receiver is gone.
pub struct ChannelProgressReporter {
    sender: Sender<BatchEvent>,
}

impl ChannelProgressReporter {
    pub fn new(sender: Sender<BatchEvent>) -> Self {
        Self { sender }
    }

    fn send(&self, event: BatchEvent) {
        let _ = self.sender.send(event);
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn set_total_files(&self, total: usize) {
        self.send(BatchEvent::Started { total });
    }

    fn update_progress(&self, completed: usize, failed: usize) {
        self.send(BatchEvent::Progress { completed, failed });
    }

    fn report_error(&self, source: &Path, error: &ConversionError) {
        self.send(BatchEvent::Failed {
            source: source.to_path_buf(),
            error: error.clone(),
        });
    }

    fn report_success(&self, source: &Path, destination: &Path, _original: u64, _converted: u64) {
        self.send(BatchEvent::Converted {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });
    }

    fn report_skip(&self, source: &Path, destination: &Path) {
        self.send(BatchEvent::Skipped {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });
    }
}

/// Console-based progress reporter using indicatif
#[cfg(feature = "cli")]
pub struct ConsoleProgressReporter {
    progress_bar: indicatif::ProgressBar,
}

#[cfg(feature = "cli")]
impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cli")]
impl ConsoleProgressReporter {
    pub fn new() -> Self {
        let progress_bar = indicatif::ProgressBar::new(0);
        let style = indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("#>-");
        progress_bar.set_style(style);

        Self { progress_bar }
    }
}

#[cfg(feature = "cli")]
impl ProgressReporter for ConsoleProgressReporter {
    fn set_total_files(&self, total: usize) {
        self.progress_bar.set_length(total as u64);
    }

    fn update_progress(&self, completed: usize, _failed: usize) {
        self.progress_bar.set_position(completed as u64);
    }

    fn start_conversion(&self) {
        self.progress_bar.set_message("Converting images...");
    }

    fn finish_conversion(&self) {
        self.progress_bar.finish_with_message("Conversion completed!");
    }

    fn report_error(&self, source: &Path, error: &ConversionError) {
        self.progress_bar
            .println(format!("❌ Error converting {}: {error}", source.display()));
    }

    fn report_success(&self, source: &Path, destination: &Path, original_size: u64, converted_size: u64) {
        let name = |path: &Path| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        };

        self.progress_bar.println(format!(
            "✅ {} -> {} ({} -> {})",
            name(source),
            name(destination),
            humansize::format_size(original_size, humansize::DECIMAL),
            humansize::format_size(converted_size, humansize::DECIMAL),
        ));
    }

    fn report_skip(&self, source: &Path, destination: &Path) {
        self.progress_bar.println(format!(
            "⏭️ Skipped {} ({} exists)",
            source.display(),
            destination.display()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn channel_reporter_forwards_events() {
        let (sender, receiver) = unbounded();
        let reporter = ChannelProgressReporter::new(sender);

        reporter.set_total_files(2);
        reporter.report_success(Path::new("a.png"), Path::new("out/a.jpg"), 10, 5);
        reporter.report_error(
            Path::new("b.png"),
            &ConversionError::unrecognized(Path::new("b.png"), "garbage"),
        );
        reporter.update_progress(2, 1);

        let events: Vec<_> = receiver.try_iter().collect();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], BatchEvent::Started { total: 2 }));
        assert!(
            matches!(&events[1], BatchEvent::Converted { destination, .. } if destination == Path::new("out/a.jpg"))
        );
        assert!(matches!(&events[2], BatchEvent::Failed { error, .. } if error.is_unrecognized()));
        assert!(matches!(events[3], BatchEvent::Progress { completed: 2, failed: 1 }));
    }

    #[test]
    fn channel_reporter_tolerates_a_dropped_receiver() {
        let (sender, receiver) = unbounded();
        drop(receiver);
        let reporter = ChannelProgressReporter::new(sender);
        reporter.set_total_files(1);
        reporter.update_progress(1, 0);
    }
}
