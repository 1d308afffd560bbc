#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use eframe::egui;
use log::Log;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use formato::{
    config::BatchOptions,
    logging,
    utils::{is_supported_input, sniff_format},
    spawn_batch, BatchEvent, BatchHandle, ConflictPolicy, ConversionReport, TargetFormat,
};

/// Icons used across the window
struct Icons;

impl Icons {
    const FILES: &'static str = "📁";
    const SETTINGS: &'static str = "⚙";
    const PROGRESS: &'static str = "📊";
    const RESULTS: &'static str = "📈";

    const START: &'static str = "▶";
    const STOP: &'static str = "⏹";
    const CLEAR: &'static str = "🗑";

    fn with_text(icon: &str, text: &str) -> String {
        format!("{}\u{00A0}{}", icon, text)
    }
}

/// One selected input, as shown in the file list
#[derive(Debug, Clone)]
struct FileEntry {
    path: PathBuf,
    format: String,
    size: u64,
}

impl FileEntry {
    fn inspect(path: PathBuf) -> Self {
        let format = sniff_format(&path).unwrap_or("unknown").to_string();
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self { path, format, size }
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[derive(Debug, PartialEq)]
enum Tab {
    Files,
    Settings,
    Progress,
    Results,
}

/// Main GUI application structure
pub struct FormatoGuiApp {
    current_tab: Tab,

    // Inputs
    files: Vec<FileEntry>,
    output_dir: String,

    // Conversion settings
    format: TargetFormat,
    quality: u8,
    resize_enabled: bool,
    resize_width: u32,
    preserve_metadata: bool,
    overwrite: bool,

    // Running batch
    batch: Option<BatchHandle>,
    stopping: bool,
    total_files: usize,
    completed_files: usize,
    failed_files: usize,
    conversion_log: Vec<String>,

    // Results
    last_report: Option<ConversionReport>,
    error_message: Option<String>,

    logger: Arc<dyn Log>,
}

impl FormatoGuiApp {
    fn new(logger: Arc<dyn Log>) -> Self {
        let output_dir = std::env::current_dir()
            .map(|dir| dir.join("formato_output"))
            .unwrap_or_else(|_| PathBuf::from("formato_output"));

        Self {
            current_tab: Tab::Files,
            files: Vec::new(),
            output_dir: output_dir.display().to_string(),
            format: TargetFormat::Jpeg,
            quality: formato::converter::DEFAULT_QUALITY,
            resize_enabled: false,
            resize_width: 1920,
            preserve_metadata: true,
            overwrite: false,
            batch: None,
            stopping: false,
            total_files: 0,
            completed_files: 0,
            failed_files: 0,
            conversion_log: Vec::new(),
            last_report: None,
            error_message: None,
            logger,
        }
    }

    fn is_converting(&self) -> bool {
        self.batch.is_some()
    }
}

impl eframe::App for FormatoGuiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_batch();
        if self.is_converting() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Formato - Batch Image Converter");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if self.is_converting() {
                        ui.spinner();
                        ui.label(if self.stopping { "Stopping..." } else { "Converting..." });
                    }
                });
            });
        });

        egui::TopBottomPanel::top("tab_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.selectable_value(&mut self.current_tab, Tab::Files, Icons::with_text(Icons::FILES, "Files"));
                ui.selectable_value(
                    &mut self.current_tab,
                    Tab::Settings,
                    Icons::with_text(Icons::SETTINGS, "Settings"),
                );
                if self.is_converting() || self.total_files > 0 {
                    ui.selectable_value(
                        &mut self.current_tab,
                        Tab::Progress,
                        Icons::with_text(Icons::PROGRESS, "Progress"),
                    );
                }
                if self.last_report.is_some() || self.error_message.is_some() {
                    ui.selectable_value(
                        &mut self.current_tab,
                        Tab::Results,
                        Icons::with_text(Icons::RESULTS, "Results"),
                    );
                }
            });
        });

        egui::TopBottomPanel::bottom("action_panel").show(ctx, |ui| {
            ui.add_space(4.0);
            ui.horizontal(|ui| {
                let can_start = !self.is_converting() && !self.files.is_empty();
                if ui
                    .add_enabled(can_start, egui::Button::new(Icons::with_text(Icons::START, "Convert")))
                    .clicked()
                {
                    self.start_conversion();
                }

                let can_stop = self.is_converting() && !self.stopping;
                if ui
                    .add_enabled(can_stop, egui::Button::new(Icons::with_text(Icons::STOP, "Stop")))
                    .clicked()
                {
                    self.stop_conversion();
                }

                ui.separator();
                ui.label(format!("{} file(s) selected", self.files.len()));
            });
            ui.add_space(4.0);
        });

        egui::CentralPanel::default().show(ctx, |ui| match self.current_tab {
            Tab::Files => self.show_files_tab(ui),
            Tab::Settings => self.show_settings_tab(ui),
            Tab::Progress => self.show_progress_tab(ui),
            Tab::Results => self.show_results_tab(ui),
        });
    }
}

impl FormatoGuiApp {
    fn show_files_tab(&mut self, ui: &mut egui::Ui) {
        ui.heading(Icons::with_text(Icons::FILES, "Input & Output"));
        ui.add_space(10.0);

        ui.add_enabled_ui(!self.is_converting(), |ui| {
            ui.horizontal(|ui| {
                if ui.button("🖼 Select Files").clicked() {
                    if let Some(paths) = rfd::FileDialog::new()
                        .set_title("Select Images")
                        .add_filter("Images", formato::utils::SUPPORTED_INPUT_EXTENSIONS)
                        .pick_files()
                    {
                        self.add_files(paths);
                    }
                }

                if ui.button("📂 Select Folder").clicked() {
                    if let Some(folder) = rfd::FileDialog::new()
                        .set_title("Select Image Folder")
                        .pick_folder()
                    {
                        self.add_files(images_in(&folder));
                    }
                }

                if ui.button(Icons::with_text(Icons::CLEAR, "Clear")).clicked() {
                    self.files.clear();
                }
            });

            ui.add_space(10.0);
            ui.horizontal(|ui| {
                ui.label("Output folder:");
                ui.add_sized([360.0, 24.0], egui::TextEdit::singleline(&mut self.output_dir));
                if ui.button("📂 Browse").clicked() {
                    if let Some(path) = rfd::FileDialog::new()
                        .set_title("Select Output Folder")
                        .pick_folder()
                    {
                        self.output_dir = path.display().to_string();
                    }
                }
            });
        });

        ui.add_space(10.0);
        ui.separator();

        if self.files.is_empty() {
            ui.label(
                egui::RichText::new("Choose images or a folder to get started")
                    .color(egui::Color32::GRAY),
            );
            return;
        }

        egui::ScrollArea::vertical().show(ui, |ui| {
            egui::Grid::new("file_list")
                .striped(true)
                .num_columns(3)
                .show(ui, |ui| {
                    ui.strong("Name");
                    ui.strong("Format");
                    ui.strong("Size");
                    ui.end_row();

                    for entry in &self.files {
                        ui.label(entry.name()).on_hover_text(entry.path.display().to_string());
                        if entry.format == "unknown" {
                            ui.colored_label(egui::Color32::ORANGE, "unknown");
                        } else {
                            ui.label(entry.format.as_str());
                        }
                        ui.label(humansize::format_size(entry.size, humansize::DECIMAL));
                        ui.end_row();
                    }
                });
        });
    }

    fn show_settings_tab(&mut self, ui: &mut egui::Ui) {
        ui.heading(Icons::with_text(Icons::SETTINGS, "Conversion Settings"));
        ui.add_space(10.0);

        ui.add_enabled_ui(!self.is_converting(), |ui| {
            ui.group(|ui| {
                ui.label(egui::RichText::new("🎯 Target format").strong());
                ui.horizontal(|ui| {
                    for format in TargetFormat::ALL {
                        ui.radio_value(&mut self.format, format, format.to_string());
                    }
                });
            });

            ui.add_space(10.0);
            ui.group(|ui| {
                ui.label(egui::RichText::new("🎨 Quality").strong());
                ui.add_enabled(
                    self.format.is_lossy(),
                    egui::Slider::new(&mut self.quality, 1..=100).text("quality"),
                );
                if !self.format.is_lossy() {
                    ui.label(
                        egui::RichText::new(format!("{} output is lossless", self.format))
                            .color(egui::Color32::GRAY)
                            .size(12.0),
                    );
                }
            });

            ui.add_space(10.0);
            ui.group(|ui| {
                ui.label(egui::RichText::new("📐 Size").strong());
                ui.horizontal(|ui| {
                    ui.checkbox(&mut self.resize_enabled, "Resize to width");
                    ui.add_enabled(
                        self.resize_enabled,
                        egui::DragValue::new(&mut self.resize_width)
                            .range(1..=20_000)
                            .suffix(" px"),
                    );
                });
                ui.label(
                    egui::RichText::new("Height follows the original aspect ratio")
                        .color(egui::Color32::GRAY)
                        .size(12.0),
                );
            });

            ui.add_space(10.0);
            ui.group(|ui| {
                ui.label(egui::RichText::new("🔧 Options").strong());
                ui.checkbox(&mut self.preserve_metadata, "Keep EXIF metadata (JPEG output)");
                ui.checkbox(&mut self.overwrite, "Overwrite existing files");
            });
        });
    }

    fn show_progress_tab(&mut self, ui: &mut egui::Ui) {
        ui.heading(Icons::with_text(Icons::PROGRESS, "Conversion Progress"));
        ui.add_space(10.0);

        let progress = if self.total_files > 0 {
            self.completed_files as f32 / self.total_files as f32
        } else {
            0.0
        };

        ui.group(|ui| {
            ui.add(
                egui::ProgressBar::new(progress)
                    .text(format!("{}/{} files", self.completed_files, self.total_files))
                    .animate(self.is_converting()),
            );
            ui.horizontal(|ui| {
                ui.label(format!("✅ Done: {}", self.completed_files.saturating_sub(self.failed_files)));
                if self.failed_files > 0 {
                    ui.colored_label(egui::Color32::RED, format!("❌ Failed: {}", self.failed_files));
                }
                let remaining = self.total_files.saturating_sub(self.completed_files);
                if remaining > 0 {
                    ui.label(format!("⏳ Remaining: {}", remaining));
                }
            });
        });

        ui.add_space(15.0);
        ui.group(|ui| {
            ui.label("📝 Conversion Log");
            ui.add_space(5.0);
            egui::ScrollArea::vertical()
                .max_height(260.0)
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    for line in &self.conversion_log {
                        ui.label(line);
                    }
                });
        });
    }

    fn show_results_tab(&mut self, ui: &mut egui::Ui) {
        ui.heading(Icons::with_text(Icons::RESULTS, "Results"));
        ui.add_space(10.0);

        if let Some(error) = &self.error_message {
            ui.colored_label(egui::Color32::RED, format!("❌ {}", error));
            ui.add_space(10.0);
        }

        let Some(report) = &self.last_report else {
            return;
        };

        ui.group(|ui| {
            if report.cancelled {
                ui.colored_label(egui::Color32::ORANGE, "🛑 Stopped before all files were converted");
            } else {
                ui.label(egui::RichText::new("🎉 Conversion completed!").strong());
            }

            egui::Grid::new("summary").num_columns(2).show(ui, |ui| {
                ui.label("Converted");
                ui.label(report.converted_files.to_string());
                ui.end_row();
                ui.label("Failed");
                ui.label(report.failed_files.to_string());
                ui.end_row();
                ui.label("Skipped");
                ui.label(report.skipped_files.to_string());
                ui.end_row();
                ui.label("Original size");
                ui.label(humansize::format_size(report.original_size, humansize::DECIMAL));
                ui.end_row();
                ui.label("Converted size");
                ui.label(humansize::format_size(report.converted_size, humansize::DECIMAL));
                ui.end_row();
                ui.label("Duration");
                ui.label(formato::format_duration(report.duration));
                ui.end_row();
                ui.label("Output folder");
                ui.label(report.output_dir.display().to_string());
                ui.end_row();
            });
        });

        if !report.failures.is_empty() {
            ui.add_space(10.0);
            ui.group(|ui| {
                ui.label(egui::RichText::new("❌ Failures").strong());
                egui::ScrollArea::vertical().max_height(200.0).show(ui, |ui| {
                    for failure in &report.failures {
                        ui.label(format!("{}: {}: {}", failure.file, failure.kind, failure.message));
                    }
                });
            });
        }
    }

    fn add_files(&mut self, paths: Vec<PathBuf>) {
        for path in paths {
            if !self.files.iter().any(|entry| entry.path == path) {
                self.files.push(FileEntry::inspect(path));
            }
        }
    }

    fn batch_options(&self) -> BatchOptions {
        let conflict = if self.overwrite {
            ConflictPolicy::Overwrite
        } else {
            ConflictPolicy::Rename
        };

        BatchOptions::new(self.files.iter().map(|entry| entry.path.clone()).collect())
            .with_output_dir(PathBuf::from(self.output_dir.trim()))
            .with_format(self.format)
            .with_quality(self.quality)
            .with_resize_width(self.resize_enabled.then_some(self.resize_width))
            .with_preserve_metadata(self.preserve_metadata)
            .with_conflict_policy(conflict)
    }

    fn start_conversion(&mut self) {
        if self.output_dir.trim().is_empty() {
            self.error_message = Some("Please choose an output folder".to_string());
            self.current_tab = Tab::Results;
            return;
        }

        self.total_files = 0;
        self.completed_files = 0;
        self.failed_files = 0;
        self.conversion_log.clear();
        self.last_report = None;
        self.error_message = None;
        self.stopping = false;

        self.batch = Some(spawn_batch(self.batch_options(), Some(Arc::clone(&self.logger))));
        self.current_tab = Tab::Progress;
    }

    fn stop_conversion(&mut self) {
        if let Some(batch) = &self.batch {
            batch.cancel();
            self.stopping = true;
            self.conversion_log.push("🛑 Stopping after the files in progress...".to_string());
        }
    }

    /// Drain pending events without blocking the frame
    fn poll_batch(&mut self) {
        let Some(batch) = &self.batch else {
            return;
        };

        let mut finished = false;
        while let Ok(event) = batch.events.try_recv() {
            match event {
                BatchEvent::Started { total } => {
                    self.total_files = total;
                    self.conversion_log.push(format!("Converting {} file(s)...", total));
                }
                BatchEvent::Progress { completed, failed } => {
                    self.completed_files = completed;
                    self.failed_files = failed;
                }
                BatchEvent::Converted {
                    source,
                    destination,
                } => {
                    self.conversion_log
                        .push(format!("✅ {} -> {}", display_name(&source), display_name(&destination)));
                }
                BatchEvent::Failed { source, error } => {
                    self.conversion_log
                        .push(format!("❌ {}: {}", display_name(&source), error));
                }
                BatchEvent::Skipped {
                    source,
                    destination,
                } => {
                    self.conversion_log.push(format!(
                        "⏭ {} ({} exists)",
                        display_name(&source),
                        display_name(&destination)
                    ));
                }
                BatchEvent::Finished(report) => {
                    self.conversion_log.push(format!(
                        "Done: {} converted, {} failed, {} skipped",
                        report.converted_files, report.failed_files, report.skipped_files
                    ));
                    self.last_report = Some(*report);
                    finished = true;
                }
                BatchEvent::Aborted(message) => {
                    self.error_message = Some(message);
                    finished = true;
                }
            }
        }

        if finished || (batch.is_finished() && batch.events.is_empty()) {
            if let Some(batch) = self.batch.take() {
                batch.join();
            }
            self.stopping = false;
            self.current_tab = Tab::Results;
            if self.last_report.is_none() && self.error_message.is_none() {
                self.error_message = Some("Conversion stopped unexpectedly".to_string());
            }
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Supported images directly inside `folder`
fn images_in(folder: &Path) -> Vec<PathBuf> {
    WalkDir::new(folder)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_supported_input(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}

fn main() -> Result<(), eframe::Error> {
    let logger = logging::init(log::LevelFilter::Info);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([800.0, 600.0])
            .with_min_inner_size([600.0, 400.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Formato - Batch Image Converter",
        options,
        Box::new(move |_cc| Ok(Box::new(FormatoGuiApp::new(logger)))),
    )
}
