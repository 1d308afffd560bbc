use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::converter::{ConversionRequest, DEFAULT_BACKGROUND, DEFAULT_QUALITY};
use crate::format::TargetFormat;
use crate::utils::parse_color;
use crate::{ConflictPolicy, ReportFormat};

/// Main configuration structure loaded from config files
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub general: Option<GeneralConfig>,
    pub conversion: Option<ConversionConfig>,
    pub output: Option<OutputConfig>,
    pub profiles: Option<HashMap<String, ProfileConfig>>,
}

/// Configuration profile for predefined settings
#[derive(Debug, Deserialize, Clone)]
pub struct ProfileConfig {
    pub description: Option<String>,
    pub format: Option<TargetFormat>,
    pub quality: Option<u8>,
    pub resize_width: Option<u32>,
    pub preserve_metadata: Option<bool>,
    pub background: Option<String>,
    pub threads: Option<usize>,
}

/// General configuration options
#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub output_dir: Option<String>,
    pub on_conflict: Option<String>,
    pub recursive: Option<bool>,
    pub threads: Option<usize>,
}

/// Per-image conversion settings
#[derive(Debug, Deserialize)]
pub struct ConversionConfig {
    pub format: Option<TargetFormat>,
    pub quality: Option<u8>,
    pub resize_width: Option<u32>,
    pub preserve_metadata: Option<bool>,
    pub background: Option<String>,
}

/// Output and reporting configuration
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    pub verbose: Option<bool>,
    pub quiet: Option<bool>,
    pub generate_report: Option<bool>,
    pub report_format: Option<String>,
}

impl Config {
    /// Read and parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// `<config dir>/formato/config.toml`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("formato").join("config.toml"))
    }

    /// Load the config at the default location; `None` when there is no file
    pub fn load_default() -> Result<Option<Self>> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path).map(Some),
            _ => Ok(None),
        }
    }

    pub fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .profiles
            .as_ref()
            .map(|profiles| profiles.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Resolve `(verbose, quiet)`: command-line flags win over `[output]`
    pub fn verbosity(&self, verbose: bool, quiet: bool) -> (bool, bool) {
        if verbose || quiet {
            return (verbose, quiet);
        }

        let output = self.output.as_ref();
        let verbose = output.and_then(|o| o.verbose).unwrap_or(false);
        let quiet = !verbose && output.and_then(|o| o.quiet).unwrap_or(false);
        (verbose, quiet)
    }

    /// Layer the config sections, then the named profile, over `options`
    pub fn apply(&self, mut options: BatchOptions, profile: Option<&str>) -> Result<BatchOptions> {
        if let Some(general) = &self.general {
            if let Some(dir) = &general.output_dir {
                options.output_dir = PathBuf::from(dir);
            }
            if let Some(policy) = &general.on_conflict {
                options.conflict = policy.parse()?;
            }
            if let Some(recursive) = general.recursive {
                options.recursive = recursive;
            }
            if let Some(threads) = general.threads {
                options.threads = Some(threads);
            }
        }

        if let Some(conversion) = &self.conversion {
            if let Some(format) = conversion.format {
                options.format = format;
            }
            if let Some(quality) = conversion.quality {
                options = options.with_quality(quality);
            }
            if let Some(width) = conversion.resize_width {
                options.resize_width = Some(width);
            }
            if let Some(preserve) = conversion.preserve_metadata {
                options.preserve_metadata = preserve;
            }
            if let Some(color) = &conversion.background {
                options.background = parse_color(color)?;
            }
        }

        if let Some(output) = &self.output {
            if let Some(generate) = output.generate_report {
                options.generate_report = generate;
            }
            if let Some(format) = &output.report_format {
                options.report_format = format.parse()?;
            }
        }

        if let Some(name) = profile {
            let Some(profile) = self.profiles.as_ref().and_then(|p| p.get(name)) else {
                bail!(
                    "Unknown profile '{}' (available: {})",
                    name,
                    self.profile_names().join(", ")
                );
            };
            options = profile.apply(options)?;
        }

        Ok(options)
    }
}

impl ProfileConfig {
    fn apply(&self, mut options: BatchOptions) -> Result<BatchOptions> {
        if let Some(format) = self.format {
            options.format = format;
        }
        if let Some(quality) = self.quality {
            options = options.with_quality(quality);
        }
        if let Some(width) = self.resize_width {
            options.resize_width = Some(width);
        }
        if let Some(preserve) = self.preserve_metadata {
            options.preserve_metadata = preserve;
        }
        if let Some(color) = &self.background {
            options.background = parse_color(color)?;
        }
        if let Some(threads) = self.threads {
            options.threads = Some(threads);
        }
        Ok(options)
    }
}

/// Batch options that can be passed to the core library
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Files and/or folders to convert
    pub inputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub format: TargetFormat,
    pub quality: u8,
    /// Target width; height follows the source aspect ratio
    pub resize_width: Option<u32>,
    pub preserve_metadata: bool,
    pub background: [u8; 3],
    pub conflict: ConflictPolicy,
    /// Descend into sub-folders of input folders
    pub recursive: bool,
    pub threads: Option<usize>,
    pub generate_report: bool,
    pub report_format: ReportFormat,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output_dir: PathBuf::from("formato_output"),
            format: TargetFormat::Jpeg,
            quality: DEFAULT_QUALITY,
            resize_width: None,
            preserve_metadata: true,
            background: DEFAULT_BACKGROUND,
            conflict: ConflictPolicy::Rename,
            recursive: false,
            threads: None,
            generate_report: false,
            report_format: ReportFormat::Json,
        }
    }
}

impl BatchOptions {
    /// Create new batch options with sensible defaults
    pub fn new(inputs: Vec<PathBuf>) -> Self {
        Self {
            inputs,
            ..Default::default()
        }
    }

    /// Builder pattern for setting the target format
    pub fn with_format(mut self, format: TargetFormat) -> Self {
        self.format = format;
        self
    }

    /// Builder pattern for setting quality, clamped to 1-100
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Builder pattern for setting the resize width
    pub fn with_resize_width(mut self, width: Option<u32>) -> Self {
        self.resize_width = width;
        self
    }

    /// Builder pattern for setting output directory
    pub fn with_output_dir(mut self, output_dir: PathBuf) -> Self {
        self.output_dir = output_dir;
        self
    }

    /// Builder pattern for setting thread count
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Builder pattern for setting the destination conflict policy
    pub fn with_conflict_policy(mut self, conflict: ConflictPolicy) -> Self {
        self.conflict = conflict;
        self
    }

    /// Builder pattern for EXIF preservation
    pub fn with_preserve_metadata(mut self, preserve_metadata: bool) -> Self {
        self.preserve_metadata = preserve_metadata;
        self
    }

    /// Builder pattern for setting the compositing background
    pub fn with_background(mut self, background: [u8; 3]) -> Self {
        self.background = background;
        self
    }

    /// Builder pattern for recursive folder scanning
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Builder pattern for report generation
    pub fn with_report(mut self, report_format: Option<ReportFormat>) -> Self {
        self.generate_report = report_format.is_some();
        if let Some(format) = report_format {
            self.report_format = format;
        }
        self
    }

    /// Get the effective thread count (calculated if not set)
    pub fn get_thread_count(&self) -> usize {
        self.threads.filter(|&t| t > 0).unwrap_or_else(num_cpus::get)
    }

    /// Engine request for one planned file
    pub fn request_for(
        &self,
        source: &Path,
        destination: &Path,
        resize: Option<(u32, u32)>,
    ) -> ConversionRequest {
        let mut request = ConversionRequest::new(source, destination, self.format)
            .with_quality(self.quality)
            .with_preserve_metadata(self.preserve_metadata)
            .with_background(self.background);
        request.resize = resize;
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
[general]
output_dir = "converted"
on_conflict = "skip"
threads = 2

[conversion]
format = "webp"
quality = 70
background = "#000000"

[output]
generate_report = true
report_format = "csv"

[profiles.thumbnails]
description = "Small JPEG previews"
format = "jpg"
quality = 60
resize_width = 320
preserve_metadata = false
"##;

    #[test]
    fn sections_layer_over_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let options = config.apply(BatchOptions::default(), None).unwrap();

        assert_eq!(options.output_dir, PathBuf::from("converted"));
        assert_eq!(options.conflict, ConflictPolicy::Skip);
        assert_eq!(options.threads, Some(2));
        assert_eq!(options.format, TargetFormat::WebP);
        assert_eq!(options.quality, 70);
        assert_eq!(options.background, [0, 0, 0]);
        assert!(options.generate_report);
        assert_eq!(options.report_format, ReportFormat::Csv);
        assert!(options.preserve_metadata);
    }

    #[test]
    fn profiles_override_sections() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let options = config
            .apply(BatchOptions::default(), Some("thumbnails"))
            .unwrap();

        assert_eq!(options.format, TargetFormat::Jpeg);
        assert_eq!(options.quality, 60);
        assert_eq!(options.resize_width, Some(320));
        assert!(!options.preserve_metadata);
        assert_eq!(options.output_dir, PathBuf::from("converted"));
    }

    #[test]
    fn unknown_profile_lists_the_known_ones() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let err = config
            .apply(BatchOptions::default(), Some("poster"))
            .unwrap_err();
        assert!(err.to_string().contains("thumbnails"));
    }

    #[test]
    fn bad_values_are_errors() {
        let config: Config = toml::from_str("[general]\non_conflict = \"merge\"").unwrap();
        assert!(config.apply(BatchOptions::default(), None).is_err());

        assert!(toml::from_str::<Config>("[conversion]\nformat = \"gif\"").is_err());
    }

    #[test]
    fn empty_config_changes_nothing() {
        let config: Config = toml::from_str("").unwrap();
        let options = config.apply(BatchOptions::default(), None).unwrap();
        assert_eq!(options.format, TargetFormat::Jpeg);
        assert_eq!(options.quality, DEFAULT_QUALITY);
        assert_eq!(options.output_dir, PathBuf::from("formato_output"));
    }

    #[test]
    fn load_reports_the_path_on_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[conversion]\nquality = \"high\"").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));

        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.profile_names(), vec!["thumbnails".to_string()]);
    }

    #[test]
    fn output_verbosity_yields_to_flags() {
        let config: Config = toml::from_str("[output]\nverbose = true").unwrap();
        assert_eq!(config.verbosity(false, false), (true, false));
        assert_eq!(config.verbosity(false, true), (false, true));

        let config: Config = toml::from_str("[output]\nquiet = true").unwrap();
        assert_eq!(config.verbosity(false, false), (false, true));
        assert_eq!(config.verbosity(true, false), (true, false));

        let config: Config = toml::from_str("[output]\nverbose = true\nquiet = true").unwrap();
        assert_eq!(config.verbosity(false, false), (true, false));

        assert_eq!(Config::default().verbosity(false, false), (false, false));
    }

    #[test]
    fn quality_builder_clamps() {
        assert_eq!(BatchOptions::default().with_quality(0).quality, 1);
        assert_eq!(BatchOptions::default().with_quality(101).quality, 100);
    }

    #[test]
    fn requests_inherit_batch_settings() {
        let options = BatchOptions::default()
            .with_format(TargetFormat::Png)
            .with_quality(42)
            .with_preserve_metadata(false)
            .with_background([1, 2, 3]);
        let request = options.request_for(Path::new("in.jpg"), Path::new("out.png"), Some((10, 5)));

        assert_eq!(request.format, TargetFormat::Png);
        assert_eq!(request.quality, 42);
        assert!(!request.preserve_metadata);
        assert_eq!(request.background, [1, 2, 3]);
        assert_eq!(request.resize, Some((10, 5)));
    }
}
