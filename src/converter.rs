use anyhow::{anyhow, Context, Result};
use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::codecs::tiff::TiffEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView, ImageReader, Rgb, RgbImage};
use img_parts::jpeg::Jpeg;
use img_parts::{DynImage, ImageEXIF};
use log::{Level, Log, Record};
use std::any::Any;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ConversionError;
use crate::format::TargetFormat;

/// Outcome of a single conversion. Success carries nothing.
pub type ConversionResult = Result<(), ConversionError>;

pub const DEFAULT_QUALITY: u8 = 85;
pub const DEFAULT_BACKGROUND: [u8; 3] = [255, 255, 255];

/// zlib-style level (0-9) requested when writing images that keep their alpha channel
const ALPHA_COMPRESSION_EFFORT: u8 = 6;

const LOG_TARGET: &str = "formato::converter";

/// Everything needed for one conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub source: PathBuf,
    /// Where to write; the extension is not consulted, `format` decides the encoding
    pub destination: PathBuf,
    pub format: TargetFormat,
    /// 1-100, only used by JPEG and WEBP
    pub quality: u8,
    /// Exact output size; aspect ratio is the caller's business
    pub resize: Option<(u32, u32)>,
    pub preserve_metadata: bool,
    /// Canvas color for flattening transparency
    pub background: [u8; 3],
}

impl ConversionRequest {
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        format: TargetFormat,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            format,
            quality: DEFAULT_QUALITY,
            resize: None,
            preserve_metadata: true,
            background: DEFAULT_BACKGROUND,
        }
    }

    /// Builder pattern for setting quality, clamped to 1-100
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn with_resize(mut self, width: u32, height: u32) -> Self {
        self.resize = Some((width, height));
        self
    }

    pub fn with_preserve_metadata(mut self, preserve_metadata: bool) -> Self {
        self.preserve_metadata = preserve_metadata;
        self
    }

    pub fn with_background(mut self, background: [u8; 3]) -> Self {
        self.background = background;
        self
    }
}

/// Decoded pixels plus the metadata block captured for reattachment.
/// Lives for exactly one `convert` call.
struct DecodedImage {
    pixels: DynamicImage,
    exif: Option<Vec<u8>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct EncodeParams {
    quality: Option<u8>,
    compression_effort: Option<u8>,
    exif: Option<Vec<u8>>,
}

/// Single-image conversion engine.
///
/// Stateless apart from an optional injected logger, so one instance can be
/// shared across threads. Without a logger the engine emits nothing.
#[derive(Clone, Default)]
pub struct ImageConverter {
    logger: Option<Arc<dyn Log>>,
}

impl ImageConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route engine log records to `logger`
    pub fn with_logger(mut self, logger: Arc<dyn Log>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Convert one image. Never panics and never returns early with an
    /// unclassified error: every failure becomes a [`ConversionError`].
    pub fn convert(&self, request: &ConversionRequest) -> ConversionResult {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.convert_inner(request)))
            .unwrap_or_else(|payload| {
                Err(ConversionError::other(anyhow!(
                    "Image codec panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        match &result {
            Ok(()) => self.emit(
                Level::Info,
                format_args!(
                    "Converted {} -> {}",
                    request.source.display(),
                    request.destination.display()
                ),
            ),
            Err(e) => self.emit(
                Level::Warn,
                format_args!("Failed to convert {}: {}", request.source.display(), e),
            ),
        }

        result
    }

    fn convert_inner(&self, request: &ConversionRequest) -> ConversionResult {
        if let Some((width, height)) = request.resize {
            if width == 0 || height == 0 {
                return Err(ConversionError::other(anyhow!(
                    "Invalid resize target {width}x{height}: both dimensions must be at least 1 pixel"
                )));
            }
        }

        let decoded = self.decode(request)?;
        self.encode_to_destination(request, decoded)
            .map_err(ConversionError::other)
    }

    fn decode(&self, request: &ConversionRequest) -> Result<DecodedImage, ConversionError> {
        let source = &request.source;
        let bytes = fs::read(source).map_err(|e| ConversionError::unrecognized(source, e))?;

        let pixels = ImageReader::new(Cursor::new(bytes.as_slice()))
            .with_guessed_format()
            .map_err(|e| ConversionError::unrecognized(source, e))?
            .decode()
            .map_err(|e| ConversionError::unrecognized(source, e))?;

        let (width, height) = pixels.dimensions();
        self.emit(
            Level::Debug,
            format_args!(
                "Decoded {} ({}x{}, {:?})",
                source.display(),
                width,
                height,
                pixels.color()
            ),
        );

        // Raw EXIF only survives into JPEG outputs
        let exif = if request.preserve_metadata && request.format == TargetFormat::Jpeg {
            read_exif(bytes)
        } else {
            None
        };

        Ok(DecodedImage { pixels, exif })
    }

    fn encode_to_destination(
        &self,
        request: &ConversionRequest,
        decoded: DecodedImage,
    ) -> Result<()> {
        let DecodedImage { mut pixels, exif } = decoded;

        if let Some((width, height)) = request.resize {
            pixels = pixels.resize_exact(width, height, FilterType::Lanczos3);
        }

        let pixels = reconcile_color(pixels, request.format, request.background);
        let params = encode_params(request, &pixels, exif);

        self.emit(
            Level::Debug,
            format_args!(
                "Encoding {} as {} (quality {:?}, effort {:?}, exif {} bytes)",
                request.destination.display(),
                request.format,
                params.quality,
                params.compression_effort,
                params.exif.as_ref().map_or(0, Vec::len)
            ),
        );

        let encoded = encode(&pixels, request.format, &params).with_context(|| {
            format!(
                "Failed to encode {} as {}",
                request.destination.display(),
                request.format
            )
        })?;

        write_replacing(&request.destination, &encoded)
    }

    fn emit(&self, level: Level, args: fmt::Arguments<'_>) {
        if let Some(logger) = &self.logger {
            let record = Record::builder()
                .args(args)
                .level(level)
                .target(LOG_TARGET)
                .module_path_static(Some(module_path!()))
                .build();
            if logger.enabled(record.metadata()) {
                logger.log(&record);
            }
        }
    }
}

/// Convert one image with a silent engine
pub fn convert(request: &ConversionRequest) -> ConversionResult {
    ImageConverter::new().convert(request)
}

fn read_exif(bytes: Vec<u8>) -> Option<Vec<u8>> {
    DynImage::from_bytes(bytes.into())
        .ok()
        .flatten()
        .and_then(|image| image.exif())
        .map(|exif| exif.to_vec())
}

/// Bring the pixel layout in line with what the target format can store.
fn reconcile_color(pixels: DynamicImage, format: TargetFormat, background: [u8; 3]) -> DynamicImage {
    if !format.supports_alpha() && pixels.color().has_alpha() {
        return DynamicImage::ImageRgb8(composite_over(&pixels, background));
    }

    let accepted: &[ColorType] = match format {
        TargetFormat::Jpeg => &[ColorType::L8, ColorType::Rgb8],
        TargetFormat::WebP => &[ColorType::Rgb8, ColorType::Rgba8],
        TargetFormat::Bmp => &[ColorType::L8, ColorType::La8, ColorType::Rgb8, ColorType::Rgba8],
        TargetFormat::Tiff => &[
            ColorType::L8,
            ColorType::Rgb8,
            ColorType::Rgba8,
            ColorType::L16,
            ColorType::Rgb16,
            ColorType::Rgba16,
        ],
        TargetFormat::Png => &[
            ColorType::L8,
            ColorType::La8,
            ColorType::Rgb8,
            ColorType::Rgba8,
            ColorType::L16,
            ColorType::La16,
            ColorType::Rgb16,
            ColorType::Rgba16,
        ],
    };

    narrow_to(pixels, accepted)
}

fn narrow_to(pixels: DynamicImage, accepted: &[ColorType]) -> DynamicImage {
    let color = pixels.color();
    if accepted.contains(&color) {
        return pixels;
    }

    if color.has_alpha() {
        DynamicImage::ImageRgba8(pixels.to_rgba8())
    } else if !color.has_color() && accepted.contains(&ColorType::L8) {
        DynamicImage::ImageLuma8(pixels.to_luma8())
    } else {
        DynamicImage::ImageRgb8(pixels.to_rgb8())
    }
}

/// Flatten onto an opaque canvas of `background`, discarding transparency.
fn composite_over(pixels: &DynamicImage, background: [u8; 3]) -> RgbImage {
    let rgba = pixels.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        Rgb([
            blend(r, background[0], a),
            blend(g, background[1], a),
            blend(b, background[2], a),
        ])
    })
}

fn blend(foreground: u8, background: u8, alpha: u8) -> u8 {
    let alpha = u32::from(alpha);
    let value = u32::from(foreground) * alpha + u32::from(background) * (255 - alpha);
    ((value + 127) / 255) as u8
}

fn encode_params(
    request: &ConversionRequest,
    pixels: &DynamicImage,
    exif: Option<Vec<u8>>,
) -> EncodeParams {
    let mut params = EncodeParams::default();

    if request.format.has_compression_effort() && pixels.color().has_alpha() {
        params.compression_effort = Some(ALPHA_COMPRESSION_EFFORT);
    }

    if request.format.is_lossy() {
        params.quality = Some(request.quality.clamp(1, 100));
    }

    if request.format == TargetFormat::Jpeg {
        params.exif = exif;
    }

    params
}

fn encode(pixels: &DynamicImage, format: TargetFormat, params: &EncodeParams) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());

    match format {
        TargetFormat::Jpeg => {
            let quality = params.quality.unwrap_or(DEFAULT_QUALITY);
            pixels.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))?;
        }
        TargetFormat::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut buffer,
                png_compression(params.compression_effort),
                PngFilterType::Adaptive,
            );
            pixels.write_with_encoder(encoder)?;
        }
        TargetFormat::WebP => return encode_webp(pixels, params),
        TargetFormat::Bmp => pixels.write_with_encoder(BmpEncoder::new(&mut buffer))?,
        TargetFormat::Tiff => pixels.write_with_encoder(TiffEncoder::new(&mut buffer))?,
    }

    let encoded = buffer.into_inner();
    match &params.exif {
        Some(exif) => attach_exif(encoded, exif),
        None => Ok(encoded),
    }
}

fn png_compression(effort: Option<u8>) -> CompressionType {
    match effort {
        Some(0..=3) => CompressionType::Fast,
        Some(7..) => CompressionType::Best,
        _ => CompressionType::Default,
    }
}

// The simple libwebp API already runs at method 4 (its balanced effort),
// so only quality needs forwarding.
fn encode_webp(pixels: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>> {
    let encoder = webp::Encoder::from_image(pixels)
        .map_err(|e| anyhow!("Failed to create WebP encoder: {}", e))?;
    let quality = f32::from(params.quality.unwrap_or(DEFAULT_QUALITY));
    let webp_data = encoder
        .encode_simple(false, quality)
        .map_err(|e| anyhow!("Failed to encode WebP: {:?}", e))?;
    Ok(webp_data.to_vec())
}

fn attach_exif(encoded: Vec<u8>, exif: &[u8]) -> Result<Vec<u8>> {
    let mut jpeg = Jpeg::from_bytes(encoded.into()).context("Failed to re-read encoded JPEG")?;
    jpeg.set_exif(Some(exif.to_vec().into()));

    let mut output = Vec::new();
    jpeg.encoder()
        .write_to(&mut output)
        .context("Failed to write JPEG with EXIF")?;
    Ok(output)
}

/// Write `bytes` to `destination`, replacing whatever is there.
///
/// Data goes to a hidden `.part` sibling first and is renamed into place, so
/// a failed write never leaves a truncated destination behind.
fn write_replacing(destination: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let file_name = destination
        .file_name()
        .with_context(|| format!("Destination has no file name: {}", destination.display()))?;
    let mut partial_name = OsString::from(".");
    partial_name.push(file_name);
    partial_name.push(".part");
    let partial = parent.join(partial_name);

    if let Err(e) = fs::write(&partial, bytes) {
        let _ = fs::remove_file(&partial);
        return Err(e).with_context(|| format!("Failed to write {}", partial.display()));
    }

    if let Err(e) = fs::rename(&partial, destination) {
        let _ = fs::remove_file(&partial);
        return Err(e)
            .with_context(|| format!("Failed to move output into {}", destination.display()));
    }

    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
