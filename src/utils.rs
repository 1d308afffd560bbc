use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::error::ParseColorError;

/// Extensions picked up when scanning a folder
pub const SUPPORTED_INPUT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tiff", "tif"];

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Get file extension (lowercase)
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Check the extension against [`SUPPORTED_INPUT_EXTENSIONS`]
pub fn is_supported_input(path: &Path) -> bool {
    file_extension(path)
        .map(|ext| SUPPORTED_INPUT_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Magic number signatures of the formats we read
const IMAGE_SIGNATURES: &[(&str, &[u8])] = &[
    ("JPEG", &[0xFF, 0xD8, 0xFF]),
    ("PNG", &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
    ("GIF", b"GIF87a"),
    ("GIF", b"GIF89a"),
    ("BMP", b"BM"),
    ("TIFF", &[0x49, 0x49, 0x2A, 0x00]),
    ("TIFF", &[0x4D, 0x4D, 0x00, 0x2A]),
];

/// Identify a file by its header bytes rather than its name.
///
/// Returns `None` for files that are unreadable or match no known signature.
pub fn sniff_format(path: &Path) -> Option<&'static str> {
    let mut header = [0u8; 12];
    let mut file = File::open(path).ok()?;
    let bytes_read = file.read(&mut header).ok()?;
    sniff_header(&header[..bytes_read])
}

fn sniff_header(header: &[u8]) -> Option<&'static str> {
    if header.len() >= 12 && header[0..4] == *b"RIFF" && header[8..12] == *b"WEBP" {
        return Some("WEBP");
    }

    IMAGE_SIGNATURES
        .iter()
        .find(|(_, signature)| header.starts_with(signature))
        .map(|(name, _)| *name)
}

/// Parse a background color given as `R,G,B` or `#RRGGBB`
pub fn parse_color(value: &str) -> Result<[u8; 3], ParseColorError> {
    let invalid = || ParseColorError(value.to_string());
    let trimmed = value.trim();

    if let Some(hex) = trimmed.strip_prefix('#') {
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        return Ok([channel(0)?, channel(2)?, channel(4)?]);
    }

    let channels: Vec<u8> = trimmed
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;

    match channels.as_slice() {
        [r, g, b] => Ok([*r, *g, *b]),
        _ => Err(invalid()),
    }
}

/// Scale `(width, height)` to `target_width` keeping the aspect ratio.
/// Neither side drops below one pixel.
pub fn fit_to_width(target_width: u32, (width, height): (u32, u32)) -> (u32, u32) {
    let new_width = target_width.max(1);
    if width == 0 {
        return (new_width, height.max(1));
    }
    let ratio = f64::from(height) / f64::from(width);
    let new_height = (f64::from(new_width) * ratio) as u32;
    (new_width, new_height.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn durations_are_humanized() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn input_filter_is_case_insensitive() {
        assert!(is_supported_input(Path::new("a/B.PNG")));
        assert!(is_supported_input(Path::new("scan.tif")));
        assert!(!is_supported_input(Path::new("notes.txt")));
        assert!(!is_supported_input(Path::new("README")));
    }

    #[test]
    fn headers_identify_formats() {
        assert_eq!(sniff_header(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("JPEG"));
        assert_eq!(sniff_header(b"RIFF\x10\0\0\0WEBPVP8 "), Some("WEBP"));
        assert_eq!(sniff_header(b"MM\0*\0\0\0\x08"), Some("TIFF"));
        assert_eq!(sniff_header(b"hello world"), None);
        assert_eq!(sniff_header(b""), None);
    }

    #[test]
    fn sniffing_reads_real_files() {
        let tmp = TempDir::new().unwrap();
        let fake = tmp.path().join("fake.png");
        std::fs::write(&fake, "definitely not a png").unwrap();
        assert_eq!(sniff_format(&fake), None);

        let real = tmp.path().join("real.bmp");
        image::RgbImage::new(2, 2).save(&real).unwrap();
        assert_eq!(sniff_format(&real), Some("BMP"));
        assert_eq!(sniff_format(&tmp.path().join("missing")), None);
    }

    #[test]
    fn colors_parse_in_both_notations() {
        assert_eq!(parse_color("255,255,255").unwrap(), [255, 255, 255]);
        assert_eq!(parse_color(" 0, 128 ,7 ").unwrap(), [0, 128, 7]);
        assert_eq!(parse_color("#FF8000").unwrap(), [255, 128, 0]);
        assert!(parse_color("256,0,0").is_err());
        assert!(parse_color("1,2").is_err());
        assert!(parse_color("#12345").is_err());
        assert!(parse_color("#ééé").is_err());
    }

    #[test]
    fn width_fit_keeps_aspect_ratio() {
        assert_eq!(fit_to_width(800, (1600, 1200)), (800, 600));
        assert_eq!(fit_to_width(100, (300, 100)), (100, 33));
        assert_eq!(fit_to_width(10, (10_000, 1)), (10, 1));
        assert_eq!(fit_to_width(0, (50, 50)), (1, 1));
    }
}
