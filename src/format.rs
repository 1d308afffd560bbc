use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::error::UnsupportedFormat;

/// Output formats the engine can encode to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum TargetFormat {
    Jpeg,
    Png,
    WebP,
    Bmp,
    Tiff,
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 5] = [
        TargetFormat::Jpeg,
        TargetFormat::Png,
        TargetFormat::WebP,
        TargetFormat::Bmp,
        TargetFormat::Tiff,
    ];

    /// File extension used for generated destination names
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Jpeg => "jpg",
            TargetFormat::Png => "png",
            TargetFormat::WebP => "webp",
            TargetFormat::Bmp => "bmp",
            TargetFormat::Tiff => "tiff",
        }
    }

    /// Whether encoded files can carry an alpha channel
    pub fn supports_alpha(&self) -> bool {
        !matches!(self, TargetFormat::Jpeg)
    }

    /// Formats that get a compression effort setting when writing alpha images
    pub fn has_compression_effort(&self) -> bool {
        matches!(self, TargetFormat::Png | TargetFormat::WebP | TargetFormat::Tiff)
    }

    /// Whether the quality setting affects the output
    pub fn is_lossy(&self) -> bool {
        matches!(self, TargetFormat::Jpeg | TargetFormat::WebP)
    }

    pub fn as_image_format(&self) -> image::ImageFormat {
        match self {
            TargetFormat::Jpeg => image::ImageFormat::Jpeg,
            TargetFormat::Png => image::ImageFormat::Png,
            TargetFormat::WebP => image::ImageFormat::WebP,
            TargetFormat::Bmp => image::ImageFormat::Bmp,
            TargetFormat::Tiff => image::ImageFormat::Tiff,
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetFormat::Jpeg => "JPEG",
            TargetFormat::Png => "PNG",
            TargetFormat::WebP => "WEBP",
            TargetFormat::Bmp => "BMP",
            TargetFormat::Tiff => "TIFF",
        };
        f.write_str(name)
    }
}

impl FromStr for TargetFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(TargetFormat::Jpeg),
            "png" => Ok(TargetFormat::Png),
            "webp" => Ok(TargetFormat::WebP),
            "bmp" => Ok(TargetFormat::Bmp),
            "tiff" | "tif" => Ok(TargetFormat::Tiff),
            _ => Err(UnsupportedFormat(s.to_string())),
        }
    }
}

impl TryFrom<String> for TargetFormat {
    type Error = UnsupportedFormat;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("JPEG".parse::<TargetFormat>().unwrap(), TargetFormat::Jpeg);
        assert_eq!("jpg".parse::<TargetFormat>().unwrap(), TargetFormat::Jpeg);
        assert_eq!("Jpg".parse::<TargetFormat>().unwrap(), TargetFormat::Jpeg);
        assert_eq!("WebP".parse::<TargetFormat>().unwrap(), TargetFormat::WebP);
        assert_eq!("tif".parse::<TargetFormat>().unwrap(), TargetFormat::Tiff);
        assert_eq!(" png ".parse::<TargetFormat>().unwrap(), TargetFormat::Png);
    }

    #[test]
    fn rejects_unknown_names() {
        let err = "gif".parse::<TargetFormat>().unwrap_err();
        assert_eq!(err, UnsupportedFormat("gif".to_string()));
    }

    #[test]
    fn only_jpeg_drops_alpha() {
        let without_alpha: Vec<_> = TargetFormat::ALL
            .iter()
            .filter(|f| !f.supports_alpha())
            .collect();
        assert_eq!(without_alpha, vec![&TargetFormat::Jpeg]);
        assert!(!TargetFormat::Bmp.has_compression_effort());
    }

    #[test]
    fn deserializes_from_config_strings() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: TargetFormat,
        }
        let parsed: Wrapper = toml::from_str("format = \"Tiff\"").unwrap();
        assert_eq!(parsed.format, TargetFormat::Tiff);
        assert!(toml::from_str::<Wrapper>("format = \"heic\"").is_err());
    }
}
