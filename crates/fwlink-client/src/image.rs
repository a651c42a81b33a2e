//! Firmware images and the pre-flight validator

use std::path::Path;

use bytes::Bytes;
use thiserror::Error;

use crate::config::UpdateConfig;
use crate::error::Result;

/// A firmware image selected for upload
///
/// Cheap to clone: the payload is reference counted.
#[derive(Debug, Clone)]
pub struct UpdateImage {
    name: String,
    data: Bytes,
}

impl UpdateImage {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Read an image from disk, naming it after the file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Why an image was refused before upload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageRejection {
    #[error("invalid file: only {expected} images are accepted")]
    BadExtension { expected: String },

    #[error("empty file: select a valid firmware image")]
    Empty,

    #[error("file too large: maximum size is {}", size_label(.max))]
    TooLarge { size: u64, max: u64 },
}

impl ImageRejection {
    /// Stable machine-readable reason
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadExtension { .. } => "bad-extension",
            Self::Empty => "empty",
            Self::TooLarge { .. } => "too-large",
        }
    }
}

/// Checks an image against the configured acceptance rules
///
/// Pure: no IO, no network.
#[derive(Debug, Clone)]
pub struct ImageValidator {
    extension: String,
    max_size: u64,
}

impl ImageValidator {
    pub fn new(extension: &str, max_size: u64) -> Self {
        Self {
            extension: format!(".{}", extension.trim_start_matches('.').to_ascii_lowercase()),
            max_size,
        }
    }

    pub fn from_config(config: &UpdateConfig) -> Self {
        Self::new(&config.image.extension, config.image.max_size)
    }

    /// Checks extension, then emptiness, then size; the first failure wins
    pub fn validate(&self, image: &UpdateImage) -> std::result::Result<(), ImageRejection> {
        if !image.name().to_ascii_lowercase().ends_with(&self.extension) {
            return Err(ImageRejection::BadExtension {
                expected: self.extension.clone(),
            });
        }
        if image.size() == 0 {
            return Err(ImageRejection::Empty);
        }
        if image.size() > self.max_size {
            return Err(ImageRejection::TooLarge {
                size: image.size(),
                max: self.max_size,
            });
        }
        Ok(())
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }
}

fn size_label(bytes: &u64) -> String {
    format_size(*bytes)
}

/// Human-readable byte count: `512 B`, `1.5 KB`, `1.25 MB`
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    if bytes < KIB {
        format!("{} B", bytes)
    } else if bytes < MIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ImageValidator {
        ImageValidator::new("bin", 2 * 1024 * 1024)
    }

    #[test]
    fn test_accepts_valid_image() {
        let image = UpdateImage::new("camera.bin", vec![0xE9; 1024]);
        assert_eq!(validator().validate(&image), Ok(()));
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let image = UpdateImage::new("FIRMWARE.BIN", vec![0xE9; 16]);
        assert_eq!(validator().validate(&image), Ok(()));
    }

    #[test]
    fn test_configured_extension_is_normalized() {
        let config = UpdateConfig::builder("http://192.168.4.1")
            .extension(".BIN")
            .build();
        let validator = ImageValidator::from_config(&config);

        let image = UpdateImage::new("camera.bin", vec![0xE9; 16]);
        assert_eq!(validator.validate(&image), Ok(()));
    }

    #[test]
    fn test_rejects_wrong_extension() {
        let image = UpdateImage::new("firmware.elf", vec![0xE9; 16]);
        let err = validator().validate(&image).unwrap_err();
        assert_eq!(err.code(), "bad-extension");

        // A bare "bin" suffix without the dot is not the extension
        let image = UpdateImage::new("cabin", vec![0xE9; 16]);
        assert_eq!(validator().validate(&image).unwrap_err().code(), "bad-extension");
    }

    #[test]
    fn test_extension_checked_before_size() {
        let image = UpdateImage::new("notes.txt", Vec::new());
        assert_eq!(validator().validate(&image).unwrap_err().code(), "bad-extension");
    }

    #[test]
    fn test_rejects_empty_image() {
        let image = UpdateImage::new("firmware.bin", Vec::new());
        assert_eq!(validator().validate(&image), Err(ImageRejection::Empty));
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        let validator = ImageValidator::new(".bin", 100);
        let at_limit = UpdateImage::new("a.bin", vec![0; 100]);
        let over = UpdateImage::new("a.bin", vec![0; 101]);

        assert_eq!(validator.validate(&at_limit), Ok(()));
        assert_eq!(
            validator.validate(&over),
            Err(ImageRejection::TooLarge { size: 101, max: 100 })
        );
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let image = UpdateImage::from_file(&path).unwrap();
        assert_eq!(image.name(), "build.bin");
        assert_eq!(image.size(), 3);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(2 * 1024 * 1024), "2.00 MB");
        assert_eq!(
            ImageRejection::TooLarge { size: 3, max: 2 * 1024 * 1024 }.to_string(),
            "file too large: maximum size is 2.00 MB"
        );
    }
}
