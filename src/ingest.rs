//! Upload validation and normalization ahead of fingerprinting.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};
use sha2::{Digest, Sha256};

use crate::error::Error;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_DIMENSION: u32 = 2048;

#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    pub max_upload_bytes: usize,
    pub max_dimension: u32,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: MAX_UPLOAD_BYTES,
            max_dimension: MAX_DIMENSION,
        }
    }
}

/// A validated upload: normalized pixels plus the identity metadata that
/// gets persisted alongside the fingerprints.
pub struct ProcessedUpload {
    pub image: RgbImage,
    pub content_type: &'static str,
    /// SHA-256 hex digest of the raw input bytes. Identity is byte-level:
    /// the digest covers the original upload, never the normalized pixels.
    pub checksum: String,
    pub file_size: usize,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestValidator {
    limits: IngestLimits,
}

impl IngestValidator {
    pub fn new(limits: IngestLimits) -> Self {
        Self { limits }
    }

    /// Runs the size check, then the magic-byte sniff, then decode,
    /// RGB normalization, bounded downscale and checksum. The sniff
    /// inspects content only; client-supplied filenames and headers are
    /// never trusted.
    pub fn validate(&self, raw: &[u8]) -> Result<ProcessedUpload, Error> {
        if raw.len() > self.limits.max_upload_bytes {
            return Err(Error::TooLarge {
                size: raw.len(),
                max: self.limits.max_upload_bytes,
            });
        }

        let format = image::guess_format(raw)
            .map_err(|_| Error::UnsupportedType("unknown".into()))?;
        let content_type = match format {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::WebP => "image/webp",
            other => {
                return Err(Error::UnsupportedType(
                    format!("{other:?}").to_ascii_lowercase(),
                ))
            }
        };

        let decoded = image::load_from_memory_with_format(raw, format)
            .map_err(|e| Error::InvalidImage(e.to_string()))?;
        let mut image = decoded.to_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::InvalidImage("zero-dimension image".into()));
        }

        let max = self.limits.max_dimension;
        if image.width().max(image.height()) > max {
            // resize() fits within the bounds, preserving aspect ratio
            image = DynamicImage::ImageRgb8(image)
                .resize(max, max, FilterType::Lanczos3)
                .to_rgb8();
        }

        let checksum = hex::encode(Sha256::digest(raw));

        Ok(ProcessedUpload {
            width: image.width(),
            height: image.height(),
            content_type,
            checksum,
            file_size: raw.len(),
            image,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(img: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img.clone())
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    fn solid(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, image::Rgb([120, 80, 40]))
    }

    #[test]
    fn test_valid_png_passes() {
        let raw = encode(&solid(40, 30), ImageFormat::Png);
        let upload = IngestValidator::default().validate(&raw).unwrap();
        assert_eq!(upload.content_type, "image/png");
        assert_eq!((upload.width, upload.height), (40, 30));
        assert_eq!(upload.file_size, raw.len());
    }

    #[test]
    fn test_checksum_is_sha256_of_raw_bytes() {
        let raw = encode(&solid(16, 16), ImageFormat::Png);
        let upload = IngestValidator::default().validate(&raw).unwrap();
        assert_eq!(upload.checksum, hex::encode(Sha256::digest(&raw)));
        assert_eq!(upload.checksum.len(), 64);
    }

    #[test]
    fn test_oversized_payload_rejected_before_decode() {
        let limits = IngestLimits {
            max_upload_bytes: 1024,
            ..Default::default()
        };
        // not even close to a valid image; the size gate must fire first
        let raw = vec![0u8; 1025];
        assert!(matches!(
            IngestValidator::new(limits).validate(&raw),
            Err(Error::TooLarge { size: 1025, max: 1024 })
        ));
    }

    #[test]
    fn test_non_image_bytes_are_unsupported() {
        let raw = b"just some plain text, no matter the filename".to_vec();
        assert!(matches!(
            IngestValidator::default().validate(&raw),
            Err(Error::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_png_signature_with_garbage_body_is_invalid_image() {
        let mut raw = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        raw.extend_from_slice(&[0xde; 64]);
        assert!(matches!(
            IngestValidator::default().validate(&raw),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_sniffed_formats() {
        for (format, mime) in [
            (ImageFormat::Jpeg, "image/jpeg"),
            (ImageFormat::Gif, "image/gif"),
            (ImageFormat::Bmp, "image/bmp"),
        ] {
            let raw = encode(&solid(24, 24), format);
            let upload = IngestValidator::default().validate(&raw).unwrap();
            assert_eq!(upload.content_type, mime);
        }
    }

    #[test]
    fn test_downscale_preserves_aspect_ratio() {
        let limits = IngestLimits {
            max_dimension: 256,
            ..Default::default()
        };
        let raw = encode(&solid(1024, 64), ImageFormat::Png);
        let upload = IngestValidator::new(limits).validate(&raw).unwrap();
        assert_eq!((upload.width, upload.height), (256, 16));
    }

    #[test]
    fn test_images_within_bounds_are_untouched() {
        let raw = encode(&solid(100, 200), ImageFormat::Png);
        let upload = IngestValidator::default().validate(&raw).unwrap();
        assert_eq!((upload.width, upload.height), (100, 200));
    }
}
