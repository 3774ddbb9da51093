//! Decoding inputs and encoding outputs

use std::io::Cursor;
use std::path::Path;

use image::io::Reader as ImageReader;
use image::{DynamicImage, ImageOutputFormat, RgbaImage};

use crate::config::OutputFormat;
use crate::error::{ErrorContext, IoContext, Result};

/// Lowest quality the JPEG encoder accepts
const MIN_JPEG_QUALITY: u8 = 1;

/// Decode the image at `path`, detecting the format from its content
pub fn decode(path: &Path) -> Result<DynamicImage> {
    let reader = ImageReader::open(path)
        .reading(path)?
        .with_guessed_format()
        .reading(path)?;
    reader.decode().decoding(path)
}

/// Encode `image` into memory. `path` is only used for error context.
pub fn encode(image: RgbaImage, format: OutputFormat, quality: u8, path: &Path) -> Result<Vec<u8>> {
    let mut bytes = Cursor::new(Vec::new());

    match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
            DynamicImage::ImageRgb8(rgb)
                .write_to(&mut bytes, ImageOutputFormat::Jpeg(jpeg_quality(quality)))
                .encoding(path)?;
        }
        OutputFormat::Png => {
            DynamicImage::ImageRgba8(image)
                .write_to(&mut bytes, ImageOutputFormat::Png)
                .encoding(path)?;
        }
    }

    Ok(bytes.into_inner())
}

/// Clamp a 0-100 quality to what the JPEG encoder accepts
pub fn jpeg_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DropmakerError;
    use image::Rgba;
    use tempfile::TempDir;

    fn sample() -> RgbaImage {
        RgbaImage::from_fn(16, 12, |x, y| Rgba([(x * 10) as u8, (y * 10) as u8, 90, 255]))
    }

    #[test]
    fn test_encode_jpeg_and_png() {
        let path = Path::new("out");

        let jpeg = encode(sample(), OutputFormat::Jpeg, 80, path).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), image::ImageFormat::Jpeg);

        let png = encode(sample(), OutputFormat::Png, 80, path).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), image::ImageFormat::Png);
    }

    #[test]
    fn test_quality_zero_is_clamped() {
        assert_eq!(jpeg_quality(0), 1);
        assert_eq!(jpeg_quality(80), 80);
        assert!(encode(sample(), OutputFormat::Jpeg, 0, Path::new("q0.jpg")).is_ok());
    }

    #[test]
    fn test_decode_ignores_misleading_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("actually_png.jpg");
        sample().save_with_format(&path, image::ImageFormat::Png).unwrap();

        let decoded = decode(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 12));
    }

    #[test]
    fn test_decode_errors_carry_path() {
        let dir = TempDir::new().unwrap();
        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, b"definitely not pixels").unwrap();

        let err = decode(&garbage).unwrap_err();
        assert!(matches!(err, DropmakerError::Decode { .. }));
        assert_eq!(err.file_path().unwrap(), &garbage);

        let missing = dir.path().join("missing.png");
        assert!(matches!(decode(&missing), Err(DropmakerError::Decode { .. })));
    }
}
