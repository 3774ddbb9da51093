//! Per-image transform pipeline
//!
//! Every image goes through the same fixed steps: flatten onto the
//! background colour, optional resize, optional watermark, encode, write.
//! A [`TransformPipeline`] is built once and shared by reference with every
//! job; nothing in it changes after construction.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::{imageops, Rgba, RgbaImage};
use serde::Serialize;
use tracing::debug;

use crate::config::{OutputFormat, ProcessingConfig, ResizeSpec};
use crate::error::{IoContext, Result};

pub mod formats;
pub mod resize;
pub mod watermark;

pub use formats::{decode, encode};
pub use resize::{calculate_geometry, FilterType, Geometry, ImageResizer, Placement};
pub use watermark::Watermark;

/// Immutable transform configuration shared by all jobs
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    background: Rgba<u8>,
    resize: Option<ResizeSpec>,
    resizer: ImageResizer,
    watermark: Option<Watermark>,
    format: OutputFormat,
    quality: u8,
}

/// Outcome of transcoding one file
#[derive(Debug, Clone, Serialize)]
pub struct TranscodeResult {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub original_size: (u32, u32),
    pub output_size: (u32, u32),
    pub bytes_written: u64,
    pub processing_time: Duration,
}

impl TransformPipeline {
    /// Pipeline that only re-encodes, with the given format and quality
    pub fn new(format: OutputFormat, quality: u8) -> Self {
        Self {
            background: Rgba([255, 255, 255, 255]),
            resize: None,
            resizer: ImageResizer::new(),
            watermark: None,
            format,
            quality,
        }
    }

    /// Build the pipeline described by `config`, decoding the watermark if any
    pub fn from_config(config: &ProcessingConfig) -> Result<Self> {
        let [r, g, b] = config.background;
        let watermark = config.watermark.as_ref().map(Watermark::load).transpose()?;

        Ok(Self {
            background: Rgba([r, g, b, 255]),
            resize: config.resize,
            resizer: ImageResizer::with_filter(config.filter),
            watermark,
            format: config.format,
            quality: config.quality,
        })
    }

    pub fn with_resize(mut self, resize: ResizeSpec) -> Self {
        self.resize = Some(resize);
        self
    }

    pub fn with_watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = Some(watermark);
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Apply background fill, resize and watermark in that order
    pub fn apply(&self, image: &image::DynamicImage) -> Result<RgbaImage> {
        let mut canvas = RgbaImage::from_pixel(image.width(), image.height(), self.background);
        imageops::overlay(&mut canvas, &image.to_rgba8(), 0, 0);

        if let Some(spec) = &self.resize {
            canvas = self.resizer.resize(canvas, spec, self.background)?;
        }

        if let Some(watermark) = &self.watermark {
            watermark.apply(&mut canvas, self.resizer.filter());
        }

        Ok(canvas)
    }

    /// Decode `input`, transform it, and write the encoded result to `output`
    pub fn transcode_file(&self, input: &Path, output: &Path) -> Result<TranscodeResult> {
        let start_time = Instant::now();
        debug!("Mutating {:?} into {:?}", input, output);

        let image = decode(input)?;
        let original_size = (image.width(), image.height());

        let transformed = self.apply(&image)?;
        let output_size = transformed.dimensions();

        let bytes = encode(transformed, self.format, self.quality, output)?;
        std::fs::write(output, &bytes).writing(output)?;

        let result = TranscodeResult {
            input_path: input.to_path_buf(),
            output_path: output.to_path_buf(),
            original_size,
            output_size,
            bytes_written: bytes.len() as u64,
            processing_time: start_time.elapsed(),
        };

        debug!(
            "Wrote {:?}: {}x{} -> {}x{} ({} bytes in {:.2}s)",
            output,
            original_size.0,
            original_size.1,
            output_size.0,
            output_size.1,
            result.bytes_written,
            result.processing_time.as_secs_f64()
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitMode;
    use crate::error::DropmakerError;
    use crate::parallel::{BoundedExecutor, CollectingFailureSink, Job};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn half_transparent(width: u32, height: u32) -> image::DynamicImage {
        image::DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([200, 10, 10, 255])
            }
        }))
    }

    #[test]
    fn test_background_fill_flattens_alpha() {
        let pipeline = TransformPipeline::new(OutputFormat::Png, 80);

        let out = pipeline.apply(&half_transparent(10, 4)).unwrap();

        assert_eq!(*out.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(*out.get_pixel(9, 0), Rgba([200, 10, 10, 255]));
        assert!(out.pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn test_steps_run_in_order() {
        // The watermark is applied after resizing, so it covers the resized
        // square rather than the original one.
        let black = Rgba([0, 0, 0, 255]);
        let pipeline = TransformPipeline::new(OutputFormat::Png, 80)
            .with_resize(ResizeSpec::Fit { mode: FitMode::Stretch, width: 40, height: 20 })
            .with_watermark(Watermark::from_image(RgbaImage::from_pixel(2, 2, black)));

        let out = pipeline.apply(&half_transparent(100, 100)).unwrap();

        assert_eq!(out.dimensions(), (40, 20));
        assert_eq!(*out.get_pixel(10, 0), black);
        assert_eq!(*out.get_pixel(29, 19), black);
        assert_ne!(*out.get_pixel(0, 0), black);
    }

    #[test]
    fn test_transcode_file_writes_jpeg() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.jpg");
        half_transparent(64, 48).save(&input).unwrap();

        let pipeline = TransformPipeline::new(OutputFormat::Jpeg, 75)
            .with_resize(ResizeSpec::Percent(50.0));
        let result = pipeline.transcode_file(&input, &output).unwrap();

        assert_eq!(result.original_size, (64, 48));
        assert_eq!(result.output_size, (32, 24));
        let written = std::fs::read(&output).unwrap();
        assert_eq!(written.len() as u64, result.bytes_written);
        assert_eq!(image::guess_format(&written).unwrap(), image::ImageFormat::Jpeg);
    }

    #[test]
    fn test_transcode_file_reports_decode_failure() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("broken.png");
        std::fs::write(&input, b"\x89PNG but not really").unwrap();

        let pipeline = TransformPipeline::new(OutputFormat::Jpeg, 80);
        let err = pipeline
            .transcode_file(&input, &dir.path().join("broken.jpg"))
            .unwrap_err();

        assert!(matches!(err, DropmakerError::Decode { .. }));
        assert!(!dir.path().join("broken.jpg").exists());
    }

    #[test]
    fn test_oversized_resize_fails_one_job_only() {
        let pipeline = Arc::new(
            TransformPipeline::new(OutputFormat::Jpeg, 80)
                .with_resize(ResizeSpec::parse("16777216x16777216").unwrap()),
        );
        let failures = Arc::new(CollectingFailureSink::new());
        let executor = BoundedExecutor::new(1)
            .unwrap()
            .with_failure_sink(failures.clone());

        let oversized = Arc::clone(&pipeline);
        executor
            .submit(Job::new("huge".to_string(), move |_: &String| {
                oversized.apply(&half_transparent(1, 1))?;
                Ok(())
            }))
            .unwrap();
        let ran_next = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran_next);
        executor
            .submit(Job::new("next".to_string(), move |_: &String| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();

        let report = executor.run_all().unwrap();

        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);
        assert!(ran_next.load(Ordering::SeqCst));
        let records = failures.records();
        assert_eq!(records[0].identity, "huge");
        assert!(records[0].message.contains("too large"));
    }

    #[test]
    fn test_from_config_loads_watermark() {
        let dir = TempDir::new().unwrap();
        let mark = dir.path().join("mark.png");
        RgbaImage::from_pixel(3, 3, Rgba([1, 2, 3, 255])).save(&mark).unwrap();

        let config = ProcessingConfig {
            watermark: Some(mark),
            quality: 90,
            ..ProcessingConfig::default()
        };
        let pipeline = TransformPipeline::from_config(&config).unwrap();

        assert!(pipeline.watermark.is_some());
        assert_eq!(pipeline.quality(), 90);
        assert_eq!(pipeline.format(), OutputFormat::Jpeg);
    }
}
