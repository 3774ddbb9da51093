//! Centred square watermark overlay

use std::path::Path;

use image::imageops;
use image::RgbaImage;
use tracing::debug;

use crate::error::{DropmakerError, Result};
use crate::processing::resize::FilterType;

/// Watermark decoded once and shared read-only by every job
#[derive(Debug, Clone)]
pub struct Watermark {
    image: RgbaImage,
}

impl Watermark {
    /// Decode the watermark image at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|source| DropmakerError::Watermark {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Loaded watermark {:?} ({}x{})", path, image.width(), image.height());

        Ok(Self {
            image: image.to_rgba8(),
        })
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Side of the square the watermark covers on a `width`x`height` image,
    /// and where that square starts
    pub fn placement(width: u32, height: u32) -> (u32, u32, u32) {
        let side = width.min(height);
        (side, (width - side) / 2, (height - side) / 2)
    }

    /// Scale the watermark to the largest centred square of `base` and blend it on top
    pub fn apply(&self, base: &mut RgbaImage, filter: FilterType) {
        let (side, x, y) = Self::placement(base.width(), base.height());
        if side == 0 {
            return;
        }

        let mark = imageops::resize(&self.image, side, side, filter.into());
        imageops::overlay(base, &mark, i64::from(x), i64::from(y));
    }
}
