//! Resize geometry and resampling

use image::imageops;
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{FitMode, ResizeSpec};
use crate::error::{DropmakerError, Result};

/// Largest width or height produced by a resize
pub const MAX_DIMENSION: u32 = 65_535;

/// Largest pixel count of any intermediate or final resize buffer
pub const MAX_PIXELS: u64 = 100_000_000;

/// Available resize filters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// Nearest neighbor (fastest, lowest quality)
    Nearest,
    /// Triangle (linear interpolation)
    Triangle,
    /// Catmull-Rom cubic spline
    CatmullRom,
    /// Gaussian blur
    Gaussian,
    /// Lanczos with radius 3 (high quality, recommended)
    #[default]
    Lanczos3,
}

impl From<FilterType> for imageops::FilterType {
    fn from(filter: FilterType) -> Self {
        match filter {
            FilterType::Nearest => imageops::FilterType::Nearest,
            FilterType::Triangle => imageops::FilterType::Triangle,
            FilterType::CatmullRom => imageops::FilterType::CatmullRom,
            FilterType::Gaussian => imageops::FilterType::Gaussian,
            FilterType::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

/// What happens after scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The scaled image is the output
    Scaled,
    /// The scaled image is centred on a background-filled canvas
    Pad,
    /// The canvas is cut from the centre of the scaled image
    Crop,
}

/// Target geometry for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub scaled: (u32, u32),
    pub canvas: (u32, u32),
    pub placement: Placement,
}

impl Geometry {
    fn scaled(width: u32, height: u32) -> Self {
        Self {
            scaled: (width, height),
            canvas: (width, height),
            placement: Placement::Scaled,
        }
    }

    /// Reject geometries whose buffers would exceed [`MAX_DIMENSION`] or [`MAX_PIXELS`]
    pub fn check(&self) -> Result<()> {
        for (width, height) in [self.scaled, self.canvas] {
            let pixels = u64::from(width) * u64::from(height);
            if width > MAX_DIMENSION || height > MAX_DIMENSION || pixels > MAX_PIXELS {
                return Err(DropmakerError::image_too_large(width, height, MAX_PIXELS));
            }
        }
        Ok(())
    }

    /// True when the image comes out unchanged
    pub fn is_identity(&self, width: u32, height: u32) -> bool {
        self.placement == Placement::Scaled && self.scaled == (width, height)
    }
}

/// Calculate the geometry for an image of `width`x`height`
pub fn calculate_geometry(width: u32, height: u32, spec: &ResizeSpec) -> Geometry {
    match *spec {
        ResizeSpec::Percent(percent) => {
            let factor = percent / 100.0;
            Geometry::scaled(scale(width, factor), scale(height, factor))
        }

        ResizeSpec::Exact { width: tw, height: th } => Geometry::scaled(tw, th),

        ResizeSpec::Fit { mode, width: tw, height: th } => {
            let fit_factor = (tw as f32 / width as f32).min(th as f32 / height as f32);
            let cover_factor = (tw as f32 / width as f32).max(th as f32 / height as f32);
            let fits = width <= tw && height <= th;

            match mode {
                FitMode::Stretch => Geometry::scaled(tw, th),

                FitMode::Cover => {
                    Geometry::scaled(scale(width, fit_factor), scale(height, fit_factor))
                }

                FitMode::ContainDown => Geometry {
                    scaled: (
                        scale(width, fit_factor).min(tw),
                        scale(height, fit_factor).min(th),
                    ),
                    canvas: (tw, th),
                    placement: Placement::Pad,
                },

                FitMode::Contain => {
                    let scaled = if fits {
                        (width, height)
                    } else {
                        (
                            scale(width, fit_factor).min(tw),
                            scale(height, fit_factor).min(th),
                        )
                    };
                    Geometry {
                        scaled,
                        canvas: (tw, th),
                        placement: Placement::Pad,
                    }
                }

                FitMode::Crop => Geometry {
                    scaled: (
                        scale(width, cover_factor).max(tw),
                        scale(height, cover_factor).max(th),
                    ),
                    canvas: (tw, th),
                    placement: Placement::Crop,
                },

                FitMode::Min => {
                    if cover_factor >= 1.0 {
                        Geometry::scaled(width, height)
                    } else {
                        Geometry::scaled(scale(width, cover_factor), scale(height, cover_factor))
                    }
                }
            }
        }
    }
}

fn scale(dimension: u32, factor: f32) -> u32 {
    ((dimension as f32 * factor).round() as u32).max(1)
}

/// Applies a [`ResizeSpec`] to decoded images
#[derive(Debug, Clone, Copy)]
pub struct ImageResizer {
    filter: FilterType,
}

impl ImageResizer {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }

    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> FilterType {
        self.filter
    }

    /// Resize `image` according to `spec`, padding with `background`.
    ///
    /// Fails with [`DropmakerError::ImageTooLarge`] before allocating when the
    /// target is over the size limits.
    pub fn resize(
        &self,
        image: RgbaImage,
        spec: &ResizeSpec,
        background: Rgba<u8>,
    ) -> Result<RgbaImage> {
        let (width, height) = image.dimensions();
        let geometry = calculate_geometry(width, height, spec);

        debug!(
            "Resizing {}x{} -> {}x{} (canvas {}x{}, {:?}) using {:?}",
            width,
            height,
            geometry.scaled.0,
            geometry.scaled.1,
            geometry.canvas.0,
            geometry.canvas.1,
            geometry.placement,
            self.filter
        );

        if geometry.is_identity(width, height) {
            return Ok(image);
        }
        geometry.check()?;

        let scaled = if geometry.scaled == (width, height) {
            image
        } else {
            imageops::resize(&image, geometry.scaled.0, geometry.scaled.1, self.filter.into())
        };

        let (canvas_width, canvas_height) = geometry.canvas;
        let resized = match geometry.placement {
            Placement::Scaled => scaled,
            Placement::Pad => {
                let mut canvas = RgbaImage::from_pixel(canvas_width, canvas_height, background);
                let x = (canvas_width - scaled.width()) / 2;
                let y = (canvas_height - scaled.height()) / 2;
                imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));
                canvas
            }
            Placement::Crop => {
                let x = (scaled.width() - canvas_width) / 2;
                let y = (scaled.height() - canvas_height) / 2;
                imageops::crop_imm(&scaled, x, y, canvas_width, canvas_height).to_image()
            }
        };
        Ok(resized)
    }
}

impl Default for ImageResizer {
    fn default() -> Self {
        Self::new()
    }
}
