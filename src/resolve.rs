//! Turning the accumulation buffer into a displayable image.

use std::{num::NonZeroU32, path::Path};

use image::{DynamicImage, ImageFormat, Rgba32FImage};
use thiserror::Error;

use crate::util::Rgba;

/// How accumulated sums are turned into final pixel values.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Normalization {
    /// All four channels divided by the number of frames
    FrameCount(NonZeroU32),
    /// Color divided by the accumulated weight in alpha, alpha becomes 1.
    /// Pixels without any weight stay zero.
    PerPixelWeight,
}

impl Normalization {
    pub fn apply(&self, sum: Rgba) -> Rgba {
        match self {
            Normalization::FrameCount(n) => {
                let scale = 1.0 / n.get() as f32;
                Rgba::new(sum.r * scale, sum.g * scale, sum.b * scale, sum.a * scale)
            }
            Normalization::PerPixelWeight => {
                if sum.a == 0.0 {
                    Rgba::new(0.0, 0.0, 0.0, 0.0)
                } else {
                    Rgba::new(sum.r / sum.a, sum.g / sum.a, sum.b / sum.a, 1.0)
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("Image of {width}x{height} pixels can't hold {pixels} pixels")]
    SizeMismatch {
        width: u32,
        height: u32,
        pixels: usize,
    },
}

/// Final RGBA image, rows from top to bottom.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedImage {
    width: u32,
    height: u32,
    pixels: Vec<Rgba>,
}

impl ResolvedImage {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Dense buffer with four floats per pixel.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.pixels
            .iter()
            .flat_map(|p| [p.r, p.g, p.b, p.a])
            .collect()
    }

    pub fn to_dynamic_image(&self) -> Result<DynamicImage, OutputError> {
        let buffer = Rgba32FImage::from_raw(self.width, self.height, self.to_f32_vec()).ok_or(
            OutputError::SizeMismatch {
                width: self.width,
                height: self.height,
                pixels: self.pixels.len(),
            },
        )?;
        Ok(DynamicImage::ImageRgba32F(buffer))
    }

    /// Writes the image, format chosen by the file extension.
    /// OpenEXR keeps the float values, other formats are clamped to 8 bits.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), OutputError> {
        let path = path.as_ref();
        let image = self.to_dynamic_image()?;

        match ImageFormat::from_path(path)? {
            ImageFormat::OpenExr => image.save(path)?,
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()).save(path)?,
            _ => DynamicImage::ImageRgba8(image.to_rgba8()).save(path)?,
        }

        log::info!("Saved {}x{} image to {}", self.width, self.height, path.display());
        Ok(())
    }
}

/// Normalizes accumulated per-pixel sums into the final image.
pub fn resolve(
    sums: &[Rgba],
    width: u32,
    height: u32,
    normalization: Normalization,
) -> ResolvedImage {
    ResolvedImage {
        width,
        height,
        pixels: sums.iter().map(|sum| normalization.apply(*sum)).collect(),
    }
}
