//! Raster image Thumber.
//!
//! | Step | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, WebP, TIFF) | `image::ImageReader` with format guessing |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//!
//! The output keeps the source aspect ratio and fits inside the requested
//! size. Images already smaller than the box are returned as decoded.
//! Mosaic cells use [`fill_image`] instead, which scales up or down until the
//! cell is covered and crops the overflow.

use super::calculations::fit_within;
use super::{RenderContext, Size, ThumbError, Thumber, accept_mimes};
use crate::fs::Resource;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::path::Path;

/// Content types with a compiled-in decoder.
pub const IMAGE_MIMES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/tiff",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageThumber;

impl ImageThumber {
    pub fn new() -> Self {
        Self
    }

    /// Decode `path` and shrink it to fit `size`.
    pub fn render(&self, path: &Path, size: Size) -> Result<DynamicImage, ThumbError> {
        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(fit_image(image, size))
    }
}

/// Shrink `image` to fit `size`, keeping its aspect ratio.
pub fn fit_image(image: DynamicImage, size: Size) -> DynamicImage {
    let (w, h) = fit_within((image.width(), image.height()), size);
    if (w, h) == (image.width(), image.height()) {
        return image;
    }
    image.resize_exact(w, h, FilterType::Lanczos3)
}

/// Scale `image` until it covers `size`, then crop it to `size` around the
/// center.
pub fn fill_image(image: DynamicImage, size: Size) -> DynamicImage {
    if (image.width(), image.height()) == (size.width, size.height) {
        return image;
    }
    image.resize_to_fill(size.width, size.height, FilterType::Lanczos3)
}

impl Thumber for ImageThumber {
    fn name(&self) -> &'static str {
        "image"
    }

    fn accepts(&self, resource: &Resource) -> Result<bool, ThumbError> {
        accept_mimes(resource, IMAGE_MIMES)
    }

    fn thumb(
        &self,
        resource: &Resource,
        size: Size,
        _ctx: &RenderContext<'_>,
    ) -> Result<DynamicImage, ThumbError> {
        self.render(resource.path(), size)
    }
}
