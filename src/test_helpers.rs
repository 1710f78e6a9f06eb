//! Shared test utilities for the webfs test suite.
//!
//! Provides synthetic image fixtures, small I/O helpers, and fake
//! [`Thumber`]s with predictable behaviour for exercising the registry,
//! the mosaic composer, and the cache orchestration without real decoders.
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! create_test_png(&tmp.path().join("a.png"), 64, 48);
//!
//! let mut registry = Registry::new();
//! registry.register(SolidThumber::new("red", Rgb([255, 0, 0])));
//! ```

use crate::fs::Resource;
use crate::thumb::{RenderContext, Size, ThumbError, Thumber};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

// =========================================================================
// Fixture setup
// =========================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    })
}

/// Write a gradient PNG of the given size.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    gradient(width, height)
        .save_with_format(path, ImageFormat::Png)
        .unwrap();
}

/// Write a gradient JPEG of the given size.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    gradient(width, height)
        .save_with_format(path, ImageFormat::Jpeg)
        .unwrap();
}

/// Drain a reader into a byte vector.
pub fn read_all(mut reader: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).unwrap();
    buf
}

/// Set the modification time of `path` to a second after `after`, so a
/// cache entry created at `after` becomes stale regardless of clock
/// granularity.
pub fn touch_future(path: &Path, after: SystemTime) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(after + Duration::from_secs(1)).unwrap();
}

// =========================================================================
// Fake thumbers
// =========================================================================

/// Accepts every file and renders a solid colour at exactly the requested
/// size. Records every size it was asked for.
pub struct SolidThumber {
    name: &'static str,
    color: Rgb<u8>,
    pub sizes: Arc<Mutex<Vec<Size>>>,
}

impl SolidThumber {
    pub fn new(name: &'static str, color: Rgb<u8>) -> Self {
        Self {
            name,
            color,
            sizes: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Thumber for SolidThumber {
    fn name(&self) -> &'static str {
        self.name
    }

    fn accepts(&self, resource: &Resource) -> Result<bool, ThumbError> {
        Ok(!resource.is_dir())
    }

    fn thumb(
        &self,
        _resource: &Resource,
        size: Size,
        _ctx: &RenderContext<'_>,
    ) -> Result<DynamicImage, ThumbError> {
        self.sizes.lock().push(size);
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            size.width,
            size.height,
            self.color,
        )))
    }
}

/// Accepts every file and always fails to render.
pub struct FailingThumber;

impl Thumber for FailingThumber {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn accepts(&self, resource: &Resource) -> Result<bool, ThumbError> {
        Ok(!resource.is_dir())
    }

    fn thumb(
        &self,
        resource: &Resource,
        _size: Size,
        _ctx: &RenderContext<'_>,
    ) -> Result<DynamicImage, ThumbError> {
        Err(ThumbError::Generation(format!(
            "refusing to render {}",
            resource.name()
        )))
    }
}

/// Accepts every file, renders a grey square, and counts invocations.
pub struct CountingThumber {
    pub calls: Arc<AtomicUsize>,
}

impl CountingThumber {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Thumber for CountingThumber {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn accepts(&self, resource: &Resource) -> Result<bool, ThumbError> {
        Ok(!resource.is_dir())
    }

    fn thumb(
        &self,
        _resource: &Resource,
        size: Size,
        _ctx: &RenderContext<'_>,
    ) -> Result<DynamicImage, ThumbError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            size.width,
            size.height,
            Rgb([128, 128, 128]),
        )))
    }
}
