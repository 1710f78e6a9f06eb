//! Vector document Thumber.
//!
//! PDF, PostScript and SVG are rasterized by Inkscape into a temporary PNG on
//! a white background, cropped to the drawing area, which is then decoded and
//! fitted to the requested size.

use super::image::fit_image;
use super::process::Tool;
use super::{RenderContext, Size, ThumbError, Thumber, accept_mimes};
use crate::fs::Resource;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::ffi::OsString;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const VECTOR_MIMES: &[&str] = &["application/pdf", "application/postscript", "image/svg+xml"];

pub struct VectorThumber {
    inkscape: Tool,
    timeout: Duration,
}

impl VectorThumber {
    pub fn new(inkscape: Tool, timeout: Duration) -> Self {
        Self { inkscape, timeout }
    }

    /// `None` (and a warning) when Inkscape is not installed.
    pub fn locate(timeout: Duration) -> Option<Self> {
        let Some(inkscape) = Tool::locate("inkscape") else {
            warn!("Disabling vector thumber, inkscape not found in PATH");
            return None;
        };
        Some(Self::new(inkscape, timeout))
    }

    fn args(source: &Path, target: &Path, size: Size) -> Vec<OsString> {
        let mut export = OsString::from("--export-filename=");
        export.push(target);
        vec![
            source.into(),
            export,
            "--export-type=png".into(),
            "--export-background=white".into(),
            "--export-background-opacity=1".into(),
            format!("--export-width={}", size.width).into(),
            format!("--export-height={}", size.height).into(),
            "--export-area-drawing".into(),
        ]
    }
}

impl Thumber for VectorThumber {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn accepts(&self, resource: &Resource) -> Result<bool, ThumbError> {
        accept_mimes(resource, VECTOR_MIMES)
    }

    fn thumb(
        &self,
        resource: &Resource,
        size: Size,
        _ctx: &RenderContext<'_>,
    ) -> Result<DynamicImage, ThumbError> {
        // Removed on drop, whichever way this returns.
        let target = tempfile::Builder::new()
            .prefix("webfs_vecthumb_")
            .suffix(".png")
            .tempfile()?;
        self.inkscape.run(
            Self::args(resource.path(), target.path(), size),
            self.timeout,
        )?;

        // Inkscape may replace the file rather than write into it, so open by path.
        let reader = BufReader::new(File::open(target.path())?);
        let image = ImageReader::with_format(reader, ImageFormat::Png).decode()?;
        Ok(fit_image(image, size))
    }
}
