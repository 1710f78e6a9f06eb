//! Thumbnail generation.
//!
//! A [`Thumber`] is one strategy for turning a resource into a small image:
//! raster images are decoded and resized in-process, vector documents and
//! videos are handed to an external tool, and directories are tiled into a
//! mosaic of their children's thumbnails.
//!
//! Thumbers live in a [`Registry`], built once at startup and shared by
//! everything that renders. Lookup is a linear scan in registration order;
//! the first Thumber that accepts a resource wins.
//!
//! [`thumb_file`] ties the registry to the [cache](crate::cache): it serves
//! a JPEG thumbnail from the cache while it is fresh, and renders and stores a
//! new one otherwise. [`view_file`] does the same for display-sized copies of
//! JPEG and PNG images.
//!
//! | Module | Role |
//! |---|---|
//! | [`params`] | `Size` and `Quality` |
//! | [`calculations`] | Aspect-fit and mosaic grid math |
//! | [`mime`] | Extension lookup with magic-byte fallback |
//! | [`image`] | Raster Thumber (`image` crate, Lanczos3) |
//! | [`vector`] | PDF/PostScript/SVG via `inkscape` |
//! | [`video`] | Midpoint frame via `ffprobe` + `ffmpeg` |
//! | [`directory`] | Icon file or random mosaic of children |
//! | [`process`] | Locating and running external tools with a timeout |

pub mod calculations;
pub mod directory;
pub mod image;
pub mod mime;
pub mod params;
pub mod process;
pub mod vector;
pub mod video;

pub use directory::DirectoryThumber;
pub use image::ImageThumber;
pub use params::{Quality, Size};
pub use vector::VectorThumber;
pub use video::VideoThumber;

use crate::cache::{self, Cache, CacheError, ReadSeek};
use crate::config::{ThumbnailConfig, ToolsConfig};
use crate::fs::Resource;
use ::image::DynamicImage;
use ::image::codecs::jpeg::JpegEncoder;
use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info};

/// Content type of every thumbnail produced by [`thumb_file`].
pub const JPEG_MIME: &str = "image/jpeg";

/// How many directory levels a mosaic may render below the requested one.
pub const DEFAULT_MAX_DEPTH: usize = 1;

/// Cache instance label of display-sized images.
pub const VIEW_INSTANCE: &str = "view";

/// Box that display-sized images are shrunk to fit.
pub const VIEW_SIZE: Size = Size {
    width: 1366,
    height: 768,
};

/// Sources [`view_file`] will downscale.
pub const VIEW_MIMES: &[&str] = &["image/jpeg", "image/png"];

#[derive(Error, Debug)]
pub enum ThumbError {
    /// No registered Thumber accepts the resource. Not a fault: the resource
    /// type simply has no preview.
    #[error("no thumbnail available for {}", .0.display())]
    NoThumbnail(PathBuf),
    /// The resource is not an image that has a display-sized view.
    #[error("no view available for {}", .0.display())]
    NotViewable(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Image error: {0}")]
    Image(#[from] ::image::ImageError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("{tool} failed ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("{tool} did not finish within {timeout:?}")]
    Timeout { tool: String, timeout: Duration },
    #[error("No files to create a directory thumbnail")]
    NoCandidates,
    #[error("All files exhausted while trying to create a directory thumbnail")]
    Exhausted,
    #[error("mosaic nesting exceeds {0} level(s)")]
    DepthExceeded(usize),
    #[error("invalid thumbnail size {0}")]
    InvalidSize(Size),
    #[error("Generation failed: {0}")]
    Generation(String),
}

impl ThumbError {
    pub fn is_no_thumbnail(&self) -> bool {
        matches!(self, ThumbError::NoThumbnail(_))
    }

    pub fn is_not_viewable(&self) -> bool {
        matches!(self, ThumbError::NotViewable(_))
    }
}

/// A strategy that renders thumbnails for some kinds of resources.
pub trait Thumber: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this Thumber can render `resource`. I/O errors while
    /// inspecting the content are returned, not treated as a rejection.
    fn accepts(&self, resource: &Resource) -> Result<bool, ThumbError>;

    /// Render `resource` so that it fits in `size`.
    fn thumb(
        &self,
        resource: &Resource,
        size: Size,
        ctx: &RenderContext<'_>,
    ) -> Result<DynamicImage, ThumbError>;
}

/// `true` if the resource is a file whose content type is one of `mimes`.
pub fn accept_mimes(resource: &Resource, mimes: &[&str]) -> Result<bool, ThumbError> {
    if resource.is_dir() {
        return Ok(false);
    }
    let mime = mime::resolve(resource.path())?;
    Ok(mimes.contains(&mime.as_str()))
}

/// State threaded through a render so recursive Thumbers can reach the
/// registry and know how deep they are.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    registry: &'a Registry,
    depth: usize,
}

impl<'a> RenderContext<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry, depth: 0 }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn can_descend(&self) -> bool {
        self.depth < self.registry.max_depth()
    }

    /// Context for rendering one level further down.
    pub fn descend(&self) -> Result<RenderContext<'a>, ThumbError> {
        if !self.can_descend() {
            return Err(ThumbError::DepthExceeded(self.registry.max_depth()));
        }
        Ok(Self {
            registry: self.registry,
            depth: self.depth + 1,
        })
    }
}

impl fmt::Debug for RenderContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("depth", &self.depth)
            .field("max_depth", &self.registry.max_depth())
            .finish()
    }
}

/// Ordered collection of Thumbers.
pub struct Registry {
    thumbers: Vec<Box<dyn Thumber>>,
    max_depth: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            thumbers: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// The production registry: image, then vector and video when their
    /// tools are installed, then directory.
    pub fn with_defaults(thumbnails: &ThumbnailConfig, tools: &ToolsConfig) -> Self {
        let timeout = tools.timeout();
        let mut registry = Self::new().with_max_depth(thumbnails.mosaic_depth);
        registry.register(ImageThumber::new());
        if let Some(vector) = VectorThumber::locate(timeout) {
            registry.register(vector);
        }
        if let Some(video) = VideoThumber::locate(timeout) {
            registry.register(video);
        }
        registry.register(DirectoryThumber::new());
        info!(thumbers = ?registry.names(), "thumbnailers registered");
        registry
    }

    pub fn register(&mut self, thumber: impl Thumber + 'static) {
        self.thumbers.push(Box::new(thumber));
    }

    /// First Thumber accepting `resource`, if any.
    pub fn find(&self, resource: &Resource) -> Result<Option<&dyn Thumber>, ThumbError> {
        for thumber in &self.thumbers {
            if thumber.accepts(resource)? {
                return Ok(Some(thumber.as_ref()));
            }
        }
        Ok(None)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.thumbers.iter().map(|t| t.name()).collect()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Render `resource` with the first accepting Thumber.
    pub fn render(&self, resource: &Resource, size: Size) -> Result<DynamicImage, ThumbError> {
        let thumber = self
            .find(resource)?
            .ok_or_else(|| ThumbError::NoThumbnail(resource.path().to_path_buf()))?;
        debug!(thumber = thumber.name(), path = %resource.path().display(), %size, "rendering");
        thumber.thumb(resource, size, &RenderContext::new(self))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// A cached JPEG ready to be served.
pub struct Thumbnail {
    pub reader: Box<dyn ReadSeek>,
    pub mime: &'static str,
    pub created_at: SystemTime,
    /// `true` when rendered by this call, `false` on a cache hit.
    pub generated: bool,
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thumbnail")
            .field("mime", &self.mime)
            .field("created_at", &self.created_at)
            .field("generated", &self.generated)
            .finish_non_exhaustive()
    }
}

/// Serve a cached JPEG thumbnail of `resource`, rendering it when absent or
/// stale. Returns [`ThumbError::NoThumbnail`] when no Thumber accepts the
/// resource.
pub fn thumb_file(
    cache: &dyn Cache,
    registry: &Registry,
    resource: &Resource,
    size: Size,
    quality: Quality,
) -> Result<Thumbnail, ThumbError> {
    if size.is_empty() {
        return Err(ThumbError::InvalidSize(size));
    }
    let entry = cache::cache_file(cache, resource, &size.instance_label(), |resource, out| {
        let image = registry.render(resource, size)?;
        encode_jpeg(&image, quality, out)
    })?;
    Ok(Thumbnail {
        reader: entry.reader,
        mime: JPEG_MIME,
        created_at: entry.created_at,
        generated: entry.generated,
    })
}

/// Serve a cached display-sized JPEG of an image, shrinking it to fit
/// [`VIEW_SIZE`] when absent or stale. Anything but JPEG and PNG is
/// [`ThumbError::NotViewable`].
pub fn view_file(
    cache: &dyn Cache,
    resource: &Resource,
    quality: Quality,
) -> Result<Thumbnail, ThumbError> {
    if !accept_mimes(resource, VIEW_MIMES)? {
        return Err(ThumbError::NotViewable(resource.path().to_path_buf()));
    }
    let entry = cache::cache_file(cache, resource, VIEW_INSTANCE, |resource, out| {
        let image = ImageThumber::new().render(resource.path(), VIEW_SIZE)?;
        encode_jpeg(&image, quality, out)
    })?;
    Ok(Thumbnail {
        reader: entry.reader,
        mime: JPEG_MIME,
        created_at: entry.created_at,
        generated: entry.generated,
    })
}

/// JPEG-encode `image` into `out`. Alpha is dropped.
pub fn encode_jpeg(
    image: &DynamicImage,
    quality: Quality,
    out: &mut dyn Write,
) -> Result<(), ThumbError> {
    let rgb = image.to_rgb8();
    JpegEncoder::new_with_quality(out, quality.value()).encode_image(&rgb)?;
    Ok(())
}
