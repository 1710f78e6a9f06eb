//! The directory tree being served.
//!
//! A [`Resource`] is a snapshot of one file or directory: its canonical path
//! (which doubles as its cache identity), whether it is a directory, and its
//! modification time at the moment it was resolved. Resources hold no open
//! handles.
//!
//! [`Filesystem`] mounts a root directory and resolves request paths against
//! it. Paths are cleaned before use so `..` can never climb above the mount,
//! and anything with a component starting with `.` is hidden: dotfiles
//! resolve to [`FsError::NotFound`] just like missing files.
//!
//! Symlinks are followed wherever they point. Only the request path is
//! confined to the mount; a link inside the tree is served, drawn in mosaics
//! and pregenerated the same way as a regular entry.

use crate::cache::{Cache, CacheError, CacheKey};
use crate::thumb::{self, Quality, Registry, Size, ThumbError, Thumbnail};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Thumb(#[from] ThumbError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }

    pub fn is_no_thumbnail(&self) -> bool {
        matches!(self, FsError::Thumb(err) if err.is_no_thumbnail())
    }

    pub fn is_not_viewable(&self) -> bool {
        matches!(self, FsError::Thumb(err) if err.is_not_viewable())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    path: PathBuf,
    id: String,
    name: String,
    is_dir: bool,
    modified: SystemTime,
}

impl Resource {
    /// Stat `path` and capture it as a resource.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = fs::canonicalize(path)?;
        let meta = fs::metadata(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            id: path.to_string_lossy().into_owned(),
            name,
            is_dir: meta.is_dir(),
            modified: meta.modified()?,
            path,
        })
    }

    /// Canonical path on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stable identity used for cache keys.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }

    /// Modification time when the resource was resolved.
    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn open(&self) -> io::Result<File> {
        File::open(&self.path)
    }

    /// Entries of a directory, sorted by name. Entries that cannot be
    /// stat'ed (dangling symlinks, races with deletion) are skipped.
    pub fn children(&self) -> io::Result<Vec<Resource>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            match Resource::from_path(entry.path()) {
                Ok(child) => children.push(Resource {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    ..child
                }),
                Err(err) => debug!(path = %entry.path().display(), error = %err, "skipping entry"),
            }
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    /// The entry called `name` inside this directory, if it exists.
    pub fn child(&self, name: &str) -> io::Result<Option<Resource>> {
        match Resource::from_path(self.path.join(name)) {
            Ok(child) => Ok(Some(child)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Normalize a request path into components below the mount.
///
/// `.` and empty segments are dropped, `..` pops a segment but never past
/// the root. Returns `None` if any remaining segment is hidden.
pub fn clean_path(path: &str) -> Option<PathBuf> {
    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::ParentDir => {
                parts.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    if parts.iter().any(|part| part.starts_with('.')) {
        return None;
    }
    Some(parts.iter().collect())
}

/// A mounted directory tree with thumbnail support.
pub struct Filesystem {
    root: PathBuf,
    cache: Arc<dyn Cache>,
    registry: Arc<Registry>,
    quality: Quality,
}

impl Filesystem {
    pub fn new(
        mount: impl AsRef<Path>,
        cache: Arc<dyn Cache>,
        registry: Arc<Registry>,
        quality: Quality,
    ) -> Result<Self, FsError> {
        let mount = mount.as_ref();
        let root = fs::canonicalize(mount).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(mount.display().to_string()),
            _ => FsError::Io(err),
        })?;
        if !root.is_dir() {
            return Err(FsError::NotADirectory(root));
        }
        info!(root = %root.display(), "mounted filesystem");
        Ok(Self {
            root,
            cache,
            registry,
            quality,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache(&self) -> &dyn Cache {
        self.cache.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Absolute path of a request path, without checking it exists.
    pub fn real_path(&self, path: &str) -> Result<PathBuf, FsError> {
        let clean = clean_path(path).ok_or_else(|| FsError::NotFound(path.to_string()))?;
        Ok(self.root.join(clean))
    }

    /// Resolve a request path (relative to the mount) to a resource.
    pub fn resolve(&self, path: &str) -> Result<Resource, FsError> {
        let real = self.real_path(path)?;
        Resource::from_path(&real).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            _ => FsError::Io(err),
        })
    }

    /// Cached JPEG thumbnail of the resource at `path`.
    pub fn thumbnail(&self, path: &str, size: Size) -> Result<Thumbnail, FsError> {
        let resource = self.resolve(path)?;
        let thumbnail = thumb::thumb_file(
            self.cache.as_ref(),
            &self.registry,
            &resource,
            size,
            self.quality,
        )?;
        Ok(thumbnail)
    }

    /// Cached display-sized JPEG of the image at `path`.
    pub fn view(&self, path: &str) -> Result<Thumbnail, FsError> {
        let resource = self.resolve(path)?;
        Ok(thumb::view_file(self.cache.as_ref(), &resource, self.quality)?)
    }

    /// Drop every cached artifact of the resource at `path`.
    pub fn invalidate(&self, path: &str) -> Result<(), FsError> {
        let resource = self.resolve(path)?;
        self.cache
            .destroy(&CacheKey::all_instances(resource.id()))?;
        debug!(path = %resource.path().display(), "invalidated cached thumbnails");
        Ok(())
    }
}
