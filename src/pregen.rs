//! Thumbnail pregeneration.
//!
//! Walks the whole mount and renders a thumbnail for every visible entry so
//! later requests are served from the cache. Workers share the filesystem's
//! cache and registry with everything else; two workers (or a worker and a
//! live request) asking for the same key simply queue on its lock.
//!
//! Individual failures are logged and counted. They never stop the walk.

use crate::fs::{FsError, Filesystem};
use crate::thumb::Size;
use rayon::prelude::*;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Outcome counts of one pregeneration run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PregenStats {
    /// Rendered by this run.
    pub generated: usize,
    /// Already fresh in the cache.
    pub cached: usize,
    /// No Thumber accepts the entry.
    pub unsupported: usize,
    pub failed: usize,
}

impl PregenStats {
    pub fn total(&self) -> usize {
        self.generated + self.cached + self.unsupported + self.failed
    }
}

impl fmt::Display for PregenStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} generated, {} cached, {} unsupported",
            self.generated, self.cached, self.unsupported
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        write!(f, " ({} total)", self.total())
    }
}

#[derive(Default)]
struct Counters {
    generated: AtomicUsize,
    cached: AtomicUsize,
    unsupported: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> PregenStats {
        PregenStats {
            generated: self.generated.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Mount-relative request paths of every visible entry below the root.
/// Symlinked directories are descended into; link loops count as failures.
fn collect_paths(root: &Path, counters: &Counters) -> Vec<String> {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|rel| rel.to_string_lossy().into_owned()),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                counters.failed.fetch_add(1, Ordering::Relaxed);
                None
            }
        })
        .collect()
}

/// Render thumbnails of `size` for every visible entry under the mount,
/// using `workers` threads.
pub fn pregenerate(fs: &Filesystem, size: Size, workers: usize) -> Result<PregenStats, FsError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("webfs-pregen-{i}"))
        .build()?;

    let counters = Counters::default();
    let paths = collect_paths(fs.root(), &counters);
    info!(entries = paths.len(), workers, %size, "pregenerating thumbnails");

    pool.install(|| {
        paths.par_iter().for_each(|path| match fs.thumbnail(path, size) {
            Ok(thumbnail) if thumbnail.generated => {
                debug!(path = %path, "generated");
                counters.generated.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                counters.cached.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) if err.is_no_thumbnail() => {
                counters.unsupported.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!(path = %path, error = %err, "thumbnail generation failed");
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        });
    });

    let stats = counters.snapshot();
    info!(%stats, "pregeneration finished");
    Ok(stats)
}
