//! On-disk cache backend.
//!
//! Each entry is one file in the cache directory named after its key's
//! storage name. Writes go to `<name>.partial` and are renamed into place on
//! commit, so a crash mid-write never leaves a truncated entry under a real
//! name. The file's modification time *is* the entry's creation time, which
//! lets a restarted process trust what it finds on disk.
//!
//! Readers keep the entry shared-locked until they drop their handle: a
//! replacement has to wait for them rather than swap the file underneath.

use super::lock::{KeyedLocks, ReadGuard, WriteGuard};
use super::{Cache, CacheError, CacheKey, CacheWriter, CachedEntry};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

const PARTIAL_SUFFIX: &str = ".partial";

pub struct DiskCache {
    dir: PathBuf,
    locks: KeyedLocks<SystemTime>,
}

impl DiskCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    ///
    /// Every file already in the directory becomes a committed entry, dated
    /// by its modification time. Leftover `.partial` files from an
    /// interrupted run are deleted.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        create_private_dir(&dir)?;

        let mut entries = Vec::new();
        let mut discarded = 0usize;
        for dirent in fs::read_dir(&dir)? {
            let dirent = dirent?;
            let file_type = dirent.file_type()?;
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = dirent.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.ends_with(PARTIAL_SUFFIX) {
                remove_if_exists(&dirent.path())?;
                discarded += 1;
                continue;
            }
            entries.push((name, dirent.metadata()?.modified()?));
        }

        info!(
            dir = %dir.display(),
            entries = entries.len(),
            discarded,
            "opened disk cache"
        );
        Ok(Self {
            dir,
            locks: KeyedLocks::with_entries(entries),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn partial_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{PARTIAL_SUFFIX}"))
    }

    fn destroy_name(&self, name: &str) -> Result<(), CacheError> {
        let guard = self.locks.write(name);
        let removed = remove_if_exists(&self.entry_path(name));
        self.locks.retire(name, guard);
        removed?;
        trace!(name, "destroyed disk entry");
        Ok(())
    }
}

impl Cache for DiskCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError> {
        let name = key.storage_name()?;
        let Some(guard) = self.locks.read(&name) else {
            return Ok(None);
        };
        let Some(created_at) = guard.value else {
            return Ok(None);
        };
        let file = match File::open(self.entry_path(&name)) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(name, "cache file vanished from disk");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Some(CachedEntry {
            reader: Box::new(GuardedFile {
                file,
                _guard: guard,
            }),
            created_at,
            generated: false,
        }))
    }

    fn put(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter + '_>, CacheError> {
        let name = key.storage_name()?;
        let guard = self.locks.write(&name);
        Ok(Box::new(DiskWriter {
            cache: self,
            partial: self.partial_path(&name),
            name,
            guard: Some(guard),
            file: None,
        }))
    }

    fn destroy(&self, key: &CacheKey) -> Result<(), CacheError> {
        if key.is_all_instances() {
            for name in self.locks.keys_with_prefix(&key.resource_prefix()) {
                self.destroy_name(&name)?;
            }
            return Ok(());
        }
        self.destroy_name(&key.storage_name()?)
    }
}

/// A cache file that keeps its entry shared-locked while open.
struct GuardedFile {
    file: File,
    _guard: ReadGuard<SystemTime>,
}

impl Read for GuardedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for GuardedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

struct DiskWriter<'a> {
    cache: &'a DiskCache,
    name: String,
    partial: PathBuf,
    guard: Option<WriteGuard<SystemTime>>,
    /// Created on first write.
    file: Option<File>,
}

impl DiskWriter<'_> {
    fn discard_partial(&mut self) -> io::Result<()> {
        if self.file.take().is_some() {
            remove_if_exists(&self.partial)?;
        }
        Ok(())
    }

    fn publish(&mut self, created_at: SystemTime) -> io::Result<SystemTime> {
        let file = match self.file.take() {
            Some(file) => file,
            None => File::create(&self.partial)?,
        };
        file.set_modified(created_at)?;
        drop(file);

        let path = self.cache.entry_path(&self.name);
        fs::rename(&self.partial, &path)?;
        fs::metadata(&path)?.modified()
    }
}

impl Write for DiskWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = match self.file.take() {
            Some(file) => file,
            None => File::create(&self.partial)?,
        };
        self.file.insert(file).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl CacheWriter for DiskWriter<'_> {
    fn committed_at(&self) -> Option<SystemTime> {
        self.guard.as_ref().and_then(|guard| guard.value)
    }

    fn commit(mut self: Box<Self>, created_at: SystemTime) -> Result<SystemTime, CacheError> {
        let Some(mut guard) = self.guard.take() else {
            return Ok(created_at);
        };
        match self.publish(created_at) {
            Ok(stored) => {
                guard.value = Some(stored);
                trace!(name = %self.name, "committed disk entry");
                Ok(stored)
            }
            Err(err) => {
                if let Err(cleanup) = remove_if_exists(&self.partial) {
                    warn!(name = %self.name, error = %cleanup, "failed to remove partial file");
                }
                self.cache.locks.release(&self.name, guard);
                Err(err.into())
            }
        }
    }

    fn destroy(mut self: Box<Self>) -> Result<(), CacheError> {
        let Some(guard) = self.guard.take() else {
            return Ok(());
        };
        let partial = self.discard_partial();
        let entry = remove_if_exists(&self.cache.entry_path(&self.name));
        self.cache.locks.retire(&self.name, guard);
        partial?;
        entry?;
        debug!(name = %self.name, "discarded disk entry");
        Ok(())
    }
}

impl Drop for DiskWriter<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        if let Err(err) = self.discard_partial() {
            warn!(name = %self.name, error = %err, "failed to remove partial file");
        }
        self.cache.locks.release(&self.name, guard);
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}
