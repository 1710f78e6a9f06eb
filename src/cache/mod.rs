//! Content cache with per-key concurrency control.
//!
//! Generating a thumbnail can take anywhere from milliseconds (a small PNG)
//! to seconds (shelling out to a transcoder). The cache makes sure that work
//! happens at most once at a time per key, and that nobody ever reads a
//! half-written artifact.
//!
//! # Keys
//!
//! A [`CacheKey`] pairs a resource identifier (the canonical path of the
//! source file) with an *instance label* that tells variants of the same
//! resource apart, e.g. `"140x140"`. The storage name of a key is
//! `hex(sha1(resource))-instance`, which is also the on-disk filename used by
//! [`DiskCache`]. An empty instance label means "every instance" and is only
//! accepted by [`Cache::destroy`].
//!
//! # Contract
//!
//! - [`Cache::get`] returns `None` for an absent key. If a write for the key
//!   is in flight it blocks until that write finishes.
//! - [`Cache::put`] reserves the key and hands back a [`CacheWriter`]. A
//!   second `put` on the same key waits for the first writer to finish.
//!   Bytes become visible only when the writer commits.
//! - [`Cache::destroy`] removes one entry, or all instances of a resource.
//!   Destroying an absent key is a no-op.
//!
//! # Orchestration
//!
//! [`cache_file`] is the generic staleness-check-and-regenerate driver on
//! top of any backend: it serves the cached entry while it is newer than the
//! source, and otherwise runs the producer while mirroring its output into an
//! in-memory buffer, so the fresh artifact can be handed back without reading
//! it from the backend again.

pub mod disk;
mod lock;
pub mod memory;

pub use disk::DiskCache;
pub use memory::MemoryCache;

use crate::fs::Resource;
use sha1::{Digest, Sha1};
use std::fmt;
use std::io::{self, Cursor, Read, Seek, Write};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid instance label {0:?}: use ASCII letters, digits, '-' or '_'")]
    InvalidInstance(String),
}

/// A readable, seekable view of a cached artifact.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Identifies one cached artifact: a resource plus an instance label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource: String,
    instance: String,
}

impl CacheKey {
    pub fn new(resource: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            instance: instance.into(),
        }
    }

    /// Key addressing every cached instance of `resource`.
    pub fn all_instances(resource: impl Into<String>) -> Self {
        Self::new(resource, "")
    }

    pub fn for_resource(resource: &Resource, instance: impl Into<String>) -> Self {
        Self::new(resource.id(), instance)
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn is_all_instances(&self) -> bool {
        self.instance.is_empty()
    }

    /// Hex SHA-1 of the resource identifier.
    pub fn resource_hash(&self) -> String {
        format!("{:x}", Sha1::digest(self.resource.as_bytes()))
    }

    /// Prefix shared by the storage names of every instance of the resource.
    pub(crate) fn resource_prefix(&self) -> String {
        format!("{}-", self.resource_hash())
    }

    /// Storage name of a single instance: `hex(sha1(resource))-instance`.
    pub fn storage_name(&self) -> Result<String, CacheError> {
        let valid = !self.instance.is_empty()
            && self
                .instance
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(CacheError::InvalidInstance(self.instance.clone()));
        }
        Ok(format!("{}{}", self.resource_prefix(), self.instance))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance.is_empty() {
            write!(f, "{} [*]", self.resource)
        } else {
            write!(f, "{} [{}]", self.resource, self.instance)
        }
    }
}

/// A cached artifact handed to a caller.
///
/// For disk-backed entries the reader keeps the entry shared-locked until it
/// is dropped, so it cannot be replaced or destroyed underneath the reader.
pub struct CachedEntry {
    pub reader: Box<dyn ReadSeek>,
    /// When the entry was committed. Always at or after the source's
    /// modification time at generation.
    pub created_at: SystemTime,
    /// `true` when the bytes were produced by this call rather than read
    /// back from the cache.
    pub generated: bool,
}

impl fmt::Debug for CachedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedEntry")
            .field("created_at", &self.created_at)
            .field("generated", &self.generated)
            .finish_non_exhaustive()
    }
}

/// Exclusive handle on a reserved key.
///
/// Dropping a writer without calling [`commit`](Self::commit) discards the
/// bytes written so far and leaves any previously committed entry in place.
pub trait CacheWriter: Write + Send {
    /// Creation time of the entry currently committed under this key, if any.
    fn committed_at(&self) -> Option<SystemTime>;

    /// Publish the written bytes with the given creation time. Returns the
    /// creation time as stored by the backend.
    fn commit(self: Box<Self>, created_at: SystemTime) -> Result<SystemTime, CacheError>;

    /// Discard the written bytes *and* the previously committed entry.
    fn destroy(self: Box<Self>) -> Result<(), CacheError>;
}

/// A key/value store of opaque byte blobs with blocking read-during-write
/// semantics. Implementations must be thread-safe.
pub trait Cache: Send + Sync {
    /// Fetch the committed entry for `key`, waiting for an in-flight write.
    fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError>;

    /// Reserve `key` for writing, waiting for an in-flight write.
    fn put(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter + '_>, CacheError>;

    /// Remove the entry for `key`, or all instances of the resource when the
    /// instance label is empty. No-op for absent keys.
    fn destroy(&self, key: &CacheKey) -> Result<(), CacheError>;
}

/// `true` if the source changed after the cached entry was created.
pub fn is_stale(source_modified: SystemTime, created_at: SystemTime) -> bool {
    source_modified > created_at
}

/// Serve `resource` at `instance` from `cache`, regenerating it with
/// `produce` when absent or older than the source.
///
/// When the producer fails the reserved entry is destroyed before the error
/// is returned, so the next call starts from scratch instead of serving a
/// truncated artifact.
pub fn cache_file<F, E>(
    cache: &dyn Cache,
    resource: &Resource,
    instance: &str,
    produce: F,
) -> Result<CachedEntry, E>
where
    F: FnOnce(&Resource, &mut dyn Write) -> Result<(), E>,
    E: From<CacheError>,
{
    let key = CacheKey::for_resource(resource, instance);
    let source_modified = resource.modified();

    if let Some(entry) = cache.get(&key)? {
        if !is_stale(source_modified, entry.created_at) {
            debug!(%key, "cache hit");
            return Ok(entry);
        }
        debug!(%key, "cache entry is stale");
        // The shared lock must go before asking for the exclusive one.
        drop(entry);
    }

    let mut writer = cache.put(&key)?;

    // Someone else may have produced the entry while we waited for the key.
    if writer
        .committed_at()
        .is_some_and(|created_at| !is_stale(source_modified, created_at))
    {
        drop(writer);
        if let Some(entry) = cache.get(&key)?
            && !is_stale(source_modified, entry.created_at)
        {
            debug!(%key, "cache filled by a concurrent producer");
            return Ok(entry);
        }
        writer = cache.put(&key)?;
    }

    debug!(%key, "generating");
    let mut mirror = Vec::new();
    let produced = produce(
        resource,
        &mut Tee {
            sink: &mut *writer,
            mirror: &mut mirror,
        },
    );

    if let Err(err) = produced {
        if let Err(destroy_err) = writer.destroy() {
            warn!(%key, error = %destroy_err, "failed to discard partial cache entry");
        }
        return Err(err);
    }

    let created_at = writer.commit(SystemTime::now().max(source_modified))?;
    Ok(CachedEntry {
        reader: Box::new(Cursor::new(mirror)),
        created_at,
        generated: true,
    })
}

/// Writes everything to the cache writer and keeps a copy in memory.
struct Tee<'a> {
    sink: &'a mut dyn Write,
    mirror: &'a mut Vec<u8>,
}

impl Write for Tee<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.sink.write(buf)?;
        self.mirror.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}
