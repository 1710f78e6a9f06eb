//! In-process cache backend.
//!
//! Entries are immutable byte buffers behind an `Arc`, so a reader gets its
//! own cursor over the committed bytes and holds no lock once `get` returns.
//! A later commit swaps the buffer out for new readers without disturbing
//! the old ones.

use super::lock::{KeyedLocks, WriteGuard};
use super::{Cache, CacheError, CacheKey, CacheWriter, CachedEntry};
use std::io::{self, Cursor, Write};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::trace;

#[derive(Debug, Clone)]
struct MemEntry {
    bytes: Arc<[u8]>,
    created_at: SystemTime,
}

pub struct MemoryCache {
    locks: KeyedLocks<MemEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            locks: KeyedLocks::new(),
        }
    }

    fn destroy_name(&self, name: &str) {
        let guard = self.locks.write(name);
        self.locks.retire(name, guard);
        trace!(name, "destroyed memory entry");
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>, CacheError> {
        let name = key.storage_name()?;
        let Some(guard) = self.locks.read(&name) else {
            return Ok(None);
        };
        Ok(guard.value.as_ref().map(|entry| CachedEntry {
            reader: Box::new(Cursor::new(Arc::clone(&entry.bytes))),
            created_at: entry.created_at,
            generated: false,
        }))
    }

    fn put(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter + '_>, CacheError> {
        let name = key.storage_name()?;
        let guard = self.locks.write(&name);
        Ok(Box::new(MemoryWriter {
            locks: &self.locks,
            name,
            guard: Some(guard),
            buf: Vec::new(),
        }))
    }

    fn destroy(&self, key: &CacheKey) -> Result<(), CacheError> {
        if key.is_all_instances() {
            for name in self.locks.keys_with_prefix(&key.resource_prefix()) {
                self.destroy_name(&name);
            }
            return Ok(());
        }
        self.destroy_name(&key.storage_name()?);
        Ok(())
    }
}

struct MemoryWriter<'a> {
    locks: &'a KeyedLocks<MemEntry>,
    name: String,
    guard: Option<WriteGuard<MemEntry>>,
    buf: Vec<u8>,
}

impl Write for MemoryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CacheWriter for MemoryWriter<'_> {
    fn committed_at(&self) -> Option<SystemTime> {
        self.guard
            .as_ref()
            .and_then(|guard| guard.value.as_ref())
            .map(|entry| entry.created_at)
    }

    fn commit(mut self: Box<Self>, created_at: SystemTime) -> Result<SystemTime, CacheError> {
        if let Some(mut guard) = self.guard.take() {
            let bytes = std::mem::take(&mut self.buf);
            trace!(name = %self.name, len = bytes.len(), "committed memory entry");
            guard.value = Some(MemEntry {
                bytes: bytes.into(),
                created_at,
            });
        }
        Ok(created_at)
    }

    fn destroy(mut self: Box<Self>) -> Result<(), CacheError> {
        if let Some(guard) = self.guard.take() {
            self.locks.retire(&self.name, guard);
        }
        Ok(())
    }
}

impl Drop for MemoryWriter<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            self.locks.release(&self.name, guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::read_all;
    use std::io::{Read, Seek, SeekFrom};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn key(instance: &str) -> CacheKey {
        CacheKey::new("/photos/a.jpg", instance)
    }

    fn store(cache: &MemoryCache, key: &CacheKey, bytes: &[u8]) -> SystemTime {
        let mut writer = cache.put(key).unwrap();
        writer.write_all(bytes).unwrap();
        writer.commit(SystemTime::now()).unwrap()
    }

    #[test]
    fn get_absent_is_none() {
        let cache = MemoryCache::new();
        assert!(cache.get(&key("1x1")).unwrap().is_none());
    }

    #[test]
    fn committed_bytes_round_trip() {
        let cache = MemoryCache::new();
        let created = store(&cache, &key("1x1"), b"abc");

        let entry = cache.get(&key("1x1")).unwrap().unwrap();
        assert_eq!(entry.created_at, created);
        assert!(!entry.generated);
        assert_eq!(read_all(entry.reader), b"abc");
    }

    #[test]
    fn reader_is_seekable() {
        let cache = MemoryCache::new();
        store(&cache, &key("1x1"), b"0123456789");

        let mut entry = cache.get(&key("1x1")).unwrap().unwrap();
        entry.reader.seek(SeekFrom::Start(7)).unwrap();
        let mut tail = String::new();
        entry.reader.read_to_string(&mut tail).unwrap();
        assert_eq!(tail, "789");
    }

    #[test]
    fn dropped_writer_leaves_key_absent() {
        let cache = MemoryCache::new();
        let mut writer = cache.put(&key("1x1")).unwrap();
        writer.write_all(b"junk").unwrap();
        drop(writer);
        assert!(cache.get(&key("1x1")).unwrap().is_none());
    }

    #[test]
    fn dropped_writer_keeps_previous_entry() {
        let cache = MemoryCache::new();
        store(&cache, &key("1x1"), b"old");

        let mut writer = cache.put(&key("1x1")).unwrap();
        writer.write_all(b"new").unwrap();
        drop(writer);

        let entry = cache.get(&key("1x1")).unwrap().unwrap();
        assert_eq!(read_all(entry.reader), b"old");
    }

    #[test]
    fn writer_destroy_removes_previous_entry() {
        let cache = MemoryCache::new();
        store(&cache, &key("1x1"), b"old");

        let writer = cache.put(&key("1x1")).unwrap();
        assert!(writer.committed_at().is_some());
        writer.destroy().unwrap();
        assert!(cache.get(&key("1x1")).unwrap().is_none());
    }

    #[test]
    fn open_reader_survives_replacement() {
        let cache = MemoryCache::new();
        store(&cache, &key("1x1"), b"old");
        let old = cache.get(&key("1x1")).unwrap().unwrap();

        store(&cache, &key("1x1"), b"new");
        assert_eq!(read_all(old.reader), b"old");
        let fresh = cache.get(&key("1x1")).unwrap().unwrap();
        assert_eq!(read_all(fresh.reader), b"new");
    }

    #[test]
    fn destroy_single_instance() {
        let cache = MemoryCache::new();
        store(&cache, &key("1x1"), b"a");
        store(&cache, &key("2x2"), b"b");

        cache.destroy(&key("1x1")).unwrap();
        assert!(cache.get(&key("1x1")).unwrap().is_none());
        assert!(cache.get(&key("2x2")).unwrap().is_some());
    }

    #[test]
    fn destroy_all_instances() {
        let cache = MemoryCache::new();
        store(&cache, &key("1x1"), b"a");
        store(&cache, &key("2x2"), b"b");
        let other = CacheKey::new("/photos/b.jpg", "1x1");
        store(&cache, &other, b"c");

        cache
            .destroy(&CacheKey::all_instances("/photos/a.jpg"))
            .unwrap();
        assert!(cache.get(&key("1x1")).unwrap().is_none());
        assert!(cache.get(&key("2x2")).unwrap().is_none());
        assert!(cache.get(&other).unwrap().is_some());
    }

    #[test]
    fn destroy_twice_is_idempotent() {
        let cache = MemoryCache::new();
        store(&cache, &key("1x1"), b"a");

        cache.destroy(&key("1x1")).unwrap();
        assert!(cache.get(&key("1x1")).unwrap().is_none());
        cache.destroy(&key("1x1")).unwrap();
        assert!(cache.get(&key("1x1")).unwrap().is_none());
    }

    #[test]
    fn destroy_absent_is_noop() {
        let cache = MemoryCache::new();
        cache.destroy(&key("1x1")).unwrap();
        cache
            .destroy(&CacheKey::all_instances("/nothing"))
            .unwrap();
    }

    #[test]
    fn get_blocks_while_write_in_flight() {
        let cache = Arc::new(MemoryCache::new());
        let writer_ready = Arc::new(AtomicBool::new(false));
        let committed = Arc::new(AtomicBool::new(false));

        let handle = {
            let cache = Arc::clone(&cache);
            let writer_ready = Arc::clone(&writer_ready);
            let committed = Arc::clone(&committed);
            thread::spawn(move || {
                let mut writer = cache.put(&key("1x1")).unwrap();
                writer_ready.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                writer.write_all(b"done").unwrap();
                committed.store(true, Ordering::SeqCst);
                writer.commit(SystemTime::now()).unwrap();
            })
        };

        while !writer_ready.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        let entry = cache.get(&key("1x1")).unwrap().unwrap();
        assert!(committed.load(Ordering::SeqCst));
        assert_eq!(read_all(entry.reader), b"done");
        handle.join().unwrap();
    }
}
