//! Two-level keyed locking.
//!
//! An outer mutex guards the *set* of per-key slots; every slot carries its
//! own reader/writer lock guarding the committed value for that key. The outer
//! mutex is only held to look up, insert or retire a slot, never while waiting
//! on a slot, so a slow producer on one key cannot stall lookups on another.
//!
//! Guards are owned (`arc_lock`), so a reader can keep a slot shared-locked
//! for as long as it holds an open handle on the entry.
//!
//! A slot that has been retired (entry destroyed) is flagged before it is
//! unlinked from the map. Anyone who cloned the slot handle before the
//! unlink notices the flag once they get the lock and goes back to the map.

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type ReadGuard<T> = ArcRwLockReadGuard<RawRwLock, Slot<T>>;
pub(crate) type WriteGuard<T> = ArcRwLockWriteGuard<RawRwLock, Slot<T>>;

/// The value stored under one key, or `None` while the key is reserved
/// but nothing has been committed yet.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    pub value: Option<T>,
    retired: bool,
}

impl<T> Slot<T> {
    fn new(value: Option<T>) -> Self {
        Self {
            value,
            retired: false,
        }
    }
}

pub(crate) struct KeyedLocks<T> {
    slots: Mutex<HashMap<String, Arc<RwLock<Slot<T>>>>>,
}

impl<T> KeyedLocks<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Seed the table with already-committed values (used when reopening a
    /// persistent store).
    pub fn with_entries(entries: impl IntoIterator<Item = (String, T)>) -> Self {
        let slots = entries
            .into_iter()
            .map(|(key, value)| (key, Arc::new(RwLock::new(Slot::new(Some(value))))))
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Shared-lock the slot for `key`. Blocks while a writer holds it.
    ///
    /// Returns `None` when no slot exists. A returned guard may still hold an
    /// empty slot if the last writer gave up without committing.
    pub fn read(&self, key: &str) -> Option<ReadGuard<T>> {
        loop {
            let slot = self.slots.lock().get(key).cloned()?;
            let guard = slot.read_arc();
            if !guard.retired {
                return Some(guard);
            }
        }
    }

    /// Exclusively lock the slot for `key`, creating it if needed. Blocks
    /// while another writer or any reader holds it.
    pub fn write(&self, key: &str) -> WriteGuard<T> {
        loop {
            let slot = Arc::clone(
                self.slots
                    .lock()
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(RwLock::new(Slot::new(None)))),
            );
            let guard = slot.write_arc();
            if !guard.retired {
                return guard;
            }
        }
    }

    /// Clear the slot and unlink it from the table.
    pub fn retire(&self, key: &str, mut guard: WriteGuard<T>) {
        guard.value = None;
        guard.retired = true;
        let mut slots = self.slots.lock();
        if slots
            .get(key)
            .is_some_and(|slot| Arc::ptr_eq(slot, ArcRwLockWriteGuard::rwlock(&guard)))
        {
            slots.remove(key);
        }
    }

    /// Release a writer that did not commit. An empty slot is unlinked so
    /// abandoned reservations do not accumulate.
    pub fn release(&self, key: &str, guard: WriteGuard<T>) {
        if guard.value.is_none() {
            self.retire(key, guard);
        }
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.slots
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
}
