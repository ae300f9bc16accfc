//! Thread identity registry built on the lock-free map
//!
//! Maps a managed thread's identity to an immutable metadata bucket. The
//! registry owns every bucket outright: `lookup` hands callers a by-value
//! snapshot of the fields, never a live reference, so a bucket can be torn
//! down on thread death while samples that copied its fields remain valid.
//!
//! Buckets live in a preallocated pool. The lock-free map stores
//! `thread id -> pool index + 1` (the +1 keeps index 0 clear of the map's
//! absent sentinel). Registration and teardown run from ordinary thread
//! lifecycle callbacks and serialize on a small free-list mutex; `lookup`
//! runs from the capture context and touches only atomics — each bucket
//! slot carries a sequence word so a lookup racing a slot recycle retries
//! instead of observing torn name bytes.

use std::sync::atomic::{fence, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::lock_free_map::LockFreeMap;
use crate::sample_queue::MAX_THREAD_NAME;

/// Snapshot of a thread bucket's fields, copied out at lookup time.
#[derive(Debug, Clone, Copy)]
pub struct ThreadInfo {
    pub id: i64,
    name_len: u8,
    name: [u8; MAX_THREAD_NAME],
}

impl ThreadInfo {
    /// Raw name bytes (capture path; no UTF-8 validation).
    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..self.name_len as usize]
    }

    pub fn name(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.name_bytes())
    }
}

/// One pool slot. `version` is a sequence word: odd while a writer is
/// mutating the slot, even when stable; the payload fields are atomics so
/// racing readers copy them without undefined behavior and then re-check
/// the version.
struct ThreadBucket {
    version: AtomicU64,
    id: AtomicI64,
    name_len: AtomicU8,
    name: [AtomicU8; MAX_THREAD_NAME],
}

impl ThreadBucket {
    fn new() -> Self {
        ThreadBucket {
            version: AtomicU64::new(0),
            id: AtomicI64::new(0),
            name_len: AtomicU8::new(0),
            name: std::array::from_fn(|_| AtomicU8::new(0)),
        }
    }

    /// Publish new bucket fields. Callers serialize on the registry's
    /// free-list mutex, so there is at most one writer per slot.
    fn write(&self, id: i64, name: &[u8]) {
        let v = self.version.load(Ordering::Relaxed);
        self.version.store(v + 1, Ordering::Release);
        self.id.store(id, Ordering::Relaxed);
        let len = name.len().min(MAX_THREAD_NAME);
        for (i, byte) in self.name.iter().enumerate() {
            byte.store(if i < len { name[i] } else { 0 }, Ordering::Relaxed);
        }
        self.name_len.store(len as u8, Ordering::Relaxed);
        self.version.store(v + 2, Ordering::Release);
    }

    /// Mark the slot as being recycled so in-flight readers bail out.
    fn invalidate(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }

    fn finish_invalidate(&self) {
        self.id.store(0, Ordering::Relaxed);
        self.name_len.store(0, Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Consistent snapshot, or `None` after bounded retries.
    fn read(&self, expect_id: i64) -> Option<ThreadInfo> {
        for _ in 0..SNAPSHOT_RETRIES {
            let v1 = self.version.load(Ordering::Acquire);
            if v1 & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }
            let id = self.id.load(Ordering::Relaxed);
            let name_len = self.name_len.load(Ordering::Relaxed).min(MAX_THREAD_NAME as u8);
            let mut name = [0u8; MAX_THREAD_NAME];
            for (dst, src) in name.iter_mut().zip(self.name.iter()) {
                *dst = src.load(Ordering::Relaxed);
            }
            fence(Ordering::Acquire);
            let v2 = self.version.load(Ordering::Relaxed);
            if v1 != v2 {
                continue;
            }
            // The slot may have been recycled for another thread between
            // the map lookup and this read.
            if id != expect_id {
                return None;
            }
            return Some(ThreadInfo { id, name_len, name });
        }
        None
    }
}

const SNAPSHOT_RETRIES: usize = 16;

/// Registry of live threads keyed by runtime thread id.
pub struct ThreadRegistry {
    map: LockFreeMap,
    pool: Box<[ThreadBucket]>,
    free: Mutex<Vec<usize>>,
    pool_exhausted: AtomicU64,
}

impl ThreadRegistry {
    /// Create a registry able to track up to `max_threads` live threads.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads` is 0.
    pub fn new(max_threads: usize) -> Self {
        assert!(max_threads > 0, "thread registry capacity must be > 0");
        let pool: Box<[ThreadBucket]> = (0..max_threads).map(|_| ThreadBucket::new()).collect();
        let free = (0..max_threads).rev().collect();
        ThreadRegistry {
            map: LockFreeMap::new(),
            pool,
            free: Mutex::new(free),
            pool_exhausted: AtomicU64::new(0),
        }
    }

    /// Install a bucket for a newly observed thread. Idempotent: a second
    /// start notification for a live id is ignored.
    pub fn on_thread_start(&self, id: i64, name: &str) {
        if id == 0 {
            tracing::warn!("ignoring thread start with reserved id 0");
            return;
        }
        let mut free = self.free.lock().expect("registry free list poisoned");
        if self.map.get(id as u64).is_some() {
            return;
        }
        let Some(index) = free.pop() else {
            drop(free);
            self.pool_exhausted.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(thread_id = id, "thread bucket pool exhausted; thread unregistered");
            return;
        };
        self.pool[index].write(id, name.as_bytes());
        self.map.put(id as u64, index as u64 + 1);
        tracing::debug!(thread_id = id, name, "thread registered");
    }

    /// Copy out the bucket fields for `id`, if the thread is live.
    ///
    /// Capture-path safe: no locks, no allocation, bounded retries when a
    /// concurrent teardown is mutating the slot.
    pub fn lookup(&self, id: i64) -> Option<ThreadInfo> {
        if id == 0 {
            return None;
        }
        let value = self.map.get(id as u64)?;
        let index = (value - 1) as usize;
        self.pool[index].read(id)
    }

    /// Tear down the bucket for a dead thread and recycle its slot.
    pub fn on_thread_end(&self, id: i64) {
        if id == 0 {
            return;
        }
        let mut free = self.free.lock().expect("registry free list poisoned");
        if let Some(value) = self.map.remove(id as u64) {
            let index = (value - 1) as usize;
            self.pool[index].invalidate();
            self.pool[index].finish_invalidate();
            free.push(index);
            tracing::debug!(thread_id = id, "thread unregistered");
        }
    }

    /// Best-effort count of live registrations.
    pub fn approx_live(&self) -> usize {
        self.map.approx_used()
    }

    /// Times a registration was refused because the pool was full.
    pub fn pool_exhausted(&self) -> u64 {
        self.pool_exhausted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = ThreadRegistry::new(8);
        registry.on_thread_start(7, "worker-1");
        let info = registry.lookup(7).expect("bucket missing");
        assert_eq!(info.id, 7);
        assert_eq!(info.name(), "worker-1");
    }

    #[test]
    fn test_lookup_unknown_thread() {
        let registry = ThreadRegistry::new(8);
        assert!(registry.lookup(42).is_none());
    }

    #[test]
    fn test_start_is_idempotent() {
        let registry = ThreadRegistry::new(8);
        registry.on_thread_start(7, "first");
        registry.on_thread_start(7, "second");
        assert_eq!(registry.lookup(7).unwrap().name(), "first");
        assert_eq!(registry.approx_live(), 1);
    }

    #[test]
    fn test_end_removes_and_recycles() {
        let registry = ThreadRegistry::new(1);
        registry.on_thread_start(7, "worker-1");
        registry.on_thread_end(7);
        assert!(registry.lookup(7).is_none());
        // The single slot must be reusable.
        registry.on_thread_start(9, "worker-2");
        assert_eq!(registry.lookup(9).unwrap().name(), "worker-2");
        assert!(registry.lookup(7).is_none());
    }

    #[test]
    fn test_pool_exhaustion_counted() {
        let registry = ThreadRegistry::new(2);
        registry.on_thread_start(1, "a");
        registry.on_thread_start(2, "b");
        registry.on_thread_start(3, "c");
        assert!(registry.lookup(3).is_none());
        assert_eq!(registry.pool_exhausted(), 1);
    }

    #[test]
    fn test_reserved_id_ignored() {
        let registry = ThreadRegistry::new(2);
        registry.on_thread_start(0, "zero");
        assert!(registry.lookup(0).is_none());
        registry.on_thread_end(0);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = ThreadRegistry::new(2);
        registry.on_thread_start(5, "short-lived");
        let info = registry.lookup(5).unwrap();
        registry.on_thread_end(5);
        // The copy outlives the bucket.
        assert_eq!(info.name(), "short-lived");
        assert_eq!(info.id, 5);
    }
}
