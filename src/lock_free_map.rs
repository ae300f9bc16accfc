//! Lock-free open-addressed hash table for thread tracking
//!
//! This module implements the concurrency substrate under the thread
//! registry: a fixed-sentinel `u64 -> u64` map that serves arbitrary
//! concurrent readers and writers with nothing but atomic slot operations.
//! Producer contexts (sampling callbacks) only ever call `get`, which is
//! allocation-free; `put`/`remove` run from ordinary thread lifecycle
//! callbacks.
//!
//! # Design
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Table (capacity = power of two)                              │
//! │   slot: { key: AtomicU64, value: AtomicU64 }                 │
//! │   key == 0              → Empty (probe stops here)           │
//! │   key != 0, value != 0  → Occupied                           │
//! │   key != 0, value == 0  → Tombstone (key retained)           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Zero is the reserved "absent" sentinel in both the key and the value
//! domain; callers never pass it. Linear probing from `hash(key) & mask`.
//! Deletion is logical: the value is swapped to the sentinel and the key
//! stays in place, so probe chains through the slot survive until the next
//! rebuild. `used` counts live entries, `dirty` counts live plus
//! tombstoned slots; `used <= dirty <= capacity` always holds.
//!
//! # Resize
//!
//! Rebuilds are the one operation allowed to stall concurrent callers.
//! A single gate word combines a resize bit with an in-flight operation
//! count: operations enter by adding 2 and back out if the bit is set,
//! the resizer sets the bit and waits for the count to drain. The old
//! table is only freed at that quiescent point, so no caller can touch a
//! reclaimed allocation, and no caller ever observes a half-migrated
//! table.

use std::hash::Hasher;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use crossbeam::utils::Backoff;
use fnv::FnvHasher;

/// Reserved sentinel: never a valid key or value.
pub const ABSENT: u64 = 0;

/// Smallest capacity a rebuild will produce.
pub const MIN_CAPACITY: usize = 64;

/// Capacity used by [`LockFreeMap::new`].
pub const DEFAULT_CAPACITY: usize = 256;

const RESIZE_BIT: usize = 1;
const OP_UNIT: usize = 2;

/// Pluggable hash over slot keys.
///
/// The probe sequence is fully determined by this hash, so tests can
/// substitute degenerate hashers to force collision chains.
pub trait KeyHasher: Send + Sync {
    fn hash(&self, key: u64) -> u64;
}

/// Default hasher: FNV-1a over the key bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct FnvKeyHasher;

impl KeyHasher for FnvKeyHasher {
    fn hash(&self, key: u64) -> u64 {
        let mut hasher = FnvHasher::default();
        hasher.write_u64(key);
        hasher.finish()
    }
}

struct Slot {
    key: AtomicU64,
    value: AtomicU64,
}

impl Slot {
    fn new() -> Self {
        Slot {
            key: AtomicU64::new(ABSENT),
            value: AtomicU64::new(ABSENT),
        }
    }
}

struct Table {
    slots: Box<[Slot]>,
    mask: usize,
    used: AtomicUsize,
    dirty: AtomicUsize,
}

impl Table {
    fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let slots: Box<[Slot]> = (0..capacity).map(|_| Slot::new()).collect();
        Table {
            slots,
            mask: capacity - 1,
            used: AtomicUsize::new(0),
            dirty: AtomicUsize::new(0),
        }
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn get(&self, key: u64, hash: u64) -> Option<u64> {
        let mut idx = (hash as usize) & self.mask;
        for _ in 0..self.capacity() {
            let slot = &self.slots[idx];
            let k = slot.key.load(Ordering::Acquire);
            if k == ABSENT {
                return None;
            }
            if k == key {
                let v = slot.value.load(Ordering::Acquire);
                return (v != ABSENT).then_some(v);
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    /// Returns `None` when the probe sequence found no claimable slot,
    /// which the resize policy is required to make unreachable.
    fn put(&self, key: u64, value: u64, hash: u64) -> Option<Option<u64>> {
        let mut idx = (hash as usize) & self.mask;
        for _ in 0..self.capacity() {
            let slot = &self.slots[idx];
            let mut k = slot.key.load(Ordering::Acquire);
            if k == ABSENT {
                // Claim the slot for this key. Exactly one of N racing
                // writers wins; losers observe the winner's key and fall
                // through to the value CAS below or keep probing.
                match slot
                    .key
                    .compare_exchange(ABSENT, key, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => {
                        self.dirty.fetch_add(1, Ordering::Relaxed);
                        k = key;
                    }
                    Err(observed) => k = observed,
                }
            }
            if k == key {
                loop {
                    let prev = slot.value.load(Ordering::Acquire);
                    if slot
                        .value
                        .compare_exchange(prev, value, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        if prev == ABSENT {
                            self.used.fetch_add(1, Ordering::Relaxed);
                            return Some(None);
                        }
                        return Some(Some(prev));
                    }
                }
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    fn remove(&self, key: u64, hash: u64) -> Option<u64> {
        let mut idx = (hash as usize) & self.mask;
        for _ in 0..self.capacity() {
            let slot = &self.slots[idx];
            let k = slot.key.load(Ordering::Acquire);
            if k == ABSENT {
                return None;
            }
            if k == key {
                // Logical delete: the key stays behind as a tombstone so
                // concurrent probes through this slot remain well-defined.
                let prev = slot.value.swap(ABSENT, Ordering::AcqRel);
                if prev == ABSENT {
                    return None;
                }
                self.used.fetch_sub(1, Ordering::Relaxed);
                return Some(prev);
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    /// Exclusive-context insert used during migration.
    fn insert_unique(&self, key: u64, value: u64, hash: u64) {
        let mut idx = (hash as usize) & self.mask;
        loop {
            let slot = &self.slots[idx];
            if slot.key.load(Ordering::Relaxed) == ABSENT {
                slot.key.store(key, Ordering::Relaxed);
                slot.value.store(value, Ordering::Relaxed);
                self.used.fetch_add(1, Ordering::Relaxed);
                self.dirty.fetch_add(1, Ordering::Relaxed);
                return;
            }
            idx = (idx + 1) & self.mask;
        }
    }
}

/// Lock-free `u64 -> u64` map with tombstone deletion and gated rebuilds.
///
/// # Concurrency
///
/// - `get` is allocation-free and, outside an in-flight rebuild, completes
///   in a bounded probe without waiting on other threads.
/// - `put` is per-key linearizable: concurrent writers to one key each
///   land exactly one CAS per attempt, and readers always observe a
///   complete key/value pair, never a torn mixture.
/// - `remove` hands the removed value to exactly one of N racing callers.
///
/// # Example
///
/// ```
/// use muestreo::lock_free_map::LockFreeMap;
///
/// let map = LockFreeMap::new();
/// assert_eq!(map.put(7, 100), None);
/// assert_eq!(map.get(7), Some(100));
/// assert_eq!(map.remove(7), Some(100));
/// assert_eq!(map.get(7), None);
/// ```
pub struct LockFreeMap<H: KeyHasher = FnvKeyHasher> {
    table: AtomicPtr<Table>,
    gate: AtomicUsize,
    hasher: H,
}

// SAFETY: all slot state is atomic; the raw table pointer is only swapped
// and freed by a resizer holding the gate exclusively, after every
// in-flight operation has drained.
unsafe impl<H: KeyHasher> Send for LockFreeMap<H> {}
unsafe impl<H: KeyHasher> Sync for LockFreeMap<H> {}

impl LockFreeMap<FnvKeyHasher> {
    /// Create a map with [`DEFAULT_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a map with the given initial capacity (rounded up to a
    /// power of two, minimum 2).
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_hasher(capacity, FnvKeyHasher)
    }
}

impl Default for LockFreeMap<FnvKeyHasher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: KeyHasher> LockFreeMap<H> {
    /// Create a map with an explicit hasher.
    pub fn with_hasher(capacity: usize, hasher: H) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let table = Box::into_raw(Box::new(Table::new(capacity)));
        LockFreeMap {
            table: AtomicPtr::new(table),
            gate: AtomicUsize::new(0),
            hasher,
        }
    }

    /// Insert or update `key`, returning the previous value if any.
    ///
    /// May trigger a rebuild when tombstones and live entries cross the
    /// high-water fraction, or shrink the table when occupancy falls
    /// under the low-water fraction.
    ///
    /// # Panics
    ///
    /// Panics if the probe sequence exhausts the table without finding a
    /// slot. The resize policy keeps that unreachable; reaching it means
    /// a broken invariant, not an overload condition.
    pub fn put(&self, key: u64, value: u64) -> Option<u64> {
        debug_assert_ne!(key, ABSENT, "absent sentinel used as key");
        debug_assert_ne!(value, ABSENT, "absent sentinel used as value");
        let hash = self.hasher.hash(key);

        let table = self.op_enter();
        let (result, rebuild_due) = {
            let table = unsafe { &*table };
            let result = table.put(key, value, hash);
            (result, Self::rebuild_due(table))
        };
        self.op_exit();

        let prev = result.unwrap_or_else(|| {
            panic!("lock-free map probe exhaustion: resize policy violated")
        });
        if rebuild_due {
            self.rebuild();
        }
        prev
    }

    /// Current value for `key`, or `None`.
    ///
    /// Never allocates. Only an in-flight rebuild can delay the probe,
    /// and only for the bounded duration of the migration.
    pub fn get(&self, key: u64) -> Option<u64> {
        debug_assert_ne!(key, ABSENT, "absent sentinel used as key");
        let hash = self.hasher.hash(key);
        let table = self.op_enter();
        let result = unsafe { &*table }.get(key, hash);
        self.op_exit();
        result
    }

    /// Logically delete `key`, returning the removed value.
    ///
    /// Of N concurrent removers of one key, exactly one observes the
    /// prior value; the rest observe `None`.
    pub fn remove(&self, key: u64) -> Option<u64> {
        debug_assert_ne!(key, ABSENT, "absent sentinel used as key");
        let hash = self.hasher.hash(key);
        let table = self.op_enter();
        let result = unsafe { &*table }.remove(key, hash);
        self.op_exit();
        result
    }

    /// Current slot count.
    pub fn capacity(&self) -> usize {
        self.read_counter(|t| t.capacity())
    }

    /// Best-effort live-entry count; not linearized with mutators.
    pub fn approx_used(&self) -> usize {
        self.read_counter(|t| t.used.load(Ordering::Relaxed))
    }

    /// Best-effort live-plus-tombstoned count; monotonic between rebuilds.
    pub fn approx_dirty(&self) -> usize {
        self.read_counter(|t| t.dirty.load(Ordering::Relaxed))
    }

    fn read_counter(&self, f: impl Fn(&Table) -> usize) -> usize {
        let table = self.op_enter();
        let result = f(unsafe { &*table });
        self.op_exit();
        result
    }

    fn rebuild_due(table: &Table) -> bool {
        let capacity = table.capacity();
        let used = table.used.load(Ordering::Relaxed);
        let dirty = table.dirty.load(Ordering::Relaxed);
        // High water: live + tombstoned slots strictly cross 3/4 of the
        // table. Low water: occupancy fell under 1/8 of an above-floor
        // table.
        dirty * 4 > capacity * 3 || (used * 8 < capacity && capacity > MIN_CAPACITY)
    }

    fn op_enter(&self) -> *const Table {
        let backoff = Backoff::new();
        loop {
            let gate = self.gate.fetch_add(OP_UNIT, Ordering::Acquire);
            if gate & RESIZE_BIT == 0 {
                return self.table.load(Ordering::Acquire);
            }
            // A rebuild holds the gate; back out and wait it out.
            self.gate.fetch_sub(OP_UNIT, Ordering::Release);
            backoff.snooze();
        }
    }

    fn op_exit(&self) {
        self.gate.fetch_sub(OP_UNIT, Ordering::Release);
    }

    /// Rebuild the table sized from the live-entry count.
    ///
    /// Exactly one caller wins the resize bit; the rest return and let
    /// the winner do the work. The winner waits for in-flight operations
    /// to drain, migrates live entries into a fresh table, swaps the
    /// pointer, and frees the old table at that quiescent point.
    fn rebuild(&self) {
        let mut gate = self.gate.load(Ordering::Acquire);
        loop {
            if gate & RESIZE_BIT != 0 {
                return;
            }
            match self.gate.compare_exchange(
                gate,
                gate | RESIZE_BIT,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => gate = actual,
            }
        }

        let backoff = Backoff::new();
        while self.gate.load(Ordering::Acquire) != RESIZE_BIT {
            backoff.snooze();
        }

        let old_ptr = self.table.load(Ordering::Acquire);
        let old = unsafe { &*old_ptr };

        // Re-check under exclusivity: an earlier rebuild may already have
        // restored the invariants this caller observed broken.
        if Self::rebuild_due(old) {
            let used = old.used.load(Ordering::Relaxed);
            let dirty = old.dirty.load(Ordering::Relaxed);
            let new_capacity = (used * 2).max(MIN_CAPACITY).next_power_of_two();
            if new_capacity != old.capacity() || dirty != used {
                let new_table = Table::new(new_capacity);
                for slot in old.slots.iter() {
                    let key = slot.key.load(Ordering::Relaxed);
                    let value = slot.value.load(Ordering::Relaxed);
                    if key != ABSENT && value != ABSENT {
                        new_table.insert_unique(key, value, self.hasher.hash(key));
                    }
                }
                tracing::debug!(
                    old_capacity = old.capacity(),
                    new_capacity,
                    migrated = used,
                    reclaimed = dirty - used,
                    "rebuilt slot table"
                );
                self.table
                    .store(Box::into_raw(Box::new(new_table)), Ordering::Release);
                // Quiescent: the gate guarantees no operation still holds
                // the old pointer.
                drop(unsafe { Box::from_raw(old_ptr) });
            }
        }

        self.gate.fetch_sub(RESIZE_BIT, Ordering::Release);
    }
}

impl<H: KeyHasher> Drop for LockFreeMap<H> {
    fn drop(&mut self) {
        let table = self.table.load(Ordering::Acquire);
        drop(unsafe { Box::from_raw(table) });
    }
}
