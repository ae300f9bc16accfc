//! Bounded lock-free sample queue bridging capture and drain
//!
//! This queue decouples the hot path (stack-capture callbacks firing in a
//! signal-handler-like context) from the cold path (the drain loop feeding
//! the foreign caller). The producer side is the overriding design driver:
//! `try_push` must never block, never allocate, and finish in a bounded
//! number of steps, because the calling thread may be suspended
//! mid-instruction and cannot take a lock or touch the allocator.
//!
//! # Design
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ SAMPLING CONTEXT (hot path, non-preemptible)                │
//! │   capture → registry snapshot → queue.try_push(sample)      │
//! │   claim write ticket (atomic RMW) → copy into slot → publish│
//! └─────────────────────────────────────────────────────────────┘
//!                          │ preallocated slot ring
//!                          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │ DRAIN CONTEXT (cold path, ordinary scheduling)              │
//! │   loop { queue.drain() → resolve → format → emit }          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every slot carries a sequence word (ticket scheme): a producer claims
//! the next write position with a compare-exchange on the enqueue cursor,
//! copies the sample into the preallocated slot, and publishes it with a
//! release store of the slot sequence. The consumer mirrors the protocol
//! on the dequeue cursor, so drained order is strictly FIFO.
//!
//! A full queue is an expected overload condition, not an error. The
//! configured [`OverflowPolicy`] decides whether the new sample is counted
//! and dropped, or the oldest unconsumed sample is retired to make room.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Upper bound on captured stack depth.
pub const MAX_FRAMES: usize = 128;

/// Upper bound on the thread-name snapshot, in bytes.
pub const MAX_THREAD_NAME: usize = 64;

/// One recorded stack-capture event plus thread metadata.
///
/// A `Sample` is a flat, fixed-size value: the producer fills it on its
/// own stack and the queue copies it into a preallocated slot, so no path
/// through capture ever allocates. Name bytes and frames beyond the fixed
/// budgets are truncated at capture time.
#[derive(Clone, Copy)]
pub struct Sample {
    timestamp_ms: i64,
    thread_id: i64,
    name_len: u8,
    name: [u8; MAX_THREAD_NAME],
    frame_len: u16,
    frames: [u64; MAX_FRAMES],
}

impl Sample {
    /// Build a sample from raw name bytes (capture path; no UTF-8 work).
    pub fn from_parts(timestamp_ms: i64, thread_id: i64, name: &[u8], frames: &[u64]) -> Self {
        let mut sample = Sample::zeroed();
        sample.timestamp_ms = timestamp_ms;
        sample.thread_id = thread_id;
        let name_len = name.len().min(MAX_THREAD_NAME);
        sample.name[..name_len].copy_from_slice(&name[..name_len]);
        sample.name_len = name_len as u8;
        let frame_len = frames.len().min(MAX_FRAMES);
        sample.frames[..frame_len].copy_from_slice(&frames[..frame_len]);
        sample.frame_len = frame_len as u16;
        sample
    }

    /// Build a sample from a string name, truncating on a char boundary.
    pub fn new(timestamp_ms: i64, thread_id: i64, name: &str, frames: &[u64]) -> Self {
        let mut end = name.len().min(MAX_THREAD_NAME);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self::from_parts(timestamp_ms, thread_id, name[..end].as_bytes(), frames)
    }

    fn zeroed() -> Self {
        Sample {
            timestamp_ms: 0,
            thread_id: 0,
            name_len: 0,
            name: [0; MAX_THREAD_NAME],
            frame_len: 0,
            frames: [0; MAX_FRAMES],
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    /// Name snapshot taken at capture time.
    pub fn thread_name(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.name[..self.name_len as usize])
    }

    pub fn frames(&self) -> &[u64] {
        &self.frames[..self.frame_len as usize]
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("timestamp_ms", &self.timestamp_ms)
            .field("thread_id", &self.thread_id)
            .field("thread_name", &self.thread_name())
            .field("frames", &self.frames())
            .finish()
    }
}

/// What `try_push` did with the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    Pushed,
    Dropped,
}

/// Full-queue behavior, fixed per queue instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Reject the incoming sample and count it; the buffer is untouched.
    DropNew,
    /// Retire the oldest unconsumed sample to make room.
    OverwriteOldest,
}

struct SampleSlot {
    seq: AtomicU64,
    sample: UnsafeCell<Sample>,
}

/// Fixed-capacity ring of sample slots, many producers, one drain loop.
pub struct SampleQueue {
    slots: Box<[SampleSlot]>,
    mask: u64,
    enqueue_pos: AtomicU64,
    dequeue_pos: AtomicU64,
    policy: OverflowPolicy,
    pushed: AtomicU64,
    dropped: AtomicU64,
    overwritten: AtomicU64,
}

// SAFETY: slot payloads are only written by the producer that claimed the
// slot's ticket and only read after the release store of the matching
// sequence value; the sequence handshake serializes every slot handoff.
unsafe impl Send for SampleQueue {}
unsafe impl Sync for SampleQueue {}

impl SampleQueue {
    /// Create a queue with the given capacity (rounded up to a power of
    /// two) and overflow policy.
    ///
    /// # Panics
    ///
    /// Panics if capacity is 0.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity > 0, "sample queue capacity must be > 0");
        let capacity = capacity.next_power_of_two();
        let slots: Box<[SampleSlot]> = (0..capacity as u64)
            .map(|i| SampleSlot {
                seq: AtomicU64::new(i),
                sample: UnsafeCell::new(Sample::zeroed()),
            })
            .collect();
        SampleQueue {
            slots,
            mask: capacity as u64 - 1,
            enqueue_pos: AtomicU64::new(0),
            dequeue_pos: AtomicU64::new(0),
            policy,
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask as usize + 1
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Enqueue a sample from the capture context.
    ///
    /// Lock-free: claims the next write ticket with an atomic RMW and
    /// copies the sample into the preallocated slot. No locks, no
    /// allocation, no unbounded waiting; a full queue resolves through
    /// the configured [`OverflowPolicy`] instead of blocking.
    pub fn try_push(&self, sample: &Sample) -> PushResult {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(pos & self.mask) as usize];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq.wrapping_sub(pos) as i64;
            if dif == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { *slot.sample.get() = *sample };
                        slot.seq.store(pos + 1, Ordering::Release);
                        self.pushed.fetch_add(1, Ordering::Relaxed);
                        return PushResult::Pushed;
                    }
                    Err(actual) => pos = actual,
                }
            } else if dif < 0 {
                match self.policy {
                    OverflowPolicy::DropNew => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return PushResult::Dropped;
                    }
                    OverflowPolicy::OverwriteOldest => {
                        self.retire_oldest();
                        pos = self.enqueue_pos.load(Ordering::Relaxed);
                    }
                }
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Discard the oldest unconsumed sample so a producer can reuse its
    /// slot. Losing the race to the consumer is fine: either way the slot
    /// came free.
    fn retire_oldest(&self) {
        let pos = self.dequeue_pos.load(Ordering::Relaxed);
        let slot = &self.slots[(pos & self.mask) as usize];
        let seq = slot.seq.load(Ordering::Acquire);
        if seq.wrapping_sub(pos + 1) as i64 == 0
            && self
                .dequeue_pos
                .compare_exchange(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            slot.seq.store(pos + self.mask + 1, Ordering::Release);
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Dequeue the oldest sample, strictly FIFO. Consumer context only.
    pub fn drain(&self) -> Option<Sample> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(pos & self.mask) as usize];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq.wrapping_sub(pos + 1) as i64;
            if dif == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let sample = unsafe { *slot.sample.get() };
                        slot.seq.store(pos + self.mask + 1, Ordering::Release);
                        return Some(sample);
                    }
                    Err(actual) => pos = actual,
                }
            } else if dif < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Eventually-consistent element count.
    pub fn approx_len(&self) -> usize {
        let tail = self.enqueue_pos.load(Ordering::Relaxed);
        let head = self.dequeue_pos.load(Ordering::Relaxed);
        tail.saturating_sub(head).min(self.mask + 1) as usize
    }

    /// Eventually-consistent emptiness check.
    pub fn approx_empty(&self) -> bool {
        self.approx_len() == 0
    }

    /// Counter snapshot.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            overwritten: self.overwritten.load(Ordering::Relaxed),
            len: self.approx_len(),
            capacity: self.capacity(),
        }
    }
}

/// Queue statistics snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub pushed: u64,
    pub dropped: u64,
    pub overwritten: u64,
    pub len: usize,
    pub capacity: usize,
}

impl QueueStats {
    /// Fraction of offered samples rejected under the drop-new policy.
    pub fn drop_rate(&self) -> f64 {
        let offered = self.pushed + self.dropped;
        if offered == 0 {
            0.0
        } else {
            self.dropped as f64 / offered as f64
        }
    }

    /// Fraction of the buffer currently occupied.
    pub fn utilization(&self) -> f64 {
        self.len as f64 / self.capacity as f64
    }
}
