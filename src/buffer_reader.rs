//! Drain-side reader: resolve, format, deduplicate
//!
//! The reader is the consumption contract over [`SampleQueue`]: it drains
//! in FIFO order, resolves frame identifiers through the injected
//! [`FrameResolver`], renders one text record per sample, and hands them
//! out one at a time through `pop()` to a polling foreign caller.
//!
//! Record grammar, one record per sample:
//!
//! ```text
//! timestamp,threadId,threadName,frame1@frame2@...@#
//! ```
//!
//! Fields are comma-separated; the frame list is `@`-joined and terminated
//! by a literal `#`. Separator characters embedded in names are not
//! escaped — a documented limitation of the format, not something this
//! module tries to repair.
//!
//! A drain pass stops early when it meets a record with a zero timestamp
//! or a timestamp ahead of the wall clock: both signal a slot that a
//! producer is concurrently overwriting, and both end the pass quietly.
//! Internal inconsistency never crosses the foreign boundary; the caller
//! only ever sees a well-formed record or "no data".

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::resolver::FrameResolver;
use crate::sample_queue::{Sample, SampleQueue};

/// Placeholder emitted when a frame cannot be resolved.
pub const UNRESOLVED_FRAME: &str = "<unknown>";

/// Wall-clock source, injected so the future-timestamp guard is testable.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Identity of the last emitted record, for duplicate suppression.
struct LastRecord {
    timestamp_ms: i64,
    thread_id: i64,
    trace: String,
}

/// Reader statistics snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReaderStats {
    /// Records handed to the foreign caller.
    pub emitted: u64,
    /// Consecutive duplicates collapsed away.
    pub suppressed_duplicates: u64,
    /// Garbage samples discarded (zero/future timestamp, empty trace).
    pub discarded: u64,
}

/// Pull-style reader over a sample queue.
///
/// `pop()` is safe to call repeatedly with no data available and runs the
/// drain pass lazily. The reader is terminal only after [`close`]: once
/// closed, `pop()` returns `None` without touching the queue.
///
/// [`close`]: BufferReader::close
pub struct BufferReader {
    queue: Arc<SampleQueue>,
    resolver: Arc<dyn FrameResolver>,
    clock: Box<dyn Clock>,
    pending: VecDeque<String>,
    last: Option<LastRecord>,
    closed: bool,
    emitted: u64,
    suppressed: u64,
    discarded: u64,
}

impl BufferReader {
    pub fn new(queue: Arc<SampleQueue>, resolver: Arc<dyn FrameResolver>) -> Self {
        Self::with_clock(queue, resolver, Box::new(SystemClock))
    }

    pub fn with_clock(
        queue: Arc<SampleQueue>,
        resolver: Arc<dyn FrameResolver>,
        clock: Box<dyn Clock>,
    ) -> Self {
        BufferReader {
            queue,
            resolver,
            clock,
            pending: VecDeque::new(),
            last: None,
            closed: false,
            emitted: 0,
            suppressed: 0,
            discarded: 0,
        }
    }

    /// Next formatted record, or `None` when no data is available.
    pub fn pop(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        if self.pending.is_empty() {
            self.drain_pass();
        }
        let record = self.pending.pop_front();
        if record.is_some() {
            self.emitted += 1;
        }
        record
    }

    /// Shut the reader down; subsequent `pop()` calls return `None`.
    pub fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }

    pub fn stats(&self) -> ReaderStats {
        ReaderStats {
            emitted: self.emitted,
            suppressed_duplicates: self.suppressed,
            discarded: self.discarded,
        }
    }

    /// Drain the queue until empty or a defensive stop condition fires.
    fn drain_pass(&mut self) {
        let now_ms = self.clock.now_ms();
        while let Some(sample) = self.queue.drain() {
            // Zero or future timestamps mean the slot was caught
            // mid-overwrite; end the pass, next pop retries.
            if sample.timestamp_ms() == 0 || sample.timestamp_ms() > now_ms {
                self.discarded += 1;
                break;
            }
            if sample.frames().is_empty() {
                self.discarded += 1;
                continue;
            }
            let trace = self.format_trace(&sample);
            if let Some(last) = &self.last {
                if last.timestamp_ms == sample.timestamp_ms()
                    && last.thread_id == sample.thread_id()
                    && last.trace == trace
                {
                    self.suppressed += 1;
                    continue;
                }
            }
            let record = format!(
                "{},{},{},{}",
                sample.timestamp_ms(),
                sample.thread_id(),
                sample.thread_name(),
                trace
            );
            self.last = Some(LastRecord {
                timestamp_ms: sample.timestamp_ms(),
                thread_id: sample.thread_id(),
                trace,
            });
            self.pending.push_back(record);
        }
    }

    fn format_trace(&self, sample: &Sample) -> String {
        let mut trace = String::new();
        for &method_id in sample.frames() {
            let name = self
                .resolver
                .resolve(method_id)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| UNRESOLVED_FRAME.to_string());
            trace.push_str(&name);
            trace.push('@');
        }
        trace.push('#');
        trace
    }
}
