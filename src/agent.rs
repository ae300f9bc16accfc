//! Pipeline assembly: registry → queue → reader
//!
//! `ProfilerAgent` wires the thread registry and the sample queue together
//! and exposes the two ends of the pipeline:
//!
//! - `record` is the producer entry point, called once per stack-capture
//!   event from the constrained sampling context. It snapshots the
//!   thread's bucket fields, builds a flat sample, and enqueues it — no
//!   locks, no allocation.
//! - `reader` builds a [`BufferReader`] over the agent's queue. The handle
//!   is explicit and passed at each foreign call; there is no process-wide
//!   "current reader" global.
//!
//! Shutdown is a one-way gate: once `shutdown()` is called, `record`
//! refuses new samples, so the event source quiesces before any teardown.
//! Samples already buffered stay drainable.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::buffer_reader::BufferReader;
use crate::config::AgentConfig;
use crate::resolver::FrameResolver;
use crate::sample_queue::{PushResult, QueueStats, Sample, SampleQueue};
use crate::thread_registry::ThreadRegistry;

/// Sampling-profiler agent core.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use muestreo::agent::ProfilerAgent;
/// use muestreo::config::AgentConfig;
/// use muestreo::resolver::MapResolver;
///
/// let agent = ProfilerAgent::new(AgentConfig::default());
/// agent.on_thread_start(7, "worker-1");
/// agent.record(1000, 7, &[1, 2]);
///
/// let resolver = MapResolver::from([(1, "ClassA.method1"), (2, "ClassB.method2")]);
/// let mut reader = agent.reader(Arc::new(resolver));
/// assert_eq!(
///     reader.pop().as_deref(),
///     Some("1000,7,worker-1,ClassA.method1@ClassB.method2@#")
/// );
/// ```
pub struct ProfilerAgent {
    registry: ThreadRegistry,
    queue: Arc<SampleQueue>,
    shutdown: AtomicBool,
    unknown_thread_drops: AtomicU64,
}

impl ProfilerAgent {
    /// Build an agent from a validated configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration fails validation; embedders loading
    /// external configuration should call
    /// [`AgentConfig::validate`](crate::config::AgentConfig::validate)
    /// first and handle the error.
    pub fn new(config: AgentConfig) -> Self {
        config
            .validate()
            .unwrap_or_else(|e| panic!("refusing to start agent: {}", e));
        ProfilerAgent {
            registry: ThreadRegistry::new(config.max_threads),
            queue: Arc::new(SampleQueue::new(config.queue_capacity, config.overflow_policy)),
            shutdown: AtomicBool::new(false),
            unknown_thread_drops: AtomicU64::new(0),
        }
    }

    /// Thread lifecycle: first observation of a thread.
    pub fn on_thread_start(&self, thread_id: i64, name: &str) {
        self.registry.on_thread_start(thread_id, name);
    }

    /// Thread lifecycle: thread-death notification.
    pub fn on_thread_end(&self, thread_id: i64) {
        self.registry.on_thread_end(thread_id);
    }

    /// Producer entry point: one stack-capture event.
    ///
    /// Runs in the constrained sampling context: bounded steps, no locks,
    /// no allocation. Samples for threads the registry does not know are
    /// dropped and counted, mirroring the bucket-presence guard in the
    /// capture callback this design descends from.
    pub fn record(&self, timestamp_ms: i64, thread_id: i64, frames: &[u64]) -> PushResult {
        if self.shutdown.load(Ordering::Acquire) {
            return PushResult::Dropped;
        }
        let Some(info) = self.registry.lookup(thread_id) else {
            self.unknown_thread_drops.fetch_add(1, Ordering::Relaxed);
            return PushResult::Dropped;
        };
        let sample = Sample::from_parts(timestamp_ms, thread_id, info.name_bytes(), frames);
        self.queue.try_push(&sample)
    }

    /// Build a reader over this agent's queue. The caller keeps the
    /// handle and passes it at each foreign `pop` call.
    pub fn reader(&self, resolver: Arc<dyn FrameResolver>) -> BufferReader {
        BufferReader::new(Arc::clone(&self.queue), resolver)
    }

    /// Stop accepting new samples. Already-buffered samples remain
    /// drainable; the flag is one-way.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        tracing::debug!("profiler agent shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Aggregate statistics snapshot.
    pub fn stats(&self) -> AgentStats {
        AgentStats {
            queue: self.queue.stats(),
            live_threads: self.registry.approx_live(),
            pool_exhausted: self.registry.pool_exhausted(),
            unknown_thread_drops: self.unknown_thread_drops.load(Ordering::Relaxed),
        }
    }
}

/// Aggregate agent statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AgentStats {
    pub queue: QueueStats,
    pub live_threads: usize,
    pub pool_exhausted: u64,
    pub unknown_thread_drops: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MapResolver;

    fn small_agent() -> ProfilerAgent {
        ProfilerAgent::new(AgentConfig::default().with_queue_capacity(16).with_max_threads(4))
    }

    #[test]
    fn test_record_for_unknown_thread_dropped() {
        let agent = small_agent();
        assert_eq!(agent.record(1000, 42, &[1]), PushResult::Dropped);
        assert_eq!(agent.stats().unknown_thread_drops, 1);
        assert_eq!(agent.stats().queue.pushed, 0);
    }

    #[test]
    fn test_record_after_thread_end_dropped() {
        let agent = small_agent();
        agent.on_thread_start(7, "worker-1");
        assert_eq!(agent.record(1000, 7, &[1]), PushResult::Pushed);
        agent.on_thread_end(7);
        assert_eq!(agent.record(1001, 7, &[1]), PushResult::Dropped);
    }

    #[test]
    fn test_shutdown_refuses_new_samples_but_drains_buffered() {
        let agent = small_agent();
        agent.on_thread_start(7, "worker-1");
        agent.record(1000, 7, &[1]);
        agent.shutdown();
        assert!(agent.is_shutdown());
        assert_eq!(agent.record(1001, 7, &[1]), PushResult::Dropped);

        let resolver = MapResolver::from([(1, "ClassA.method1")]);
        let mut reader = agent.reader(Arc::new(resolver));
        assert_eq!(reader.pop().as_deref(), Some("1000,7,worker-1,ClassA.method1@#"));
    }

    #[test]
    #[should_panic(expected = "refusing to start agent")]
    fn test_invalid_config_panics() {
        let _ = ProfilerAgent::new(AgentConfig::default().with_queue_capacity(0));
    }

    #[test]
    fn test_stats_aggregation() {
        let agent = small_agent();
        agent.on_thread_start(1, "a");
        agent.on_thread_start(2, "b");
        agent.record(10, 1, &[1]);
        let stats = agent.stats();
        assert_eq!(stats.live_threads, 2);
        assert_eq!(stats.queue.pushed, 1);
    }
}
