//! Property-based tests over the agent's core data structures
//!
//! Uses proptest to hammer the map against a sequential model, check the
//! queue's FIFO contract, and pin down the sample truncation rules and
//! the record grammar for arbitrary inputs.

use std::collections::HashMap;
use std::sync::Arc;

use muestreo::buffer_reader::{BufferReader, Clock};
use muestreo::lock_free_map::LockFreeMap;
use muestreo::resolver::MapResolver;
use muestreo::sample_queue::{OverflowPolicy, Sample, SampleQueue, MAX_FRAMES, MAX_THREAD_NAME};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum MapOp {
    Put(u64, u64),
    Get(u64),
    Remove(u64),
}

fn map_op() -> impl Strategy<Value = MapOp> {
    prop_oneof![
        (1u64..32, 1u64..1000).prop_map(|(k, v)| MapOp::Put(k, v)),
        (1u64..32).prop_map(MapOp::Get),
        (1u64..32).prop_map(MapOp::Remove),
    ]
}

struct FarFuture;

impl Clock for FarFuture {
    fn now_ms(&self) -> i64 {
        i64::MAX
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_map_matches_sequential_model(ops in prop::collection::vec(map_op(), 0..200)) {
        // Property: under sequential use, every operation returns exactly
        // what a HashMap model returns, and the final states agree.
        let map = LockFreeMap::with_capacity(4);
        let mut model: HashMap<u64, u64> = HashMap::new();

        for op in &ops {
            match *op {
                MapOp::Put(k, v) => prop_assert_eq!(map.put(k, v), model.insert(k, v)),
                MapOp::Get(k) => prop_assert_eq!(map.get(k), model.get(&k).copied()),
                MapOp::Remove(k) => prop_assert_eq!(map.remove(k), model.remove(&k)),
            }
            prop_assert!(map.approx_used() <= map.approx_dirty());
            prop_assert!(map.approx_dirty() <= map.capacity());
        }

        for k in 1u64..32 {
            prop_assert_eq!(map.get(k), model.get(&k).copied());
        }
        prop_assert_eq!(map.approx_used(), model.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_sample_truncation(
        name in ".{0,40}",
        frames in prop::collection::vec(1u64..u64::MAX, 0..(MAX_FRAMES + 50)),
        ts in 1i64..i64::MAX,
        tid in 1i64..i64::MAX,
    ) {
        // Property: captured fields round-trip; oversized inputs truncate
        // to the fixed budgets without panicking.
        let sample = Sample::new(ts, tid, &name, &frames);
        prop_assert_eq!(sample.timestamp_ms(), ts);
        prop_assert_eq!(sample.thread_id(), tid);
        prop_assert!(sample.thread_name().len() <= MAX_THREAD_NAME);
        prop_assert!(name.starts_with(sample.thread_name().as_ref()));
        let kept = frames.len().min(MAX_FRAMES);
        prop_assert_eq!(sample.frames(), &frames[..kept]);
    }

    #[test]
    fn prop_queue_preserves_push_order(timestamps in prop::collection::vec(1i64..1_000_000, 1..64)) {
        let queue = SampleQueue::new(64, OverflowPolicy::DropNew);
        for &ts in &timestamps {
            queue.try_push(&Sample::new(ts, 1, "t", &[1]));
        }
        let mut drained = Vec::new();
        while let Some(s) = queue.drain() {
            drained.push(s.timestamp_ms());
        }
        prop_assert_eq!(drained, timestamps);
    }

    #[test]
    fn prop_record_grammar(
        name in "[a-z][a-z0-9-]{0,15}",
        frames in prop::collection::vec(1u64..100, 1..10),
        ts in 1i64..1_000_000,
        tid in 1i64..1_000_000,
    ) {
        // Property: every emitted record parses back into the grammar
        // `timestamp,threadId,threadName,frame@...@#`, with unresolvable
        // frames rendered as the placeholder.
        let queue = Arc::new(SampleQueue::new(16, OverflowPolicy::DropNew));
        queue.try_push(&Sample::new(ts, tid, &name, &frames));
        let mut reader = BufferReader::with_clock(
            queue,
            Arc::new(MapResolver::new()),
            Box::new(FarFuture),
        );
        let record = reader.pop().expect("record missing");

        let fields: Vec<&str> = record.splitn(4, ',').collect();
        prop_assert_eq!(fields.len(), 4);
        prop_assert_eq!(fields[0].parse::<i64>().unwrap(), ts);
        prop_assert_eq!(fields[1].parse::<i64>().unwrap(), tid);
        prop_assert_eq!(fields[2], name.as_str());
        let trace = fields[3];
        prop_assert!(trace.ends_with('#'));
        let parts: Vec<&str> = trace[..trace.len() - 1].split_terminator('@').collect();
        prop_assert_eq!(parts.len(), frames.len());
        for part in parts {
            prop_assert_eq!(part, "<unknown>");
        }
    }

    #[test]
    fn prop_consecutive_duplicates_collapse(copies in 1usize..10, ts in 1i64..1_000_000) {
        let queue = Arc::new(SampleQueue::new(16, OverflowPolicy::DropNew));
        for _ in 0..copies {
            queue.try_push(&Sample::new(ts, 7, "w", &[1]));
        }
        let mut reader = BufferReader::with_clock(
            queue,
            Arc::new(MapResolver::from([(1, "M.m")])),
            Box::new(FarFuture),
        );
        let mut emitted = 0;
        while reader.pop().is_some() {
            emitted += 1;
        }
        prop_assert_eq!(emitted, 1);
        prop_assert_eq!(reader.stats().suppressed_duplicates, copies as u64 - 1);
    }
}
