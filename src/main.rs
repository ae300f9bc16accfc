use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use muestreo::agent::ProfilerAgent;
use muestreo::buffer_reader::{Clock, SystemClock};
use muestreo::cli::Cli;
use muestreo::config::AgentConfig;
use muestreo::resolver::SyntheticResolver;
use rand::Rng;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// One synthetic producer: registers a thread, pushes jittered stacks
/// until the deadline, unregisters.
fn run_producer(agent: Arc<ProfilerAgent>, index: usize, deadline: Instant, interval_us: u64) {
    let thread_id = 1000 + index as i64;
    agent.on_thread_start(thread_id, &format!("worker-{}", index));

    let clock = SystemClock;
    let mut rng = rand::thread_rng();
    let mut frames = [0u64; 16];

    while Instant::now() < deadline {
        let depth = rng.gen_range(1..=frames.len());
        for (level, frame) in frames[..depth].iter_mut().enumerate() {
            *frame = rng.gen_range(1..=40) + level as u64 * 100;
        }
        agent.record(clock.now_ms(), thread_id, &frames[..depth]);
        thread::sleep(Duration::from_micros(interval_us));
    }

    agent.on_thread_end(thread_id);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            AgentConfig::from_json(&json).context("invalid config file")?
        }
        None => AgentConfig::default()
            .with_queue_capacity(cli.capacity)
            .with_overflow_policy(cli.policy.into()),
    };
    config.validate().context("invalid configuration")?;

    let agent = Arc::new(ProfilerAgent::new(config));
    let deadline = Instant::now() + Duration::from_millis(cli.duration_ms);

    let producers: Vec<_> = (0..cli.producers)
        .map(|index| {
            let agent = Arc::clone(&agent);
            let interval_us = cli.interval_us;
            thread::spawn(move || run_producer(agent, index, deadline, interval_us))
        })
        .collect();

    // Drain loop: the one context allowed to sleep and retry.
    let mut reader = agent.reader(Arc::new(SyntheticResolver));
    let mut emitted = 0u64;
    loop {
        while let Some(record) = reader.pop() {
            emitted += 1;
            if !cli.quiet {
                println!("{}", record);
            }
        }
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    for producer in producers {
        let _ = producer.join();
    }
    agent.shutdown();

    // Final pass for anything buffered after the producers stopped.
    while let Some(record) = reader.pop() {
        emitted += 1;
        if !cli.quiet {
            println!("{}", record);
        }
    }

    let stats = agent.stats();
    if cli.stats_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        eprintln!(
            "emitted {} records ({} pushed, {} dropped, {} overwritten, drop rate {:.2}%)",
            emitted,
            stats.queue.pushed,
            stats.queue.dropped,
            stats.queue.overwritten,
            stats.queue.drop_rate() * 100.0
        );
    }

    Ok(())
}
