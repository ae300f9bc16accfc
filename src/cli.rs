//! CLI argument parsing for the muestreo stress harness

use clap::{Parser, ValueEnum};

use crate::sample_queue::OverflowPolicy;

/// Full-queue behavior for the synthetic workload.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PolicyArg {
    /// Reject new samples when the queue is full (default)
    DropNew,
    /// Retire the oldest unconsumed sample to make room
    OverwriteOldest,
}

impl From<PolicyArg> for OverflowPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::DropNew => OverflowPolicy::DropNew,
            PolicyArg::OverwriteOldest => OverflowPolicy::OverwriteOldest,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "muestreo")]
#[command(version)]
#[command(about = "Synthetic stress harness for the muestreo profiler agent", long_about = None)]
pub struct Cli {
    /// Number of synthetic producer threads
    #[arg(short = 'p', long = "producers", default_value = "4")]
    pub producers: usize,

    /// Workload duration in milliseconds
    #[arg(short = 'd', long = "duration-ms", default_value = "1000")]
    pub duration_ms: u64,

    /// Sample queue capacity (rounded up to a power of two)
    #[arg(long = "capacity", default_value = "8192")]
    pub capacity: usize,

    /// Full-queue policy
    #[arg(long = "policy", value_enum, default_value = "drop-new")]
    pub policy: PolicyArg,

    /// Delay between samples per producer, in microseconds
    #[arg(long = "interval-us", default_value = "500")]
    pub interval_us: u64,

    /// Load agent configuration from a JSON file (overrides --capacity/--policy)
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<std::path::PathBuf>,

    /// Suppress per-record output, print only the final summary
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Print the final statistics as JSON
    #[arg(long = "stats-json")]
    pub stats_json: bool,

    /// Enable debug logging to stderr
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["muestreo"]);
        assert_eq!(cli.producers, 4);
        assert_eq!(cli.capacity, 8192);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_cli_policy_parsing() {
        let cli = Cli::parse_from(["muestreo", "--policy", "overwrite-oldest"]);
        assert_eq!(
            OverflowPolicy::from(cli.policy),
            OverflowPolicy::OverwriteOldest
        );
    }
}
