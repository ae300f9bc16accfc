//! Agent configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sample_queue::OverflowPolicy;

/// Configuration errors surfaced to embedders.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid agent configuration: {0}")]
    Invalid(String),
    #[error("failed to parse agent configuration")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for one [`ProfilerAgent`](crate::agent::ProfilerAgent).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AgentConfig {
    /// Sample queue capacity (rounded up to a power of two).
    pub queue_capacity: usize,
    /// Behavior when the sample queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Maximum number of concurrently live threads to track.
    pub max_threads: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            queue_capacity: 8192,
            overflow_policy: OverflowPolicy::DropNew,
            max_threads: 4096,
        }
    }
}

impl AgentConfig {
    /// Override the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Override the overflow policy.
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Override the tracked-thread limit.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue-capacity must be > 0".into()));
        }
        if self.max_threads == 0 {
            return Err(ConfigError::Invalid("max-threads must be > 0".into()));
        }
        Ok(())
    }
}
