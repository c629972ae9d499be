use std::collections::HashMap;
use serde::Deserialize;
use crate::assembler::DEFAULT_BATCH_SIZE;
use crate::error::{Result, SkewerError};
use crate::queue::MAX_QUEUE_CAPACITY;
use crate::stats::DEFAULT_SEND_EVERY;

/// Settings for an in-process [`Dispatcher`](crate::dispatcher::Dispatcher).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum items per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Queue capacity is `workers × queue_multiplier`.
    #[serde(default = "default_queue_multiplier")]
    pub queue_multiplier: usize,
    /// Collect layer diagnostics from predictor outputs.
    #[serde(default)]
    pub debug_charts: bool,
    /// Batches averaged into one diagnostics report.
    #[serde(default = "default_send_every")]
    pub send_every: usize,
    /// Identity attached to diagnostics reports. Defaults to `worker-{index}`.
    #[serde(default)]
    pub worker_id: Option<String>,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_queue_multiplier() -> usize {
    1
}
fn default_send_every() -> usize {
    DEFAULT_SEND_EVERY
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            queue_multiplier: default_queue_multiplier(),
            debug_charts: false,
            send_every: default_send_every(),
            worker_id: None,
        }
    }
}

impl DispatcherConfig {
    /// Rejects settings no pool could run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SkewerError::Config("batch_size must be at least 1".into()));
        }
        if self.queue_multiplier == 0 {
            return Err(SkewerError::Config("queue_multiplier must be at least 1".into()));
        }
        if self.queue_multiplier > MAX_QUEUE_CAPACITY {
            return Err(SkewerError::Config(format!(
                "queue_multiplier must be at most {MAX_QUEUE_CAPACITY}"
            )));
        }
        if self.debug_charts && self.send_every == 0 {
            return Err(SkewerError::Config("send_every must be at least 1".into()));
        }
        Ok(())
    }

    /// Queue capacity for a pool of `workers`, saturating on overflow.
    pub fn queue_capacity(&self, workers: usize) -> usize {
        workers.saturating_mul(self.queue_multiplier)
    }

    /// Validates the settings for a pool of `workers` and returns the queue
    /// capacity it would use.
    pub fn validate_for(&self, workers: usize) -> Result<usize> {
        self.validate()?;
        let capacity = self.queue_capacity(workers);
        if capacity > MAX_QUEUE_CAPACITY {
            return Err(SkewerError::Config(format!(
                "queue capacity {workers} x {} exceeds {MAX_QUEUE_CAPACITY}",
                self.queue_multiplier
            )));
        }
        Ok(capacity)
    }
}

/// How to launch one out-of-process worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessConfig {
    /// Worker executable.
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the child, e.g. a per-index device binding.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ProcessConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
