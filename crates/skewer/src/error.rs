use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SkewerError>;

/// Errors surfaced by dispatchers, worker pools and worker processes.
///
/// Scoring failures are not errors at this level: they reach callers as
/// [`Prediction::Failure`](crate::handle::Prediction::Failure).
#[derive(Error, Debug)]
pub enum SkewerError {
    /// Invalid settings, or an empty predictor or worker list
    #[error("configuration error: {0}")]
    Config(String),

    /// The work queue refused an item
    #[error("work queue error: {0}")]
    Queue(#[from] QueueError),

    /// `start` was called on a pool that is already running
    #[error("worker pool already started")]
    AlreadyStarted,

    /// The OS refused to spawn the thread for the given worker index
    #[error("worker {0} thread could not be spawned: {1}")]
    Spawn(usize, std::io::Error),

    /// A worker or feeder thread died outside its own panic handling
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    /// A worker process stream ended without the shutdown sentinel
    #[error("cross-process channel closed before the shutdown sentinel")]
    ChannelClosed,

    /// A worker process sent, or was sent, something the protocol forbids
    #[error("worker {index} protocol violation: {reason}")]
    Protocol { index: usize, reason: String },

    /// The predictor could not be built inside a worker process
    #[error("predictor initialisation failed: {0}")]
    Init(#[source] anyhow::Error),

    /// A protocol message could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Admission failures on the bounded work queue.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
}

/// Non-blocking dequeue outcome when no item could be taken.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryGetError {
    #[error("queue is empty")]
    Empty,

    #[error("queue is closed and drained")]
    Closed,
}

/// Raised when a result is resolved a second time; the first value is kept.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    #[error("result handle already resolved")]
    AlreadyResolved,
}

/// A predictor returned a per-item output column whose length does not match
/// the batch it was given.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("output column {column} has {actual} values for a batch of {expected}")]
pub struct ShapeError {
    pub column: usize,
    pub expected: usize,
    pub actual: usize,
}
