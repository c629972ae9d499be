//! # Skewer
//!
//! An opportunistic batching dispatcher for synchronous, expensive scoring
//! functions ("predictors").
//!
//! ## Overview
//!
//! Callers submit single, unbatched work items and immediately receive a
//! [`ResultHandle`](handle::ResultHandle). Behind the front door a pool of
//! worker threads, each owning its own predictor, draws items from one
//! bounded queue, groups whatever is ready into a batch, scores the batch in
//! one call and hands every caller its own slice of the result.
//!
//! This amortises the fixed cost of a scoring call across many small requests
//! without making callers batch by hand or wait on each other.
//!
//! ## Architecture
//!
//! ```text
//! caller ─▶ Dispatcher::submit ─▶ BoundedWorkQueue ─▶ fetch_batch ─▶ Predictor
//!    ▲                                                 (WorkerLoop)      │
//!    └──────────── ResultHandle ◀──── per-item slices ◀──────────────────┘
//! ```
//!
//! ### Batching policy
//!
//! A worker blocks for the first item, then takes every item that is already
//! queued, up to the configured batch size, without waiting for more. Batches
//! therefore range from one item to `batch_size` items and a ready item is
//! never held back to fill a batch.
//!
//! ### Results
//!
//! A predictor returns per-item output columns, sliced by position, and shared
//! columns, copied to every item, plus a batch-level success flag. A failed
//! batch resolves every one of its handles with
//! [`Prediction::Failure`](handle::Prediction::Failure); there is no partial success.
//!
//! ### Backpressure
//!
//! The queue holds at most `workers × queue_multiplier` items. Submitting to a
//! full queue blocks the caller; nothing is ever dropped.
//!
//! ### Out-of-process workers
//!
//! The [`process`] module runs single-item predictors in separate processes,
//! talking JSON lines over stdin/stdout with an explicit shutdown sentinel.
//!
//! ## Example
//!
//! ```
//! use skewer::batch::{Batch, BatchOutput, OutputColumn};
//! use skewer::config::DispatcherConfig;
//! use skewer::dispatcher::Dispatcher;
//! use skewer::handle::Prediction;
//! use skewer::predictor::predictor_fn;
//!
//! let predictors = (0..2)
//!     .map(|_| predictor_fn(|batch: Batch<i64>| {
//!         let doubled = batch.columns()[0].iter().map(|x| x * 2).collect();
//!         Ok(BatchOutput::success(vec![OutputColumn::PerItem(doubled), OutputColumn::Shared(42)]))
//!     }))
//!     .collect();
//!
//! let dispatcher = Dispatcher::new(predictors, DispatcherConfig::default()).unwrap();
//! dispatcher.start().unwrap();
//!
//! let handle = dispatcher.submit(vec![21]).unwrap();
//! assert_eq!(handle.wait(), Prediction::Success(vec![42, 42]));
//!
//! dispatcher.stop().unwrap();
//! ```

pub mod assembler;
pub mod batch;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod predictor;
pub mod process;
pub mod queue;
pub mod stats;
pub mod worker;

pub use dispatcher::{Batcher, Dispatcher, WorkerPool};
pub use error::{Result, SkewerError};
pub use handle::{Prediction, ResultHandle};
