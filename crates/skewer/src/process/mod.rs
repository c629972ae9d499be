//! # Out-of-process workers
//!
//! An alternative to the threaded pool for predictors that need a separate
//! memory space or device context per worker. There is no batching on this
//! path: every request is one item and gets one answer.
//!
//! ```text
//!   ProcessWorkerPool ──stdin──▶ worker 0 ──stdout──▶
//!         │         ──stdin──▶ worker 1 ──stdout──▶  shared outbound
//!         │         ──stdin──▶ worker N ──stdout──▶
//! ```
//!
//! Messages are [`Request`]/[`Response`] pairs, one JSON document per line.
//! A worker that reads [`TaskId::Die`] echoes it once and exits, so a pool of
//! N workers expects N echoes when shutting down.
//!
//! A worker executable is a thin `main` around [`run_worker_main`]:
//!
//! ```no_run
//! use skewer::predictor::OfflinePredictor;
//!
//! struct Scorer;
//!
//! impl OfflinePredictor for Scorer {
//!     type Input = Vec<f32>;
//!     type Output = f32;
//!
//!     fn predict(&mut self, input: Vec<f32>) -> anyhow::Result<f32> {
//!         Ok(input.iter().sum())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     skewer::process::run_worker_main(|_index| Ok(Scorer))?;
//!     Ok(())
//! }
//! ```

mod child;
mod parent;
pub mod protocol;

pub use child::{run_worker, run_worker_main, WORKER_INDEX_ENV};
pub use parent::{ProcessWorker, ProcessWorkerPool};
pub use protocol::{Request, Response, TaskId};
