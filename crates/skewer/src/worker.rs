//! Worker threads that turn queued items into scored batches.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use crate::assembler::fetch_batch;
use crate::batch::{Batch, BatchOutput, WorkItem};
use crate::error::{Result, SkewerError};
use crate::handle::{Prediction, ResultSlot};
use crate::predictor::Predictor;
use crate::queue::BoundedWorkQueue;
use crate::stats::{LayerStats, MetricsSink};

/// Counters a worker returns when its loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub batches: usize,
    pub items: usize,
    pub failed_batches: usize,
}

struct Diagnostics {
    layers: LayerStats,
    sink: Arc<dyn MetricsSink>,
    worker_id: String,
}

impl Diagnostics {
    fn observe(&mut self, worker: usize, values: &[f64]) {
        if let Some(report) = self.layers.observe(values) {
            if let Err(e) = self.sink.send(&self.worker_id, report) {
                warn!(worker, error = %e, "failed to report layer statistics");
            }
        }
    }
}

/// # WorkerLoop
///
/// Owns one predictor and repeatedly:
///
/// 1. blocks on the shared queue for a batch ([`fetch_batch`]),
/// 2. scores the batch,
/// 3. resolves each item's slot with its slice of the output, or every slot
///    with [`Prediction::Failure`] if the batch failed.
///
/// A predictor error, a malformed output or a panic anywhere in a cycle fails
/// that cycle's items and the loop moves on. The loop ends when the queue is
/// closed and drained.
pub struct WorkerLoop<P: Predictor> {
    id: usize,
    predictor: P,
    queue: Arc<BoundedWorkQueue<WorkItem<P::Field>, P::Output>>,
    batch_size: usize,
    diagnostics: Option<Diagnostics>,
    stats: WorkerStats,
}

impl<P: Predictor> WorkerLoop<P> {
    pub fn new(
        id: usize,
        predictor: P,
        queue: Arc<BoundedWorkQueue<WorkItem<P::Field>, P::Output>>,
        batch_size: usize,
    ) -> Self {
        assert!(batch_size > 0, "batch size must be non-zero");
        Self {
            id,
            predictor,
            queue,
            batch_size,
            diagnostics: None,
            stats: WorkerStats::default(),
        }
    }

    /// Feeds batch diagnostics to `sink`, averaged over `send_every` batches.
    pub fn with_diagnostics(
        mut self,
        sink: Arc<dyn MetricsSink>,
        worker_id: impl Into<String>,
        send_every: usize,
    ) -> Self {
        self.diagnostics = Some(Diagnostics {
            layers: LayerStats::new(send_every),
            sink,
            worker_id: worker_id.into(),
        });
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn run(mut self) -> WorkerStats {
        info!(worker = self.id, batch_size = self.batch_size, "worker started");
        loop {
            let fetched = fetch_batch(&mut self.queue.lock_consumer(), self.batch_size);
            let Some((batch, slots)) = fetched else {
                break;
            };

            let cycle = panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle(batch, slots)));
            if let Err(payload) = cycle {
                // unresolved slots were dropped during unwinding and have failed
                self.stats.failed_batches += 1;
                error!(worker = self.id, panic = panic_message(&*payload), "worker cycle panicked");
            }
        }
        info!(worker = self.id, batches = self.stats.batches, items = self.stats.items, "worker stopped");
        self.stats
    }

    /// Scores one batch and resolves every slot drawn for it.
    pub fn run_cycle(&mut self, batch: Batch<P::Field>, slots: Vec<ResultSlot<P::Output>>) {
        let batch_id = batch.id();
        let len = batch.len();
        self.stats.batches += 1;
        self.stats.items += len;
        debug!(worker = self.id, %batch_id, batch_size = len, "scoring batch");

        let output = match self.predictor.predict(batch) {
            Ok(output) => output,
            Err(e) => {
                error!(worker = self.id, %batch_id, error = ?e, "predictor failed");
                self.fail_all(slots);
                return;
            }
        };

        if !output.success {
            debug!(worker = self.id, %batch_id, "predictor reported batch failure");
            self.fail_all(slots);
            return;
        }

        if let (Some(diagnostics), Some(values)) = (self.diagnostics.as_mut(), output.diagnostics.as_deref()) {
            diagnostics.observe(self.id, values);
        }

        match BatchOutput::split_per_item(output.columns, len) {
            Ok(rows) => {
                for (slot, fields) in slots.into_iter().zip(rows) {
                    let _ = slot.resolve(Prediction::Success(fields));
                }
            }
            Err(e) => {
                error!(worker = self.id, %batch_id, error = %e, "malformed predictor output");
                self.fail_all(slots);
            }
        }
    }

    fn fail_all(&mut self, slots: Vec<ResultSlot<P::Output>>) {
        self.stats.failed_batches += 1;
        for slot in slots {
            let _ = slot.fail();
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A handle to a worker loop running on its own OS thread.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl WorkerHandle {
    /// Spawns `worker` on a thread named `skewer-worker-{id}`.
    pub fn spawn<P: Predictor>(worker: WorkerLoop<P>) -> Result<Self> {
        let id = worker.id();
        let handle = thread::Builder::new()
            .name(format!("skewer-worker-{id}"))
            .spawn(move || worker.run())
            .map_err(|e| SkewerError::Spawn(id, e))?;
        Ok(Self { id, handle: Some(handle) })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the loop to end. The queue must be closed first or this
    /// blocks forever.
    pub fn join(mut self) -> Result<WorkerStats> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| SkewerError::WorkerPanicked(self.id)),
            None => Ok(WorkerStats::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use crate::batch::OutputColumn;
    use crate::handle::{result_channel, ResultHandle};
    use crate::predictor::predictor_fn;
    use crate::queue::QueueItem;

    type Queue = BoundedWorkQueue<WorkItem<i64>, i64>;

    fn doubler() -> impl Predictor<Field = i64, Output = i64> {
        predictor_fn(|batch: Batch<i64>| {
            let doubled = batch.columns()[0].iter().map(|x| x * 2).collect();
            Ok(BatchOutput::success(vec![OutputColumn::PerItem(doubled), OutputColumn::Shared(42)]))
        })
    }

    fn submit(queue: &Queue, item: WorkItem<i64>) -> ResultHandle<i64> {
        let (slot, handle) = result_channel();
        queue.put(QueueItem::new(item, slot)).unwrap();
        handle
    }

    fn cycle_with<P: Predictor<Field = i64, Output = i64>>(
        predictor: P,
        items: Vec<WorkItem<i64>>,
    ) -> (WorkerStats, Vec<ResultHandle<i64>>) {
        let queue = Arc::new(Queue::new(items.len().max(1)));
        let handles: Vec<_> = items.into_iter().map(|item| submit(&queue, item)).collect();
        queue.close();
        let stats = WorkerLoop::new(0, predictor, queue, 8).run();
        (stats, handles)
    }

    #[test]
    fn test_success_slices_per_item() {
        let (stats, handles) = cycle_with(doubler(), vec![vec![1], vec![2], vec![3]]);
        let results: Vec<_> = handles.iter().map(ResultHandle::wait).collect();
        assert_eq!(
            results,
            vec![
                Prediction::Success(vec![2, 42]),
                Prediction::Success(vec![4, 42]),
                Prediction::Success(vec![6, 42]),
            ]
        );
        assert_eq!(stats, WorkerStats { batches: 1, items: 3, failed_batches: 0 });
    }

    #[test]
    fn test_batch_failure_fails_every_item() {
        let failing = predictor_fn(|_: Batch<i64>| Ok(BatchOutput::<i64>::failure()));
        let (stats, handles) = cycle_with(failing, vec![vec![1], vec![2]]);
        for handle in handles {
            assert_eq!(handle.wait(), Prediction::Failure);
        }
        assert_eq!(stats.failed_batches, 1);
    }

    #[test]
    fn test_predictor_error_fails_batch() {
        let erroring = predictor_fn(|_: Batch<i64>| -> anyhow::Result<BatchOutput<i64>> {
            anyhow::bail!("device lost")
        });
        let (_, handles) = cycle_with(erroring, vec![vec![1]]);
        assert_eq!(handles[0].wait(), Prediction::Failure);
    }

    #[test]
    fn test_malformed_output_fails_batch() {
        let short = predictor_fn(|_: Batch<i64>| Ok(BatchOutput::success(vec![OutputColumn::PerItem(vec![1])])));
        let (_, handles) = cycle_with(short, vec![vec![1], vec![2]]);
        assert!(handles.iter().all(|h| h.wait() == Prediction::Failure));
    }

    #[test]
    fn test_panic_fails_batch_and_loop_continues() {
        let mut calls = 0;
        let flaky = predictor_fn(move |batch: Batch<i64>| {
            calls += 1;
            if calls == 1 {
                panic!("first batch explodes");
            }
            Ok(BatchOutput::success(vec![OutputColumn::PerItem(batch.into_columns().remove(0))]))
        });

        let queue = Arc::new(Queue::new(4));
        let first = submit(&queue, vec![1]);
        let worker = WorkerHandle::spawn(WorkerLoop::new(0, flaky, queue.clone(), 1)).unwrap();
        assert_eq!(first.wait(), Prediction::Failure);

        let second = submit(&queue, vec![5]);
        assert_eq!(second.wait(), Prediction::Success(vec![5]));

        queue.close();
        let stats = worker.join().unwrap();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.failed_batches, 1);
    }

    #[test]
    fn test_panicking_callback_does_not_fail_batch_mates() {
        let queue = Arc::new(Queue::new(3));
        let first = submit(&queue, vec![1]);
        first.on_complete(|_| panic!("caller callback bug"));
        let second = submit(&queue, vec![2]);
        let third = submit(&queue, vec![3]);
        queue.close();

        let stats = WorkerLoop::new(0, doubler(), queue, 3).run();
        assert_eq!(first.wait(), Prediction::Success(vec![2, 42]));
        assert_eq!(second.wait(), Prediction::Success(vec![4, 42]));
        assert_eq!(third.wait(), Prediction::Success(vec![6, 42]));
        assert_eq!(stats, WorkerStats { batches: 1, items: 3, failed_batches: 0 });
    }

    #[test]
    fn test_batches_never_exceed_batch_size() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let sizes = sizes.clone();
            predictor_fn(move |batch: Batch<i64>| {
                sizes.lock().unwrap().push(batch.len());
                Ok(BatchOutput::success(vec![OutputColumn::Shared(0)]))
            })
        };
        let queue = Arc::new(Queue::new(16));
        let handles: Vec<_> = (0..10).map(|i| submit(&queue, vec![i])).collect();
        queue.close();
        WorkerLoop::new(0, recorder, queue, 3).run();

        assert!(handles.iter().all(|h| h.wait().is_success()));
        let sizes = sizes.lock().unwrap();
        assert_eq!(*sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_diagnostics_reported_through_sink() {
        let with_stats = predictor_fn(|batch: Batch<i64>| {
            Ok(BatchOutput::success(vec![OutputColumn::PerItem(vec![0; batch.len()])])
                .with_diagnostics(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]))
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Queue::new(4));
        for i in 0..4 {
            submit(&queue, vec![i]);
        }
        queue.close();

        WorkerLoop::new(3, with_stats, queue, 1)
            .with_diagnostics(Arc::new(tx), "trainer-7", 2)
            .run();

        let (worker_id, report) = rx.try_recv().unwrap();
        assert_eq!(worker_id, "trainer-7");
        assert_eq!(report.conv, [1.0, 2.0, 3.0, 4.0]);
        assert!(rx.try_recv().is_ok(), "four batches make two reports");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sink_failure_does_not_block_results() {
        let with_stats = predictor_fn(|_: Batch<i64>| {
            Ok(BatchOutput::success(vec![OutputColumn::Shared(1)]).with_diagnostics(vec![0.0; 7]))
        });
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let queue = Arc::new(Queue::new(1));
        let handle = submit(&queue, vec![1]);
        queue.close();

        WorkerLoop::new(0, with_stats, queue, 1)
            .with_diagnostics(Arc::new(tx), "w", 1)
            .run();
        assert_eq!(handle.wait_timeout(Duration::from_secs(1)), Some(Prediction::Success(vec![1])));
    }

    #[test]
    fn test_worker_thread_is_named() {
        let named = predictor_fn(|_: Batch<i64>| {
            let name = thread::current().name().unwrap_or_default().to_string();
            Ok(BatchOutput::success(vec![OutputColumn::Shared(name.len() as i64)]))
        });
        let queue = Arc::new(Queue::new(1));
        let handle = submit(&queue, vec![0]);
        let worker = WorkerHandle::spawn(WorkerLoop::new(4, named, queue.clone(), 1)).unwrap();
        assert_eq!(handle.wait(), Prediction::Success(vec!["skewer-worker-4".len() as i64]));
        queue.close();
        worker.join().unwrap();
    }
}
