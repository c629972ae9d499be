use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};
use crate::batch::WorkItem;
use crate::config::DispatcherConfig;
use crate::error::{Result, SkewerError};
use crate::handle::{result_channel, Prediction, ResultHandle};
use crate::predictor::Predictor;
use crate::queue::{BoundedWorkQueue, QueueItem};
use crate::stats::{MetricsSink, TracingSink};
use crate::worker::{WorkerHandle, WorkerLoop, WorkerStats};

type SharedQueue<P> = Arc<BoundedWorkQueue<WorkItem<<P as Predictor>::Field>, <P as Predictor>::Output>>;

/// N worker loops, one predictor each, draining one shared queue.
pub struct WorkerPool<P: Predictor> {
    queue: SharedQueue<P>,
    pending: Mutex<Vec<WorkerLoop<P>>>,
    workers: Mutex<Vec<WorkerHandle>>,
    started: AtomicBool,
}

impl<P: Predictor> WorkerPool<P> {
    /// Builds one worker loop per predictor. Nothing runs until [`start`](Self::start).
    ///
    /// # Parameters
    ///
    /// * `predictors` - One predictor per worker; worker ids follow their order
    /// * `queue` - The queue every worker drains
    /// * `config` - Batch size and diagnostics settings
    /// * `sink` - Where diagnostics go when enabled; defaults to [`TracingSink`]
    pub fn new(
        predictors: Vec<P>,
        queue: SharedQueue<P>,
        config: &DispatcherConfig,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> Self {
        let sink = sink.unwrap_or_else(|| Arc::new(TracingSink));
        let pending = predictors
            .into_iter()
            .enumerate()
            .map(|(id, predictor)| {
                let worker = WorkerLoop::new(id, predictor, queue.clone(), config.batch_size);
                if config.debug_charts {
                    let worker_id = config.worker_id.clone().unwrap_or_else(|| format!("worker-{id}"));
                    worker.with_diagnostics(sink.clone(), worker_id, config.send_every)
                } else {
                    worker
                }
            })
            .collect();

        Self {
            queue,
            pending: Mutex::new(pending),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Whether [`start`](Self::start) has been called.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Spawns one thread per worker. Fails with
    /// [`SkewerError::AlreadyStarted`] on any call after the first.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SkewerError::AlreadyStarted);
        }
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut workers = self.workers.lock();
        for worker in pending {
            workers.push(WorkerHandle::spawn(worker)?);
        }
        info!(workers = workers.len(), capacity = self.queue.capacity(), "worker pool started");
        Ok(())
    }

    /// Closes the queue, lets the workers drain it, and joins them.
    ///
    /// # Returns
    ///
    /// Per-worker counters in worker order, or an error if a worker thread died
    pub fn stop(&self) -> Result<Vec<WorkerStats>> {
        self.queue.close();
        let workers = std::mem::take(&mut *self.workers.lock());
        let stats = workers
            .into_iter()
            .map(WorkerHandle::join)
            .collect::<Result<Vec<_>>>()?;
        info!(workers = stats.len(), "worker pool stopped");
        Ok(stats)
    }
}

impl<P: Predictor> Drop for WorkerPool<P> {
    fn drop(&mut self) {
        // running threads drain what is queued, then exit on their own
        self.queue.close();
    }
}

/// Submits single items and hands back a [`ResultHandle`] per item.
#[async_trait]
pub trait Batcher<I, O> {
    /// Queues `item`, suspending the calling task while the queue is full.
    async fn submit_async(&self, item: I) -> Result<ResultHandle<O>>;
}

/// # Dispatcher
///
/// The front door of an in-process worker pool.
///
/// Callers submit one unbatched [`WorkItem`] at a time and get a
/// [`ResultHandle`] back as soon as the item is queued. Submission only
/// blocks while the queue is full; the queue holds at most
/// `predictors × queue_multiplier` items.
///
/// Items taken by different workers may complete out of order.
pub struct Dispatcher<P: Predictor> {
    queue: SharedQueue<P>,
    pool: WorkerPool<P>,
}

impl<P: Predictor> Dispatcher<P> {
    /// Creates a dispatcher with one worker per predictor. Diagnostics, when
    /// enabled, are logged through [`TracingSink`].
    ///
    /// # Parameters
    ///
    /// * `predictors` - One predictor per worker; must not be empty
    /// * `config` - Batch size, queue sizing and diagnostics settings
    ///
    /// # Returns
    ///
    /// The dispatcher, not yet started, or [`SkewerError::Config`]
    pub fn new(predictors: Vec<P>, config: DispatcherConfig) -> Result<Self> {
        Self::build(predictors, config, None)
    }

    /// Like [`new`](Self::new), reporting diagnostics to `sink` instead of the log.
    pub fn with_sink(predictors: Vec<P>, config: DispatcherConfig, sink: Arc<dyn MetricsSink>) -> Result<Self> {
        Self::build(predictors, config, Some(sink))
    }

    fn build(predictors: Vec<P>, config: DispatcherConfig, sink: Option<Arc<dyn MetricsSink>>) -> Result<Self> {
        if predictors.is_empty() {
            return Err(SkewerError::Config("at least one predictor is required".into()));
        }
        let capacity = config.validate_for(predictors.len())?;

        let queue = Arc::new(BoundedWorkQueue::new(capacity));
        let pool = WorkerPool::new(predictors, queue.clone(), &config, sink);
        Ok(Self { queue, pool })
    }

    /// Starts the worker threads. Items submitted earlier are already queued.
    pub fn start(&self) -> Result<()> {
        self.pool.start()
    }

    /// Queues `item` and returns its handle, blocking the calling thread while
    /// the queue is full. Use [`Batcher::submit_async`] from async code.
    pub fn submit(&self, item: WorkItem<P::Field>) -> Result<ResultHandle<P::Output>> {
        let (slot, handle) = result_channel();
        self.queue.put(QueueItem::new(item, slot))?;
        debug!(queued = self.queue.len(), "item submitted");
        Ok(handle)
    }

    /// Like [`submit`](Self::submit), with `callback` invoked exactly once on
    /// resolution, on the worker thread that resolves it.
    pub fn submit_with_callback<F>(&self, item: WorkItem<P::Field>, callback: F) -> Result<ResultHandle<P::Output>>
    where
        F: FnOnce(&Prediction<P::Output>) + Send + 'static,
    {
        let (slot, handle) = result_channel();
        handle.on_complete(callback);
        self.queue.put(QueueItem::new(item, slot))?;
        Ok(handle)
    }

    /// Items waiting to be drawn into a batch.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// `predictors × queue_multiplier`.
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Stops admission, waits for queued items to be scored, joins the workers.
    pub fn stop(&self) -> Result<Vec<WorkerStats>> {
        self.pool.stop()
    }
}

#[async_trait]
impl<P: Predictor> Batcher<WorkItem<P::Field>, P::Output> for Dispatcher<P> {
    async fn submit_async(&self, item: WorkItem<P::Field>) -> Result<ResultHandle<P::Output>> {
        let (slot, handle) = result_channel();
        self.queue.put_async(QueueItem::new(item, slot)).await?;
        Ok(handle)
    }
}
