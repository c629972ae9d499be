use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use crate::error::{QueueError, TryGetError};
use crate::handle::ResultSlot;

/// Largest capacity the underlying channel accepts.
pub const MAX_QUEUE_CAPACITY: usize = usize::MAX >> 3;

/// # QueueItem
///
/// A container for associating one unbatched input with the slot its result
/// must be written to.
///
/// ## Type Parameters
///
/// * `I` - The type of the input value to be scored
/// * `O` - The type of the output fields that will be written back
pub struct QueueItem<I, O> {
    /// The unbatched input fields
    input: I,

    /// Where the worker writes this item's prediction
    slot: ResultSlot<O>,
}

impl<I, O> QueueItem<I, O> {
    /// Creates a new `QueueItem`.
    ///
    /// # Parameters
    ///
    /// * `input` - The value to be scored
    /// * `slot` - The writing half of the caller's result handle
    pub fn new(input: I, slot: ResultSlot<O>) -> Self {
        Self { input, slot }
    }

    /// Returns a reference to the input value.
    pub fn input(&self) -> &I {
        &self.input
    }

    /// Splits the item into its input and its result slot.
    ///
    /// # Returns
    ///
    /// A tuple of the input and the slot the worker must resolve
    pub fn into_parts(self) -> (I, ResultSlot<O>) {
        (self.input, self.slot)
    }
}

/// A capacity-limited FIFO of pending items shared by every producer and
/// every worker of a pool.
///
/// Producers block in [`put`](Self::put) while the queue is full; that is the
/// only admission control. Consumers take the receiver through
/// [`lock_consumer`](Self::lock_consumer), so one worker assembles a batch
/// without interleaving with another.
///
/// The blocking methods park the calling OS thread and must not be called
/// from inside an async task; async producers use [`put_async`](Self::put_async).
pub struct BoundedWorkQueue<I, O> {
    /// Admission side, `None` once the queue is closed
    sender: Mutex<Option<mpsc::Sender<QueueItem<I, O>>>>,

    /// Consuming side, held by one worker at a time
    receiver: Mutex<mpsc::Receiver<QueueItem<I, O>>>,

    /// Items that have landed in the queue
    enqueued: AtomicUsize,

    /// Items that have been taken out of the queue
    dequeued: AtomicUsize,

    capacity: usize,
}

impl<I, O> BoundedWorkQueue<I, O> {
    /// Creates an empty, open queue.
    ///
    /// # Parameters
    ///
    /// * `capacity` - Maximum number of items held at once
    ///
    /// # Panics
    ///
    /// If `capacity` is zero or larger than [`MAX_QUEUE_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "work queue capacity must be non-zero");
        assert!(capacity <= MAX_QUEUE_CAPACITY, "work queue capacity exceeds {MAX_QUEUE_CAPACITY}");
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(receiver),
            enqueued: AtomicUsize::new(0),
            dequeued: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Maximum number of items the queue holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently waiting, before and after [`close`](Self::close).
    ///
    /// Producers still blocked in `put` are not counted.
    pub fn len(&self) -> usize {
        let dequeued = self.dequeued.load(Ordering::SeqCst);
        self.enqueued.load(Ordering::SeqCst).saturating_sub(dequeued)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    fn sender(&self) -> Result<mpsc::Sender<QueueItem<I, O>>, QueueError> {
        self.sender.lock().clone().ok_or(QueueError::Closed)
    }

    /// Enqueues an item, blocking the calling thread while the queue is full.
    ///
    /// If the queue is closed the item is dropped, which resolves its slot
    /// with a failure.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the item is queued, or [`QueueError::Closed`]
    pub fn put(&self, item: QueueItem<I, O>) -> Result<(), QueueError> {
        self.sender()?
            .blocking_send(item)
            .map_err(|_| QueueError::Closed)?;
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Enqueues an item, suspending the calling task while the queue is full.
    pub async fn put_async(&self, item: QueueItem<I, O>) -> Result<(), QueueError> {
        let sender = self.sender()?;
        sender.send(item).await.map_err(|_| QueueError::Closed)?;
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Exclusive access to the consuming end for the lifetime of the guard.
    pub fn lock_consumer(&self) -> QueueConsumer<'_, I, O> {
        QueueConsumer {
            receiver: self.receiver.lock(),
            dequeued: &self.dequeued,
        }
    }

    /// Blocks until an item is available. Returns `None` once the queue has
    /// been closed and drained.
    pub fn get(&self) -> Option<QueueItem<I, O>> {
        self.lock_consumer().get()
    }

    /// Returns immediately. Another consumer holding the receiver counts as
    /// [`TryGetError::Empty`].
    pub fn try_get(&self) -> Result<QueueItem<I, O>, TryGetError> {
        match self.receiver.try_lock() {
            Some(receiver) => QueueConsumer { receiver, dequeued: &self.dequeued }.try_get(),
            None => Err(TryGetError::Empty),
        }
    }

    /// Stops admission. Items already queued stay available to consumers;
    /// a producer currently blocked in `put` still lands its item.
    pub fn close(&self) {
        self.sender.lock().take();
    }
}

/// The consuming end of a [`BoundedWorkQueue`], held by one worker at a time.
pub struct QueueConsumer<'a, I, O> {
    receiver: MutexGuard<'a, mpsc::Receiver<QueueItem<I, O>>>,
    dequeued: &'a AtomicUsize,
}

impl<I, O> QueueConsumer<'_, I, O> {
    /// Blocks for the next item; `None` once the queue is closed and drained.
    pub fn get(&mut self) -> Option<QueueItem<I, O>> {
        let item = self.receiver.blocking_recv()?;
        self.dequeued.fetch_add(1, Ordering::SeqCst);
        Some(item)
    }

    /// Takes the next item without blocking.
    pub fn try_get(&mut self) -> Result<QueueItem<I, O>, TryGetError> {
        let item = self.receiver.try_recv().map_err(|e| match e {
            TryRecvError::Empty => TryGetError::Empty,
            TryRecvError::Disconnected => TryGetError::Closed,
        })?;
        self.dequeued.fetch_add(1, Ordering::SeqCst);
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;
    use crate::handle::{result_channel, Prediction};

    fn item(value: i32) -> QueueItem<i32, i32> {
        let (slot, _handle) = result_channel();
        QueueItem::new(value, slot)
    }

    #[test]
    fn test_fifo_order() {
        let queue = BoundedWorkQueue::new(4);
        for i in 0..4 {
            queue.put(item(i)).unwrap();
        }
        let drained: Vec<i32> = (0..4).map(|_| *queue.get().unwrap().input()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_try_get_on_empty_queue() {
        let queue = BoundedWorkQueue::<i32, i32>::new(2);
        assert_eq!(queue.try_get().err(), Some(TryGetError::Empty));
    }

    #[test]
    fn test_len_tracks_outstanding_items() {
        let queue = BoundedWorkQueue::new(3);
        assert!(queue.is_empty());
        queue.put(item(1)).unwrap();
        queue.put(item(2)).unwrap();
        assert_eq!(queue.len(), 2);
        queue.try_get().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.capacity(), 3);
    }

    #[test]
    fn test_put_blocks_only_when_full() {
        let queue = Arc::new(BoundedWorkQueue::new(2));
        queue.put(item(1)).unwrap();
        queue.put(item(2)).unwrap();
        assert_eq!(queue.len(), queue.capacity());

        let landed = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = queue.clone();
            let landed = landed.clone();
            thread::spawn(move || {
                queue.put(item(3)).unwrap();
                landed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!landed.load(Ordering::SeqCst), "put must block on a full queue");
        assert_eq!(queue.len(), 2);

        assert_eq!(*queue.get().unwrap().input(), 1);
        producer.join().unwrap();
        assert!(landed.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_get_blocks_until_item_arrives() {
        let queue = Arc::new(BoundedWorkQueue::new(1));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || *queue.get().unwrap().input())
        };
        thread::sleep(Duration::from_millis(20));
        queue.put(item(42)).unwrap();
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn test_close_drains_then_ends() {
        let queue = BoundedWorkQueue::new(2);
        queue.put(item(1)).unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.put(item(2)), Err(QueueError::Closed));
        assert_eq!(*queue.get().unwrap().input(), 1);
        assert!(queue.get().is_none());
        assert_eq!(queue.try_get().err(), Some(TryGetError::Closed));
    }

    #[test]
    fn test_len_counts_items_after_close_while_consumer_held() {
        let queue = BoundedWorkQueue::new(4);
        let mut consumer = queue.lock_consumer();
        queue.put(item(1)).unwrap();
        queue.put(item(2)).unwrap();
        queue.put(item(3)).unwrap();
        queue.close();

        assert_eq!(queue.len(), 3, "a held receiver must not hide queued items");
        assert!(consumer.get().is_some());
        assert_eq!(queue.len(), 2);
        while consumer.get().is_some() {}
        assert!(queue.is_empty());
    }

    #[test]
    #[should_panic(expected = "work queue capacity exceeds")]
    fn test_capacity_above_channel_limit_is_rejected() {
        BoundedWorkQueue::<i32, i32>::new(MAX_QUEUE_CAPACITY + 1);
    }

    #[test]
    fn test_rejected_item_fails_its_slot() {
        let queue = BoundedWorkQueue::<i32, i32>::new(1);
        queue.close();
        let (slot, handle) = result_channel();
        assert!(queue.put(QueueItem::new(5, slot)).is_err());
        assert_eq!(handle.wait(), Prediction::Failure);
    }

    #[tokio::test]
    async fn test_put_async() {
        let queue = BoundedWorkQueue::new(1);
        queue.put_async(item(9)).await.unwrap();
        assert_eq!(*queue.try_get().unwrap().input(), 9);
    }

    #[test]
    fn test_consumer_guard_excludes_other_consumers() {
        let queue = BoundedWorkQueue::new(2);
        queue.put(item(1)).unwrap();
        let mut consumer = queue.lock_consumer();
        assert_eq!(queue.try_get().err(), Some(TryGetError::Empty));
        assert_eq!(*consumer.try_get().unwrap().input(), 1);
    }
}
