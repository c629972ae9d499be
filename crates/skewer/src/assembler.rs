use tracing::warn;
use crate::batch::{Batch, WorkItem};
use crate::handle::ResultSlot;
use crate::queue::QueueConsumer;

/// Default upper bound on items per batch.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Draws one batch from the queue.
///
/// Blocks for the first item, then takes whatever else is already queued
/// without waiting, up to `batch_size` items. A ready item is never held back
/// to fill a batch, so batches range from 1 to `batch_size` items.
///
/// Items whose arity differs from the first item's are failed immediately and
/// left out of the batch.
///
/// Returns `None` once the queue is closed and drained.
pub fn fetch_batch<V, O>(
    consumer: &mut QueueConsumer<'_, WorkItem<V>, O>,
    batch_size: usize,
) -> Option<(Batch<V>, Vec<ResultSlot<O>>)> {
    let (first, slot) = consumer.get()?.into_parts();
    let arity = first.len();

    let mut batch = Batch::with_arity(arity, batch_size);
    let mut slots = Vec::with_capacity(batch_size);
    batch.push(first);
    slots.push(slot);

    while slots.len() < batch_size {
        let Ok(item) = consumer.try_get() else {
            break;
        };
        let (input, slot) = item.into_parts();
        if input.len() != arity {
            warn!(expected = arity, actual = input.len(), "dropping item with mismatched arity");
            let _ = slot.fail();
            continue;
        }
        batch.push(input);
        slots.push(slot);
    }

    Some((batch, slots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{result_channel, Prediction, ResultHandle};
    use crate::queue::{BoundedWorkQueue, QueueItem};

    fn put(queue: &BoundedWorkQueue<WorkItem<i32>, i32>, item: WorkItem<i32>) -> ResultHandle<i32> {
        let (slot, handle) = result_channel();
        queue.put(QueueItem::new(item, slot)).unwrap();
        handle
    }

    #[test]
    fn test_single_ready_item_closes_batch() {
        let queue = BoundedWorkQueue::new(4);
        put(&queue, vec![1, 10]);

        let (batch, slots) = fetch_batch(&mut queue.lock_consumer(), 5).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(slots.len(), 1);
        assert_eq!(batch.columns(), &[vec![1], vec![10]]);
    }

    #[test]
    fn test_drains_ready_items_up_to_batch_size() {
        let queue = BoundedWorkQueue::new(8);
        for i in 0..7 {
            put(&queue, vec![i]);
        }

        let (first, _slots) = fetch_batch(&mut queue.lock_consumer(), 3).unwrap();
        assert_eq!(first.column(0), Some(&[0, 1, 2][..]));

        let (second, _slots) = fetch_batch(&mut queue.lock_consumer(), 3).unwrap();
        assert_eq!(second.column(0), Some(&[3, 4, 5][..]));

        let (third, _slots) = fetch_batch(&mut queue.lock_consumer(), 3).unwrap();
        assert_eq!(third.column(0), Some(&[6][..]), "must not wait to fill a batch");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_mismatched_arity_item_fails_and_is_skipped() {
        let queue = BoundedWorkQueue::new(4);
        put(&queue, vec![1, 1]);
        let odd = put(&queue, vec![2]);
        put(&queue, vec![3, 3]);

        let (batch, slots) = fetch_batch(&mut queue.lock_consumer(), 5).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(slots.len(), 2);
        assert_eq!(batch.column(0), Some(&[1, 3][..]));
        assert_eq!(odd.wait(), Prediction::Failure);
    }

    #[test]
    fn test_closed_queue_ends_assembly() {
        let queue = BoundedWorkQueue::<WorkItem<i32>, i32>::new(1);
        queue.close();
        assert!(fetch_batch(&mut queue.lock_consumer(), 5).is_none());
    }
}
