use std::marker::PhantomData;
use serde::Serialize;
use serde::de::DeserializeOwned;
use crate::batch::{Batch, BatchOutput};

/// A synchronous, batched scoring function owned by one worker thread.
///
/// Implementations receive a column-major [`Batch`] and return one
/// [`BatchOutput`] for the whole batch. Every `PerItem` output column must be
/// exactly `batch.len()` long. Setting `success` to `false` fails every item
/// of the batch; returning `Err` is treated the same way and is logged.
///
/// # Example
///
/// ```
/// use skewer::batch::{Batch, BatchOutput, OutputColumn};
/// use skewer::predictor::Predictor;
///
/// struct Doubler;
///
/// impl Predictor for Doubler {
///     type Field = i64;
///     type Output = i64;
///
///     fn predict(&mut self, batch: Batch<i64>) -> anyhow::Result<BatchOutput<i64>> {
///         let doubled = batch.columns()[0].iter().map(|x| x * 2).collect();
///         Ok(BatchOutput::success(vec![
///             OutputColumn::PerItem(doubled),
///             OutputColumn::Shared(42),
///         ]))
///     }
/// }
/// ```
pub trait Predictor: Send + 'static {
    /// Type of one input field of one item.
    type Field: Send + 'static;

    /// Type of one output field of one item.
    type Output: Clone + Send + Sync + 'static;

    fn predict(&mut self, batch: Batch<Self::Field>) -> anyhow::Result<BatchOutput<Self::Output>>;
}

/// Adapts a closure into a [`Predictor`].
pub struct FnPredictor<F, V, T> {
    func: F,
    _marker: PhantomData<fn(V) -> T>,
}

pub fn predictor_fn<F, V, T>(func: F) -> FnPredictor<F, V, T>
where
    F: FnMut(Batch<V>) -> anyhow::Result<BatchOutput<T>> + Send + 'static,
{
    FnPredictor {
        func,
        _marker: PhantomData,
    }
}

impl<F, V, T> Predictor for FnPredictor<F, V, T>
where
    F: FnMut(Batch<V>) -> anyhow::Result<BatchOutput<T>> + Send + 'static,
    V: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    type Field = V;
    type Output = T;

    fn predict(&mut self, batch: Batch<V>) -> anyhow::Result<BatchOutput<T>> {
        (self.func)(batch)
    }
}

/// A single-item scoring function run inside an isolated worker process.
///
/// Inputs and outputs cross the process boundary as JSON.
pub trait OfflinePredictor {
    type Input: DeserializeOwned;
    type Output: Serialize;

    fn predict(&mut self, input: Self::Input) -> anyhow::Result<Self::Output>;

    /// One-off description logged by the index 0 worker at start-up.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}
