use uuid::Uuid;
use crate::error::ShapeError;

/// One unbatched submission: an ordered sequence of input fields.
pub type WorkItem<V> = Vec<V>;

/// # Batch
///
/// Column-major view of the items a worker drew for one scoring call.
///
/// Column `k` holds field `k` of every item, in the order the items were
/// dequeued, so `columns()[k][i]` is field `k` of the `i`th item. The id is
/// generated per batch and only used to correlate log lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<V> {
    id: Uuid,
    columns: Vec<Vec<V>>,
    len: usize,
}

impl<V> Batch<V> {
    /// An empty batch expecting items of `arity` fields.
    pub fn with_arity(arity: usize, capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            columns: (0..arity).map(|_| Vec::with_capacity(capacity)).collect(),
            len: 0,
        }
    }

    /// Builds a batch from whole items; the first item fixes the arity.
    pub fn from_items<It>(items: It) -> Self
    where
        It: IntoIterator<Item = WorkItem<V>>,
    {
        let mut items = items.into_iter().peekable();
        let arity = items.peek().map(Vec::len).unwrap_or(0);
        let mut batch = Self::with_arity(arity, items.size_hint().0);
        for item in items {
            batch.push(item);
        }
        batch
    }

    /// Appends one item's fields to their columns.
    ///
    /// # Panics
    ///
    /// If the item's arity differs from the batch's.
    pub fn push(&mut self, item: WorkItem<V>) {
        assert_eq!(item.len(), self.arity(), "item arity must match batch arity");
        for (column, field) in self.columns.iter_mut().zip(item) {
            column.push(field);
        }
        self.len += 1;
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of items in the batch.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of input fields per item.
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Vec<V>] {
        &self.columns
    }

    pub fn column(&self, field: usize) -> Option<&[V]> {
        self.columns.get(field).map(Vec::as_slice)
    }

    pub fn into_columns(self) -> Vec<Vec<V>> {
        self.columns
    }
}

/// One output of a scoring call.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputColumn<T> {
    /// One value per batch item, sliced by position.
    PerItem(Vec<T>),
    /// One value for the whole batch, copied to every item.
    Shared(T),
}

/// What a [`Predictor`](crate::predictor::Predictor) returns for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput<T> {
    pub columns: Vec<OutputColumn<T>>,
    /// Optional per-batch layer statistics, four conv stages then three fc stages.
    pub diagnostics: Option<Vec<f64>>,
    /// Batch-level success flag. `false` fails every item of the batch.
    pub success: bool,
}

impl<T> BatchOutput<T> {
    pub fn success(columns: Vec<OutputColumn<T>>) -> Self {
        Self {
            columns,
            diagnostics: None,
            success: true,
        }
    }

    pub fn failure() -> Self {
        Self {
            columns: Vec::new(),
            diagnostics: None,
            success: false,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<f64>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}

impl<T: Clone> BatchOutput<T> {
    /// Regroups the output columns into per-item field lists, in column order.
    ///
    /// Fails without producing anything if any per-item column is not exactly
    /// `len` long.
    pub fn split_per_item(columns: Vec<OutputColumn<T>>, len: usize) -> Result<Vec<Vec<T>>, ShapeError> {
        for (column, output) in columns.iter().enumerate() {
            if let OutputColumn::PerItem(values) = output {
                if values.len() != len {
                    return Err(ShapeError {
                        column,
                        expected: len,
                        actual: values.len(),
                    });
                }
            }
        }

        let mut rows: Vec<Vec<T>> = (0..len).map(|_| Vec::with_capacity(columns.len())).collect();
        for output in columns {
            match output {
                OutputColumn::PerItem(values) => {
                    for (row, value) in rows.iter_mut().zip(values) {
                        row.push(value);
                    }
                }
                OutputColumn::Shared(value) => {
                    for row in rows.iter_mut() {
                        row.push(value.clone());
                    }
                }
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_items_is_column_major() {
        let batch = Batch::from_items(vec![vec![1, 10], vec![2, 20], vec![3, 30]]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.arity(), 2);
        assert_eq!(batch.column(0), Some(&[1, 2, 3][..]));
        assert_eq!(batch.column(1), Some(&[10, 20, 30][..]));
        assert_eq!(batch.column(2), None);
    }

    #[test]
    fn test_batches_get_distinct_ids() {
        let a = Batch::<i32>::with_arity(1, 1);
        let b = Batch::<i32>::with_arity(1, 1);
        assert_ne!(a.id(), b.id());
        assert!(a.is_empty());
    }

    #[test]
    #[should_panic(expected = "item arity must match batch arity")]
    fn test_push_rejects_wrong_arity() {
        let mut batch = Batch::with_arity(2, 1);
        batch.push(vec![1]);
    }

    #[test]
    fn test_split_slices_per_item_and_copies_shared() {
        let columns = vec![
            OutputColumn::PerItem(vec![2, 4]),
            OutputColumn::PerItem(vec![-1, -2]),
            OutputColumn::Shared(42),
        ];
        let rows = BatchOutput::split_per_item(columns, 2).unwrap();
        assert_eq!(rows, vec![vec![2, -1, 42], vec![4, -2, 42]]);
    }

    #[test]
    fn test_split_rejects_short_column() {
        let columns = vec![OutputColumn::Shared(1), OutputColumn::PerItem(vec![1, 2])];
        let err = BatchOutput::split_per_item(columns, 3).unwrap_err();
        assert_eq!(err, ShapeError { column: 1, expected: 3, actual: 2 });
    }

    #[test]
    fn test_output_constructors() {
        let out = BatchOutput::success(vec![OutputColumn::Shared(1)]).with_diagnostics(vec![0.5; 7]);
        assert!(out.success);
        assert_eq!(out.diagnostics.as_ref().map(Vec::len), Some(7));
        assert!(!BatchOutput::<i32>::failure().success);
    }
}
