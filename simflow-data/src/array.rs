use simflow_errors::{invalid_data, SimResult};

use crate::data_type::{Closeness, Element, UnitShape};

/// A uniform column of shape `(N, *unit_shape)` with per-row change
/// detection against a snapshot.
///
/// The snapshot is taken lazily: the first mutation after construction or
/// [`reset`](TrackedArray::reset) copies the current contents. The per-row
/// changed mask is likewise computed lazily on first access and cached until
/// the next mutation. Rows with a non-empty unit shape are reduced: any
/// element differing marks the whole row changed.
#[derive(Debug, Clone)]
pub struct TrackedArray<T> {
    data: Vec<T>,
    unit_shape: UnitShape,
    stride: usize,
    snapshot: Option<Vec<T>>,
    changed: Option<Vec<bool>>,
    closeness: Closeness,
}

impl<T: Element> TrackedArray<T> {
    /// Allocate a column of `len` rows filled with the undefined sentinel.
    pub fn undefined(len: usize, unit_shape: impl Into<UnitShape>, closeness: Closeness) -> Self {
        let unit_shape = unit_shape.into();
        let stride: usize = unit_shape.iter().product();
        Self {
            data: vec![T::undefined(); len * stride],
            unit_shape,
            stride,
            snapshot: None,
            changed: None,
            closeness,
        }
    }

    /// Build a column from flat row-major values. The value count must be a
    /// multiple of the unit-shape stride.
    pub fn from_values(
        data: Vec<T>,
        unit_shape: impl Into<UnitShape>,
        closeness: Closeness,
    ) -> SimResult<Self> {
        let unit_shape = unit_shape.into();
        let stride: usize = unit_shape.iter().product();
        if stride == 0 || data.len() % stride != 0 {
            return Err(invalid_data!(
                "{} values do not fit rows of {} elements",
                data.len(),
                stride
            ));
        }
        Ok(Self {
            data,
            unit_shape,
            stride,
            snapshot: None,
            changed: None,
            closeness,
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.data.len() / self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn unit_shape(&self) -> &UnitShape {
        &self.unit_shape
    }

    /// Scalar elements per row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn closeness(&self) -> &Closeness {
        &self.closeness
    }

    /// The flat row-major contents.
    pub fn values(&self) -> &[T] {
        &self.data
    }

    /// One row as a flat slice of `stride` elements.
    pub fn row(&self, row: usize) -> &[T] {
        &self.data[row * self.stride..(row + 1) * self.stride]
    }

    /// Overwrite one row. Takes the snapshot first if tracking has not
    /// started yet.
    pub fn write_row(&mut self, row: usize, values: &[T]) {
        debug_assert_eq!(values.len(), self.stride);
        self.start_tracking();
        self.data[row * self.stride..(row + 1) * self.stride].clone_from_slice(values);
    }

    /// Overwrite several rows at once; `values` holds the rows back to back
    /// in the order of `rows`.
    pub fn write_rows(&mut self, rows: &[usize], values: &[T]) {
        debug_assert_eq!(values.len(), rows.len() * self.stride);
        self.start_tracking();
        for (k, &row) in rows.iter().enumerate() {
            self.data[row * self.stride..(row + 1) * self.stride]
                .clone_from_slice(&values[k * self.stride..(k + 1) * self.stride]);
        }
    }

    /// Per-row changed mask against the snapshot. All-false when tracking
    /// has not started. Cached until the next mutation or reset.
    pub fn changed(&mut self) -> &[bool] {
        if self.changed.is_none() {
            let mask = match &self.snapshot {
                None => vec![false; self.len()],
                Some(snapshot) => self
                    .data
                    .chunks(self.stride)
                    .zip(snapshot.chunks(self.stride))
                    .map(|(row, prev)| {
                        row.iter()
                            .zip(prev)
                            .any(|(a, b)| !a.close_to(b, &self.closeness))
                    })
                    .collect(),
            };
            self.changed = Some(mask);
        }
        self.changed.as_deref().unwrap()
    }

    pub fn has_changes(&mut self) -> bool {
        self.changed().iter().any(|&c| c)
    }

    /// The previous and current values of all changed rows, flat row-major.
    pub fn diff(&mut self) -> (Vec<T>, Vec<T>) {
        self.start_tracking();
        let changed = self.changed().to_vec();
        let snapshot = self.snapshot.as_ref().expect("tracking started above");
        let mut previous = Vec::new();
        let mut current = Vec::new();
        for (row, &is_changed) in changed.iter().enumerate() {
            if is_changed {
                previous.extend_from_slice(&snapshot[row * self.stride..(row + 1) * self.stride]);
                current.extend_from_slice(&self.data[row * self.stride..(row + 1) * self.stride]);
            }
        }
        (previous, current)
    }

    /// Grow the column to `new_len` rows, filling new rows with undefined.
    /// The snapshot grows consistently, so pre-existing rows do not show up
    /// as changed.
    pub fn resize(&mut self, new_len: usize) {
        if new_len == self.len() {
            return;
        }
        self.start_tracking();
        let new_size = new_len * self.stride;
        self.data.resize(new_size, T::undefined());
        if let Some(snapshot) = &mut self.snapshot {
            snapshot.resize(new_size, T::undefined());
        }
        self.changed = None;
    }

    /// The snapshot taken when tracking started, if any.
    pub fn snapshot(&self) -> Option<&[T]> {
        self.snapshot.as_deref()
    }

    pub(crate) fn restore_snapshot(&mut self, snapshot: Vec<T>) {
        debug_assert_eq!(snapshot.len(), self.data.len());
        self.snapshot = Some(snapshot);
        self.changed = None;
    }

    /// Drop the snapshot and the cached change mask.
    pub fn reset(&mut self) {
        self.snapshot = None;
        self.changed = None;
    }

    fn start_tracking(&mut self) {
        if self.snapshot.is_none() {
            self.snapshot = Some(self.data.clone());
        }
        self.changed = None;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::data_type::UNDEFINED_INT;

    fn closeness() -> Closeness {
        Closeness::default().with_equal_nan()
    }

    fn int_array(values: &[i32]) -> TrackedArray<i32> {
        TrackedArray::from_values(values.to_vec(), UnitShape::new(), closeness()).unwrap()
    }

    #[test]
    fn unchanged_after_construction() {
        let mut arr = int_array(&[1, 2, 3]);
        assert_eq!(arr.changed(), &[false, false, false]);
    }

    #[test]
    fn write_marks_row_changed() {
        let mut arr = int_array(&[1, 2, 3]);
        arr.write_row(1, &[5]);
        assert_eq!(arr.changed(), &[false, true, false]);
        assert_eq!(arr.values(), &[1, 5, 3]);
    }

    #[test]
    fn rewriting_same_value_is_not_a_change() {
        let mut arr = int_array(&[1, 2, 3]);
        arr.write_row(1, &[2]);
        assert_eq!(arr.changed(), &[false, false, false]);
    }

    #[test]
    fn float_changes_respect_tolerances() {
        let mut arr =
            TrackedArray::from_values(vec![1.0, 2.0, 3.0], UnitShape::new(), closeness()).unwrap();
        arr.write_rows(&[0, 1, 2], &[1.000000001, 2.0, 3.1]);
        assert_eq!(arr.changed(), &[false, false, true]);
    }

    #[test]
    fn nan_to_nan_is_not_a_change() {
        let mut arr =
            TrackedArray::from_values(vec![f64::NAN, 1.0], UnitShape::new(), closeness()).unwrap();
        arr.write_row(0, &[f64::NAN]);
        assert_eq!(arr.changed(), &[false, false]);
    }

    #[test]
    fn reset_clears_changes() {
        let mut arr = int_array(&[1, 2]);
        arr.write_row(0, &[9]);
        assert!(arr.has_changes());
        arr.reset();
        assert_eq!(arr.changed(), &[false, false]);
    }

    #[test]
    fn diff_returns_previous_and_current() {
        let mut arr = int_array(&[1, 2, 3]);
        arr.write_row(2, &[9]);
        let (previous, current) = arr.diff();
        assert_eq!(previous, vec![3]);
        assert_eq!(current, vec![9]);
    }

    #[test]
    fn resize_fills_with_undefined_and_keeps_rows_unchanged() {
        let mut arr = int_array(&[1, 2]);
        arr.resize(4);
        assert_eq!(arr.values(), &[1, 2, UNDEFINED_INT, UNDEFINED_INT]);
        assert_eq!(arr.changed(), &[false, false, false, false]);
        arr.write_row(3, &[7]);
        assert_eq!(arr.changed(), &[false, false, false, true]);
    }

    #[test]
    fn unit_shape_rows_reduce_to_one_bit() {
        let mut arr = TrackedArray::from_values(
            vec![1.0, 2.0, 3.0, 4.0],
            UnitShape::from_slice(&[2]),
            closeness(),
        )
        .unwrap();
        assert_eq!(arr.len(), 2);
        arr.write_row(1, &[3.0, 9.0]);
        assert_eq!(arr.changed(), &[false, true]);
    }

    #[test]
    fn string_rows_compare_exactly() {
        let mut arr = TrackedArray::from_values(
            vec!["a".to_owned(), "b".to_owned()],
            UnitShape::new(),
            closeness(),
        )
        .unwrap();
        arr.write_row(0, &["a".to_owned()]);
        arr.write_row(1, &["c".to_owned()]);
        assert_eq!(arr.changed(), &[false, true]);
    }
}
