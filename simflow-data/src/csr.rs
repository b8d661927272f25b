use std::cmp::Ordering;
use std::ops::Add;

use num_traits::Zero;
use simflow_errors::{invalid_data, type_mismatch, SimResult};

use crate::data_type::{Closeness, Element, UnitShape};

/// A ragged column: flat data plus row offsets, with accumulated per-row
/// change bits.
///
/// Row `i` covers the logical elements `row_ptr[i]..row_ptr[i + 1]`; a
/// logical element is `stride` scalars where `stride` is the product of the
/// unit shape. Offsets are strictly non-decreasing, start at 0 and end at
/// the total element count.
///
/// Unlike the uniform column, change bits are accumulated eagerly across
/// successive [`update`](TrackedCsrArray::update) calls: an update compares
/// each replacement row against the row it replaces (rows of unequal length
/// always differ) and ORs the result into the mask.
#[derive(Debug, Clone)]
pub struct TrackedCsrArray<T> {
    data: Vec<T>,
    row_ptr: Vec<usize>,
    unit_shape: UnitShape,
    stride: usize,
    changed: Vec<bool>,
    closeness: Closeness,
}

impl<T: Element> TrackedCsrArray<T> {
    /// Build from flat data and row offsets.
    pub fn new(
        data: Vec<T>,
        row_ptr: Vec<usize>,
        unit_shape: impl Into<UnitShape>,
        closeness: Closeness,
    ) -> SimResult<Self> {
        let unit_shape = unit_shape.into();
        let stride: usize = unit_shape.iter().product();
        if row_ptr.first() != Some(&0) {
            return Err(invalid_data!("row offsets must start at 0"));
        }
        if row_ptr.windows(2).any(|w| w[1] < w[0]) {
            return Err(invalid_data!("row offsets must be non-decreasing"));
        }
        if row_ptr.last().copied().unwrap_or(0) * stride != data.len() {
            return Err(invalid_data!(
                "row offsets do not cover {} data elements",
                data.len()
            ));
        }
        let rows = row_ptr.len() - 1;
        Ok(Self {
            data,
            row_ptr,
            unit_shape,
            stride,
            changed: vec![false; rows],
            closeness,
        })
    }

    /// Allocate `len` rows, each holding a single undefined element.
    pub fn undefined(len: usize, unit_shape: impl Into<UnitShape>, closeness: Closeness) -> Self {
        let unit_shape = unit_shape.into();
        let stride: usize = unit_shape.iter().product();
        Self {
            data: vec![T::undefined(); len * stride],
            row_ptr: (0..=len).collect(),
            unit_shape,
            stride,
            changed: vec![false; len],
            closeness,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unit_shape(&self) -> &UnitShape {
        &self.unit_shape
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn closeness(&self) -> &Closeness {
        &self.closeness
    }

    /// The flat contents.
    pub fn values(&self) -> &[T] {
        &self.data
    }

    /// The row offsets, in logical elements.
    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    /// Row `i` as a flat slice.
    pub fn row(&self, row: usize) -> &[T] {
        &self.data[self.row_ptr[row] * self.stride..self.row_ptr[row + 1] * self.stride]
    }

    /// Logical length of row `i`.
    pub fn row_len(&self, row: usize) -> usize {
        self.row_ptr[row + 1] - self.row_ptr[row]
    }

    /// Accumulated per-row change bits.
    pub fn changed(&self) -> &[bool] {
        &self.changed
    }

    pub fn has_changes(&self) -> bool {
        self.changed.iter().any(|&c| c)
    }

    /// Clear the accumulated change bits.
    pub fn reset(&mut self) {
        self.changed = vec![false; self.len()];
    }

    /// Grow the column to `new_len` rows; every appended row is a single
    /// undefined element and starts out unchanged.
    pub fn resize(&mut self, new_len: usize) {
        while self.len() < new_len {
            self.data
                .extend(std::iter::repeat_with(T::undefined).take(self.stride));
            let last = *self.row_ptr.last().unwrap();
            self.row_ptr.push(last + 1);
            self.changed.push(false);
        }
    }

    /// A new array containing the selected rows in the given order. Change
    /// bits of the result start out cleared.
    pub fn slice(&self, rows: &[usize]) -> Self {
        let mut row_ptr = Vec::with_capacity(rows.len() + 1);
        row_ptr.push(0);
        let mut data = Vec::new();
        for &row in rows {
            data.extend_from_slice(self.row(row));
            row_ptr.push(row_ptr.last().unwrap() + self.row_len(row));
        }
        Self {
            data,
            row_ptr,
            unit_shape: self.unit_shape.clone(),
            stride: self.stride,
            changed: vec![false; rows.len()],
            closeness: self.closeness,
        }
    }

    /// Replace the rows named by `rows` with the rows of `updates`, ORing
    /// fresh change bits into the mask. A replacement row differing in
    /// length from its predecessor always counts as changed.
    ///
    /// The buffer is reused in place when every replacement row has its
    /// predecessor's length; otherwise the flat data and offsets are
    /// rebuilt.
    pub fn update(&mut self, updates: &TrackedCsrArray<T>, rows: &[usize]) -> SimResult<()> {
        if updates.len() != rows.len() {
            return Err(invalid_data!(
                "{} replacement rows for {} row indices",
                updates.len(),
                rows.len()
            ));
        }
        if updates.unit_shape != self.unit_shape {
            return Err(type_mismatch!(
                "unit shape {:?} does not match column unit shape {:?}",
                updates.unit_shape.as_slice(),
                self.unit_shape.as_slice()
            ));
        }
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.len()) {
            return Err(invalid_data!("row index {bad} out of bounds"));
        }

        let same_layout = rows
            .iter()
            .enumerate()
            .all(|(k, &row)| updates.row_len(k) == self.row_len(row));

        if same_layout {
            for (k, &row) in rows.iter().enumerate() {
                let new_row = updates.row(k);
                let start = self.row_ptr[row] * self.stride;
                let is_close = rows_close(&self.data[start..start + new_row.len()], new_row, &self.closeness);
                self.changed[row] |= !is_close;
                self.data[start..start + new_row.len()].clone_from_slice(new_row);
            }
            return Ok(());
        }

        // Map each target row to the last replacement addressing it.
        let mut replacement: Vec<Option<usize>> = vec![None; self.len()];
        for (k, &row) in rows.iter().enumerate() {
            replacement[row] = Some(k);
        }

        let mut new_data = Vec::new();
        let mut new_row_ptr = Vec::with_capacity(self.row_ptr.len());
        new_row_ptr.push(0usize);
        for row in 0..self.len() {
            match replacement[row] {
                Some(k) => {
                    let new_row = updates.row(k);
                    let was_close = rows_close(self.row(row), new_row, &self.closeness);
                    self.changed[row] |= !was_close;
                    new_data.extend_from_slice(new_row);
                    new_row_ptr.push(new_row_ptr.last().unwrap() + updates.row_len(k));
                }
                None => {
                    new_data.extend_from_slice(self.row(row));
                    new_row_ptr.push(new_row_ptr.last().unwrap() + self.row_len(row));
                }
            }
        }
        self.data = new_data;
        self.row_ptr = new_row_ptr;
        Ok(())
    }

    /// Per-row equality with one reference row under the closeness rule.
    pub fn rows_equal(&self, row: &[T]) -> Vec<bool> {
        (0..self.len())
            .map(|i| rows_close(self.row(i), row, &self.closeness))
            .collect()
    }

    /// Per-row "contains a value close to `value`".
    pub fn rows_contain(&self, value: &T) -> Vec<bool> {
        (0..self.len())
            .map(|i| self.row(i).iter().any(|v| v.close_to(value, &self.closeness)))
            .collect()
    }

    /// Per-row "contains any of `values`".
    pub fn rows_intersect(&self, values: &[T]) -> Vec<bool> {
        (0..self.len())
            .map(|i| {
                self.row(i)
                    .iter()
                    .any(|v| values.iter().any(|w| v.close_to(w, &self.closeness)))
            })
            .collect()
    }

    /// Promote to a dense matrix, returned as flat row-major data plus the
    /// common logical row length. Fails unless all rows have equal length.
    pub fn as_matrix(&self) -> SimResult<(Vec<T>, usize)> {
        if self.is_empty() {
            return Ok((Vec::new(), 0));
        }
        let row_len = self.row_len(0);
        if (1..self.len()).any(|i| self.row_len(i) != row_len) {
            return Err(invalid_data!(
                "can only convert to a matrix when all rows have an equal length"
            ));
        }
        Ok((self.data.clone(), row_len))
    }

    /// Replace the contents from a dense matrix with `row_len` logical
    /// elements per row, recomputing change bits against the prior rows.
    /// The row count must match.
    pub fn update_from_matrix(&mut self, values: &[T], row_len: usize) -> SimResult<()> {
        if row_len * self.len() * self.stride != values.len() {
            return Err(invalid_data!(
                "can only update from a matrix with an equal number of rows"
            ));
        }
        let in_place = (0..self.len()).all(|i| self.row_len(i) == row_len);
        if in_place {
            // Same layout; the offsets stay untouched and changes are
            // recomputed row by row.
            let width = row_len * self.stride;
            for row in 0..self.len() {
                let new_row = &values[row * width..(row + 1) * width];
                let was_close = rows_close(self.row(row), new_row, &self.closeness);
                self.changed[row] |= !was_close;
            }
            self.data = values.to_vec();
            Ok(())
        } else {
            let row_ptr = (0..=self.len()).map(|i| i * row_len).collect();
            let matrix = TrackedCsrArray::new(
                values.to_vec(),
                row_ptr,
                self.unit_shape.clone(),
                self.closeness,
            )?;
            let rows: Vec<usize> = (0..self.len()).collect();
            self.update(&matrix, &rows)
        }
    }
}

impl<T: Element + Copy + Zero + Add<Output = T>> TrackedCsrArray<T> {
    /// Row-wise sum over all scalars of each row; `empty` is substituted for
    /// rows with no elements.
    pub fn row_wise_sum(&self, empty: T) -> Vec<T> {
        (0..self.len())
            .map(|i| {
                let row = self.row(i);
                if row.is_empty() {
                    empty
                } else {
                    row.iter().copied().fold(T::zero(), Add::add)
                }
            })
            .collect()
    }
}

impl<T: Element + PartialOrd> TrackedCsrArray<T> {
    /// Row-wise minimum; `empty` is substituted for rows with no elements.
    pub fn row_wise_min(&self, empty: T) -> Vec<T> {
        self.reduce_rows(empty, Ordering::Less)
    }

    /// Row-wise maximum; `empty` is substituted for rows with no elements.
    pub fn row_wise_max(&self, empty: T) -> Vec<T> {
        self.reduce_rows(empty, Ordering::Greater)
    }

    fn reduce_rows(&self, empty: T, keep: Ordering) -> Vec<T> {
        (0..self.len())
            .map(|i| {
                let mut row = self.row(i).iter();
                match row.next() {
                    None => empty.clone(),
                    Some(first) => row
                        .fold(first, |acc, v| {
                            if v.partial_cmp(acc) == Some(keep) {
                                v
                            } else {
                                acc
                            }
                        })
                        .clone(),
                }
            })
            .collect()
    }
}

/// Closeness-aware row equality: equal lengths and element-wise closeness.
pub(crate) fn rows_close<T: Element>(a: &[T], b: &[T], closeness: &Closeness) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.close_to(y, closeness))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::data_type::UNDEFINED_INT;

    fn closeness() -> Closeness {
        Closeness::default().with_equal_nan()
    }

    fn csr(rows: &[&[i32]]) -> TrackedCsrArray<i32> {
        let mut data = Vec::new();
        let mut row_ptr = vec![0];
        for row in rows {
            data.extend_from_slice(row);
            row_ptr.push(data.len());
        }
        TrackedCsrArray::new(data, row_ptr, UnitShape::new(), closeness()).unwrap()
    }

    #[test]
    fn row_access() {
        let arr = csr(&[&[1, 2], &[3, 4], &[5]]);
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.row(0), &[1, 2]);
        assert_eq!(arr.row(2), &[5]);
        assert_eq!(arr.row_len(1), 2);
    }

    #[test]
    fn rejects_bad_offsets() {
        assert!(TrackedCsrArray::new(vec![1], vec![0, 2], UnitShape::new(), closeness()).is_err());
        assert!(TrackedCsrArray::new(vec![1], vec![1, 1], UnitShape::new(), closeness()).is_err());
        assert!(
            TrackedCsrArray::<i32>::new(vec![1, 2], vec![0, 2, 1], UnitShape::new(), closeness())
                .is_err()
        );
    }

    #[test]
    fn update_with_row_length_change() {
        let mut arr = csr(&[&[1, 2], &[3, 4], &[5]]);
        let upd = csr(&[&[7, 8, 9]]);
        arr.update(&upd, &[1]).unwrap();
        assert_eq!(arr.values(), &[1, 2, 7, 8, 9, 5]);
        assert_eq!(arr.row_ptr(), &[0, 2, 5, 6]);
        assert_eq!(arr.changed(), &[false, true, false]);
    }

    #[test]
    fn update_same_layout_still_detects_changes() {
        let mut arr = csr(&[&[1, 2], &[3, 4]]);
        let upd = csr(&[&[1, 9]]);
        arr.update(&upd, &[0]).unwrap();
        assert_eq!(arr.values(), &[1, 9, 3, 4]);
        assert_eq!(arr.changed(), &[true, false]);
    }

    #[test]
    fn update_with_identical_rows_is_not_a_change() {
        let mut arr = csr(&[&[1, 2], &[3]]);
        let upd = csr(&[&[1, 2]]);
        arr.update(&upd, &[0]).unwrap();
        assert_eq!(arr.changed(), &[false, false]);
    }

    #[test]
    fn changes_accumulate_across_updates() {
        let mut arr = csr(&[&[1], &[2], &[3]]);
        arr.update(&csr(&[&[9]]), &[0]).unwrap();
        arr.update(&csr(&[&[8]]), &[2]).unwrap();
        assert_eq!(arr.changed(), &[true, false, true]);
        arr.reset();
        assert_eq!(arr.changed(), &[false, false, false]);
    }

    #[test]
    fn slice_then_reassemble_round_trip() {
        let arr = csr(&[&[1, 2], &[], &[5, 6, 7]]);
        let sliced = arr.slice(&[0, 1, 2]);
        assert_eq!(sliced.values(), arr.values());
        assert_eq!(sliced.row_ptr(), arr.row_ptr());
    }

    #[test]
    fn slice_reorders_rows() {
        let arr = csr(&[&[1, 2], &[3], &[4, 5]]);
        let sliced = arr.slice(&[2, 0]);
        assert_eq!(sliced.values(), &[4, 5, 1, 2]);
        assert_eq!(sliced.row_ptr(), &[0, 2, 4]);
    }

    #[test]
    fn undefined_rows_have_one_element() {
        let arr: TrackedCsrArray<i32> = TrackedCsrArray::undefined(3, UnitShape::new(), closeness());
        assert_eq!(arr.row(1), &[UNDEFINED_INT]);
        assert_eq!(arr.row_ptr(), &[0, 1, 2, 3]);
    }

    #[test]
    fn row_predicates() {
        let arr = csr(&[&[1, 2], &[3], &[1, 2]]);
        assert_eq!(arr.rows_equal(&[1, 2]), vec![true, false, true]);
        assert_eq!(arr.rows_contain(&3), vec![false, true, false]);
        assert_eq!(arr.rows_intersect(&[2, 3]), vec![true, true, true]);
    }

    #[test]
    fn reductions() {
        let arr = csr(&[&[1, 2], &[], &[5, 3]]);
        assert_eq!(arr.row_wise_sum(0), vec![3, 0, 8]);
        assert_eq!(arr.row_wise_min(-1), vec![1, -1, 3]);
        assert_eq!(arr.row_wise_max(-1), vec![2, -1, 5]);
    }

    #[test]
    fn matrix_round_trip() {
        let arr = csr(&[&[1, 2], &[3, 4]]);
        let (values, row_len) = arr.as_matrix().unwrap();
        assert_eq!(values, vec![1, 2, 3, 4]);
        assert_eq!(row_len, 2);

        let ragged = csr(&[&[1], &[2, 3]]);
        assert!(ragged.as_matrix().is_err());
    }

    #[test]
    fn update_from_matrix_in_place_detects_changes() {
        let mut arr = csr(&[&[1, 2], &[3, 4]]);
        arr.update_from_matrix(&[1, 2, 3, 9], 2).unwrap();
        assert_eq!(arr.values(), &[1, 2, 3, 9]);
        assert_eq!(arr.changed(), &[false, true]);
    }

    #[test]
    fn update_from_matrix_with_layout_change() {
        let mut arr = csr(&[&[1], &[2, 3]]);
        arr.update_from_matrix(&[7, 8, 2, 3], 2).unwrap();
        assert_eq!(arr.values(), &[7, 8, 2, 3]);
        assert_eq!(arr.row_ptr(), &[0, 2, 4]);
        assert_eq!(arr.changed(), &[true, false]);
    }
}
