use simflow_errors::{invalid_data, type_mismatch, SimResult};

use crate::array::TrackedArray;
use crate::csr::TrackedCsrArray;
use crate::data_type::{clamp_str_len, Closeness, DataType, Element, ElementType, Scalar};
use crate::payload::{AttributeData, ValueArray};

/// A uniform column in one of the four concrete element storages.
#[derive(Debug, Clone)]
pub enum UniformColumn {
    Bool(TrackedArray<i8>),
    Int(TrackedArray<i32>),
    Float(TrackedArray<f64>),
    Str(TrackedArray<String>),
}

/// A ragged column in one of the four concrete element storages.
#[derive(Debug, Clone)]
pub enum CsrColumn {
    Bool(TrackedCsrArray<i8>),
    Int(TrackedCsrArray<i32>),
    Float(TrackedCsrArray<f64>),
    Str(TrackedCsrArray<String>),
}

macro_rules! with_uniform {
    ($col:expr, |$arr:ident| $body:expr) => {
        match $col {
            UniformColumn::Bool($arr) => $body,
            UniformColumn::Int($arr) => $body,
            UniformColumn::Float($arr) => $body,
            UniformColumn::Str($arr) => $body,
        }
    };
}

macro_rules! with_uniform_wrapped {
    ($col:expr, |$arr:ident, $wrap:ident| $body:expr) => {
        match $col {
            UniformColumn::Bool($arr) => {
                let $wrap = ValueArray::Bool;
                $body
            }
            UniformColumn::Int($arr) => {
                let $wrap = ValueArray::Int;
                $body
            }
            UniformColumn::Float($arr) => {
                let $wrap = ValueArray::Float;
                $body
            }
            UniformColumn::Str($arr) => {
                let $wrap = ValueArray::Str;
                $body
            }
        }
    };
}

macro_rules! with_csr {
    ($col:expr, |$arr:ident| $body:expr) => {
        match $col {
            CsrColumn::Bool($arr) => $body,
            CsrColumn::Int($arr) => $body,
            CsrColumn::Float($arr) => $body,
            CsrColumn::Str($arr) => $body,
        }
    };
}

macro_rules! with_csr_wrapped {
    ($col:expr, |$arr:ident, $wrap:ident| $body:expr) => {
        match $col {
            CsrColumn::Bool($arr) => {
                let $wrap = ValueArray::Bool;
                $body
            }
            CsrColumn::Int($arr) => {
                let $wrap = ValueArray::Int;
                $body
            }
            CsrColumn::Float($arr) => {
                let $wrap = ValueArray::Float;
                $body
            }
            CsrColumn::Str($arr) => {
                let $wrap = ValueArray::Str;
                $body
            }
        }
    };
}

impl UniformColumn {
    /// Allocate a column of `len` rows filled with undefined.
    pub fn undefined(data_type: &DataType, len: usize, closeness: Closeness) -> Self {
        let shape = data_type.unit_shape.clone();
        match data_type.element_type {
            ElementType::Bool => UniformColumn::Bool(TrackedArray::undefined(len, shape, closeness)),
            ElementType::Int => UniformColumn::Int(TrackedArray::undefined(len, shape, closeness)),
            ElementType::Float => {
                UniformColumn::Float(TrackedArray::undefined(len, shape, closeness))
            }
            ElementType::Str => UniformColumn::Str(TrackedArray::undefined(len, shape, closeness)),
        }
    }

    /// Build a column from payload data, casting within the numeric family
    /// where needed.
    pub fn from_attribute_data(
        data: &AttributeData,
        data_type: &DataType,
        closeness: Closeness,
    ) -> SimResult<Self> {
        if data.is_csr() {
            return Err(type_mismatch!(
                "CSR data delivered to a uniform attribute"
            ));
        }
        let values = data.data.cast_to(data_type.element_type)?;
        let shape = data_type.unit_shape.clone();
        Ok(match values {
            ValueArray::Bool(v) => UniformColumn::Bool(TrackedArray::from_values(v, shape, closeness)?),
            ValueArray::Int(v) => UniformColumn::Int(TrackedArray::from_values(v, shape, closeness)?),
            ValueArray::Float(v) => {
                UniformColumn::Float(TrackedArray::from_values(v, shape, closeness)?)
            }
            ValueArray::Str(v) => UniformColumn::Str(TrackedArray::from_values(v, shape, closeness)?),
        })
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            UniformColumn::Bool(_) => ElementType::Bool,
            UniformColumn::Int(_) => ElementType::Int,
            UniformColumn::Float(_) => ElementType::Float,
            UniformColumn::Str(_) => ElementType::Str,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        with_uniform!(self, |arr| arr.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-row changed mask (lazily computed, cached).
    pub fn changed(&mut self) -> &[bool] {
        with_uniform!(self, |arr| arr.changed())
    }

    pub fn has_changes(&mut self) -> bool {
        with_uniform!(self, |arr| arr.has_changes())
    }

    pub fn reset(&mut self) {
        with_uniform!(self, |arr| arr.reset())
    }

    pub fn resize(&mut self, new_len: usize) {
        with_uniform!(self, |arr| arr.resize(new_len))
    }

    /// Per-row "any element is the undefined sentinel".
    pub fn undefined_rows(&self) -> Vec<bool> {
        with_uniform!(self, |arr| (0..arr.len())
            .map(|i| arr.row(i).iter().any(Element::is_undefined))
            .collect())
    }

    /// Per-row comparison against a special value; all-false when the value
    /// does not convert to this column's element type.
    pub fn special_rows(&self, special: &Scalar) -> Vec<bool> {
        with_uniform!(self, |arr| {
            match Element::from_scalar(special) {
                None => vec![false; arr.len()],
                Some(value) => (0..arr.len())
                    .map(|i| arr.row(i).iter().all(|v| v.close_to(&value, arr.closeness())))
                    .collect(),
            }
        })
    }

    /// Write payload values at the given rows. Unless `process_undefined`,
    /// incoming undefined elements are elided: the current value at that
    /// position is preserved.
    pub fn write_rows(
        &mut self,
        values: &ValueArray,
        rows: &[usize],
        process_undefined: bool,
    ) -> SimResult<()> {
        let values = values.cast_to(self.element_type())?;
        match (self, values) {
            (UniformColumn::Bool(arr), ValueArray::Bool(v)) => {
                write_rows_impl(arr, v, rows, process_undefined)
            }
            (UniformColumn::Int(arr), ValueArray::Int(v)) => {
                write_rows_impl(arr, v, rows, process_undefined)
            }
            (UniformColumn::Float(arr), ValueArray::Float(v)) => {
                write_rows_impl(arr, v, rows, process_undefined)
            }
            (UniformColumn::Str(arr), ValueArray::Str(v)) => {
                let v = v
                    .into_iter()
                    .map(|s| {
                        let clamped = clamp_str_len(&s);
                        if clamped.len() == s.len() {
                            s
                        } else {
                            clamped.to_owned()
                        }
                    })
                    .collect();
                write_rows_impl(arr, v, rows, process_undefined)
            }
            _ => Err(type_mismatch!("payload does not match column storage")),
        }
    }

    /// Produce the payload form of this column's changes. Without a mask,
    /// only changed rows are returned; with a mask, every masked row is
    /// returned and unchanged rows carry the undefined sentinel.
    pub fn generate_update(&mut self, mask: Option<&[bool]>) -> AttributeData {
        with_uniform_wrapped!(self, |arr, wrap| {
            let stride = arr.stride();
            let unit_shape = arr.unit_shape().clone();
            let changed = arr.changed().to_vec();
            let mut out = Vec::new();
            match mask {
                None => {
                    for (row, &is_changed) in changed.iter().enumerate() {
                        if is_changed {
                            out.extend_from_slice(arr.row(row));
                        }
                    }
                }
                Some(mask) => {
                    for (row, &in_mask) in mask.iter().enumerate() {
                        if !in_mask {
                            continue;
                        }
                        if changed.get(row).copied().unwrap_or(false) {
                            out.extend_from_slice(arr.row(row));
                        } else {
                            for _ in 0..stride {
                                out.push(Element::undefined());
                            }
                        }
                    }
                }
            }
            AttributeData {
                data: wrap(out),
                unit_shape,
                row_ptr: None,
            }
        })
    }

    /// The whole column as payload data.
    pub fn to_attribute_data(&self) -> AttributeData {
        with_uniform_wrapped!(self, |arr, wrap| AttributeData {
            data: wrap(arr.values().to_vec()),
            unit_shape: arr.unit_shape().clone(),
            row_ptr: None,
        })
    }

    /// A copy of this column with another element type. The snapshot, if
    /// tracking has started, converts along with the data so change
    /// detection carries over.
    pub fn astype(&self, element_type: ElementType) -> SimResult<UniformColumn> {
        if element_type == self.element_type() {
            return Ok(self.clone());
        }
        let (values, snapshot, unit_shape, closeness) = with_uniform_wrapped!(self, |arr, wrap| (
            wrap(arr.values().to_vec()),
            arr.snapshot().map(|s| wrap(s.to_vec())),
            arr.unit_shape().clone(),
            *arr.closeness(),
        ));
        let data_type = DataType::new(element_type, &unit_shape, false);
        let values = values.cast_to(element_type)?;
        let snapshot = snapshot.map(|s| s.cast_to(element_type)).transpose()?;
        let mut column = UniformColumn::from_attribute_data(
            &AttributeData {
                data: values,
                unit_shape,
                row_ptr: None,
            },
            &data_type,
            closeness,
        )?;
        if let Some(snapshot) = snapshot {
            match (&mut column, snapshot) {
                (UniformColumn::Bool(arr), ValueArray::Bool(v)) => arr.restore_snapshot(v),
                (UniformColumn::Int(arr), ValueArray::Int(v)) => arr.restore_snapshot(v),
                (UniformColumn::Float(arr), ValueArray::Float(v)) => arr.restore_snapshot(v),
                (UniformColumn::Str(arr), ValueArray::Str(v)) => arr.restore_snapshot(v),
                _ => unreachable!("snapshot was cast to the column's element type"),
            }
        }
        Ok(column)
    }
}

impl CsrColumn {
    /// Allocate `len` rows, each a single undefined element.
    pub fn undefined(data_type: &DataType, len: usize, closeness: Closeness) -> Self {
        let shape = data_type.unit_shape.clone();
        match data_type.element_type {
            ElementType::Bool => CsrColumn::Bool(TrackedCsrArray::undefined(len, shape, closeness)),
            ElementType::Int => CsrColumn::Int(TrackedCsrArray::undefined(len, shape, closeness)),
            ElementType::Float => {
                CsrColumn::Float(TrackedCsrArray::undefined(len, shape, closeness))
            }
            ElementType::Str => CsrColumn::Str(TrackedCsrArray::undefined(len, shape, closeness)),
        }
    }

    /// Build a column from payload data carrying row offsets.
    pub fn from_attribute_data(
        data: &AttributeData,
        data_type: &DataType,
        closeness: Closeness,
    ) -> SimResult<Self> {
        let Some(row_ptr) = &data.row_ptr else {
            return Err(type_mismatch!(
                "uniform data delivered to a CSR attribute"
            ));
        };
        let values = data.data.cast_to(data_type.element_type)?;
        let shape = data_type.unit_shape.clone();
        let row_ptr = row_ptr.clone();
        Ok(match values {
            ValueArray::Bool(v) => {
                CsrColumn::Bool(TrackedCsrArray::new(v, row_ptr, shape, closeness)?)
            }
            ValueArray::Int(v) => CsrColumn::Int(TrackedCsrArray::new(v, row_ptr, shape, closeness)?),
            ValueArray::Float(v) => {
                CsrColumn::Float(TrackedCsrArray::new(v, row_ptr, shape, closeness)?)
            }
            ValueArray::Str(v) => CsrColumn::Str(TrackedCsrArray::new(v, row_ptr, shape, closeness)?),
        })
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            CsrColumn::Bool(_) => ElementType::Bool,
            CsrColumn::Int(_) => ElementType::Int,
            CsrColumn::Float(_) => ElementType::Float,
            CsrColumn::Str(_) => ElementType::Str,
        }
    }

    pub fn len(&self) -> usize {
        with_csr!(self, |arr| arr.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accumulated per-row change bits.
    pub fn changed(&self) -> &[bool] {
        with_csr!(self, |arr| arr.changed())
    }

    pub fn has_changes(&self) -> bool {
        with_csr!(self, |arr| arr.has_changes())
    }

    pub fn reset(&mut self) {
        with_csr!(self, |arr| arr.reset())
    }

    /// Grow to `new_len` rows; each appended row is a single undefined
    /// element.
    pub fn resize(&mut self, new_len: usize) {
        with_csr!(self, |arr| arr.resize(new_len))
    }

    /// Per-row "the row is a single undefined element".
    pub fn undefined_rows(&self) -> Vec<bool> {
        with_csr!(self, |arr| (0..arr.len())
            .map(|i| arr.row_len(i) == 1 && arr.row(i).iter().all(Element::is_undefined))
            .collect())
    }

    /// Per-row comparison against a special value. A special row is a
    /// single element close to the value, mirroring the undefined-row
    /// convention; all-false when the value does not convert to this
    /// column's element type.
    pub fn special_rows(&self, special: &Scalar) -> Vec<bool> {
        with_csr!(self, |arr| {
            match Element::from_scalar(special) {
                None => vec![false; arr.len()],
                Some(value) => arr.rows_equal(std::slice::from_ref(&value)),
            }
        })
    }

    /// Per-row "contains a value close to `value`"; all-false when the
    /// value does not convert to this column's element type.
    pub fn rows_contain(&self, value: &Scalar) -> Vec<bool> {
        with_csr!(self, |arr| {
            match Element::from_scalar(value) {
                None => vec![false; arr.len()],
                Some(value) => arr.rows_contain(&value),
            }
        })
    }

    /// Per-row "contains any of `values`", skipping values that do not
    /// convert to this column's element type.
    pub fn rows_intersect(&self, values: &[Scalar]) -> Vec<bool> {
        with_csr!(self, |arr| {
            let values: Vec<_> = values.iter().filter_map(Element::from_scalar).collect();
            arr.rows_intersect(&values)
        })
    }

    /// Row-wise sum, substituting `empty` for rows with no elements.
    /// Restricted to numeric element types.
    pub fn row_wise_sum(&self, empty: &Scalar) -> SimResult<ValueArray> {
        match self {
            CsrColumn::Bool(arr) => Ok(ValueArray::Bool(arr.row_wise_sum(scalar_as(empty)?))),
            CsrColumn::Int(arr) => Ok(ValueArray::Int(arr.row_wise_sum(scalar_as(empty)?))),
            CsrColumn::Float(arr) => Ok(ValueArray::Float(arr.row_wise_sum(scalar_as(empty)?))),
            CsrColumn::Str(_) => Err(type_mismatch!(
                "row-wise sum is restricted to numeric columns"
            )),
        }
    }

    /// Row-wise minimum, substituting `empty` for rows with no elements.
    /// String columns are not ordered here; every row reports `empty`.
    pub fn row_wise_min(&self, empty: &Scalar) -> SimResult<ValueArray> {
        match self {
            CsrColumn::Bool(arr) => Ok(ValueArray::Bool(arr.row_wise_min(scalar_as(empty)?))),
            CsrColumn::Int(arr) => Ok(ValueArray::Int(arr.row_wise_min(scalar_as(empty)?))),
            CsrColumn::Float(arr) => Ok(ValueArray::Float(arr.row_wise_min(scalar_as(empty)?))),
            CsrColumn::Str(arr) => Ok(ValueArray::Str(vec![scalar_as(empty)?; arr.len()])),
        }
    }

    /// Row-wise maximum; see [`row_wise_min`](Self::row_wise_min).
    pub fn row_wise_max(&self, empty: &Scalar) -> SimResult<ValueArray> {
        match self {
            CsrColumn::Bool(arr) => Ok(ValueArray::Bool(arr.row_wise_max(scalar_as(empty)?))),
            CsrColumn::Int(arr) => Ok(ValueArray::Int(arr.row_wise_max(scalar_as(empty)?))),
            CsrColumn::Float(arr) => Ok(ValueArray::Float(arr.row_wise_max(scalar_as(empty)?))),
            CsrColumn::Str(arr) => Ok(ValueArray::Str(vec![scalar_as(empty)?; arr.len()])),
        }
    }

    /// Promote to a dense matrix: flat row-major values plus the common
    /// logical row length. Fails unless all rows have equal length.
    pub fn as_matrix(&self) -> SimResult<(ValueArray, usize)> {
        with_csr_wrapped!(self, |arr, wrap| {
            let (values, row_len) = arr.as_matrix()?;
            Ok((wrap(values), row_len))
        })
    }

    /// Replace the contents from a dense matrix with `row_len` logical
    /// elements per row, recomputing change bits against the prior rows.
    pub fn update_from_matrix(&mut self, values: &ValueArray, row_len: usize) -> SimResult<()> {
        let values = values.cast_to(self.element_type())?;
        match (self, values) {
            (CsrColumn::Bool(arr), ValueArray::Bool(v)) => arr.update_from_matrix(&v, row_len),
            (CsrColumn::Int(arr), ValueArray::Int(v)) => arr.update_from_matrix(&v, row_len),
            (CsrColumn::Float(arr), ValueArray::Float(v)) => arr.update_from_matrix(&v, row_len),
            (CsrColumn::Str(arr), ValueArray::Str(v)) => arr.update_from_matrix(&v, row_len),
            _ => Err(type_mismatch!("payload does not match column storage")),
        }
    }

    /// Replace the given rows with payload rows. Unless `process_undefined`,
    /// rows consisting of a single undefined element are elided from the
    /// update together with their target row index.
    pub fn update_rows(
        &mut self,
        data: &AttributeData,
        rows: &[usize],
        process_undefined: bool,
    ) -> SimResult<()> {
        let element_type = self.element_type();
        let incoming = CsrColumn::from_attribute_data(
            data,
            &DataType::new(element_type, &self.unit_shape(), true),
            self.closeness(),
        )?;
        match (self, incoming) {
            (CsrColumn::Bool(arr), CsrColumn::Bool(upd)) => {
                update_rows_impl(arr, upd, rows, process_undefined)
            }
            (CsrColumn::Int(arr), CsrColumn::Int(upd)) => {
                update_rows_impl(arr, upd, rows, process_undefined)
            }
            (CsrColumn::Float(arr), CsrColumn::Float(upd)) => {
                update_rows_impl(arr, upd, rows, process_undefined)
            }
            (CsrColumn::Str(arr), CsrColumn::Str(upd)) => {
                update_rows_impl(arr, upd, rows, process_undefined)
            }
            _ => Err(type_mismatch!("payload does not match column storage")),
        }
    }

    /// Produce the payload form of this column's changes; see
    /// [`UniformColumn::generate_update`]. Unchanged masked rows are a
    /// single undefined element.
    pub fn generate_update(&self, mask: Option<&[bool]>) -> AttributeData {
        with_csr_wrapped!(self, |arr, wrap| {
            let changed = arr.changed();
            let mut data = Vec::new();
            let mut row_ptr = vec![0usize];
            match mask {
                None => {
                    for (row, &is_changed) in changed.iter().enumerate() {
                        if is_changed {
                            data.extend_from_slice(arr.row(row));
                            row_ptr.push(row_ptr.last().unwrap() + arr.row_len(row));
                        }
                    }
                }
                Some(mask) => {
                    for (row, &in_mask) in mask.iter().enumerate() {
                        if !in_mask {
                            continue;
                        }
                        if changed.get(row).copied().unwrap_or(false) {
                            data.extend_from_slice(arr.row(row));
                            row_ptr.push(row_ptr.last().unwrap() + arr.row_len(row));
                        } else {
                            for _ in 0..arr.stride() {
                                data.push(Element::undefined());
                            }
                            row_ptr.push(row_ptr.last().unwrap() + 1);
                        }
                    }
                }
            }
            AttributeData {
                data: wrap(data),
                unit_shape: arr.unit_shape().clone(),
                row_ptr: Some(row_ptr),
            }
        })
    }

    /// The whole column as payload data.
    pub fn to_attribute_data(&self) -> AttributeData {
        with_csr_wrapped!(self, |arr, wrap| AttributeData {
            data: wrap(arr.values().to_vec()),
            unit_shape: arr.unit_shape().clone(),
            row_ptr: Some(arr.row_ptr().to_vec()),
        })
    }

    fn unit_shape(&self) -> crate::data_type::UnitShape {
        with_csr!(self, |arr| arr.unit_shape().clone())
    }

    fn closeness(&self) -> Closeness {
        with_csr!(self, |arr| *arr.closeness())
    }
}

fn scalar_as<T: Element>(scalar: &Scalar) -> SimResult<T> {
    Element::from_scalar(scalar).ok_or_else(|| {
        type_mismatch!(
            "value {scalar:?} does not fit a {} column",
            T::ELEMENT_TYPE
        )
    })
}

fn write_rows_impl<T: Element>(
    arr: &mut TrackedArray<T>,
    values: Vec<T>,
    rows: &[usize],
    process_undefined: bool,
) -> SimResult<()> {
    if values.len() != rows.len() * arr.stride() {
        return Err(invalid_data!(
            "{} values do not cover {} rows of {} elements",
            values.len(),
            rows.len(),
            arr.stride()
        ));
    }
    if let Some(&bad) = rows.iter().find(|&&r| r >= arr.len()) {
        return Err(invalid_data!("row index {bad} out of bounds"));
    }
    if process_undefined {
        arr.write_rows(rows, &values);
        return Ok(());
    }
    let stride = arr.stride();
    let mut merged = values;
    for (k, &row) in rows.iter().enumerate() {
        let current = arr.row(row);
        for (j, value) in merged[k * stride..(k + 1) * stride].iter_mut().enumerate() {
            if value.is_undefined() {
                *value = current[j].clone();
            }
        }
    }
    arr.write_rows(rows, &merged);
    Ok(())
}

fn update_rows_impl<T: Element>(
    arr: &mut TrackedCsrArray<T>,
    updates: TrackedCsrArray<T>,
    rows: &[usize],
    process_undefined: bool,
) -> SimResult<()> {
    if process_undefined {
        return arr.update(&updates, rows);
    }
    let keep: Vec<usize> = (0..updates.len())
        .filter(|&k| {
            !(updates.row_len(k) == 1 && updates.row(k).iter().all(Element::is_undefined))
        })
        .collect();
    if keep.is_empty() {
        return Ok(());
    }
    if keep.len() == updates.len() {
        return arr.update(&updates, rows);
    }
    let stripped = updates.slice(&keep);
    let kept_rows: Vec<usize> = keep.iter().map(|&k| rows[k]).collect();
    arr.update(&stripped, &kept_rows)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::data_type::{UNDEFINED_INT, UNDEFINED_STR};

    fn closeness() -> Closeness {
        Closeness::default().with_equal_nan()
    }

    fn int_column(values: Vec<i32>) -> UniformColumn {
        UniformColumn::from_attribute_data(
            &AttributeData::uniform(values),
            &DataType::of(ElementType::Int),
            closeness(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_csr_data_on_uniform_column() {
        let data = AttributeData::csr(vec![1, 2], vec![0, 2]);
        assert!(UniformColumn::from_attribute_data(
            &data,
            &DataType::of(ElementType::Int),
            closeness()
        )
        .is_err());
    }

    #[test]
    fn write_rows_elides_undefined() {
        let mut col = int_column(vec![1, 2, 3]);
        col.reset();
        col.write_rows(&ValueArray::Int(vec![9, UNDEFINED_INT]), &[0, 1], false)
            .unwrap();
        assert_eq!(col.to_attribute_data().data, ValueArray::Int(vec![9, 2, 3]));
        assert_eq!(col.changed(), &[true, false, false]);
    }

    #[test]
    fn write_rows_process_undefined_writes_sentinel() {
        let mut col = int_column(vec![1, 2, 3]);
        col.reset();
        col.write_rows(&ValueArray::Int(vec![UNDEFINED_INT]), &[1], true)
            .unwrap();
        assert_eq!(
            col.to_attribute_data().data,
            ValueArray::Int(vec![1, UNDEFINED_INT, 3])
        );
    }

    #[test]
    fn generate_update_changed_only() {
        let mut col = int_column(vec![1, 2, 3]);
        col.reset();
        col.write_rows(&ValueArray::Int(vec![9]), &[2], false).unwrap();
        let update = col.generate_update(None);
        assert_eq!(update.data, ValueArray::Int(vec![9]));
    }

    #[test]
    fn generate_update_with_mask_pads_undefined() {
        let mut col = int_column(vec![1, 2, 3]);
        col.reset();
        col.write_rows(&ValueArray::Int(vec![9]), &[2], false).unwrap();
        let update = col.generate_update(Some(&[true, false, true]));
        assert_eq!(update.data, ValueArray::Int(vec![UNDEFINED_INT, 9]));
    }

    #[test]
    fn string_writes_clamp_to_cap() {
        let mut col = UniformColumn::from_attribute_data(
            &AttributeData::uniform(vec!["a".to_owned()]),
            &DataType::of(ElementType::Str),
            closeness(),
        )
        .unwrap();
        let long = "x".repeat(300);
        col.write_rows(&ValueArray::Str(vec![long]), &[0], false).unwrap();
        match col.to_attribute_data().data {
            ValueArray::Str(v) => assert_eq!(v[0].len(), 256),
            _ => panic!("expected string data"),
        }
    }

    fn int_csr(rows: &[&[i32]]) -> CsrColumn {
        let mut data = Vec::new();
        let mut row_ptr = vec![0usize];
        for row in rows {
            data.extend_from_slice(row);
            row_ptr.push(data.len());
        }
        CsrColumn::from_attribute_data(
            &AttributeData::csr(data, row_ptr),
            &DataType::csr_of(ElementType::Int),
            closeness(),
        )
        .unwrap()
    }

    #[test]
    fn csr_update_elides_undefined_rows() {
        let mut col = int_csr(&[&[1, 2], &[3], &[4]]);
        let update = AttributeData::csr(vec![UNDEFINED_INT, 7, 8], vec![0, 1, 3]);
        col.update_rows(&update, &[0, 2], false).unwrap();
        let dumped = col.to_attribute_data();
        assert_eq!(dumped.data, ValueArray::Int(vec![1, 2, 3, 7, 8]));
        assert_eq!(dumped.row_ptr, Some(vec![0, 2, 3, 5]));
        assert_eq!(col.changed(), &[false, false, true]);
    }

    #[test]
    fn csr_generate_update_with_mask() {
        let mut col = int_csr(&[&[1], &[2, 3], &[4]]);
        let update = AttributeData::csr(vec![8, 9], vec![0, 2]);
        col.update_rows(&update, &[1], false).unwrap();
        let generated = col.generate_update(Some(&[true, true, false]));
        assert_eq!(generated.data, ValueArray::Int(vec![UNDEFINED_INT, 8, 9]));
        assert_eq!(generated.row_ptr, Some(vec![0, 1, 3]));
    }

    #[test]
    fn csr_special_rows_are_single_special_elements() {
        let col = int_csr(&[&[-1], &[-1, -1], &[2]]);
        assert_eq!(col.special_rows(&Scalar::Int(-1)), vec![true, false, false]);
        // A value of the wrong type matches nothing.
        assert_eq!(
            col.special_rows(&Scalar::Str("x".into())),
            vec![false, false, false]
        );
    }

    #[test]
    fn csr_row_queries() {
        let col = int_csr(&[&[1, 2], &[3], &[]]);
        assert_eq!(
            col.rows_contain(&Scalar::Int(2)),
            vec![true, false, false]
        );
        assert_eq!(
            col.rows_intersect(&[Scalar::Int(2), Scalar::Int(3)]),
            vec![true, true, false]
        );
    }

    #[test]
    fn csr_reductions_substitute_empty_rows() {
        let col = int_csr(&[&[1, 2], &[], &[5]]);
        assert_eq!(
            col.row_wise_sum(&Scalar::Int(0)).unwrap(),
            ValueArray::Int(vec![3, 0, 5])
        );
        assert_eq!(
            col.row_wise_min(&Scalar::Int(-1)).unwrap(),
            ValueArray::Int(vec![1, -1, 5])
        );
        assert_eq!(
            col.row_wise_max(&Scalar::Int(-1)).unwrap(),
            ValueArray::Int(vec![2, -1, 5])
        );
    }

    #[test]
    fn csr_sum_rejects_string_columns() {
        let col = CsrColumn::from_attribute_data(
            &AttributeData::csr(ValueArray::Str(vec!["a".into(), "b".into()]), vec![0, 1, 2]),
            &DataType::csr_of(ElementType::Str),
            closeness(),
        )
        .unwrap();
        assert!(col.row_wise_sum(&Scalar::Str(String::new())).is_err());
        // min/max report the caller-supplied empty value for every row.
        assert_eq!(
            col.row_wise_min(&Scalar::Str(String::new())).unwrap(),
            ValueArray::Str(vec![String::new(), String::new()])
        );
    }

    #[test]
    fn csr_matrix_round_trip_tracks_changes() {
        let mut col = int_csr(&[&[1, 2], &[3, 4]]);
        let (values, row_len) = col.as_matrix().unwrap();
        assert_eq!(values, ValueArray::Int(vec![1, 2, 3, 4]));
        assert_eq!(row_len, 2);

        col.update_from_matrix(&ValueArray::Int(vec![1, 2, 3, 9]), 2)
            .unwrap();
        assert_eq!(col.changed(), &[false, true]);
        assert!(int_csr(&[&[1], &[2, 3]]).as_matrix().is_err());
    }

    #[test]
    fn csr_resize_appends_undefined_rows() {
        let mut col = int_csr(&[&[1, 2]]);
        col.resize(3);
        assert_eq!(col.len(), 3);
        assert_eq!(col.undefined_rows(), vec![false, true, true]);
        assert_eq!(col.changed(), &[false, false, false]);
    }

    #[test]
    fn astype_preserves_change_tracking() {
        let mut col = int_column(vec![1, 2]);
        col.reset();
        col.write_rows(&ValueArray::Int(vec![9]), &[1], false).unwrap();
        let mut floats = col.astype(ElementType::Float).unwrap();
        assert_eq!(
            floats.to_attribute_data().data,
            ValueArray::Float(vec![1.0, 9.0])
        );
        assert_eq!(floats.changed(), &[false, true]);
    }

    #[test]
    fn undefined_and_special_rows() {
        let col = int_column(vec![1, UNDEFINED_INT, -1]);
        assert_eq!(col.undefined_rows(), vec![false, true, false]);
        assert_eq!(
            col.special_rows(&Scalar::Int(-1)),
            vec![false, false, true]
        );

        let strs = UniformColumn::from_attribute_data(
            &AttributeData::uniform(vec![UNDEFINED_STR.to_owned(), "a".to_owned()]),
            &DataType::of(ElementType::Str),
            closeness(),
        )
        .unwrap();
        assert_eq!(strs.undefined_rows(), vec![true, false]);
    }
}
