use std::cell::Cell;

use bitflags::bitflags;
use simflow_data::{
    AttributeData, Closeness, CsrColumn, DataType, Scalar, UniformColumn, ValueArray,
};
use simflow_errors::{invalid_data, type_mismatch, SimError, SimResult};

bitflags! {
    /// Pub/sub role flags of one attribute.
    ///
    /// The base flags are rarely used directly; model code combines them
    /// through the composite constants [`INIT`](AttributeFlags::INIT),
    /// [`SUB`](AttributeFlags::SUB), [`OPT`](AttributeFlags::OPT) and
    /// [`PUB`](AttributeFlags::PUB).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AttributeFlags: u8 {
        const INITIALIZE = 1;
        const SUBSCRIBE = 1 << 1;
        const REQUIRED = 1 << 2;
        const PUBLISH = 1 << 3;
    }
}

impl AttributeFlags {
    /// Required at initialization time.
    pub const INIT: Self = Self::SUBSCRIBE
        .union(Self::INITIALIZE)
        .union(Self::REQUIRED);

    /// Required before the first update can be calculated.
    pub const SUB: Self = Self::SUBSCRIBE.union(Self::REQUIRED);

    /// Subscribed, but tolerant of absence.
    pub const OPT: Self = Self::SUBSCRIBE;

    /// Published by this attribute's owner.
    pub const PUB: Self = Self::PUBLISH;
}

/// Per-attribute options: an optional domain-specific sentinel (distinct
/// from "undefined") and an optional named enumeration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeOptions {
    pub special: Option<Scalar>,
    pub enum_name: Option<String>,
    pub enum_values: Option<Vec<String>>,
}

/// The column storage of one attribute: uniform or ragged.
#[derive(Debug, Clone)]
pub enum AttributeStorage {
    Uniform(UniformColumn),
    Csr(CsrColumn),
}

/// One named column of per-entity data, together with its data type, pub/sub
/// flags, closeness tolerances, options and lifecycle state.
///
/// Lifecycle: unallocated → allocated (all rows undefined) → partially
/// written → fully initialized. The initialized state is monotonic within a
/// run: once every row has been defined, the attribute keeps reporting
/// initialized even if a row is later written back to undefined; callers
/// relying on liveness must reset explicitly.
#[derive(Debug)]
pub struct Attribute {
    data: Option<AttributeStorage>,
    data_type: DataType,
    flags: AttributeFlags,
    closeness: Closeness,
    options: AttributeOptions,
    initialized: Cell<bool>,
}

impl Attribute {
    pub fn new(data_type: DataType, flags: AttributeFlags) -> Self {
        Self::with_options(data_type, flags, Closeness::default(), AttributeOptions::default())
    }

    pub fn with_options(
        data_type: DataType,
        flags: AttributeFlags,
        closeness: Closeness,
        options: AttributeOptions,
    ) -> Self {
        Self {
            data: None,
            data_type,
            flags,
            // Column snapshots must not flag NaN-to-NaN rewrites.
            closeness: closeness.with_equal_nan(),
            options,
            initialized: Cell::new(false),
        }
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn flags(&self) -> AttributeFlags {
        self.flags
    }

    /// OR additional flags into this attribute's role.
    pub fn add_flags(&mut self, flags: AttributeFlags) {
        self.flags |= flags;
    }

    pub fn options(&self) -> &AttributeOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut AttributeOptions {
        &mut self.options
    }

    pub fn closeness(&self) -> &Closeness {
        &self.closeness
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn storage(&self) -> Option<&AttributeStorage> {
        self.data.as_ref()
    }

    /// Number of rows, 0 when unallocated.
    pub fn len(&self) -> usize {
        match &self.data {
            None => 0,
            Some(AttributeStorage::Uniform(col)) => col.len(),
            Some(AttributeStorage::Csr(col)) => col.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate the column with `len` rows of undefined. Fails when data is
    /// already present.
    pub fn initialize(&mut self, len: usize) -> SimResult<()> {
        if self.has_data() {
            return Err(invalid_data!("attribute is already initialized"));
        }
        self.data = Some(if self.data_type.csr {
            AttributeStorage::Csr(CsrColumn::undefined(&self.data_type, len, self.closeness))
        } else {
            AttributeStorage::Uniform(UniformColumn::undefined(
                &self.data_type,
                len,
                self.closeness,
            ))
        });
        Ok(())
    }

    /// Grow the column to `new_len` rows, allocating it first if needed.
    /// Shrinking is not supported.
    pub fn resize(&mut self, new_len: usize) -> SimResult<()> {
        let current = self.len();
        if !self.has_data() {
            return self.initialize(new_len);
        }
        if new_len < current {
            return Err(invalid_data!(
                "can only increase the size of an attribute array, not decrease it"
            ));
        }
        if new_len == current {
            return Ok(());
        }
        match self.data.as_mut().expect("data presence checked above") {
            AttributeStorage::Uniform(col) => col.resize(new_len),
            AttributeStorage::Csr(col) => col.resize(new_len),
        }
        Ok(())
    }

    /// Write payload values at the given rows; see the column types for the
    /// undefined-elision semantics controlled by `process_undefined`.
    pub fn update(
        &mut self,
        data: &AttributeData,
        rows: &[usize],
        process_undefined: bool,
    ) -> SimResult<()> {
        match self.data.as_mut().ok_or(SimError::Uninitialized { path: None })? {
            AttributeStorage::Uniform(col) => {
                if data.is_csr() {
                    return Err(type_mismatch!("CSR data delivered to a uniform attribute"));
                }
                col.write_rows(&data.data, rows, process_undefined)
            }
            AttributeStorage::Csr(col) => col.update_rows(data, rows, process_undefined),
        }
    }

    /// Per-row changed mask of the underlying column.
    pub fn changed(&mut self) -> SimResult<Vec<bool>> {
        match self.data.as_mut().ok_or(SimError::Uninitialized { path: None })? {
            AttributeStorage::Uniform(col) => Ok(col.changed().to_vec()),
            AttributeStorage::Csr(col) => Ok(col.changed().to_vec()),
        }
    }

    pub fn has_changes(&mut self) -> bool {
        match self.data.as_mut() {
            None => false,
            Some(AttributeStorage::Uniform(col)) => col.has_changes(),
            Some(AttributeStorage::Csr(col)) => col.has_changes(),
        }
    }

    /// Whether the attribute has data and no row is undefined. Monotonic:
    /// stays true once reached.
    pub fn is_initialized(&self) -> bool {
        if self.initialized.get() {
            return true;
        }
        let ready = match &self.data {
            None => false,
            Some(AttributeStorage::Uniform(col)) => {
                !col.undefined_rows().into_iter().any(|undefined| undefined)
            }
            Some(AttributeStorage::Csr(col)) => {
                !col.undefined_rows().into_iter().any(|undefined| undefined)
            }
        };
        if ready {
            self.initialized.set(true);
        }
        ready
    }

    /// Per-row undefined mask.
    pub fn is_undefined(&self) -> SimResult<Vec<bool>> {
        match self.data.as_ref().ok_or(SimError::Uninitialized { path: None })? {
            AttributeStorage::Uniform(col) => Ok(col.undefined_rows()),
            AttributeStorage::Csr(col) => Ok(col.undefined_rows()),
        }
    }

    /// Per-row comparison against the configured special value; empty when
    /// no special value is configured or the column is unallocated.
    pub fn is_special(&self) -> Vec<bool> {
        match (&self.data, &self.options.special) {
            (Some(AttributeStorage::Uniform(col)), Some(special)) => col.special_rows(special),
            (Some(AttributeStorage::Csr(col)), Some(special)) => col.special_rows(special),
            _ => Vec::new(),
        }
    }

    /// Per-row "contains a value close to `value`" on a ragged column.
    pub fn rows_contain(&self, value: &Scalar) -> SimResult<Vec<bool>> {
        Ok(self.csr_column()?.rows_contain(value))
    }

    /// Per-row "contains any of `values`" on a ragged column.
    pub fn rows_intersect(&self, values: &[Scalar]) -> SimResult<Vec<bool>> {
        Ok(self.csr_column()?.rows_intersect(values))
    }

    /// Row-wise sum over a ragged column; `empty` substitutes for rows
    /// with no elements. Numeric element types only.
    pub fn row_sum(&self, empty: &Scalar) -> SimResult<ValueArray> {
        self.csr_column()?.row_wise_sum(empty)
    }

    /// Row-wise minimum over a ragged column; `empty` substitutes for rows
    /// with no elements.
    pub fn row_min(&self, empty: &Scalar) -> SimResult<ValueArray> {
        self.csr_column()?.row_wise_min(empty)
    }

    /// Row-wise maximum over a ragged column; `empty` substitutes for rows
    /// with no elements.
    pub fn row_max(&self, empty: &Scalar) -> SimResult<ValueArray> {
        self.csr_column()?.row_wise_max(empty)
    }

    /// Dense view of a ragged column whose rows all have equal length:
    /// flat row-major values plus the common row length.
    pub fn as_matrix(&self) -> SimResult<(ValueArray, usize)> {
        self.csr_column()?.as_matrix()
    }

    /// Replace a ragged column's contents from a dense matrix, tracking
    /// changes against the prior rows.
    pub fn update_from_matrix(&mut self, values: &ValueArray, row_len: usize) -> SimResult<()> {
        self.csr_column_mut()?.update_from_matrix(values, row_len)
    }

    /// Produce the payload form of this attribute's changes; see
    /// [`UniformColumn::generate_update`].
    pub fn generate_update(&mut self, mask: Option<&[bool]>) -> SimResult<AttributeData> {
        match self.data.as_mut().ok_or(SimError::Uninitialized { path: None })? {
            AttributeStorage::Uniform(col) => Ok(col.generate_update(mask)),
            AttributeStorage::Csr(col) => Ok(col.generate_update(mask)),
        }
    }

    /// The whole column as payload data.
    pub fn to_attribute_data(&self) -> SimResult<AttributeData> {
        match self.data.as_ref().ok_or(SimError::Uninitialized { path: None })? {
            AttributeStorage::Uniform(col) => Ok(col.to_attribute_data()),
            AttributeStorage::Csr(col) => Ok(col.to_attribute_data()),
        }
    }

    /// Clear change tracking on the underlying column.
    pub fn reset(&mut self) {
        match self.data.as_mut() {
            None => {}
            Some(AttributeStorage::Uniform(col)) => col.reset(),
            Some(AttributeStorage::Csr(col)) => col.reset(),
        }
    }

    fn csr_column(&self) -> SimResult<&CsrColumn> {
        match self.data.as_ref().ok_or(SimError::Uninitialized { path: None })? {
            AttributeStorage::Csr(col) => Ok(col),
            AttributeStorage::Uniform(_) => {
                Err(type_mismatch!("operation requires a ragged column"))
            }
        }
    }

    fn csr_column_mut(&mut self) -> SimResult<&mut CsrColumn> {
        match self.data.as_mut().ok_or(SimError::Uninitialized { path: None })? {
            AttributeStorage::Csr(col) => Ok(col),
            AttributeStorage::Uniform(_) => {
                Err(type_mismatch!("operation requires a ragged column"))
            }
        }
    }
}
