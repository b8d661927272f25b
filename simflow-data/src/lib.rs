//! Data types, tracked columns and update payloads for the simflow
//! tracked-state engine.
//!
//! Entity state is columnar: every attribute of an entity group is one
//! column, either *uniform* (fixed width per row) or *CSR* (ragged rows over
//! a flat buffer plus row offsets). Columns detect per-row changes against a
//! snapshot using numeric closeness so that floating-point noise does not
//! produce spurious updates, and missing values travel as per-type
//! "undefined" sentinels rather than a separate validity bitmap.

mod array;
mod column;
mod csr;
mod data_type;
mod payload;

pub use array::TrackedArray;
pub use column::{CsrColumn, UniformColumn};
pub use csr::TrackedCsrArray;
pub use data_type::{
    clamp_str_len, string_bucket_width, Closeness, DataType, Element, ElementType, Scalar,
    UnitShape, MAX_STR_WIDTH, UNDEFINED_BOOL, UNDEFINED_INT, UNDEFINED_STR,
};
pub use payload::{
    group_ids, AttributeData, DatasetData, GeneralSection, GroupData, UpdateData, ValueArray,
    ID_KEY,
};
