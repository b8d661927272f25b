use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use simflow_errors::{type_mismatch, SimResult};

use crate::data_type::{Closeness, DataType, Element, ElementType, Scalar, UnitShape};

/// The key of the id column within a group's data.
pub const ID_KEY: &str = "id";

/// A tagged column of plain values, the in-memory half of the external
/// update payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueArray {
    Bool(Vec<i8>),
    Int(Vec<i32>),
    Float(Vec<f64>),
    Str(Vec<String>),
}

impl ValueArray {
    pub fn element_type(&self) -> ElementType {
        match self {
            ValueArray::Bool(_) => ElementType::Bool,
            ValueArray::Int(_) => ElementType::Int,
            ValueArray::Float(_) => ElementType::Float,
            ValueArray::Str(_) => ElementType::Str,
        }
    }

    /// Number of scalar values (not rows).
    pub fn len(&self) -> usize {
        match self {
            ValueArray::Bool(v) => v.len(),
            ValueArray::Int(v) => v.len(),
            ValueArray::Float(v) => v.len(),
            ValueArray::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An empty array of the given element type.
    pub fn empty(element_type: ElementType) -> Self {
        match element_type {
            ElementType::Bool => ValueArray::Bool(Vec::new()),
            ElementType::Int => ValueArray::Int(Vec::new()),
            ElementType::Float => ValueArray::Float(Vec::new()),
            ElementType::Str => ValueArray::Str(Vec::new()),
        }
    }

    /// Convert to another element type, if the conversion is
    /// value-preserving for the numeric family. String arrays never convert
    /// to or from the numeric types. Undefined sentinels map to undefined
    /// sentinels.
    pub fn cast_to(&self, target: ElementType) -> SimResult<ValueArray> {
        if self.element_type() == target {
            return Ok(self.clone());
        }
        fn map<A: Element, B: Element>(values: &[A], f: impl Fn(&A) -> B) -> Vec<B> {
            values
                .iter()
                .map(|v| if v.is_undefined() { B::undefined() } else { f(v) })
                .collect()
        }
        match (self, target) {
            (ValueArray::Bool(v), ElementType::Int) => {
                Ok(ValueArray::Int(map(v, |&b| i32::from(b))))
            }
            (ValueArray::Bool(v), ElementType::Float) => {
                Ok(ValueArray::Float(map(v, |&b| f64::from(b))))
            }
            (ValueArray::Int(v), ElementType::Bool) => {
                Ok(ValueArray::Bool(map(v, |&i| (i != 0) as i8)))
            }
            (ValueArray::Int(v), ElementType::Float) => {
                Ok(ValueArray::Float(map(v, |&i| f64::from(i))))
            }
            (ValueArray::Float(v), ElementType::Int) => {
                Ok(ValueArray::Int(map(v, |&f| f as i32)))
            }
            (ValueArray::Float(v), ElementType::Bool) => {
                Ok(ValueArray::Bool(map(v, |&f| (f != 0.0) as i8)))
            }
            _ => Err(type_mismatch!(
                "cannot convert {} data to {}",
                self.element_type(),
                target
            )),
        }
    }

    /// Closeness-aware equality, used where NaN-undefined floats make
    /// `PartialEq` unsuitable.
    pub fn all_close(&self, other: &ValueArray, closeness: &Closeness) -> bool {
        fn close<T: Element>(a: &[T], b: &[T], closeness: &Closeness) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.close_to(y, closeness))
        }
        match (self, other) {
            (ValueArray::Bool(a), ValueArray::Bool(b)) => close(a, b, closeness),
            (ValueArray::Int(a), ValueArray::Int(b)) => close(a, b, closeness),
            (ValueArray::Float(a), ValueArray::Float(b)) => close(a, b, closeness),
            (ValueArray::Str(a), ValueArray::Str(b)) => close(a, b, closeness),
            _ => false,
        }
    }
}

impl From<Vec<i32>> for ValueArray {
    fn from(values: Vec<i32>) -> Self {
        ValueArray::Int(values)
    }
}

impl From<Vec<f64>> for ValueArray {
    fn from(values: Vec<f64>) -> Self {
        ValueArray::Float(values)
    }
}

impl From<Vec<String>> for ValueArray {
    fn from(values: Vec<String>) -> Self {
        ValueArray::Str(values)
    }
}

/// One attribute's worth of payload data: flat values, the unit shape of a
/// logical element, and row offsets when the attribute is ragged.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeData {
    pub data: ValueArray,
    pub unit_shape: UnitShape,
    pub row_ptr: Option<Vec<usize>>,
}

impl AttributeData {
    /// A uniform (fixed-width) column of scalars.
    pub fn uniform(data: impl Into<ValueArray>) -> Self {
        Self {
            data: data.into(),
            unit_shape: UnitShape::new(),
            row_ptr: None,
        }
    }

    /// A ragged column of scalars.
    pub fn csr(data: impl Into<ValueArray>, row_ptr: Vec<usize>) -> Self {
        Self {
            data: data.into(),
            unit_shape: UnitShape::new(),
            row_ptr: Some(row_ptr),
        }
    }

    pub fn with_unit_shape(mut self, unit_shape: &[usize]) -> Self {
        self.unit_shape = UnitShape::from_slice(unit_shape);
        self
    }

    pub fn is_csr(&self) -> bool {
        self.row_ptr.is_some()
    }

    /// Number of rows described by this payload.
    pub fn len(&self) -> usize {
        match &self.row_ptr {
            Some(row_ptr) => row_ptr.len().saturating_sub(1),
            None => {
                let stride: usize = self.unit_shape.iter().product();
                self.data.len() / stride.max(1)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The data type this payload implies, used when auto-registering
    /// unknown attributes.
    pub fn infer_data_type(&self) -> DataType {
        DataType::new(self.data.element_type(), &self.unit_shape, self.is_csr())
    }

    /// Closeness-aware equality of data, shape and offsets.
    pub fn all_close(&self, other: &AttributeData, closeness: &Closeness) -> bool {
        self.unit_shape == other.unit_shape
            && self.row_ptr == other.row_ptr
            && self.data.all_close(&other.data, closeness)
    }
}

/// The columns of one entity group in a payload, keyed by attribute name.
/// Contains the [`ID_KEY`] column alongside regular attributes.
pub type GroupData = IndexMap<String, AttributeData>;

/// All entity groups of one dataset in a payload.
pub type DatasetData = IndexMap<String, GroupData>;

/// Dataset-wide metadata: named enumerations and per-attribute special
/// values (keyed `"<group>.<attr>"`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneralSection {
    #[serde(default, rename = "enum", skip_serializing_if = "IndexMap::is_empty")]
    pub enums: IndexMap<String, Vec<String>>,
    #[serde(
        default,
        alias = "no_data",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub special: IndexMap<String, Scalar>,
}

impl GeneralSection {
    pub fn is_empty(&self) -> bool {
        self.enums.is_empty() && self.special.is_empty()
    }

    /// Iterate special values as `(entity_group, attribute, value)`,
    /// skipping malformed keys.
    pub fn special_values(&self) -> impl Iterator<Item = (&str, &str, &Scalar)> {
        self.special
            .iter()
            .filter_map(|(key, value)| key.split_once('.').map(|(g, a)| (g, a, value)))
    }
}

/// A full update payload: optional general metadata plus per-dataset entity
/// data.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateData {
    pub general: Option<GeneralSection>,
    pub datasets: IndexMap<String, DatasetData>,
}

impl UpdateData {
    /// Whether the payload carries no entity data at all.
    pub fn is_empty(&self) -> bool {
        self.datasets
            .values()
            .all(|groups| groups.values().all(|group| group.is_empty()))
    }

    /// Access one group's data, if present.
    pub fn group(&self, dataset: &str, entity_group: &str) -> Option<&GroupData> {
        self.datasets.get(dataset)?.get(entity_group)
    }

    /// Insert one group's data, creating the dataset as needed.
    pub fn insert_group(&mut self, dataset: &str, entity_group: &str, data: GroupData) {
        self.datasets
            .entry(dataset.to_owned())
            .or_default()
            .insert(entity_group.to_owned(), data);
    }

    /// Closeness-aware structural equality.
    pub fn all_close(&self, other: &UpdateData, closeness: &Closeness) -> bool {
        self.datasets.len() == other.datasets.len()
            && self.datasets.iter().all(|(name, groups)| {
                other.datasets.get(name).is_some_and(|other_groups| {
                    groups.len() == other_groups.len()
                        && groups.iter().all(|(group, data)| {
                            other_groups.get(group).is_some_and(|other_data| {
                                data.len() == other_data.len()
                                    && data.iter().all(|(attr, column)| {
                                        other_data
                                            .get(attr)
                                            .is_some_and(|c| column.all_close(c, closeness))
                                    })
                            })
                        })
                })
            })
    }
}

/// Extract the id column from a group payload.
pub fn group_ids(group: &GroupData) -> Option<&[i32]> {
    match group.get(ID_KEY)?.data {
        ValueArray::Int(ref ids) => Some(ids),
        _ => None,
    }
}
