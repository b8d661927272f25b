use std::fmt;

use serde::{Deserialize, Serialize};
use simflow_errors::{codec_err, SimResult};
use smallvec::SmallVec;

/// Undefined sentinel for boolean columns (stored as `i8`).
pub const UNDEFINED_BOOL: i8 = i8::MIN;

/// Undefined sentinel for integer columns.
pub const UNDEFINED_INT: i32 = i32::MIN;

/// Undefined sentinel for string columns.
pub const UNDEFINED_STR: &str = "_udf_";

/// Maximum string bucket width, in characters.
pub const MAX_STR_WIDTH: usize = 256;

/// Per-entity dimensions of a column beyond the row axis.
///
/// Empty for scalar columns; e.g. `[2]` for columns of 2-D points.
pub type UnitShape = SmallVec<[usize; 2]>;

/// The semantic element type of a column.
///
/// Each element type has a fixed storage representation and a fixed
/// "undefined" sentinel, so that missing values travel through the whole
/// pipeline without a separate validity bitmap:
///
/// | type | storage | undefined |
/// |---|---|---|
/// | `Bool` | `i8` | `i8::MIN` |
/// | `Int` | `i32` | `i32::MIN` |
/// | `Float` | `f64` | `NaN` |
/// | `Str` | UTF-8 string | `"_udf_"` |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Bool,
    Int,
    Float,
    Str,
}

impl ElementType {
    /// The wire dtype string for this element type. `str_width` is only used
    /// for [`ElementType::Str`], where it denotes the bucket width in
    /// characters.
    pub fn dtype_string(&self, str_width: usize) -> String {
        match self {
            ElementType::Bool => "<i1".into(),
            ElementType::Int => "<i4".into(),
            ElementType::Float => "<f8".into(),
            ElementType::Str => format!("<U{str_width}"),
        }
    }

    /// Parse a wire dtype string. Returns the element type and, for strings,
    /// the bucket width in characters (1 for all other types).
    pub fn from_dtype(dtype: &str) -> SimResult<(ElementType, usize)> {
        // Accept both `<` (little-endian) and `|` (not applicable) byte
        // order markers.
        let body = dtype.strip_prefix(['<', '|', '=']).unwrap_or(dtype);
        match body {
            "i1" | "b1" => Ok((ElementType::Bool, 1)),
            "i4" => Ok((ElementType::Int, 1)),
            "f8" => Ok((ElementType::Float, 1)),
            _ => {
                if let Some(width) = body.strip_prefix('U') {
                    let width = width
                        .parse::<usize>()
                        .map_err(|_| codec_err!("invalid dtype '{dtype}'"))?;
                    Ok((ElementType::Str, width))
                } else {
                    Err(codec_err!("unsupported dtype '{dtype}'"))
                }
            }
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Bool => "bool",
            ElementType::Int => "int",
            ElementType::Float => "float",
            ElementType::Str => "str",
        };
        f.write_str(name)
    }
}

/// The full type of one attribute column: element type, per-entity unit
/// shape, and whether rows are ragged (CSR layout).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub element_type: ElementType,
    pub unit_shape: UnitShape,
    pub csr: bool,
}

impl DataType {
    /// A scalar, uniform column of the given element type.
    pub fn of(element_type: ElementType) -> Self {
        Self {
            element_type,
            unit_shape: UnitShape::new(),
            csr: false,
        }
    }

    /// A ragged (CSR) column of scalars of the given element type.
    pub fn csr_of(element_type: ElementType) -> Self {
        Self {
            element_type,
            unit_shape: UnitShape::new(),
            csr: true,
        }
    }

    pub fn new(element_type: ElementType, unit_shape: &[usize], csr: bool) -> Self {
        Self {
            element_type,
            unit_shape: UnitShape::from_slice(unit_shape),
            csr,
        }
    }

    /// Number of scalar elements per logical element: the product of the
    /// unit shape. 1 for scalar columns.
    pub fn stride(&self) -> usize {
        self.unit_shape.iter().product()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.element_type)?;
        if !self.unit_shape.is_empty() {
            write!(f, "x{:?}", self.unit_shape.as_slice())?;
        }
        if self.csr {
            write!(f, " (csr)")?;
        }
        Ok(())
    }
}

/// Numeric closeness parameters used by all change detection.
///
/// Two floats `a` (current) and `b` (reference) are close when
/// `|a - b| <= atol + rtol * |b|`, or when both are NaN and `equal_nan` is
/// set. Non-float types compare exactly and ignore the tolerances.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Closeness {
    pub rtol: f64,
    pub atol: f64,
    pub equal_nan: bool,
}

impl Closeness {
    pub const fn new(rtol: f64, atol: f64) -> Self {
        Self {
            rtol,
            atol,
            equal_nan: false,
        }
    }

    pub const fn with_equal_nan(mut self) -> Self {
        self.equal_nan = true;
        self
    }
}

impl Default for Closeness {
    fn default() -> Self {
        Closeness::new(1e-5, 1e-8)
    }
}

/// A single value of any element type, used for special-value sentinels and
/// general-section payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i32),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn element_type(&self) -> ElementType {
        match self {
            Scalar::Bool(_) => ElementType::Bool,
            Scalar::Int(_) => ElementType::Int,
            Scalar::Float(_) => ElementType::Float,
            Scalar::Str(_) => ElementType::Str,
        }
    }
}

/// One element of a column: the storage type together with its sentinel and
/// closeness semantics.
pub trait Element: Clone + PartialEq + fmt::Debug {
    const ELEMENT_TYPE: ElementType;

    /// The "undefined" sentinel for this element type.
    fn undefined() -> Self;

    /// Whether this value is the undefined sentinel. NaN-vs-NaN counts as
    /// undefined-vs-undefined for floats.
    fn is_undefined(&self) -> bool;

    /// Closeness-aware equality; `self` is the current value, `other` the
    /// reference.
    fn close_to(&self, other: &Self, closeness: &Closeness) -> bool;

    /// Convert a [`Scalar`] into this element type, if the conversion is
    /// value-preserving.
    fn from_scalar(scalar: &Scalar) -> Option<Self>;
}

impl Element for i8 {
    const ELEMENT_TYPE: ElementType = ElementType::Bool;

    fn undefined() -> Self {
        UNDEFINED_BOOL
    }

    fn is_undefined(&self) -> bool {
        *self == UNDEFINED_BOOL
    }

    fn close_to(&self, other: &Self, _closeness: &Closeness) -> bool {
        self == other
    }

    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::Bool(b) => Some(*b as i8),
            Scalar::Int(i) => i8::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl Element for i32 {
    const ELEMENT_TYPE: ElementType = ElementType::Int;

    fn undefined() -> Self {
        UNDEFINED_INT
    }

    fn is_undefined(&self) -> bool {
        *self == UNDEFINED_INT
    }

    fn close_to(&self, other: &Self, _closeness: &Closeness) -> bool {
        self == other
    }

    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::Bool(b) => Some(*b as i32),
            Scalar::Int(i) => Some(*i),
            Scalar::Float(f) if f.fract() == 0.0 => Some(*f as i32),
            _ => None,
        }
    }
}

impl Element for f64 {
    const ELEMENT_TYPE: ElementType = ElementType::Float;

    fn undefined() -> Self {
        f64::NAN
    }

    fn is_undefined(&self) -> bool {
        self.is_nan()
    }

    fn close_to(&self, other: &Self, closeness: &Closeness) -> bool {
        if self.is_nan() || other.is_nan() {
            return closeness.equal_nan && self.is_nan() && other.is_nan();
        }
        (self - other).abs() <= closeness.atol + closeness.rtol * other.abs()
    }

    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl Element for String {
    const ELEMENT_TYPE: ElementType = ElementType::Str;

    fn undefined() -> Self {
        UNDEFINED_STR.to_owned()
    }

    fn is_undefined(&self) -> bool {
        self == UNDEFINED_STR
    }

    fn close_to(&self, other: &Self, _closeness: &Closeness) -> bool {
        self == other
    }

    fn from_scalar(scalar: &Scalar) -> Option<Self> {
        match scalar {
            Scalar::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// The storage bucket width for strings up to `len` characters: the next
/// power of two that fits, capped at [`MAX_STR_WIDTH`].
pub fn string_bucket_width(len: usize) -> usize {
    len.next_power_of_two().clamp(1, MAX_STR_WIDTH)
}

/// Truncate a string to the storage cap, respecting char boundaries.
pub fn clamp_str_len(value: &str) -> &str {
    match value.char_indices().nth(MAX_STR_WIDTH) {
        Some((byte_idx, _)) => &value[..byte_idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_sentinels() {
        assert!(Element::is_undefined(&UNDEFINED_BOOL));
        assert!(Element::is_undefined(&UNDEFINED_INT));
        assert!(Element::is_undefined(&f64::NAN));
        assert!(Element::is_undefined(&UNDEFINED_STR.to_owned()));
        assert!(!Element::is_undefined(&0i32));
        assert!(!Element::is_undefined(&0.0f64));
    }

    #[test]
    fn float_closeness() {
        let closeness = Closeness::default();
        assert!(1.000000001f64.close_to(&1.0, &closeness));
        assert!(!3.1f64.close_to(&3.0, &closeness));
        assert!(!f64::NAN.close_to(&f64::NAN, &closeness));
        assert!(f64::NAN.close_to(&f64::NAN, &closeness.with_equal_nan()));
        assert!(!f64::NAN.close_to(&1.0, &closeness.with_equal_nan()));
    }

    #[test]
    fn dtype_round_trip() {
        for (ty, width, s) in [
            (ElementType::Bool, 1, "<i1"),
            (ElementType::Int, 1, "<i4"),
            (ElementType::Float, 1, "<f8"),
            (ElementType::Str, 16, "<U16"),
        ] {
            assert_eq!(ty.dtype_string(width), s);
            assert_eq!(ElementType::from_dtype(s).unwrap(), (ty, width));
        }
        assert!(ElementType::from_dtype("<m8").is_err());
    }

    #[test]
    fn string_bucket_widths() {
        assert_eq!(string_bucket_width(0), 1);
        assert_eq!(string_bucket_width(1), 1);
        assert_eq!(string_bucket_width(5), 8);
        assert_eq!(string_bucket_width(8), 8);
        assert_eq!(string_bucket_width(9), 16);
        assert_eq!(string_bucket_width(300), MAX_STR_WIDTH);
    }

    #[test]
    fn scalar_conversions() {
        assert_eq!(i32::from_scalar(&Scalar::Int(4)), Some(4));
        assert_eq!(f64::from_scalar(&Scalar::Int(4)), Some(4.0));
        assert_eq!(i8::from_scalar(&Scalar::Bool(true)), Some(1));
        assert_eq!(String::from_scalar(&Scalar::Int(4)), None);
    }
}
