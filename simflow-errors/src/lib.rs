//! Error types shared by all crates in the simflow workspace.
//!
//! Every fallible operation in the workspace returns [`SimResult`]. Errors
//! that originate while handling a particular attribute carry the
//! `dataset/entity-group/attribute` path so that a failure deep inside an
//! update can be reported against the data that caused it.

use std::fmt;

use thiserror::Error;

/// Result type returned by all fallible simflow operations.
pub type SimResult<T> = Result<T, SimError>;

/// The error type for all simflow operations.
#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    /// An update or initial dataset was structurally invalid (missing `id`
    /// column, malformed shapes, and the like).
    #[error("invalid data{}: {msg}", fmt_path(.path))]
    InvalidData {
        /// Location of the offending data, if known.
        path: Option<AttributePath>,
        /// Description of what was wrong.
        msg: String,
    },

    /// Data of one storage layout was delivered to a column of the other
    /// (CSR data to a uniform attribute or vice versa), or element types
    /// were incompatible.
    #[error("type mismatch{}: {msg}", fmt_path(.path))]
    TypeMismatch {
        /// Location of the offending data, if known.
        path: Option<AttributePath>,
        /// Description of the mismatch.
        msg: String,
    },

    /// Duplicate ids were inserted into an entity index.
    #[error("duplicate entries detected: {}", join_ids(.ids))]
    DuplicateIds {
        /// The ids that appeared more than once.
        ids: Vec<i32>,
    },

    /// Ids were looked up in an entity index but are not present.
    #[error("ids {} not found in index", join_ids(.ids))]
    IdsNotFound {
        /// The ids that could not be resolved.
        ids: Vec<i32>,
    },

    /// An attribute was requested that has not been registered.
    #[error("attribute '{name}' not available")]
    AttributeNotFound {
        /// The requested attribute name.
        name: String,
    },

    /// A column was used before it was allocated.
    #[error("uninitialized array{}", fmt_path(.path))]
    Uninitialized {
        /// Location of the attribute, if known.
        path: Option<AttributePath>,
    },

    /// An attribute spec was re-registered with an incompatible definition.
    #[error("incompatible redefinition of attribute '{name}': {msg}")]
    IncompatibleSpec {
        /// The attribute name being redefined.
        name: String,
        /// Description of the incompatibility.
        msg: String,
    },

    /// A model declined to initialize because required inputs have not
    /// arrived yet. The adapter retries after the next update; this error
    /// never tears down the process.
    #[error("model is not ready")]
    NotReady,

    /// Required attributes were still undefined when the lifecycle demanded
    /// them.
    #[error("attributes are not ready: {}", .paths.iter().map(AttributePath::to_string).collect::<Vec<_>>().join(", "))]
    AttributesNotReady {
        /// Every uninitialized `dataset/group/attribute` entry.
        paths: Vec<AttributePath>,
    },

    /// A lifecycle method was invoked out of order.
    #[error("invalid lifecycle transition: {msg}")]
    InvalidLifecycle {
        /// Description of the violated ordering.
        msg: String,
    },

    /// An error at the serialization boundary (JSON or wire payloads).
    #[error("codec error: {msg}")]
    Codec {
        /// Description of the failure.
        msg: String,
    },

    /// A wire payload used an array encoding version this build does not
    /// understand.
    #[error("unsupported array encoding version {version}")]
    UnsupportedEncodingVersion {
        /// The version found in the payload.
        version: u64,
    },

    /// A datetime string could not be interpreted.
    #[error("cannot parse '{input}' as a datetime")]
    InvalidDatetime {
        /// The rejected input.
        input: String,
    },

    /// An I/O failure, e.g. while reading an initial dataset file.
    #[error("io error: {msg}")]
    Io {
        /// Stringified source error.
        msg: String,
    },
}

impl SimError {
    /// Attach an attribute path to errors that support one, leaving other
    /// errors untouched. Existing paths are not overwritten.
    pub fn with_path(mut self, new: AttributePath) -> Self {
        match &mut self {
            SimError::InvalidData { path, .. }
            | SimError::TypeMismatch { path, .. }
            | SimError::Uninitialized { path } => {
                if path.is_none() {
                    *path = Some(new);
                }
            }
            _ => {}
        }
        self
    }
}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        SimError::Io { msg: e.to_string() }
    }
}

/// The `dataset/entity-group/attribute` location of a piece of data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributePath {
    /// Dataset name.
    pub dataset: String,
    /// Entity group name.
    pub entity_group: String,
    /// Attribute name.
    pub attribute: String,
}

impl AttributePath {
    /// Construct a path from its three components.
    pub fn new(
        dataset: impl Into<String>,
        entity_group: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            entity_group: entity_group.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.dataset, self.entity_group, self.attribute)
    }
}

fn fmt_path(path: &Option<AttributePath>) -> String {
    match path {
        Some(p) => format!(" at {p}"),
        None => String::new(),
    }
}

fn join_ids(ids: &[i32]) -> String {
    ids.iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Construct a [`SimError::InvalidData`] without a path.
#[macro_export]
macro_rules! invalid_data {
    ($($format_args:tt)*) => {
        $crate::SimError::InvalidData {
            path: None,
            msg: format!($($format_args)*),
        }
    };
}

/// Construct a [`SimError::TypeMismatch`] without a path.
#[macro_export]
macro_rules! type_mismatch {
    ($($format_args:tt)*) => {
        $crate::SimError::TypeMismatch {
            path: None,
            msg: format!($($format_args)*),
        }
    };
}

/// Construct a [`SimError::Codec`].
#[macro_export]
macro_rules! codec_err {
    ($($format_args:tt)*) => {
        $crate::SimError::Codec {
            msg: format!($($format_args)*),
        }
    };
}
