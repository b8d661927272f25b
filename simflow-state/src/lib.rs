//! The tracked entity state for simflow: attributes with pub/sub flags, a
//! block-compressed entity index per group, an order-preserving attribute
//! schema, and the [`TrackedState`] container that routes update payloads in
//! and sparse change payloads out.

pub mod common_attributes;
pub mod data_mask;

mod attribute;
mod index;
mod schema;
mod state;

pub use attribute::{Attribute, AttributeFlags, AttributeOptions, AttributeStorage};
pub use data_mask::DataMask;
pub use index::Index;
pub use schema::{infer_data_type, AttributeSchema, AttributeSpec};
pub use state::{AttributeHandle, TrackedState};
