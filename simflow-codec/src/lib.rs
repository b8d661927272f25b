//! Serialization boundaries of the simflow core: the JSON initial-dataset
//! format (human-readable, used for on-disk data and debugging) and the
//! msgpack update wire format used between model processes.

mod json;
mod wire;

pub use json::InitDataFormat;
pub use wire::{dump_update, load_update, CURRENT_ENCODE_VERSION};
