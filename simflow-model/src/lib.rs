//! The model lifecycle layer of simflow: simulation time, control messages,
//! initial-data access and the [`ModelAdapter`] that sequences a model's
//! life over a [`simflow_state::TrackedState`].

mod adapter;
mod init_data;
mod messages;
mod moment;

pub use adapter::{ModelAdapter, Settings, TrackedModel};
pub use init_data::{DirInitData, FileType, InitDataHandler};
pub use messages::{NewTimeMessage, QuitMessage, UpdateMessage, UpdateSeriesMessage};
pub use moment::{string_to_datetime, Moment, TimelineInfo};
