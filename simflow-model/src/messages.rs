use serde::{Deserialize, Serialize};

/// One update delivered to a model at a timestamp. `key` and `address`
/// locate the payload bytes on the data transport when the update cascades
/// from another model; both are absent for the orchestrator's bare
/// calculation requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub timestamp: i64,
    pub key: Option<String>,
    pub address: Option<String>,
}

impl UpdateMessage {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    pub fn cascading(timestamp: i64, key: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            timestamp,
            key: Some(key.into()),
            address: Some(address.into()),
        }
    }
}

/// Several updates for the same timestamp, to be applied before a single
/// model calculation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSeriesMessage {
    pub updates: Vec<UpdateMessage>,
}

impl UpdateSeriesMessage {
    pub fn new(updates: Vec<UpdateMessage>) -> Self {
        Self { updates }
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.updates.first().map(|update| update.timestamp)
    }
}

/// Notification that simulation time has advanced; all updates for earlier
/// times have been delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTimeMessage {
    pub timestamp: i64,
}

impl NewTimeMessage {
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp }
    }
}

/// Orderly (or failure-driven) teardown request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuitMessage {
    pub due_to_failure: bool,
}

impl QuitMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn due_to_failure() -> Self {
        Self {
            due_to_failure: true,
        }
    }
}
