use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One named joint position, normalized units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointValue {
    pub name: String,
    pub value: f64,
}

impl JointValue {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Messages a room can carry, one channel kind per message kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RelayEvent {
    /// Sparse update: only the joints that changed.
    JointUpdate(Vec<JointValue>),
    /// Full state, published periodically so late joiners can catch up.
    StateSync(HashMap<String, f64>),
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub workspace_id: String,
    pub room_id: String,
}
