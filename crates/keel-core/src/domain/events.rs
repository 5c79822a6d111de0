//! Change notifications delivered by a ChangeSource.
//!
//! Notifications are hints, not a log: the loop only uses the key.

use serde::{Deserialize, Serialize};

use super::ResourceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    /// Synthetic event from a full listing after (re)connect.
    Resync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub key: ResourceKey,
    pub change_type: ChangeType,
}

impl ChangeEvent {
    pub fn new(key: ResourceKey, change_type: ChangeType) -> Self {
        Self { key, change_type }
    }
}
