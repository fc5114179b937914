//! Group — a named set of channels sharing synchronization and class rules.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::class_tree::ClassRef;
use crate::device::LinkedDevice;
use crate::id::{Channel, GroupId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub channels: BTreeSet<Channel>,
    /// When present, replaces the member device's own linked-device list.
    #[serde(default)]
    pub linked_devices: Option<Vec<LinkedDevice>>,
    #[serde(default)]
    pub class: ClassRef,
}

impl Group {
    #[must_use]
    pub fn contains(&self, channel: Channel) -> bool {
        self.channels.contains(&channel)
    }
}
