//! Device updates — what the hub tells broadcast subscribers.
//!
//! Every accepted state change produces a [`DeviceUpdate`] carrying a
//! [`DeviceSnapshot`] and, when the change was classified, its
//! [`ChangeInfo`].

use serde::{Deserialize, Serialize};

use crate::change::ChangeInfo;
use crate::id::{Channel, EventId};
use crate::raw_state::RawState;
use crate::time::{Timestamp, now};

/// Live view of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub channel: Channel,
    pub is_online: bool,
    pub power_state: Option<bool>,
    pub state: Option<RawState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceUpdateKind {
    /// Reported state changed.
    StateChanged {
        snapshot: DeviceSnapshot,
        change: ChangeInfo,
    },
    /// Lifecycle or bookkeeping update (discovery, online flag).
    Updated { snapshot: DeviceSnapshot },
}

/// A timestamped message for broadcast subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    pub id: EventId,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub kind: DeviceUpdateKind,
}

impl DeviceUpdate {
    #[must_use]
    pub fn state_changed(snapshot: DeviceSnapshot, change: ChangeInfo) -> Self {
        Self::from_kind(DeviceUpdateKind::StateChanged { snapshot, change })
    }

    #[must_use]
    pub fn updated(snapshot: DeviceSnapshot) -> Self {
        Self::from_kind(DeviceUpdateKind::Updated { snapshot })
    }

    fn from_kind(kind: DeviceUpdateKind) -> Self {
        Self {
            id: EventId::new(),
            timestamp: now(),
            kind,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> &DeviceSnapshot {
        match &self.kind {
            DeviceUpdateKind::StateChanged { snapshot, .. }
            | DeviceUpdateKind::Updated { snapshot } => snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> DeviceSnapshot {
        DeviceSnapshot {
            channel: Channel::new(4),
            is_online: true,
            power_state: Some(true),
            state: None,
        }
    }

    #[test]
    fn should_give_each_update_its_own_id() {
        let a = DeviceUpdate::updated(snapshot());
        let b = DeviceUpdate::updated(snapshot());
        assert_ne!(a.id, b.id);
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn should_serialize_with_type_tag() {
        let update = DeviceUpdate::updated(snapshot());
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "updated");
        assert_eq!(json["snapshot"]["isOnline"], true);
    }
}
