//! Device record — the immutable per-session configuration of one device.
//!
//! Records load once from the configuration store. Runtime state lives in the
//! controller built around a record (see `lumenhub-app`).

use serde::{Deserialize, Serialize};

use crate::class_tree::ClassRef;
use crate::command::CommandObject;
use crate::filter::FilterSpec;
use crate::id::{Channel, DeviceId, LocationId};

/// Protocol family of a device. Drives raw-state parsing and the origin
/// heuristics of change analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Kasa,
    Esp,
    Virtual,
}

/// What the device physically is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceSubType {
    #[default]
    Bulb,
    LightStrip,
    Plug,
    Switch,
    Relay,
    Sensor,
}

impl DeviceSubType {
    /// Relays get bounded retries on power actuation.
    #[must_use]
    pub fn is_relay(self) -> bool {
        matches!(self, Self::Relay)
    }
}

/// A command fanned out to another channel when this device switches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub channel: Channel,
    #[serde(default)]
    pub state_data: CommandObject,
    /// Milliseconds to wait before issuing.
    #[serde(default)]
    pub delay: Option<u64>,
    /// Extra filters applied after the target device's own.
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

/// Targets per switch position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Targets {
    pub on: Vec<Target>,
    pub off: Vec<Target>,
}

impl Targets {
    /// Targets for a transition to `on`.
    #[must_use]
    pub fn for_position(&self, on: bool) -> &[Target] {
        if on { &self.on } else { &self.off }
    }
}

/// Another device kept in sync with, or toggled by, this one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedDevice {
    pub channel: Channel,
    /// Follow this device's direction instead of toggling.
    #[serde(default)]
    pub sync: bool,
    /// Follow the opposite direction (sync mode only).
    #[serde(default)]
    pub inverse: bool,
    /// React to transitions to on. Defaults to `true`.
    #[serde(default)]
    pub on_position: Option<bool>,
    /// React to transitions to off. Defaults to `true`.
    #[serde(default)]
    pub off_position: Option<bool>,
}

impl LinkedDevice {
    /// Whether a transition of the source to `on` concerns this link.
    #[must_use]
    pub fn reacts_to(&self, on: bool) -> bool {
        if on {
            self.on_position.unwrap_or(true)
        } else {
            self.off_position.unwrap_or(true)
        }
    }

    /// New power state for the linked device, or `None` when it should stay.
    ///
    /// Sync mode moves the target toward the source direction (inverted when
    /// `inverse`), flipping only if it differs. Without sync the target is
    /// always toggled.
    #[must_use]
    pub fn next_state(&self, source_on: bool, target_on: Option<bool>) -> Option<bool> {
        if self.sync {
            let desired = source_on != self.inverse;
            (target_on != Some(desired)).then_some(desired)
        } else {
            Some(!target_on.unwrap_or(false))
        }
    }
}

/// Configuration of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub channel: Channel,
    #[serde(default)]
    pub alias: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub sub_type: DeviceSubType,
    #[serde(default)]
    pub location_id: Option<LocationId>,
    #[serde(default)]
    pub class: ClassRef,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub targets: Targets,
    #[serde(default)]
    pub linked_devices: Vec<LinkedDevice>,
}

impl DeviceRecord {
    /// Bare record with defaults, for tests and programmatic setup.
    #[must_use]
    pub fn new(id: impl Into<DeviceId>, channel: Channel, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            channel,
            alias: String::new(),
            kind,
            sub_type: DeviceSubType::default(),
            location_id: None,
            class: ClassRef::default(),
            filters: Vec::new(),
            targets: Targets::default(),
            linked_devices: Vec::new(),
        }
    }
}
