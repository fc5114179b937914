//! Commands — what the hub asks a device to do.
//!
//! A [`CommandObject`] is a sparse map of light parameters. A [`Command`] is
//! either a bare power switch or such an object; the two belong to different
//! [`CommandClass`]es and are cached separately while a device is offline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single controllable parameter of a light or switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightParam {
    OnOff,
    Brightness,
    Hue,
    Saturation,
    ColorTemp,
    Transition,
}

impl LightParam {
    pub const ALL: [Self; 6] = [
        Self::OnOff,
        Self::Brightness,
        Self::Hue,
        Self::Saturation,
        Self::ColorTemp,
        Self::Transition,
    ];

    /// Wire name of the parameter.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnOff => "on_off",
            Self::Brightness => "brightness",
            Self::Hue => "hue",
            Self::Saturation => "saturation",
            Self::ColorTemp => "color_temp",
            Self::Transition => "transition",
        }
    }

    /// Parameters describing how the light looks, as opposed to whether it is
    /// on or how fast it gets there.
    #[must_use]
    pub fn is_setting(self) -> bool {
        !matches!(self, Self::OnOff | Self::Transition)
    }
}

impl fmt::Display for LightParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const EPSILON: f64 = 1e-9;

/// Sparse set of device parameters to apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandObject(BTreeMap<LightParam, f64>);

impl CommandObject {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A command carrying only `on_off`.
    #[must_use]
    pub fn power(on: bool) -> Self {
        Self::new().with(LightParam::OnOff, if on { 1.0 } else { 0.0 })
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, param: LightParam, value: f64) -> Self {
        self.set(param, value);
        self
    }

    pub fn set(&mut self, param: LightParam, value: f64) {
        self.0.insert(param, value);
    }

    pub fn remove(&mut self, param: LightParam) -> Option<f64> {
        self.0.remove(&param)
    }

    #[must_use]
    pub fn get(&self, param: LightParam) -> Option<f64> {
        self.0.get(&param).copied()
    }

    #[must_use]
    pub fn contains(&self, param: LightParam) -> bool {
        self.0.contains_key(&param)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LightParam, f64)> + '_ {
        self.0.iter().map(|(param, value)| (*param, *value))
    }

    /// The requested power position, if `on_off` is present.
    #[must_use]
    pub fn power_state(&self) -> Option<bool> {
        self.get(LightParam::OnOff).map(|v| v.abs() > EPSILON)
    }

    /// Overlay `other` on top of `self`; values from `other` win.
    pub fn merge(&mut self, other: &CommandObject) {
        for (param, value) in other.iter() {
            self.set(param, value);
        }
    }

    /// Non-mutating variant of [`merge`](Self::merge).
    #[must_use]
    pub fn merged(&self, other: &CommandObject) -> CommandObject {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Whether every parameter of `self` is present in `other` with the same
    /// numeric value.
    #[must_use]
    pub fn is_satisfied_by(&self, other: &CommandObject) -> bool {
        self.iter().all(|(param, value)| {
            other
                .get(param)
                .is_some_and(|current| (current - value).abs() < EPSILON)
        })
    }
}

impl FromIterator<(LightParam, f64)> for CommandObject {
    fn from_iter<T: IntoIterator<Item = (LightParam, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which slot of the command cache a command occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandClass {
    Power,
    Light,
}

/// A command addressed to one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Command {
    Power(bool),
    Light(CommandObject),
}

impl Command {
    #[must_use]
    pub fn class(&self) -> CommandClass {
        match self {
            Self::Power(_) => CommandClass::Power,
            Self::Light(_) => CommandClass::Light,
        }
    }

    /// Pick the narrowest command for a target's state data: a bare power
    /// switch when only `on_off` is given, a light command otherwise.
    #[must_use]
    pub fn from_state_data(data: &CommandObject) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        match (data.len(), data.power_state()) {
            (1, Some(on)) => Some(Self::Power(on)),
            _ => Some(Self::Light(data.clone())),
        }
    }
}
