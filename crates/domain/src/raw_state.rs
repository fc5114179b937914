//! Raw device state — the payload a device last reported, as-is.
//!
//! Payload shapes differ per [`DeviceKind`]:
//!
//! | Kind | Power field | Light fields | Notes |
//! |------|-------------|--------------|-------|
//! | Kasa | `on_off` (bulbs) / `relay_state` (plugs), `0`/`1` | `brightness`, `hue`, `saturation`, `color_temp`, `transition_period` | off bulbs move light fields under `dft_on_state`; command replies carry `err_code` |
//! | ESP | `on` (bool) or `relay` (bool) | same names, `transition` | replies to hub commands echo `cmd_id` |
//! | Virtual | `on_off` (number or bool) | same names, `transition` | `source` is `"hub"` or `"external"` |
//!
//! Values are type-checked on every read; a mistyped field surfaces as a
//! [`ProtocolError`] so callers can discard the update.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::{CommandObject, LightParam};
use crate::device::DeviceKind;
use crate::error::ProtocolError;

/// Last reported payload of a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawState(Map<String, Value>);

impl RawState {
    /// Wrap a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotAnObject`] when `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(ProtocolError::NotAnObject),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Derived boolean power state, `None` when the payload has no power field.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedType`] when the power field is not
    /// a number or boolean.
    pub fn power_state(&self, kind: DeviceKind) -> Result<Option<bool>, ProtocolError> {
        for key in power_keys(kind) {
            if let Some(value) = self.get(key) {
                return read_number(key, value).map(|n| Some(n.abs() > f64::EPSILON));
            }
        }
        Ok(None)
    }

    /// Reconstruct a command object from the reported parameters.
    ///
    /// Light fields missing at the top level are looked up in `dft_on_state`,
    /// where Kasa bulbs keep them while switched off.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedType`] when a known field has a
    /// non-numeric value.
    pub fn to_command(&self, kind: DeviceKind) -> Result<CommandObject, ProtocolError> {
        let mut cmd = CommandObject::new();
        if let Some(on) = self.power_state(kind)? {
            cmd.set(LightParam::OnOff, if on { 1.0 } else { 0.0 });
        }
        let fallback = match self.get("dft_on_state") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                return Err(ProtocolError::UnexpectedType {
                    field: "dft_on_state".to_string(),
                    expected: "object",
                });
            }
        };
        for param in LightParam::ALL {
            if param == LightParam::OnOff {
                continue;
            }
            let key = param_key(kind, param);
            let value = self
                .get(key)
                .or_else(|| fallback.and_then(|map| map.get(key)));
            if let Some(value) = value {
                cmd.set(param, read_number(key, value)?);
            }
        }
        Ok(cmd)
    }

    /// Overlay a command's parameters using this kind's field names, as a
    /// device would after applying it.
    pub fn apply_command(&mut self, kind: DeviceKind, cmd: &CommandObject) {
        for (param, value) in cmd.iter() {
            let key = if param == LightParam::OnOff {
                power_keys(kind)[0]
            } else {
                param_key(kind, param)
            };
            let value = match kind {
                DeviceKind::Esp if param == LightParam::OnOff => Value::Bool(value > 0.0),
                _ => serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number),
            };
            self.insert(key, value);
        }
    }
}

fn power_keys(kind: DeviceKind) -> &'static [&'static str] {
    match kind {
        DeviceKind::Kasa => &["on_off", "relay_state"],
        DeviceKind::Esp => &["on", "relay"],
        DeviceKind::Virtual => &["on_off"],
    }
}

/// Payload field carrying `param` for devices of `kind`.
#[must_use]
pub fn param_key(kind: DeviceKind, param: LightParam) -> &'static str {
    match (kind, param) {
        (DeviceKind::Kasa, LightParam::Transition) => "transition_period",
        (_, param) => param.as_str(),
    }
}

fn read_number(field: &str, value: &Value) -> Result<f64, ProtocolError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| unexpected(field)),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        _ => Err(unexpected(field)),
    }
}

fn unexpected(field: &str) -> ProtocolError {
    ProtocolError::UnexpectedType {
        field: field.to_string(),
        expected: "number",
    }
}
