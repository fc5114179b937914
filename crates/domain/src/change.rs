//! Change analysis — what differs between two raw states, and who caused it.

use serde::{Deserialize, Serialize};

use crate::command::LightParam;
use crate::device::DeviceKind;
use crate::error::ProtocolError;
use crate::raw_state::RawState;

/// Who caused a reported state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// The change answers a command the hub issued.
    Hub,
    /// Physical switch, vendor app, or anything else outside the hub.
    External,
}

/// Why a setter was called. Only [`PeriodicFilter`](Self::PeriodicFilter)
/// changes filter selection; the rest is carried for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOrigin {
    User,
    PeriodicFilter,
    Target,
    LinkedDevice,
    GroupSync,
    CacheReplay,
    Preset,
}

/// Classification of a changed state along three independent axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeInfo {
    pub on_off_changed: bool,
    pub settings_changed: bool,
    pub transition_only: bool,
    pub origin: ChangeOrigin,
    pub power_state: Option<bool>,
    pub previous_power_state: Option<bool>,
}

impl ChangeInfo {
    /// Change notification for a power state dropped after a long outage.
    #[must_use]
    pub fn power_discarded(previous_power_state: Option<bool>) -> Self {
        Self {
            on_off_changed: true,
            settings_changed: false,
            transition_only: false,
            origin: ChangeOrigin::External,
            power_state: None,
            previous_power_state,
        }
    }
}

/// Outcome of [`analyze_state_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// First observation; nothing to compare against.
    NoBaseline,
    /// Structurally equal, or differing only in fields the hub ignores.
    Unchanged,
    Changed(ChangeInfo),
}

/// Best-effort guess of who caused `next`.
///
/// Kasa replies to hub commands carry `err_code`; ESP boards echo the
/// `cmd_id` of the command they executed; virtual devices tag `source`.
#[must_use]
pub fn infer_origin(kind: DeviceKind, next: &RawState) -> ChangeOrigin {
    let hub = match kind {
        DeviceKind::Kasa => next.contains("err_code"),
        DeviceKind::Esp => next.contains("cmd_id"),
        DeviceKind::Virtual => next
            .get("source")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|source| source == "hub"),
    };
    if hub {
        ChangeOrigin::Hub
    } else {
        ChangeOrigin::External
    }
}

/// Compare `next` against `previous`.
///
/// # Errors
///
/// Returns a [`ProtocolError`] when either payload has mistyped fields.
pub fn analyze_state_change(
    kind: DeviceKind,
    previous: Option<&RawState>,
    next: &RawState,
) -> Result<StateChange, ProtocolError> {
    let Some(previous) = previous else {
        // Still validate the payload so a bad first report gets discarded.
        next.to_command(kind)?;
        return Ok(StateChange::NoBaseline);
    };
    if previous == next {
        return Ok(StateChange::Unchanged);
    }

    let before = previous.to_command(kind)?;
    let after = next.to_command(kind)?;
    let previous_power_state = previous.power_state(kind)?;
    let power_state = next.power_state(kind)?;

    let differs = |param: LightParam| before.get(param) != after.get(param);
    let on_off_changed = previous_power_state != power_state;
    let settings_changed = LightParam::ALL
        .into_iter()
        .filter(|param| param.is_setting())
        .any(differs);
    let transition_changed = differs(LightParam::Transition);

    if !on_off_changed && !settings_changed && !transition_changed {
        return Ok(StateChange::Unchanged);
    }

    Ok(StateChange::Changed(ChangeInfo {
        on_off_changed,
        settings_changed,
        transition_only: transition_changed && !on_off_changed && !settings_changed,
        origin: infer_origin(kind, next),
        power_state,
        previous_power_state,
    }))
}
