//! Filters — configured transforms applied to outgoing commands.
//!
//! The hub document holds filter *templates* ([`FilterSpec`] with an `id`).
//! Devices list filter *references*: a [`FilterSpec`] with a `refId`
//! pointing at a template plus any fields it overrides. Resolution overlays
//! the reference on its template field by field and validates the result
//! into a [`FilterDefinition`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::command::{CommandObject, LightParam};
use crate::error::ConfigError;
use crate::id::FilterId;
use crate::sun::{SunEvent, SunRestriction};

/// The fixed set of filter plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterPlugin {
    NaturalLight,
    Schedule,
    SunEvents,
    ExternalFlags,
}

impl FilterPlugin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NaturalLight => "naturalLight",
            Self::Schedule => "schedule",
            Self::SunEvents => "sunEvents",
            Self::ExternalFlags => "externalFlags",
        }
    }
}

impl fmt::Display for FilterPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterPlugin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "naturalLight" => Ok(Self::NaturalLight),
            "schedule" => Ok(Self::Schedule),
            "sunEvents" => Ok(Self::SunEvents),
            "externalFlags" => Ok(Self::ExternalFlags),
            other => Err(other.to_string()),
        }
    }
}

/// A parameter's primary value and its alternative (night / flag-off) value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateValue {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_value: Option<f64>,
}

impl StateValue {
    #[must_use]
    pub fn new(value: f64, alt_value: f64) -> Self {
        Self {
            value,
            alt_value: Some(alt_value),
        }
    }

    /// Linear blend: `0.0` gives `value`, `1.0` gives `alt_value`.
    #[must_use]
    pub fn interpolate(&self, fraction: f64) -> f64 {
        let alt = self.alt_value.unwrap_or(self.value);
        if fraction <= 0.0 {
            return self.value;
        }
        if fraction >= 1.0 {
            return alt;
        }
        self.value + (alt - self.value) * fraction
    }
}

/// Per-parameter value pairs a filter works with.
pub type StateData = BTreeMap<LightParam, StateValue>;

/// Sun-restricted periodic activation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodicRestriction {
    pub restriction: SunRestriction,
    /// Minimum seconds between two periodic runs on one device.
    #[serde(default)]
    pub interval: Option<u64>,
    /// Minutes around a sun event that count as "near" it.
    #[serde(default)]
    pub padding_from_sun_event: Option<i64>,
}

/// Whether the periodic scheduler runs a filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeriodicActivity {
    Enabled(bool),
    Restricted(PeriodicRestriction),
}

impl PeriodicActivity {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Enabled(false))
    }
}

/// One entry of a `schedule` filter.
///
/// Exactly one trigger form is expected: `hours` + `minutes`, `minutes` alone
/// (repeats every hour), or `sunEvent` with an optional offset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    #[serde(default)]
    pub hours: Option<u32>,
    #[serde(default)]
    pub minutes: Option<u32>,
    #[serde(default)]
    pub sun_event: Option<SunEvent>,
    #[serde(default)]
    pub offset_minutes: i64,
    #[serde(default)]
    pub state_data: CommandObject,
}

/// Cross-filter restriction: consult an external flag before applying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRestriction {
    pub url: String,
    pub flag: String,
    /// Flag value that vetoes the filter.
    #[serde(default = "default_veto_when")]
    pub veto_when: bool,
}

fn default_veto_when() -> bool {
    true
}

/// Plugin-specific settings. Every field is optional so that a device-local
/// reference can override any subset of its template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSettings {
    /// `sunEvents`/`naturalLight`: transition window width.
    pub transition_width_minutes: Option<u32>,
    /// `sunEvents`/`naturalLight`: window shift relative to the sun event.
    pub offset_minutes: Option<i32>,
    /// `naturalLight`: parameters to use by day.
    pub daytime_state: Option<CommandObject>,
    /// `naturalLight`: parameters to use by night.
    pub nighttime_state: Option<CommandObject>,
    /// `naturalLight`: fraction of the computed shift to apply, `(0, 1)`.
    pub apply_partially: Option<f64>,
    /// `naturalLight`: external flag able to veto the filter.
    pub restriction: Option<FlagRestriction>,
    /// `schedule`: trigger entries.
    pub schedule: Option<Vec<ScheduleEntry>>,
    /// `externalFlags`: endpoint to poll.
    pub url: Option<String>,
    /// `externalFlags`: flag name at the endpoint.
    pub flag: Option<String>,
}

fn overlay_command(base: Option<&CommandObject>, over: Option<&CommandObject>) -> Option<CommandObject> {
    match (base, over) {
        (Some(base), Some(over)) => Some(base.merged(over)),
        (base, over) => over.or(base).cloned(),
    }
}

impl FilterSettings {
    /// Overlay `over` on `self`. Scalars from `over` win; command objects
    /// merge key-wise; the schedule list is replaced as a whole.
    #[must_use]
    pub fn overlaid(&self, over: &FilterSettings) -> FilterSettings {
        FilterSettings {
            transition_width_minutes: over
                .transition_width_minutes
                .or(self.transition_width_minutes),
            offset_minutes: over.offset_minutes.or(self.offset_minutes),
            daytime_state: overlay_command(self.daytime_state.as_ref(), over.daytime_state.as_ref()),
            nighttime_state: overlay_command(
                self.nighttime_state.as_ref(),
                over.nighttime_state.as_ref(),
            ),
            apply_partially: over.apply_partially.or(self.apply_partially),
            restriction: over.restriction.clone().or_else(|| self.restriction.clone()),
            schedule: over.schedule.clone().or_else(|| self.schedule.clone()),
            url: over.url.clone().or_else(|| self.url.clone()),
            flag: over.flag.clone().or_else(|| self.flag.clone()),
        }
    }
}

/// A filter template or a device-local filter reference, as written in
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSpec {
    pub id: Option<FilterId>,
    pub ref_id: Option<FilterId>,
    pub plugin_name: Option<String>,
    pub label: Option<String>,
    pub global_label: Option<String>,
    pub settings: FilterSettings,
    pub state_data: StateData,
    pub periodically_active: Option<PeriodicActivity>,
    pub switch_position: Option<bool>,
}

impl FilterSpec {
    /// Overlay a device-local reference on this template.
    #[must_use]
    pub fn overlay(&self, over: &FilterSpec) -> FilterSpec {
        let mut state_data = self.state_data.clone();
        state_data.extend(over.state_data.iter().map(|(k, v)| (*k, *v)));
        FilterSpec {
            id: over.id.clone().or_else(|| self.id.clone()),
            ref_id: over.ref_id.clone(),
            plugin_name: over
                .plugin_name
                .clone()
                .filter(|name| !name.is_empty())
                .or_else(|| self.plugin_name.clone()),
            label: over.label.clone().or_else(|| self.label.clone()),
            global_label: over.global_label.clone().or_else(|| self.global_label.clone()),
            settings: self.settings.overlaid(&over.settings),
            state_data,
            periodically_active: over.periodically_active.or(self.periodically_active),
            switch_position: over.switch_position.or(self.switch_position),
        }
    }

    /// Validate into a [`FilterDefinition`]. `fallback_id` names the filter
    /// when the spec carries no id of its own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingPluginName`] when the plugin name is
    /// absent or empty and [`ConfigError::UnknownPlugin`] when it names no
    /// known plugin.
    pub fn into_definition(self, fallback_id: FilterId) -> Result<FilterDefinition, ConfigError> {
        let id = self.id.or(self.ref_id).unwrap_or(fallback_id);
        let plugin_name = self
            .plugin_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ConfigError::MissingPluginName {
                filter: id.to_string(),
            })?;
        let plugin = plugin_name
            .parse::<FilterPlugin>()
            .map_err(|plugin_name| ConfigError::UnknownPlugin {
                filter: id.to_string(),
                plugin_name,
            })?;
        let global_label = self.global_label.unwrap_or(plugin_name);
        let label = self.label.unwrap_or_else(|| global_label.clone());
        Ok(FilterDefinition {
            id,
            plugin,
            label,
            global_label,
            settings: self.settings,
            state_data: self.state_data,
            periodically_active: self.periodically_active,
            switch_position: self.switch_position,
        })
    }
}

/// A fully resolved filter, ready for the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDefinition {
    pub id: FilterId,
    pub plugin: FilterPlugin,
    pub label: String,
    pub global_label: String,
    pub settings: FilterSettings,
    pub state_data: StateData,
    pub periodically_active: Option<PeriodicActivity>,
    pub switch_position: Option<bool>,
}

impl FilterDefinition {
    /// Minimal definition for `plugin` with default settings.
    #[must_use]
    pub fn new(id: impl Into<FilterId>, plugin: FilterPlugin) -> Self {
        Self {
            id: id.into(),
            plugin,
            label: plugin.as_str().to_string(),
            global_label: plugin.as_str().to_string(),
            settings: FilterSettings::default(),
            state_data: StateData::new(),
            periodically_active: None,
            switch_position: None,
        }
    }

    /// Whether this filter takes part in a chain triggered at
    /// `trigger_switch_position`. Periodic runs ignore the switch position.
    #[must_use]
    pub fn applies_to(&self, trigger_switch_position: Option<bool>, periodic: bool) -> bool {
        periodic
            || self.switch_position.is_none()
            || self.switch_position == trigger_switch_position
    }

    #[must_use]
    pub fn is_periodic(&self) -> bool {
        self.periodically_active
            .is_some_and(|activity| activity.is_enabled())
    }
}
