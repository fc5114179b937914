//! Hub document — the configuration read once at startup.
//!
//! Besides the document, the configuration store provides the device map
//! (a list of [`DeviceRecord`](crate::device::DeviceRecord)s). Both are
//! camelCase JSON.

use serde::{Deserialize, Serialize};

use crate::class_tree::ClassTree;
use crate::command::CommandObject;
use crate::filter::FilterSpec;
use crate::group::Group;
use crate::id::{FilterId, LocationId, PresetId};
use crate::location::{DEFAULT_LOCATION_ID, Location};

/// Tunables shared by every device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Defaults {
    /// Consecutive failed polls before a device counts as offline.
    pub offline_tolerance: u32,
    pub poll_interval_ms: u64,
    /// How long an offline device keeps its last power state.
    pub stale_state_discard_ms: u64,
    pub periodic_filter_interval_secs: u64,
    pub sun_event_padding_minutes: i64,
    pub transition_width_minutes: u32,
    pub flag_poll_interval_secs: u64,
    pub default_location_id: LocationId,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            offline_tolerance: 3,
            poll_interval_ms: 10_000,
            stale_state_discard_ms: 300_000,
            periodic_filter_interval_secs: 60,
            sun_event_padding_minutes: 30,
            transition_width_minutes: 60,
            flag_poll_interval_secs: 30,
            default_location_id: LocationId::from(DEFAULT_LOCATION_ID),
        }
    }
}

/// A named command applied on request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: PresetId,
    #[serde(default)]
    pub label: String,
    pub state_data: CommandObject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubDocument {
    /// Filter templates, addressed by `id`.
    pub filters: Vec<FilterSpec>,
    pub groups: Vec<Group>,
    pub class_tree: ClassTree,
    pub locations: Vec<Location>,
    pub defaults: Defaults,
    pub presets: Vec<Preset>,
}

impl HubDocument {
    #[must_use]
    pub fn filter_template(&self, id: &FilterId) -> Option<&FilterSpec> {
        self.filters.iter().find(|spec| spec.id.as_ref() == Some(id))
    }

    #[must_use]
    pub fn location(&self, id: &LocationId) -> Option<&Location> {
        self.locations.iter().find(|location| &location.id == id)
    }

    #[must_use]
    pub fn preset(&self, id: &PresetId) -> Option<&Preset> {
        self.presets.iter().find(|preset| &preset.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_fill_defaults_for_empty_document() {
        let doc: HubDocument = serde_json::from_str("{}").unwrap();
        assert_eq!(doc.defaults.offline_tolerance, 3);
        assert_eq!(doc.defaults.poll_interval_ms, 10_000);
        assert_eq!(doc.defaults.default_location_id.as_str(), "default");
        assert!(doc.class_tree.is_empty());
    }

    #[test]
    fn should_parse_full_document() {
        let doc: HubDocument = serde_json::from_value(serde_json::json!({
            "filters": [{"id": "night", "pluginName": "sunEvents"}],
            "groups": [{"id": "living", "channels": [1, 2]}],
            "classTree": {"lights": {"ceiling": {}}},
            "locations": [{"id": "home", "latitude": 48.85, "longitude": 2.35, "timezone": "Europe/Paris"}],
            "defaults": {"offlineTolerance": 5},
            "presets": [{"id": "movie", "label": "Movie", "stateData": {"brightness": 10}}]
        }))
        .unwrap();
        assert!(doc.filter_template(&FilterId::from("night")).is_some());
        assert!(doc.filter_template(&FilterId::from("day")).is_none());
        assert_eq!(doc.defaults.offline_tolerance, 5);
        assert_eq!(doc.defaults.stale_state_discard_ms, 300_000);
        assert_eq!(doc.class_tree.resolve("ceiling"), vec!["lights", "ceiling"]);
        assert!(doc.location(&LocationId::from("home")).is_some());
        assert_eq!(doc.preset(&PresetId::from("movie")).unwrap().label, "Movie");
    }
}
