//! Dependency resolver — materializes what a device record points at.
//!
//! Every function is pure over the [`HubDocument`]. Configuration problems
//! never fail resolution: the offending entry is logged and dropped.

use lumenhub_domain::device::DeviceRecord;
use lumenhub_domain::document::HubDocument;
use lumenhub_domain::error::ConfigError;
use lumenhub_domain::filter::{FilterDefinition, FilterSpec};
use lumenhub_domain::group::Group;
use lumenhub_domain::id::{Channel, FilterId, GroupId};
use lumenhub_domain::location::Location;

/// Everything a controller needs from the document, resolved once.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDependencies {
    pub filters: Vec<FilterDefinition>,
    pub groups: Vec<GroupId>,
    pub classes: Vec<String>,
    pub location: Location,
}

/// Resolve filters, groups, classes and location for `record`.
#[must_use]
pub fn resolve(record: &DeviceRecord, document: &HubDocument) -> ResolvedDependencies {
    let groups = resolve_groups(record.channel, &document.groups);
    ResolvedDependencies {
        filters: resolve_filters(&record.filters, document, &record.channel.to_string()),
        classes: resolve_classes(record, &groups, document),
        groups: groups.iter().map(|group| group.id.clone()).collect(),
        location: resolve_location(record, document),
    }
}

/// Turn filter references into definitions, preserving order.
///
/// A reference with a `refId` is overlaid on the template of that id; one
/// without passes through as-is. `scope` names the owner in fallback ids
/// and log lines.
#[must_use]
pub fn resolve_filters(
    specs: &[FilterSpec],
    document: &HubDocument,
    scope: &str,
) -> Vec<FilterDefinition> {
    specs
        .iter()
        .enumerate()
        .filter_map(|(index, spec)| {
            let fallback = FilterId::from(format!("{scope}-{index}"));
            match resolve_filter(spec, document, fallback) {
                Ok(def) => Some(def),
                Err(error) => {
                    tracing::warn!(scope, index, %error, "dropping filter");
                    None
                }
            }
        })
        .collect()
}

fn resolve_filter(
    spec: &FilterSpec,
    document: &HubDocument,
    fallback: FilterId,
) -> Result<FilterDefinition, ConfigError> {
    let merged = match &spec.ref_id {
        None => spec.clone(),
        Some(ref_id) => document
            .filter_template(ref_id)
            .ok_or_else(|| ConfigError::UnknownFilterTemplate {
                ref_id: ref_id.clone(),
            })?
            .overlay(spec),
    };
    merged.into_definition(fallback)
}

/// Groups whose channel set contains `channel`, in document order.
#[must_use]
pub fn resolve_groups(channel: Channel, groups: &[Group]) -> Vec<&Group> {
    groups.iter().filter(|group| group.contains(channel)).collect()
}

/// Class chains for the device's own classes followed by those of its
/// groups.
#[must_use]
pub fn resolve_classes(
    record: &DeviceRecord,
    groups: &[&Group],
    document: &HubDocument,
) -> Vec<String> {
    let names = record
        .class
        .names()
        .chain(groups.iter().flat_map(|group| group.class.names()));
    document.class_tree.resolve_all(names)
}

/// The record's location, else the configured default, else the built-in one.
#[must_use]
pub fn resolve_location(record: &DeviceRecord, document: &HubDocument) -> Location {
    record
        .location_id
        .as_ref()
        .and_then(|id| document.location(id))
        .or_else(|| document.location(&document.defaults.default_location_id))
        .cloned()
        .unwrap_or_else(Location::fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumenhub_domain::class_tree::{ClassRef, ClassTree};
    use lumenhub_domain::device::DeviceKind;
    use lumenhub_domain::filter::FilterPlugin;
    use lumenhub_domain::id::LocationId;

    fn document() -> HubDocument {
        serde_json::from_value(serde_json::json!({
            "filters": [
                {"id": "night", "pluginName": "sunEvents", "label": "Night",
                 "stateData": {"brightness": {"value": 100, "altValue": 30}}},
                {"id": "broken", "pluginName": ""}
            ],
            "groups": [
                {"id": "living", "channels": [1, 2], "class": "ceiling"},
                {"id": "hall", "channels": [3]}
            ],
            "classTree": {"lights": {"indoor": {"ceiling": {}}, "outdoor": {}}},
            "locations": [{"id": "home", "latitude": 52.0, "longitude": 4.0}]
        }))
        .unwrap()
    }

    fn record(channel: u32) -> DeviceRecord {
        DeviceRecord::new(format!("dev-{channel}"), Channel::new(channel), DeviceKind::Virtual)
    }

    #[test]
    fn should_overlay_reference_on_template() {
        let doc = document();
        let spec: FilterSpec = serde_json::from_value(serde_json::json!({
            "refId": "night",
            "stateData": {"color_temp": {"value": 5000, "altValue": 2700}}
        }))
        .unwrap();
        let filters = resolve_filters(&[spec], &doc, "1");
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].id.as_str(), "night");
        assert_eq!(filters[0].plugin, FilterPlugin::SunEvents);
        assert_eq!(filters[0].label, "Night");
        assert_eq!(filters[0].state_data.len(), 2);
    }

    #[test]
    fn should_pass_through_spec_without_ref_id() {
        let spec = FilterSpec {
            plugin_name: Some("schedule".to_string()),
            ..FilterSpec::default()
        };
        let filters = resolve_filters(&[spec], &document(), "7");
        assert_eq!(filters[0].id.as_str(), "7-0");
        assert_eq!(filters[0].global_label, "schedule");
    }

    #[test]
    fn should_drop_unknown_template_and_empty_plugin_keeping_order() {
        let specs = vec![
            FilterSpec {
                ref_id: Some(FilterId::from("missing")),
                ..FilterSpec::default()
            },
            FilterSpec {
                ref_id: Some(FilterId::from("broken")),
                ..FilterSpec::default()
            },
            FilterSpec {
                ref_id: Some(FilterId::from("night")),
                ..FilterSpec::default()
            },
            FilterSpec {
                plugin_name: Some("externalFlags".to_string()),
                ..FilterSpec::default()
            },
        ];
        let filters = resolve_filters(&specs, &document(), "1");
        let plugins: Vec<_> = filters.iter().map(|f| f.plugin).collect();
        assert_eq!(plugins, vec![FilterPlugin::SunEvents, FilterPlugin::ExternalFlags]);
    }

    #[test]
    fn should_find_groups_by_channel() {
        let doc = document();
        let groups = resolve_groups(Channel::new(2), &doc.groups);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id.as_str(), "living");
        assert!(resolve_groups(Channel::new(9), &doc.groups).is_empty());
    }

    #[test]
    fn should_resolve_own_and_group_class_chains() {
        let doc = document();
        let mut device = record(1);
        device.class = ClassRef::One("outdoor".to_string());
        let groups = resolve_groups(device.channel, &doc.groups);
        assert_eq!(
            resolve_classes(&device, &groups, &doc),
            vec!["lights", "outdoor", "lights", "indoor", "ceiling"]
        );
    }

    #[test]
    fn should_resolve_nested_class_to_full_chain() {
        let tree = ClassTree::new().with(
            "a",
            ClassTree::new().with("b", ClassTree::new().with("c", ClassTree::new())),
        );
        let doc = HubDocument {
            class_tree: tree,
            ..HubDocument::default()
        };
        let mut device = record(1);
        device.class = ClassRef::One("c".to_string());
        assert_eq!(resolve_classes(&device, &[], &doc), vec!["a", "b", "c"]);
        device.class = ClassRef::One("z".to_string());
        assert!(resolve_classes(&device, &[], &doc).is_empty());
    }

    #[test]
    fn should_fall_back_to_default_location() {
        let doc = document();
        let mut device = record(1);
        device.location_id = Some(LocationId::from("home"));
        assert_eq!(resolve_location(&device, &doc).id.as_str(), "home");

        device.location_id = Some(LocationId::from("office"));
        assert_eq!(resolve_location(&device, &doc), Location::fallback());
    }

    #[test]
    fn should_prefer_configured_default_location_over_builtin() {
        let mut doc = document();
        doc.locations.push(Location {
            id: LocationId::from("default"),
            ..Location::fallback()
        });
        doc.locations[1].latitude = 40.0;
        assert!((resolve_location(&record(1), &doc).latitude - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn should_resolve_all_dependencies_together() {
        let doc = document();
        let mut device = record(3);
        device.filters = vec![FilterSpec {
            ref_id: Some(FilterId::from("night")),
            ..FilterSpec::default()
        }];
        let resolved = resolve(&device, &doc);
        assert_eq!(resolved.filters.len(), 1);
        assert_eq!(resolved.groups, vec![GroupId::from("hall")]);
        assert!(resolved.classes.is_empty());
    }
}
