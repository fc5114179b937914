//! Periodic filter scheduler — which filters run on a tick.

use std::collections::HashMap;

use chrono::Duration;

use lumenhub_domain::document::Defaults;
use lumenhub_domain::filter::{FilterDefinition, PeriodicActivity};
use lumenhub_domain::id::FilterId;
use lumenhub_domain::location::Location;
use lumenhub_domain::time::{Timestamp, minutes};

/// Tally of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodicReport {
    /// Devices that had at least one eligible filter.
    pub devices_run: usize,
    /// Devices skipped because their periodic filters are suspended.
    pub devices_suspended: usize,
}

/// Whether `filter` is due at `now`.
#[must_use]
pub fn is_eligible(
    filter: &FilterDefinition,
    last_run: Option<Timestamp>,
    now: Timestamp,
    location: &Location,
    defaults: &Defaults,
) -> bool {
    match filter.periodically_active {
        None | Some(PeriodicActivity::Enabled(false)) => false,
        Some(PeriodicActivity::Enabled(true)) => true,
        Some(PeriodicActivity::Restricted(restriction)) => {
            let spaced = match (restriction.interval, last_run) {
                (Some(interval), Some(last)) => {
                    let interval = Duration::seconds(i64::try_from(interval).unwrap_or(i64::MAX));
                    now - last >= interval
                }
                _ => true,
            };
            let padding = restriction
                .padding_from_sun_event
                .unwrap_or(defaults.sun_event_padding_minutes);
            spaced && restriction.restriction.is_active(now, location, minutes(padding))
        }
    }
}

/// The subset of `filters` due at `now`, in order.
#[must_use]
pub fn eligible_filters(
    filters: &[FilterDefinition],
    last_runs: &HashMap<FilterId, Timestamp>,
    now: Timestamp,
    location: &Location,
    defaults: &Defaults,
) -> Vec<FilterDefinition> {
    filters
        .iter()
        .filter(|filter| {
            is_eligible(
                filter,
                last_runs.get(&filter.id).copied(),
                now,
                location,
                defaults,
            )
        })
        .cloned()
        .collect()
}
