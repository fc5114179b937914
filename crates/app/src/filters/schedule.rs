//! `schedule` — apply the state of the latest trigger of the day.

use lumenhub_domain::command::CommandObject;
use lumenhub_domain::filter::{FilterDefinition, ScheduleEntry};
use lumenhub_domain::location::Location;
use lumenhub_domain::sun::event_time;
use lumenhub_domain::time::{Timestamp, in_zone, minute_of_day};

use super::{FilterContext, FilterPlugins, LightFilter};

const MINUTES_PER_DAY: i64 = 24 * 60;

#[derive(Debug, Default)]
pub struct ScheduleFilter;

/// Trigger minutes of `entry` on the day of `now`, in the location's zone.
fn trigger_minutes(entry: &ScheduleEntry, now: Timestamp, location: &Location) -> Vec<i64> {
    match (entry.hours, entry.minutes, entry.sun_event) {
        (Some(hours), minutes, _) => vec![i64::from(hours) * 60 + i64::from(minutes.unwrap_or(0))],
        (None, Some(minutes), _) => (0..24).map(|hour| hour * 60 + i64::from(minutes)).collect(),
        (None, None, Some(event)) => {
            let today = in_zone(now, location.timezone).date_naive();
            event_time(location, today, event)
                .map(|at| {
                    let local = in_zone(at, location.timezone).time();
                    let minute = i64::from(minute_of_day(local)) + entry.offset_minutes;
                    minute.clamp(0, MINUTES_PER_DAY - 1)
                })
                .into_iter()
                .collect()
        }
        (None, None, None) => Vec::new(),
    }
}

/// State data of the entry in force at `now`.
///
/// Before the first trigger of the day the last trigger of the day is still
/// in force, carried over midnight.
#[must_use]
pub fn active_entry<'a>(
    entries: &'a [ScheduleEntry],
    now: Timestamp,
    location: &Location,
) -> Option<&'a CommandObject> {
    let mut triggers: Vec<(i64, &CommandObject)> = entries
        .iter()
        .flat_map(|entry| {
            trigger_minutes(entry, now, location)
                .into_iter()
                .map(move |minute| (minute, &entry.state_data))
        })
        .filter(|(minute, _)| (0..MINUTES_PER_DAY).contains(minute))
        .collect();
    triggers.sort_by_key(|(minute, _)| *minute);

    let current = i64::from(minute_of_day(in_zone(now, location.timezone).time()));
    triggers
        .iter()
        .rev()
        .find(|(minute, _)| *minute <= current)
        .or_else(|| triggers.last())
        .map(|(_, state)| *state)
}

impl LightFilter for ScheduleFilter {
    fn execute(
        &self,
        filter: &FilterDefinition,
        mut cmd: CommandObject,
        ctx: &FilterContext<'_>,
        _plugins: &FilterPlugins,
    ) -> CommandObject {
        let entries = filter.settings.schedule.as_deref().unwrap_or_default();
        match active_entry(entries, ctx.now, ctx.location) {
            Some(state) if !state.is_empty() => {
                cmd.merge(state);
                cmd
            }
            _ => cmd,
        }
    }
}
