//! Filter plugins — the fixed pipeline that shapes outgoing commands.
//!
//! | Plugin | Effect |
//! |--------|--------|
//! | `sunEvents` | interpolates listed parameters between day and night values |
//! | `naturalLight` | sub-type defaults for colour, delegating to `sunEvents` |
//! | `schedule` | merges the state of the latest time-of-day trigger |
//! | `externalFlags` | applies a flag-driven state once per flag change |
//!
//! Plugins never do IO. External flag values are pushed into
//! [`ExternalFlagsFilter`] by the hub's flag poller.

pub mod external_flags;
pub mod natural_light;
pub mod schedule;
pub mod sun_events;

use lumenhub_domain::command::CommandObject;
use lumenhub_domain::device::DeviceSubType;
use lumenhub_domain::document::Defaults;
use lumenhub_domain::filter::{FilterDefinition, FilterPlugin};
use lumenhub_domain::id::Channel;
use lumenhub_domain::location::Location;
use lumenhub_domain::time::Timestamp;

pub use external_flags::ExternalFlagsFilter;
pub use natural_light::NaturalLightFilter;
pub use schedule::ScheduleFilter;
pub use sun_events::SunEventsFilter;

/// The device a filter chain runs for, at a given instant.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub now: Timestamp,
    pub channel: Channel,
    pub sub_type: DeviceSubType,
    pub location: &'a Location,
    pub defaults: &'a Defaults,
}

/// Contract shared by every plugin.
pub trait LightFilter {
    /// Transform `cmd` according to `filter`. `plugins` gives access to the
    /// other plugins for delegation and cross-filter restrictions.
    fn execute(
        &self,
        filter: &FilterDefinition,
        cmd: CommandObject,
        ctx: &FilterContext<'_>,
        plugins: &FilterPlugins,
    ) -> CommandObject;
}

/// One instance of every plugin.
#[derive(Debug, Default)]
pub struct FilterPlugins {
    pub sun_events: SunEventsFilter,
    pub natural_light: NaturalLightFilter,
    pub schedule: ScheduleFilter,
    pub external_flags: ExternalFlagsFilter,
}

impl FilterPlugins {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the plugin `filter` names.
    #[must_use]
    pub fn execute(
        &self,
        filter: &FilterDefinition,
        cmd: CommandObject,
        ctx: &FilterContext<'_>,
    ) -> CommandObject {
        match filter.plugin {
            FilterPlugin::SunEvents => self.sun_events.execute(filter, cmd, ctx, self),
            FilterPlugin::NaturalLight => self.natural_light.execute(filter, cmd, ctx, self),
            FilterPlugin::Schedule => self.schedule.execute(filter, cmd, ctx, self),
            FilterPlugin::ExternalFlags => self.external_flags.execute(filter, cmd, ctx, self),
        }
    }

    /// Run `filters` in order, skipping those whose switch position does not
    /// match `trigger_switch_position` (unless `periodic`).
    #[must_use]
    pub fn apply_chain(
        &self,
        filters: &[FilterDefinition],
        cmd: CommandObject,
        ctx: &FilterContext<'_>,
        trigger_switch_position: Option<bool>,
        periodic: bool,
    ) -> CommandObject {
        filters
            .iter()
            .filter(|filter| filter.applies_to(trigger_switch_position, periodic))
            .fold(cmd, |cmd, filter| {
                let out = self.execute(filter, cmd, ctx);
                tracing::debug!(
                    channel = %ctx.channel,
                    filter_id = %filter.id,
                    plugin = %filter.plugin,
                    params = out.len(),
                    "filter applied"
                );
                out
            })
    }
}
