//! `sunEvents` — blend listed parameters from day to night values.

use lumenhub_domain::command::CommandObject;
use lumenhub_domain::filter::{FilterDefinition, FilterSettings, StateData};
use lumenhub_domain::sun::{TransitionWindow, night_fraction};

use super::{FilterContext, FilterPlugins, LightFilter};

#[derive(Debug, Default)]
pub struct SunEventsFilter;

impl SunEventsFilter {
    /// Night fraction for `ctx.now` with the window configured in
    /// `settings`, or `None` when it cannot be computed.
    #[must_use]
    pub fn fraction(&self, settings: &FilterSettings, ctx: &FilterContext<'_>) -> Option<f64> {
        let width = settings
            .transition_width_minutes
            .unwrap_or(ctx.defaults.transition_width_minutes);
        let window = match TransitionWindow::new(width, settings.offset_minutes.unwrap_or(0)) {
            Ok(window) => window,
            Err(error) => {
                tracing::warn!(channel = %ctx.channel, %error, "invalid transition window");
                return None;
            }
        };
        let fraction = night_fraction(ctx.now, ctx.location, window);
        if fraction.is_none() {
            tracing::warn!(
                channel = %ctx.channel,
                location = %ctx.location.id,
                "sun times unavailable"
            );
        }
        fraction
    }

    /// Overwrite every parameter of `state_data` in `cmd` with its value
    /// interpolated at `fraction`, rounded to whole units.
    #[must_use]
    pub fn interpolate(state_data: &StateData, fraction: f64, mut cmd: CommandObject) -> CommandObject {
        for (param, value) in state_data {
            cmd.set(*param, value.interpolate(fraction).round());
        }
        cmd
    }
}

impl LightFilter for SunEventsFilter {
    fn execute(
        &self,
        filter: &FilterDefinition,
        cmd: CommandObject,
        ctx: &FilterContext<'_>,
        _plugins: &FilterPlugins,
    ) -> CommandObject {
        match self.fraction(&filter.settings, ctx) {
            Some(fraction) => Self::interpolate(&filter.state_data, fraction, cmd),
            None => cmd,
        }
    }
}
