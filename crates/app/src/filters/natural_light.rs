//! `naturalLight` — warm colours at night, daylight colours by day.
//!
//! Bulbs shift `color_temp`, light strips shift `hue`/`saturation`. The
//! day and night states default per sub-type and can be overridden by the
//! filter's `daytimeState`/`nighttimeState`. Blending is delegated to
//! `sunEvents`.

use lumenhub_domain::command::{CommandObject, LightParam};
use lumenhub_domain::device::DeviceSubType;
use lumenhub_domain::filter::{FilterDefinition, StateData, StateValue};

use super::{FilterContext, FilterPlugins, LightFilter, SunEventsFilter};

const BULB_DAY_COLOR_TEMP: f64 = 5000.0;
const BULB_NIGHT_COLOR_TEMP: f64 = 2700.0;
const STRIP_DAY: (f64, f64) = (35.0, 20.0);
const STRIP_NIGHT: (f64, f64) = (30.0, 80.0);

#[derive(Debug, Default)]
pub struct NaturalLightFilter;

/// Built-in `(day, night)` states for a sub-type; `None` for devices
/// without colour.
fn default_states(sub_type: DeviceSubType) -> Option<(CommandObject, CommandObject)> {
    match sub_type {
        DeviceSubType::Bulb => Some((
            CommandObject::new().with(LightParam::ColorTemp, BULB_DAY_COLOR_TEMP),
            CommandObject::new().with(LightParam::ColorTemp, BULB_NIGHT_COLOR_TEMP),
        )),
        DeviceSubType::LightStrip => Some((
            CommandObject::new()
                .with(LightParam::Hue, STRIP_DAY.0)
                .with(LightParam::Saturation, STRIP_DAY.1),
            CommandObject::new()
                .with(LightParam::Hue, STRIP_NIGHT.0)
                .with(LightParam::Saturation, STRIP_NIGHT.1),
        )),
        DeviceSubType::Plug
        | DeviceSubType::Switch
        | DeviceSubType::Relay
        | DeviceSubType::Sensor => None,
    }
}

fn state_data(day: &CommandObject, night: &CommandObject) -> StateData {
    let mut data = StateData::new();
    for (param, value) in day.iter() {
        data.insert(param, StateValue::new(value, night.get(param).unwrap_or(value)));
    }
    for (param, value) in night.iter() {
        data.entry(param).or_insert(StateValue::new(value, value));
    }
    data
}

impl LightFilter for NaturalLightFilter {
    fn execute(
        &self,
        filter: &FilterDefinition,
        cmd: CommandObject,
        ctx: &FilterContext<'_>,
        plugins: &FilterPlugins,
    ) -> CommandObject {
        if let Some(restriction) = &filter.settings.restriction {
            let flag = plugins
                .external_flags
                .check_flag_state_on_url(&restriction.url, &restriction.flag);
            if flag == Some(restriction.veto_when) {
                tracing::debug!(
                    channel = %ctx.channel,
                    filter_id = %filter.id,
                    flag = %restriction.flag,
                    "natural light vetoed by flag"
                );
                return cmd;
            }
        }

        let defaults = default_states(ctx.sub_type);
        let day = filter
            .settings
            .daytime_state
            .clone()
            .or_else(|| defaults.as_ref().map(|(day, _)| day.clone()));
        let night = filter
            .settings
            .nighttime_state
            .clone()
            .or_else(|| defaults.as_ref().map(|(_, night)| night.clone()));
        let (Some(day), Some(night)) = (day, night) else {
            return cmd;
        };

        let Some(mut fraction) = plugins.sun_events.fraction(&filter.settings, ctx) else {
            return cmd;
        };
        if let Some(partial) = filter.settings.apply_partially {
            if partial > 0.0 && partial < 1.0 {
                fraction *= partial;
            } else {
                tracing::warn!(filter_id = %filter.id, partial, "applyPartially outside (0, 1), ignored");
            }
        }
        SunEventsFilter::interpolate(&state_data(&day, &night), fraction, cmd)
    }
}
