//! Sun math — sunrise/sunset at a location and the day↔night transition.
//!
//! Every function here is pure: callers pass the instant to evaluate. The
//! transition fraction is `0.0` during the day, `1.0` during the night, and
//! moves linearly inside a window centred on each sun event.

use chrono::{Days, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sunrise::{Coordinates, SolarDay};

use crate::error::ValidationError;
use crate::location::Location;
use crate::time::{Timestamp, in_zone};

/// The two sun events the hub cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SunEvent {
    Sunrise,
    Sunset,
}

/// Sunrise and sunset for one civil date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SunTimes {
    pub sunrise: Timestamp,
    pub sunset: Timestamp,
}

impl SunTimes {
    #[must_use]
    pub fn get(&self, event: SunEvent) -> Timestamp {
        match event {
            SunEvent::Sunrise => self.sunrise,
            SunEvent::Sunset => self.sunset,
        }
    }
}

/// Sunrise/sunset at `location` on `date`.
///
/// Returns `None` when the location's coordinates are out of range.
#[must_use]
pub fn sun_times(location: &Location, date: NaiveDate) -> Option<SunTimes> {
    let coord = Coordinates::new(location.latitude, location.longitude)?;
    let day = SolarDay::new(coord, date);
    Some(SunTimes {
        sunrise: day.event_time(sunrise::SolarEvent::Sunrise),
        sunset: day.event_time(sunrise::SolarEvent::Sunset),
    })
}

/// Instant of `event` on `date` at `location`.
#[must_use]
pub fn event_time(location: &Location, date: NaiveDate, event: SunEvent) -> Option<Timestamp> {
    sun_times(location, date).map(|times| times.get(event))
}

/// Sun events of yesterday, today and tomorrow (in the location's zone),
/// sorted chronologically.
fn events_around(now: Timestamp, location: &Location) -> Vec<(Timestamp, SunEvent)> {
    let today = in_zone(now, location.timezone).date_naive();
    let dates = [
        today.checked_sub_days(Days::new(1)),
        Some(today),
        today.checked_add_days(Days::new(1)),
    ];
    let mut events: Vec<_> = dates
        .into_iter()
        .flatten()
        .filter_map(|date| sun_times(location, date))
        .flat_map(|times| {
            [
                (times.sunrise, SunEvent::Sunrise),
                (times.sunset, SunEvent::Sunset),
            ]
        })
        .collect();
    events.sort_by_key(|(at, _)| *at);
    events
}

/// Whether the sun is up at `now`.
///
/// Returns `None` when sun times cannot be computed for the location.
#[must_use]
pub fn is_daytime(now: Timestamp, location: &Location) -> Option<bool> {
    events_around(now, location)
        .into_iter()
        .rev()
        .find(|(at, _)| *at <= now)
        .map(|(_, event)| event == SunEvent::Sunrise)
}

/// Width and shift of the window in which day blends into night.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionWindow {
    width: Duration,
    offset: Duration,
}

impl TransitionWindow {
    /// Build a window `width_minutes` wide, shifted by `offset_minutes`
    /// (positive = later than the sun event).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTransitionWindow`] when the width is zero.
    pub fn new(width_minutes: u32, offset_minutes: i32) -> Result<Self, ValidationError> {
        if width_minutes == 0 {
            return Err(ValidationError::EmptyTransitionWindow);
        }
        Ok(Self {
            width: Duration::minutes(i64::from(width_minutes)),
            offset: Duration::minutes(i64::from(offset_minutes)),
        })
    }

    #[must_use]
    pub fn width(&self) -> Duration {
        self.width
    }

    /// Start of the window around an event occurring at `at`.
    fn start(&self, at: Timestamp) -> Timestamp {
        at + self.offset - self.width / 2
    }

    /// Position of `now` inside the window around `at`, `0.0..=1.0`, or
    /// `None` when outside.
    fn progress(&self, at: Timestamp, now: Timestamp) -> Option<f64> {
        let start = self.start(at);
        let end = start + self.width;
        if now < start || now > end {
            return None;
        }
        let elapsed = (now - start).num_milliseconds();
        let total = self.width.num_milliseconds();
        #[allow(clippy::cast_precision_loss)]
        let fraction = elapsed as f64 / total as f64;
        Some(fraction)
    }
}

/// How far into the night `now` is, `0.0` (day) to `1.0` (night).
///
/// Inside the window around sunset the fraction rises linearly; inside the
/// window around sunrise it falls linearly. Outside any window the fraction
/// is `0.0` after a (shifted) sunrise and `1.0` after a (shifted) sunset.
///
/// Returns `None` when sun times cannot be computed for the location.
#[must_use]
pub fn night_fraction(now: Timestamp, location: &Location, window: TransitionWindow) -> Option<f64> {
    let events = events_around(now, location);
    if events.is_empty() {
        return None;
    }

    for (at, event) in &events {
        if let Some(progress) = window.progress(*at, now) {
            return Some(match event {
                SunEvent::Sunset => progress,
                SunEvent::Sunrise => 1.0 - progress,
            });
        }
    }

    let last = events
        .iter()
        .rev()
        .find(|(at, _)| *at + window.offset <= now)
        .map_or(SunEvent::Sunset, |(_, event)| *event);
    Some(match last {
        SunEvent::Sunrise => 0.0,
        SunEvent::Sunset => 1.0,
    })
}

/// Sun-relative time ranges a periodic filter can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SunRestriction {
    Always,
    /// From `padding` before sunset to `padding` after sunrise.
    DuskToDawn,
    /// Within `padding` of either sunrise or sunset.
    DawnAndDusk,
    Dusk,
    Dawn,
}

impl SunRestriction {
    /// Whether `now` falls inside the restriction at `location`.
    ///
    /// When sun times are unavailable only [`Always`](Self::Always) is active.
    #[must_use]
    pub fn is_active(self, now: Timestamp, location: &Location, padding: Duration) -> bool {
        if self == Self::Always {
            return true;
        }
        let events = events_around(now, location);
        let near = |wanted: SunEvent| {
            events
                .iter()
                .any(|(at, event)| *event == wanted && (now - *at).abs() <= padding)
        };
        match self {
            Self::Always => true,
            Self::Dusk => near(SunEvent::Sunset),
            Self::Dawn => near(SunEvent::Sunrise),
            Self::DawnAndDusk => near(SunEvent::Sunrise) || near(SunEvent::Sunset),
            Self::DuskToDawn => {
                near(SunEvent::Sunset)
                    || near(SunEvent::Sunrise)
                    || is_daytime(now, location) == Some(false)
            }
        }
    }
}
