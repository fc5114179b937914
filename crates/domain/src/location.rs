//! Location — where a device sits on the globe, used for sun math.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::id::LocationId;

/// Id every device falls back to when its own location is unknown.
pub const DEFAULT_LOCATION_ID: &str = "default";

/// A named geographic position with its civil time zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: LocationId,
    #[serde(default)]
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

fn default_timezone() -> Tz {
    Tz::UTC
}

impl Location {
    /// Built-in location used when the document defines none under the
    /// default id (Greenwich, UTC).
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            id: LocationId::from(DEFAULT_LOCATION_ID),
            name: "Default".to_string(),
            latitude: 51.4779,
            longitude: 0.0,
            timezone: Tz::UTC,
        }
    }
}
