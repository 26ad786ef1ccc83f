use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{ForecastSet, Units};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn unique_id(&self) -> String {
        unique_id(self.latitude, self.longitude)
    }
}

/// Location id packed from the coordinates: the low 16 bits of the scaled
/// longitude under the shifted scaled latitude, reduced modulo `i32::MAX`.
pub fn unique_id(latitude: f64, longitude: f64) -> String {
    let lat = (latitude * 1e7) as i64;
    let lon = (longitude * 1e7) as i64;
    let mask: i64 = if lat > 0x7FFF_0000 {
        0x1_FFFF_0000
    } else {
        0xFFFF_0000
    };
    let packed = ((lat << 16) & mask) | (lon & 0xFFFF);
    (packed.unsigned_abs() % i32::MAX as u64).to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    id: String,
    pub name: String,
    pub country: String,
    units: Units,
    coordinates: Option<Coordinates>,
    pub forecast: Option<ForecastSet>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub updates_disallowed: bool,
}

impl Location {
    pub fn new(
        name: impl Into<String>,
        country: impl Into<String>,
        coordinates: Coordinates,
        units: Units,
    ) -> Self {
        Self::with_id(
            coordinates.unique_id(),
            name,
            country,
            Some(coordinates),
            units,
        )
    }

    /// Rebuilds a location under an id assigned earlier.
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        country: impl Into<String>,
        coordinates: Option<Coordinates>,
        units: Units,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            country: country.into(),
            units,
            coordinates,
            forecast: None,
            last_checked: None,
            last_updated: None,
            error: None,
            updates_disallowed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn units(&self) -> Units {
        self.units
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        self.coordinates
    }

    pub fn is_configured(&self) -> bool {
        self.coordinates.is_some()
    }

    pub fn display_name(&self) -> String {
        if self.country.trim().is_empty() {
            self.name.clone()
        } else {
            format!("{}, {}", self.name, self.country)
        }
    }

    /// Returns `true` when the units changed, which invalidates cached data.
    pub fn set_units(&mut self, units: Units) -> bool {
        if self.units == units {
            return false;
        }
        self.units = units;
        self.invalidate();
        true
    }

    /// Moves the location. The id stays the one it was registered under.
    pub fn set_coordinates(&mut self, coordinates: Option<Coordinates>) -> bool {
        if self.coordinates == coordinates {
            return false;
        }
        self.coordinates = coordinates;
        self.invalidate();
        true
    }

    fn invalidate(&mut self) {
        self.updates_disallowed = false;
        self.last_checked = None;
        self.last_updated = None;
    }
}
