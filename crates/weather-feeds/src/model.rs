use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};

use crate::na;

pub const SENTINEL_NOT_SUPPORTED: &str = "sNotSupported";
pub const SENTINEL_INVALID: &str = "sInvalid";
pub const PERCENT_NONE: &str = "None";
pub const WIND_CALM: &str = "Calm";

/// One datum of a forecast period. A feed either supplied a usable value,
/// never carries the datum at all, or supplied an NA marker / garbage.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Field<T> {
    Value(T),
    #[default]
    NotSupported,
    Invalid,
}

impl<T> Field<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Field::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Field::Value(_))
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Field<U> {
        match self {
            Field::Value(value) => Field::Value(f(value)),
            Field::NotSupported => Field::NotSupported,
            Field::Invalid => Field::Invalid,
        }
    }

    /// `Value` for `Some`, `Invalid` for `None`.
    pub fn or_invalid(value: Option<T>) -> Self {
        value.map_or(Field::Invalid, Field::Value)
    }
}

impl Field<String> {
    /// Text leaf with NA substitution.
    pub fn text(raw: &str) -> Self {
        match na::available(raw) {
            Some(value) => Field::Value(value.to_string()),
            None => Field::Invalid,
        }
    }
}

impl<T: FromStr> Field<T> {
    /// Typed leaf: NA markers and unparseable text both become `Invalid`.
    pub fn parse(raw: &str) -> Self {
        na::available(raw)
            .and_then(|value| value.trim().parse::<T>().ok())
            .map_or(Field::Invalid, Field::Value)
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Field::Value(value) => value.serialize(serializer),
            Field::NotSupported => serializer.serialize_str(SENTINEL_NOT_SUPPORTED),
            Field::Invalid => serializer.serialize_str(SENTINEL_INVALID),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Units {
    Metric,
    #[default]
    Standard,
}

impl Units {
    pub fn as_str(self) -> &'static str {
        match self {
            Units::Metric => "Metric",
            Units::Standard => "Standard",
        }
    }

    pub fn is_metric(self) -> bool {
        self == Units::Metric
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "metric" | "m" => Ok(Units::Metric),
            "standard" | "imperial" | "s" => Ok(Units::Standard),
            other => Err(format!("unknown units: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PeriodKind {
    #[default]
    Current,
    Day,
    Night,
}

impl PeriodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PeriodKind::Current => "Current",
            PeriodKind::Day => "Day",
            PeriodKind::Night => "Night",
        }
    }

    /// 12-hour feeds number their periods from a day: even is Day.
    pub fn from_parity(index: u32) -> Self {
        if index % 2 == 0 {
            PeriodKind::Day
        } else {
            PeriodKind::Night
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PrecipType {
    Rain,
    Snow,
    #[default]
    None,
}

impl PrecipType {
    pub fn as_str(self) -> &'static str {
        match self {
            PrecipType::Rain => "Rain",
            PrecipType::Snow => "Snow",
            PrecipType::None => "None",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FeedSource {
    Wu,
    Nws,
    Owm,
}

impl FeedSource {
    /// Namespace prefix in the persisted key/value form.
    pub fn as_str(self) -> &'static str {
        match self {
            FeedSource::Wu => "WU",
            FeedSource::Nws => "NWS",
            FeedSource::Owm => "OWM",
        }
    }
}

impl FromStr for FeedSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "WU" => Ok(FeedSource::Wu),
            "NWS" => Ok(FeedSource::Nws),
            "OWM" => Ok(FeedSource::Owm),
            other => Err(format!("unknown feed source: {other}")),
        }
    }
}

/// One Day, Night or Current slice of weather data.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ForecastPeriod {
    pub kind: PeriodKind,
    pub date: Field<NaiveDate>,
    pub title: Field<String>,
    pub temperature: Field<f64>,
    /// Canonical condition code in `-1..=47`.
    pub code: i32,
    pub condition: Field<String>,
    pub description: Field<String>,
    pub icon_name: Field<String>,
    pub humidity: Field<String>,
    pub precip_probability: Field<i32>,
    pub precip_accumulation: Field<String>,
    pub precip_type: PrecipType,
    pub cloud_cover: Field<String>,
    pub wind_speed: Field<f64>,
    pub wind_gust: Field<f64>,
    pub wind_degrees: Field<i32>,
    pub wind_direction: Field<String>,
    pub dew_point: Field<f64>,
    pub feels_like: Field<f64>,
    pub pressure: Field<String>,
    pub pressure_trend: Field<String>,
    pub moon_phase: Field<u8>,
    pub sunrise: Field<String>,
    pub sunset: Field<String>,
    pub day_start: Field<DateTime<Utc>>,
    pub day_end: Field<DateTime<Utc>>,
    pub uv_index: Field<f64>,
    pub visibility: Field<f64>,
}

impl ForecastPeriod {
    pub fn new(kind: PeriodKind) -> Self {
        Self {
            kind,
            code: crate::condition::UNKNOWN_CODE,
            ..Self::default()
        }
    }

    /// Both daylight bounds, when the feed supplied them.
    pub fn daylight(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((*self.day_start.value()?, *self.day_end.value()?))
    }
}

/// A calendar day's pair of periods; either half may be missing.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LongRangeForecast {
    pub day: Option<ForecastPeriod>,
    pub night: Option<ForecastPeriod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AlertRegion {
    #[default]
    Us,
    European,
}

impl AlertRegion {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertRegion::Us => "US",
            AlertRegion::European => "European",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Alert {
    pub region: AlertRegion,
    pub starts: String,
    pub expires: String,
    pub title: String,
    pub subtitle: String,
    pub message: String,
    pub detail: String,
    pub attribution: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AlertSet {
    pub alerts: Vec<Alert>,
    /// Change-detection hash; `None` when the document carried no alerts
    /// section at all.
    pub identifier: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodRange {
    pub start: u32,
    pub end: u32,
}

impl PeriodRange {
    pub fn include(range: Option<Self>, index: u32) -> Self {
        match range {
            Some(range) => Self {
                start: range.start.min(index),
                end: range.end.max(index),
            },
            None => Self {
                start: index,
                end: index,
            },
        }
    }
}

/// Everything one successful fetch produced for a location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastSet {
    pub source: FeedSource,
    pub location_name: Field<String>,
    pub timezone: Field<String>,
    pub current: ForecastPeriod,
    pub forecasts: Vec<LongRangeForecast>,
    pub alerts: AlertSet,
    pub period_range: Option<PeriodRange>,
    pub recorded_at: Option<DateTime<Utc>>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ForecastSet {
    pub fn new(source: FeedSource) -> Self {
        Self {
            source,
            location_name: Field::NotSupported,
            timezone: Field::NotSupported,
            current: ForecastPeriod::new(PeriodKind::Current),
            forecasts: Vec::new(),
            alerts: AlertSet::default(),
            period_range: None,
            recorded_at: None,
            fetched_at: None,
        }
    }
}

/// `"65%"` for a positive percentage, `"None"` for zero.
pub fn format_percent(value: i64) -> String {
    if value == 0 {
        PERCENT_NONE.to_string()
    } else {
        format!("{value}%")
    }
}
