//! Versioned flat key/value form for the registry and cached forecast sets.
//!
//! Keys are namespaced `<source>/<section>/<index>/<field>`, written one
//! `key=value` per line in sorted order under a `#` header. Unavailable
//! values are spelled with the `sNotSupported` / `sInvalid` sentinels.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::FeedError;
use crate::location::{Coordinates, Location};
use crate::model::{
    Alert, AlertRegion, AlertSet, FeedSource, Field, ForecastPeriod, ForecastSet,
    LongRangeForecast, PeriodKind, PeriodRange, PrecipType, SENTINEL_INVALID,
    SENTINEL_NOT_SUPPORTED, Units,
};
use crate::registry::LocationRegistry;

pub const FORMAT_VERSION: u32 = 1;
const VERSION_KEY: &str = "Format/Version";
const SOURCE_KEY: &str = "Format/Source";
const LOCATION_PREFIX: &str = "GWeather/WeatherLoc/";
const DEFAULT_LOCATION_KEY: &str = "GWeather/WeatherLoc/defaultLocationID";
const REGISTRY_HEADER: &str = "weather-feeds locations";
const FORECAST_HEADER: &str = "weather-feeds forecast";
const TEXT_QUOTE: char = '\\';

/// Conversion between a typed value and its persisted text.
pub trait FieldCodec: Sized {
    fn encode(&self) -> String;
    fn decode(raw: &str) -> Option<Self>;
}

/// Text equal to a sentinel, or already starting with `\`, gets one leading
/// `\` so it never reads back as an unavailable value.
impl FieldCodec for String {
    fn encode(&self) -> String {
        if self.starts_with(TEXT_QUOTE)
            || self == SENTINEL_INVALID
            || self == SENTINEL_NOT_SUPPORTED
        {
            format!("{TEXT_QUOTE}{self}")
        } else {
            self.clone()
        }
    }

    fn decode(raw: &str) -> Option<Self> {
        Some(raw.strip_prefix(TEXT_QUOTE).unwrap_or(raw).to_string())
    }
}

macro_rules! display_codec {
    ($($ty:ty),*) => {
        $(
            impl FieldCodec for $ty {
                fn encode(&self) -> String {
                    self.to_string()
                }

                fn decode(raw: &str) -> Option<Self> {
                    raw.parse().ok()
                }
            }
        )*
    };
}

display_codec!(f64, i32, u8, u32, bool);

impl FieldCodec for DateTime<Utc> {
    fn encode(&self) -> String {
        self.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    fn decode(raw: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|value| value.with_timezone(&Utc))
    }
}

impl FieldCodec for NaiveDate {
    fn encode(&self) -> String {
        self.format("%Y-%m-%d").to_string()
    }

    fn decode(raw: &str) -> Option<Self> {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
    }
}

impl FieldCodec for Units {
    fn encode(&self) -> String {
        self.as_str().to_string()
    }

    fn decode(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl FieldCodec for FeedSource {
    fn encode(&self) -> String {
        self.as_str().to_string()
    }

    fn decode(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl FieldCodec for PeriodKind {
    fn encode(&self) -> String {
        self.as_str().to_string()
    }

    fn decode(raw: &str) -> Option<Self> {
        match raw {
            "Current" => Some(PeriodKind::Current),
            "Day" => Some(PeriodKind::Day),
            "Night" => Some(PeriodKind::Night),
            _ => None,
        }
    }
}

impl FieldCodec for PrecipType {
    fn encode(&self) -> String {
        self.as_str().to_string()
    }

    fn decode(raw: &str) -> Option<Self> {
        match raw {
            "Rain" => Some(PrecipType::Rain),
            "Snow" => Some(PrecipType::Snow),
            "None" => Some(PrecipType::None),
            _ => None,
        }
    }
}

impl FieldCodec for AlertRegion {
    fn encode(&self) -> String {
        self.as_str().to_string()
    }

    fn decode(raw: &str) -> Option<Self> {
        match raw {
            "US" => Some(AlertRegion::Us),
            "European" => Some(AlertRegion::European),
            _ => None,
        }
    }
}

/// Sorted flat key/value document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn put_value<T: FieldCodec>(&mut self, key: &str, value: &T) {
        self.insert(key, value.encode());
    }

    pub fn put_option<T: FieldCodec>(&mut self, key: &str, value: Option<&T>) {
        match value {
            Some(value) => self.put_value(key, value),
            None => self.insert(key, SENTINEL_NOT_SUPPORTED),
        }
    }

    pub fn put_field<T: FieldCodec>(&mut self, key: &str, field: &Field<T>) {
        match field {
            Field::Value(value) => self.put_value(key, value),
            Field::NotSupported => self.insert(key, SENTINEL_NOT_SUPPORTED),
            Field::Invalid => self.insert(key, SENTINEL_INVALID),
        }
    }

    /// Required value; a missing key or undecodable text is a format error.
    pub fn value<T: FieldCodec>(&self, key: &str) -> Result<T, FeedError> {
        let raw = self
            .get(key)
            .ok_or_else(|| FeedError::Format(format!("missing key {key}")))?;
        decode(key, raw)
    }

    pub fn option<T: FieldCodec>(&self, key: &str) -> Result<Option<T>, FeedError> {
        match self.get(key) {
            None | Some(SENTINEL_NOT_SUPPORTED) => Ok(None),
            Some(raw) => decode(key, raw).map(Some),
        }
    }

    /// A missing key reads back as `NotSupported`.
    pub fn field<T: FieldCodec>(&self, key: &str) -> Result<Field<T>, FeedError> {
        match self.get(key) {
            None | Some(SENTINEL_NOT_SUPPORTED) => Ok(Field::NotSupported),
            Some(SENTINEL_INVALID) => Ok(Field::Invalid),
            Some(raw) => decode(key, raw).map(Field::Value),
        }
    }

    pub fn render(&self, header: &str) -> String {
        let mut out = format!("# {header}\n");
        for (key, value) in &self.entries {
            out.push_str(&escape(key, true));
            out.push('=');
            out.push_str(&escape(value, false));
            out.push('\n');
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self, FeedError> {
        let mut properties = Self::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = split_line(line).ok_or_else(|| {
                FeedError::Format(format!("line {}: expected key=value", index + 1))
            })?;
            properties.insert(unescape(key), unescape(value));
        }
        Ok(properties)
    }
}

fn decode<T: FieldCodec>(key: &str, raw: &str) -> Result<T, FeedError> {
    T::decode(raw).ok_or_else(|| FeedError::Format(format!("bad value for {key}: {raw}")))
}

fn escape(raw: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '=' if is_key => out.push_str("\\="),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Splits on the first unescaped `=`.
fn split_line(line: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (index, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '=' => return Some((&line[..index], &line[index + 1..])),
            _ => {}
        }
    }
    None
}

fn check_version(properties: &Properties) -> Result<(), FeedError> {
    let version: u32 = properties.value(VERSION_KEY)?;
    if version != FORMAT_VERSION {
        return Err(FeedError::Format(format!("unsupported format version {version}")));
    }
    Ok(())
}

pub fn forecast_to_properties(set: &ForecastSet) -> Properties {
    let mut properties = Properties::new();
    properties.put_value(VERSION_KEY, &FORMAT_VERSION);
    properties.put_value(SOURCE_KEY, &set.source);

    let source = set.source.as_str();
    let meta = |field: &str| format!("{source}/Meta/0/{field}");
    properties.put_field(&meta("LocationName"), &set.location_name);
    properties.put_field(&meta("Timezone"), &set.timezone);
    properties.put_option(&meta("RecordedAt"), set.recorded_at.as_ref());
    properties.put_option(&meta("FetchedAt"), set.fetched_at.as_ref());
    properties.put_value(&meta("ForecastCount"), &(set.forecasts.len() as u32));
    properties.put_value(&meta("AlertCount"), &(set.alerts.alerts.len() as u32));
    properties.put_option(&meta("AlertID"), set.alerts.identifier.as_ref());
    properties.put_option(
        &meta("StartPeriod"),
        set.period_range.map(|range| range.start).as_ref(),
    );
    properties.put_option(
        &meta("EndPeriod"),
        set.period_range.map(|range| range.end).as_ref(),
    );

    write_period(&mut properties, &format!("{source}/CC/0"), &set.current);
    for (index, forecast) in set.forecasts.iter().enumerate() {
        if let Some(day) = &forecast.day {
            write_period(&mut properties, &format!("{source}/FC/{}", index * 2), day);
        }
        if let Some(night) = &forecast.night {
            write_period(&mut properties, &format!("{source}/FC/{}", index * 2 + 1), night);
        }
    }
    for (index, alert) in set.alerts.alerts.iter().enumerate() {
        write_alert(&mut properties, &format!("{source}/Alert/{index}"), alert);
    }
    properties
}

pub fn forecast_from_properties(properties: &Properties) -> Result<ForecastSet, FeedError> {
    check_version(properties)?;
    let source: FeedSource = properties.value(SOURCE_KEY)?;
    let prefix = source.as_str();
    let meta = |field: &str| format!("{prefix}/Meta/0/{field}");

    let forecast_count: u32 = properties.value(&meta("ForecastCount"))?;
    let forecasts = (0..forecast_count)
        .map(|index| {
            Ok(LongRangeForecast {
                day: read_optional_period(properties, &format!("{prefix}/FC/{}", index * 2))?,
                night: read_optional_period(properties, &format!("{prefix}/FC/{}", index * 2 + 1))?,
            })
        })
        .collect::<Result<Vec<_>, FeedError>>()?;

    let alert_count: u32 = properties.value(&meta("AlertCount"))?;
    let alerts = (0..alert_count)
        .map(|index| read_alert(properties, &format!("{prefix}/Alert/{index}")))
        .collect::<Result<Vec<_>, FeedError>>()?;

    let start: Option<u32> = properties.option(&meta("StartPeriod"))?;
    let end: Option<u32> = properties.option(&meta("EndPeriod"))?;

    Ok(ForecastSet {
        source,
        location_name: properties.field(&meta("LocationName"))?,
        timezone: properties.field(&meta("Timezone"))?,
        current: read_period(properties, &format!("{prefix}/CC/0"))?,
        forecasts,
        alerts: AlertSet {
            alerts,
            identifier: properties.option(&meta("AlertID"))?,
        },
        period_range: start.zip(end).map(|(start, end)| PeriodRange { start, end }),
        recorded_at: properties.option(&meta("RecordedAt"))?,
        fetched_at: properties.option(&meta("FetchedAt"))?,
    })
}

fn write_period(properties: &mut Properties, prefix: &str, period: &ForecastPeriod) {
    let key = |field: &str| format!("{prefix}/{field}");
    properties.put_value(&key("Kind"), &period.kind);
    properties.put_field(&key("Date"), &period.date);
    properties.put_field(&key("Title"), &period.title);
    properties.put_field(&key("Temperature"), &period.temperature);
    properties.put_value(&key("Code"), &period.code);
    properties.put_field(&key("Condition"), &period.condition);
    properties.put_field(&key("Description"), &period.description);
    properties.put_field(&key("IconName"), &period.icon_name);
    properties.put_field(&key("Humidity"), &period.humidity);
    properties.put_field(&key("PrecipProbability"), &period.precip_probability);
    properties.put_field(&key("PrecipAccumulation"), &period.precip_accumulation);
    properties.put_value(&key("PrecipType"), &period.precip_type);
    properties.put_field(&key("CloudCover"), &period.cloud_cover);
    properties.put_field(&key("WindSpeed"), &period.wind_speed);
    properties.put_field(&key("WindGust"), &period.wind_gust);
    properties.put_field(&key("WindDegrees"), &period.wind_degrees);
    properties.put_field(&key("WindDirection"), &period.wind_direction);
    properties.put_field(&key("DewPoint"), &period.dew_point);
    properties.put_field(&key("FeelsLike"), &period.feels_like);
    properties.put_field(&key("Pressure"), &period.pressure);
    properties.put_field(&key("PressureTrend"), &period.pressure_trend);
    properties.put_field(&key("MoonPhase"), &period.moon_phase);
    properties.put_field(&key("Sunrise"), &period.sunrise);
    properties.put_field(&key("Sunset"), &period.sunset);
    properties.put_field(&key("DayStart"), &period.day_start);
    properties.put_field(&key("DayEnd"), &period.day_end);
    properties.put_field(&key("UvIndex"), &period.uv_index);
    properties.put_field(&key("Visibility"), &period.visibility);
}

fn read_period(properties: &Properties, prefix: &str) -> Result<ForecastPeriod, FeedError> {
    let key = |field: &str| format!("{prefix}/{field}");
    Ok(ForecastPeriod {
        kind: properties.value(&key("Kind"))?,
        date: properties.field(&key("Date"))?,
        title: properties.field(&key("Title"))?,
        temperature: properties.field(&key("Temperature"))?,
        code: properties.value(&key("Code"))?,
        condition: properties.field(&key("Condition"))?,
        description: properties.field(&key("Description"))?,
        icon_name: properties.field(&key("IconName"))?,
        humidity: properties.field(&key("Humidity"))?,
        precip_probability: properties.field(&key("PrecipProbability"))?,
        precip_accumulation: properties.field(&key("PrecipAccumulation"))?,
        precip_type: properties.value(&key("PrecipType"))?,
        cloud_cover: properties.field(&key("CloudCover"))?,
        wind_speed: properties.field(&key("WindSpeed"))?,
        wind_gust: properties.field(&key("WindGust"))?,
        wind_degrees: properties.field(&key("WindDegrees"))?,
        wind_direction: properties.field(&key("WindDirection"))?,
        dew_point: properties.field(&key("DewPoint"))?,
        feels_like: properties.field(&key("FeelsLike"))?,
        pressure: properties.field(&key("Pressure"))?,
        pressure_trend: properties.field(&key("PressureTrend"))?,
        moon_phase: properties.field(&key("MoonPhase"))?,
        sunrise: properties.field(&key("Sunrise"))?,
        sunset: properties.field(&key("Sunset"))?,
        day_start: properties.field(&key("DayStart"))?,
        day_end: properties.field(&key("DayEnd"))?,
        uv_index: properties.field(&key("UvIndex"))?,
        visibility: properties.field(&key("Visibility"))?,
    })
}

fn read_optional_period(
    properties: &Properties,
    prefix: &str,
) -> Result<Option<ForecastPeriod>, FeedError> {
    if !properties.contains_key(&format!("{prefix}/Kind")) {
        return Ok(None);
    }
    read_period(properties, prefix).map(Some)
}

fn write_alert(properties: &mut Properties, prefix: &str, alert: &Alert) {
    let key = |field: &str| format!("{prefix}/{field}");
    properties.put_value(&key("Region"), &alert.region);
    properties.put_value(&key("StartTime"), &alert.starts);
    properties.put_value(&key("ExpireTime"), &alert.expires);
    properties.put_value(&key("Title1"), &alert.title);
    properties.put_value(&key("Title2"), &alert.subtitle);
    properties.put_value(&key("Message1"), &alert.message);
    properties.put_value(&key("Message2"), &alert.detail);
    properties.put_value(&key("Message3"), &alert.attribution);
}

fn read_alert(properties: &Properties, prefix: &str) -> Result<Alert, FeedError> {
    let key = |field: &str| format!("{prefix}/{field}");
    Ok(Alert {
        region: properties.value(&key("Region"))?,
        starts: properties.value(&key("StartTime"))?,
        expires: properties.value(&key("ExpireTime"))?,
        title: properties.value(&key("Title1"))?,
        subtitle: properties.value(&key("Title2"))?,
        message: properties.value(&key("Message1"))?,
        detail: properties.value(&key("Message2"))?,
        attribution: properties.value(&key("Message3"))?,
    })
}

/// Registry entries only; forecast sets live in their own documents.
pub fn registry_to_properties(registry: &LocationRegistry) -> Properties {
    let mut properties = Properties::new();
    properties.put_value(VERSION_KEY, &FORMAT_VERSION);

    for location in registry.iter() {
        let key = |field: &str| format!("{LOCATION_PREFIX}{}/{field}", location.id());
        let coordinates = location.coordinates();
        properties.put_value(&key("name"), &location.name);
        properties.put_value(&key("country"), &location.country);
        properties.put_option(&key("latitude"), coordinates.map(|c| c.latitude).as_ref());
        properties.put_option(&key("longitude"), coordinates.map(|c| c.longitude).as_ref());
        properties.put_value(&key("units"), &location.units());
        properties.put_option(&key("lastChecked"), location.last_checked.as_ref());
        properties.put_option(&key("lastUpdated"), location.last_updated.as_ref());
        properties.put_value(&key("disallowUpdates"), &location.updates_disallowed);
        properties.put_option(&key("error"), location.error.as_ref());
    }

    properties.put_option(
        DEFAULT_LOCATION_KEY,
        registry.default_id().map(str::to_string).as_ref(),
    );
    properties
}

pub fn registry_from_properties(properties: &Properties) -> Result<LocationRegistry, FeedError> {
    check_version(properties)?;

    let ids: Vec<String> = properties
        .keys()
        .filter_map(|key| key.strip_prefix(LOCATION_PREFIX)?.strip_suffix("/name"))
        .map(str::to_string)
        .collect();

    let mut registry = LocationRegistry::new();
    for id in ids {
        let key = |field: &str| format!("{LOCATION_PREFIX}{id}/{field}");
        let latitude: Option<f64> = properties.option(&key("latitude"))?;
        let longitude: Option<f64> = properties.option(&key("longitude"))?;
        let coordinates = latitude
            .zip(longitude)
            .map(|(latitude, longitude)| Coordinates::new(latitude, longitude));

        let mut location = Location::with_id(
            id.as_str(),
            properties.value::<String>(&key("name"))?,
            properties.value::<String>(&key("country"))?,
            coordinates,
            properties.value(&key("units"))?,
        );
        location.last_checked = properties.option(&key("lastChecked"))?;
        location.last_updated = properties.option(&key("lastUpdated"))?;
        location.updates_disallowed = properties.value(&key("disallowUpdates"))?;
        location.error = properties.option(&key("error"))?;
        registry.add(location);
    }

    registry.restore_default(properties.option(DEFAULT_LOCATION_KEY)?);
    Ok(registry)
}

/// On-disk home of the registry and one forecast document per location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateStore {
    registry_path: PathBuf,
    forecasts_dir: PathBuf,
}

impl StateStore {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            registry_path: config.registry_path(),
            forecasts_dir: config.forecasts_dir(),
        }
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    pub fn forecast_path(&self, location_id: &str) -> PathBuf {
        self.forecasts_dir.join(format!("{location_id}.properties"))
    }

    /// Loads the registry with each location's cached forecast attached. A
    /// missing registry file is an empty registry.
    pub fn load(&self) -> io::Result<LocationRegistry> {
        if !self.registry_path.exists() {
            return Ok(LocationRegistry::new());
        }

        let text = fs::read_to_string(&self.registry_path)?;
        let properties = Properties::parse(&text).map_err(invalid_data)?;
        let mut registry = registry_from_properties(&properties).map_err(invalid_data)?;

        for id in registry.sorted_ids() {
            let forecast = self.load_forecast(&id)?;
            if let Some(location) = registry.get_mut(&id) {
                location.forecast = forecast;
            }
        }
        debug!(locations = registry.len(), "registry loaded");
        Ok(registry)
    }

    /// A corrupt forecast document reads as a cache miss.
    pub fn load_forecast(&self, location_id: &str) -> io::Result<Option<ForecastSet>> {
        let path = self.forecast_path(location_id);
        if !path.exists() {
            return Ok(None);
        }

        let text = fs::read_to_string(&path)?;
        let parsed = Properties::parse(&text).and_then(|properties| forecast_from_properties(&properties));
        match parsed {
            Ok(set) => Ok(Some(set)),
            Err(error) => {
                warn!(location = location_id, %error, "discarding unreadable forecast cache");
                Ok(None)
            }
        }
    }

    pub fn save(&self, registry: &LocationRegistry) -> io::Result<()> {
        for location in registry.iter() {
            if let Some(set) = &location.forecast {
                let document = forecast_to_properties(set).render(FORECAST_HEADER);
                write_atomic(&self.forecast_path(location.id()), document.as_bytes())?;
            }
        }

        let document = registry_to_properties(registry).render(REGISTRY_HEADER);
        write_atomic(&self.registry_path, document.as_bytes())
    }

    pub fn remove_forecast(&self, location_id: &str) -> io::Result<()> {
        match fs::remove_file(self.forecast_path(location_id)) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
            _ => Ok(()),
        }
    }
}

fn invalid_data(error: FeedError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error.to_string())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "state path must have a parent directory",
        )
    })?;
    fs::create_dir_all(parent)?;

    let tmp_path = path.with_extension(format!("{}.tmp", std::process::id()));
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
