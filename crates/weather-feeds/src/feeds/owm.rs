//! OpenWeatherMap one-call JSON: current conditions plus daily forecasts.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::condition::{self, Phase};
use crate::error::FeedError;
use crate::model::{
    FeedSource, Field, ForecastPeriod, ForecastSet, LongRangeForecast, PERCENT_NONE, PeriodKind,
    PeriodRange, PrecipType, Units, WIND_CALM, format_percent,
};

const MM_PER_INCH: f64 = 25.4;
const MOON_CYCLE_DAYS: f64 = 30.0;
const MAX_MOON_PHASE: u8 = 29;
const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

#[derive(Debug, Deserialize)]
struct OneCallResponse {
    timezone: Option<String>,
    current: Option<CurrentBlock>,
    #[serde(default)]
    daily: Vec<DailyBlock>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    id: Option<i64>,
    main: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HourlyVolume {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    dt: Option<i64>,
    temp: Option<f64>,
    feels_like: Option<f64>,
    pressure: Option<f64>,
    humidity: Option<f64>,
    dew_point: Option<f64>,
    uvi: Option<f64>,
    clouds: Option<f64>,
    visibility: Option<f64>,
    wind_speed: Option<f64>,
    wind_deg: Option<f64>,
    wind_gust: Option<f64>,
    #[serde(default)]
    weather: Vec<Condition>,
    rain: Option<HourlyVolume>,
    snow: Option<HourlyVolume>,
}

#[derive(Debug, Deserialize)]
struct DailyTemperature {
    min: Option<f64>,
    max: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DailyFeelsLike {
    day: Option<f64>,
    night: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    dt: Option<i64>,
    sunrise: Option<i64>,
    sunset: Option<i64>,
    moon_phase: Option<f64>,
    temp: Option<DailyTemperature>,
    feels_like: Option<DailyFeelsLike>,
    pressure: Option<f64>,
    humidity: Option<f64>,
    dew_point: Option<f64>,
    wind_speed: Option<f64>,
    wind_deg: Option<f64>,
    wind_gust: Option<f64>,
    clouds: Option<f64>,
    pop: Option<f64>,
    rain: Option<f64>,
    snow: Option<f64>,
    uvi: Option<f64>,
    #[serde(default)]
    weather: Vec<Condition>,
}

pub fn parse(document: &[u8], units: Units) -> Result<ForecastSet, FeedError> {
    let payload: OneCallResponse = serde_json::from_slice(document)
        .map_err(|error| FeedError::Format(format!("onecall payload: {error}")))?;

    let current = payload
        .current
        .ok_or_else(|| FeedError::Format("onecall payload: missing current".to_string()))?;

    let timezone_name = payload
        .timezone
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let zone: Tz = timezone_name
        .as_deref()
        .and_then(|name| name.parse().ok())
        .unwrap_or(Tz::UTC);

    let mut set = ForecastSet::new(FeedSource::Owm);
    set.timezone = Field::or_invalid(timezone_name);
    set.recorded_at = current.dt.and_then(|dt| DateTime::from_timestamp(dt, 0));
    set.current = build_current(&current, set.recorded_at, zone, units);

    for (index, day) in payload.daily.iter().enumerate() {
        let forecast = build_day(day, zone, units);
        if index == 0 {
            if let Some(first) = &forecast.day {
                let current = &mut set.current;
                current.day_start = first.day_start.clone();
                current.day_end = first.day_end.clone();
                current.sunrise = first.sunrise.clone();
                current.sunset = first.sunset.clone();
                current.moon_phase = first.moon_phase.clone();
                current.precip_probability = first.precip_probability.clone();
            }
        }
        set.forecasts.push(forecast);
        set.period_range = Some(PeriodRange::include(
            set.period_range,
            (index * 2 + 1) as u32,
        ));
    }
    if let Some(range) = set.period_range.as_mut() {
        range.start = 0;
    }

    Ok(set)
}

fn build_current(
    block: &CurrentBlock,
    recorded_at: Option<DateTime<Utc>>,
    zone: Tz,
    units: Units,
) -> ForecastPeriod {
    let mut period = ForecastPeriod::new(PeriodKind::Current);
    period.date = Field::or_invalid(recorded_at.map(|at| at.with_timezone(&zone).date_naive()));
    period.temperature = Field::or_invalid(block.temp);
    apply_condition(&mut period, block.weather.first(), Phase::Day);

    period.humidity = percent(block.humidity);
    period.cloud_cover = percent(block.clouds);

    let rain = block.rain.as_ref().map(|volume| volume.one_hour);
    let snow = block.snow.as_ref().map(|volume| volume.one_hour);
    apply_precipitation(&mut period, rain, snow, units);

    apply_wind(&mut period, block.wind_speed, block.wind_deg);
    period.wind_gust = Field::or_invalid(block.wind_gust);
    period.dew_point = Field::or_invalid(block.dew_point);
    period.feels_like = Field::or_invalid(block.feels_like);
    period.pressure = Field::or_invalid(block.pressure.map(|value| value.to_string()));
    period.pressure_trend = Field::NotSupported;
    period.uv_index = Field::or_invalid(block.uvi);
    period.visibility = Field::or_invalid(block.visibility);
    period
}

fn build_day(block: &DailyBlock, zone: Tz, units: Units) -> LongRangeForecast {
    let mut day = ForecastPeriod::new(PeriodKind::Day);
    day.date = Field::or_invalid(
        block
            .dt
            .and_then(|dt| DateTime::from_timestamp(dt, 0))
            .map(|at| at.with_timezone(&zone).date_naive()),
    );
    day.temperature = Field::or_invalid(block.temp.as_ref().and_then(|temp| temp.max));
    let weather = block.weather.first();
    apply_condition(&mut day, weather, Phase::Day);

    day.humidity = percent(block.humidity);
    day.precip_probability = Field::or_invalid(block.pop.map(|pop| (pop * 100.0) as i32));
    apply_precipitation(&mut day, block.rain.map(Some), block.snow.map(Some), units);
    day.cloud_cover = percent(block.clouds);

    apply_wind(&mut day, block.wind_speed, block.wind_deg);
    day.wind_gust = Field::or_invalid(block.wind_gust);
    day.dew_point = Field::or_invalid(block.dew_point);
    day.feels_like = Field::or_invalid(block.feels_like.as_ref().and_then(|feels| feels.day));
    day.pressure = Field::or_invalid(block.pressure.map(|value| value.to_string()));
    day.pressure_trend = Field::NotSupported;
    day.moon_phase = Field::or_invalid(block.moon_phase.map(moon_phase));

    let sunrise = block.sunrise.and_then(|at| DateTime::from_timestamp(at, 0));
    let sunset = block.sunset.and_then(|at| DateTime::from_timestamp(at, 0));
    day.day_start = Field::or_invalid(sunrise);
    day.day_end = Field::or_invalid(sunset);
    day.sunrise = Field::or_invalid(sunrise.map(|at| clock_text(at, zone)));
    day.sunset = Field::or_invalid(sunset.map(|at| clock_text(at, zone)));
    day.uv_index = Field::or_invalid(block.uvi);
    day.visibility = Field::NotSupported;

    let mut night = day.clone();
    night.kind = PeriodKind::Night;
    night.temperature = Field::or_invalid(block.temp.as_ref().and_then(|temp| temp.min));
    night.feels_like = Field::or_invalid(block.feels_like.as_ref().and_then(|feels| feels.night));
    night.code = condition::normalize_owm(
        weather.and_then(|condition| condition.id),
        weather.and_then(|condition| condition.main.as_deref()),
        Phase::Night,
    );

    LongRangeForecast {
        day: Some(day),
        night: Some(night),
    }
}

fn apply_condition(period: &mut ForecastPeriod, weather: Option<&Condition>, phase: Phase) {
    let Some(weather) = weather else {
        period.condition = Field::Invalid;
        period.description = Field::Invalid;
        return;
    };
    period.code = condition::normalize_owm(weather.id, weather.main.as_deref(), phase);
    period.condition = Field::or_invalid(weather.main.clone());
    period.description = Field::or_invalid(weather.description.clone());
    period.icon_name = Field::or_invalid(weather.id.map(|id| id.to_string()));
}

fn percent(value: Option<f64>) -> Field<String> {
    Field::or_invalid(value.map(|value| format_percent(value as i64)))
}

/// `rain`/`snow` are `None` when the block is absent and `Some(None)` when
/// the block is present without a usable volume.
fn apply_precipitation(
    period: &mut ForecastPeriod,
    rain: Option<Option<f64>>,
    snow: Option<Option<f64>>,
    units: Units,
) {
    let (kind, volume) = match (rain, snow) {
        (Some(volume), _) => (PrecipType::Rain, volume),
        (None, Some(volume)) => (PrecipType::Snow, volume),
        (None, None) => {
            period.precip_type = PrecipType::None;
            period.precip_accumulation = Field::Value(PERCENT_NONE.to_string());
            return;
        }
    };
    period.precip_type = kind;
    period.precip_accumulation = match volume {
        Some(millimetres) => Field::Value(accumulation_text(millimetres, units)),
        None => Field::Value(PERCENT_NONE.to_string()),
    };
}

/// Renders a millimetre volume as a rough range in the display units.
pub fn accumulation_text(millimetres: f64, units: Units) -> String {
    let (value, suffix, below_one) = match units {
        Units::Standard => (millimetres / MM_PER_INCH, "inches", "<1 inch"),
        Units::Metric => (millimetres, "mm", "<1 mm"),
    };
    if value < 1.0 {
        return below_one.to_string();
    }

    let rounded = (value * 2.0).round() / 2.0;
    let whole = rounded.trunc() as i64;
    if rounded == rounded.floor() {
        format!("{}-{} {suffix}", whole - 1, whole + 1)
    } else {
        format!("{}-{} {suffix}", whole, whole + 1)
    }
}

fn apply_wind(period: &mut ForecastPeriod, speed: Option<f64>, degrees: Option<f64>) {
    period.wind_speed = Field::or_invalid(speed);
    if speed.is_some_and(|speed| speed == 0.0) {
        period.wind_degrees = Field::Invalid;
        period.wind_direction = Field::Value(WIND_CALM.to_string());
        return;
    }
    period.wind_degrees = Field::or_invalid(degrees.map(|degrees| degrees as i32));
    period.wind_direction = Field::or_invalid(degrees.map(compass_direction));
}

/// 16-point compass name for a bearing in degrees.
pub fn compass_direction(degrees: f64) -> String {
    let index = (degrees / 22.5 + 0.5) as usize % COMPASS_POINTS.len();
    COMPASS_POINTS[index].to_string()
}

fn moon_phase(fraction: f64) -> u8 {
    let day = (fraction * MOON_CYCLE_DAYS).floor();
    day.clamp(0.0, f64::from(MAX_MOON_PHASE)) as u8
}

fn clock_text(at: DateTime<Utc>, zone: Tz) -> String {
    at.with_timezone(&zone).format("%-I:%M").to_string()
}
