//! Weather Underground XML dialect: current observation, 12-hour text
//! forecast, daily simple forecast, alerts and astronomy.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::condition::{self, Phase};
use crate::error::FeedError;
use crate::feeds::AlertText;
use crate::feeds::walker::{self, Attributes, ElementSink, Leaf, SectionStack, apply_leaf};
use crate::model::{
    Alert, AlertRegion, AlertSet, FeedSource, Field, ForecastPeriod, ForecastSet,
    LongRangeForecast, PeriodKind, PeriodRange, PrecipType, Units, WIND_CALM, format_percent,
};
use crate::na::{self, NA_ICON};

const ROOT: &str = "response";
const NIGHT_PREFIX: &str = "nt_";
const EMPTY_DOC: &str = "Weather Underground returned empty doc";
const ERROR_STATUS: &str = "Weather Underground returned error status.";

pub fn parse(document: &[u8], units: Units) -> Result<ForecastSet, FeedError> {
    let mut sink = WuDocument::new(units);
    walker::walk(document, &mut sink)?;
    sink.finish()
}

#[derive(Debug, Default)]
struct Observation {
    period: ForecastPeriod,
    location_name: Field<String>,
    timezone: Field<String>,
    epoch: Option<i64>,
    icon: Option<String>,
    icon_url: Option<String>,
}

impl Observation {
    /// Every field the observation can carry starts out invalid so a
    /// missing leaf is distinguishable from one the feed never has.
    fn opened() -> Self {
        let mut period = ForecastPeriod::new(PeriodKind::Current);
        for text in [
            &mut period.condition,
            &mut period.humidity,
            &mut period.wind_direction,
            &mut period.pressure,
            &mut period.pressure_trend,
            &mut period.precip_accumulation,
        ] {
            *text = Field::Invalid;
        }
        for number in [
            &mut period.temperature,
            &mut period.wind_speed,
            &mut period.wind_gust,
            &mut period.dew_point,
            &mut period.feels_like,
            &mut period.visibility,
            &mut period.uv_index,
        ] {
            *number = Field::Invalid;
        }
        period.wind_degrees = Field::Invalid;

        Self {
            period,
            location_name: Field::Invalid,
            timezone: Field::Invalid,
            ..Self::default()
        }
    }
}

const OBSERVATION: &[Leaf<Observation>] = &[
    Leaf {
        within: "current_observation",
        path: &["display_location", "full"],
        units: None,
        apply: |obs, v| obs.location_name = Field::text(v),
    },
    Leaf {
        within: "current_observation",
        path: &["current_observation", "observation_epoch"],
        units: None,
        apply: |obs, v| obs.epoch = v.trim().parse().ok(),
    },
    Leaf {
        within: "current_observation",
        path: &["current_observation", "local_tz_long"],
        units: None,
        apply: |obs, v| obs.timezone = Field::text(v),
    },
    Leaf {
        within: "current_observation",
        path: &["current_observation", "weather"],
        units: None,
        apply: |obs, v| obs.period.condition = Field::text(v),
    },
    Leaf {
        within: "current_observation",
        path: &["temp_f"],
        units: Some(Units::Standard),
        apply: |obs, v| obs.period.temperature = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["temp_c"],
        units: Some(Units::Metric),
        apply: |obs, v| obs.period.temperature = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["relative_humidity"],
        units: None,
        apply: |obs, v| obs.period.humidity = Field::text(v),
    },
    Leaf {
        within: "current_observation",
        path: &["wind_degrees"],
        units: None,
        apply: |obs, v| obs.period.wind_degrees = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["wind_dir"],
        units: None,
        apply: |obs, v| obs.period.wind_direction = Field::text(v),
    },
    Leaf {
        within: "current_observation",
        path: &["wind_mph"],
        units: Some(Units::Standard),
        apply: |obs, v| obs.period.wind_speed = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["wind_kph"],
        units: Some(Units::Metric),
        apply: |obs, v| obs.period.wind_speed = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["wind_gust_mph"],
        units: Some(Units::Standard),
        apply: |obs, v| obs.period.wind_gust = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["wind_gust_kph"],
        units: Some(Units::Metric),
        apply: |obs, v| obs.period.wind_gust = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["pressure_in"],
        units: Some(Units::Standard),
        apply: |obs, v| obs.period.pressure = Field::text(v),
    },
    Leaf {
        within: "current_observation",
        path: &["pressure_mb"],
        units: Some(Units::Metric),
        apply: |obs, v| obs.period.pressure = Field::text(v),
    },
    Leaf {
        within: "current_observation",
        path: &["pressure_trend"],
        units: None,
        apply: |obs, v| obs.period.pressure_trend = Field::text(v),
    },
    Leaf {
        within: "current_observation",
        path: &["dewpoint_f"],
        units: Some(Units::Standard),
        apply: |obs, v| obs.period.dew_point = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["dewpoint_c"],
        units: Some(Units::Metric),
        apply: |obs, v| obs.period.dew_point = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["feelslike_f"],
        units: Some(Units::Standard),
        apply: |obs, v| obs.period.feels_like = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["feelslike_c"],
        units: Some(Units::Metric),
        apply: |obs, v| obs.period.feels_like = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["visibility_mi"],
        units: Some(Units::Standard),
        apply: |obs, v| obs.period.visibility = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["visibility_km"],
        units: Some(Units::Metric),
        apply: |obs, v| obs.period.visibility = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["precip_today_in"],
        units: Some(Units::Standard),
        apply: |obs, v| obs.period.precip_accumulation = Field::text(v),
    },
    Leaf {
        within: "current_observation",
        path: &["precip_today_metric"],
        units: Some(Units::Metric),
        apply: |obs, v| obs.period.precip_accumulation = Field::text(v),
    },
    Leaf {
        within: "current_observation",
        path: &["UV"],
        units: None,
        apply: |obs, v| obs.period.uv_index = Field::parse(v),
    },
    Leaf {
        within: "current_observation",
        path: &["current_observation", "icon"],
        units: None,
        apply: |obs, v| obs.icon = na::available(v).map(str::to_string),
    },
    Leaf {
        within: "current_observation",
        path: &["current_observation", "icon_url"],
        units: None,
        apply: |obs, v| obs.icon_url = na::available(v).map(str::to_string),
    },
];

#[derive(Debug, Clone, Default)]
struct TextPeriod {
    index: Option<u32>,
    icon: String,
    title: Field<String>,
    text: Field<String>,
    pop: Field<i32>,
}

impl TextPeriod {
    fn opened() -> Self {
        Self {
            index: None,
            icon: NA_ICON.to_string(),
            title: Field::Invalid,
            text: Field::Invalid,
            pop: Field::Invalid,
        }
    }
}

const TEXT_FORECAST: &[Leaf<TextPeriod>] = &[
    Leaf {
        within: "txt_forecast",
        path: &["forecastday", "period"],
        units: None,
        apply: |period, v| period.index = v.trim().parse().ok(),
    },
    Leaf {
        within: "txt_forecast",
        path: &["forecastday", "icon"],
        units: None,
        apply: |period, v| period.icon = na::or_marker(Some(v), NA_ICON).to_string(),
    },
    Leaf {
        within: "txt_forecast",
        path: &["forecastday", "title"],
        units: None,
        apply: |period, v| period.title = Field::text(v),
    },
    Leaf {
        within: "txt_forecast",
        path: &["forecastday", "fcttext"],
        units: Some(Units::Standard),
        apply: |period, v| period.text = Field::text(v),
    },
    Leaf {
        within: "txt_forecast",
        path: &["forecastday", "fcttext_metric"],
        units: Some(Units::Metric),
        apply: |period, v| period.text = Field::text(v),
    },
    Leaf {
        within: "txt_forecast",
        path: &["forecastday", "pop"],
        units: None,
        apply: |period, v| period.pop = Field::parse(v),
    },
];

#[derive(Debug, Clone, Default)]
struct Wind {
    speed: Field<f64>,
    degrees: Field<i32>,
    direction: Field<String>,
}

#[derive(Debug, Clone, Default)]
struct SimpleDay {
    index: Option<u32>,
    day: Option<u32>,
    month: Option<u32>,
    year: Option<i32>,
    high: Field<f64>,
    low: Field<f64>,
    conditions: Field<String>,
    icon: String,
    pop: Field<i32>,
    humidity: Field<i64>,
    qpf_day: Field<f64>,
    qpf_night: Field<f64>,
    snow_day: Field<f64>,
    snow_night: Field<f64>,
    max_wind: Wind,
    ave_wind: Wind,
}

impl SimpleDay {
    fn opened() -> Self {
        let invalid_wind = || Wind {
            speed: Field::Invalid,
            degrees: Field::Invalid,
            direction: Field::Invalid,
        };
        Self {
            high: Field::Invalid,
            low: Field::Invalid,
            conditions: Field::Invalid,
            icon: NA_ICON.to_string(),
            pop: Field::Invalid,
            humidity: Field::Invalid,
            qpf_day: Field::Invalid,
            qpf_night: Field::Invalid,
            snow_day: Field::Invalid,
            snow_night: Field::Invalid,
            max_wind: invalid_wind(),
            ave_wind: invalid_wind(),
            ..Self::default()
        }
    }

    fn date(&self) -> Field<NaiveDate> {
        let date = match (self.year, self.month, self.day) {
            (Some(year), Some(month), Some(day)) => NaiveDate::from_ymd_opt(year, month, day),
            _ => None,
        };
        Field::or_invalid(date)
    }
}

const SIMPLE_FORECAST: &[Leaf<SimpleDay>] = &[
    Leaf {
        within: "simpleforecast",
        path: &["forecastday", "period"],
        units: None,
        apply: |day, v| day.index = v.trim().parse().ok(),
    },
    Leaf {
        within: "simpleforecast",
        path: &["date", "day"],
        units: None,
        apply: |day, v| day.day = v.trim().parse().ok(),
    },
    Leaf {
        within: "simpleforecast",
        path: &["date", "month"],
        units: None,
        apply: |day, v| day.month = v.trim().parse().ok(),
    },
    Leaf {
        within: "simpleforecast",
        path: &["date", "year"],
        units: None,
        apply: |day, v| day.year = v.trim().parse().ok(),
    },
    Leaf {
        within: "simpleforecast",
        path: &["high", "fahrenheit"],
        units: Some(Units::Standard),
        apply: |day, v| day.high = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["high", "celsius"],
        units: Some(Units::Metric),
        apply: |day, v| day.high = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["low", "fahrenheit"],
        units: Some(Units::Standard),
        apply: |day, v| day.low = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["low", "celsius"],
        units: Some(Units::Metric),
        apply: |day, v| day.low = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["forecastday", "conditions"],
        units: None,
        apply: |day, v| day.conditions = Field::text(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["forecastday", "icon"],
        units: None,
        apply: |day, v| day.icon = na::or_marker(Some(v), NA_ICON).to_string(),
    },
    Leaf {
        within: "simpleforecast",
        path: &["forecastday", "pop"],
        units: None,
        apply: |day, v| day.pop = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["forecastday", "avehumidity"],
        units: None,
        apply: |day, v| day.humidity = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["qpf_day", "in"],
        units: Some(Units::Standard),
        apply: |day, v| day.qpf_day = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["qpf_day", "mm"],
        units: Some(Units::Metric),
        apply: |day, v| day.qpf_day = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["qpf_night", "in"],
        units: Some(Units::Standard),
        apply: |day, v| day.qpf_night = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["qpf_night", "mm"],
        units: Some(Units::Metric),
        apply: |day, v| day.qpf_night = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["snow_day", "in"],
        units: Some(Units::Standard),
        apply: |day, v| day.snow_day = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["snow_day", "cm"],
        units: Some(Units::Metric),
        apply: |day, v| day.snow_day = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["snow_night", "in"],
        units: Some(Units::Standard),
        apply: |day, v| day.snow_night = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["snow_night", "cm"],
        units: Some(Units::Metric),
        apply: |day, v| day.snow_night = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["maxwind", "mph"],
        units: Some(Units::Standard),
        apply: |day, v| day.max_wind.speed = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["maxwind", "kph"],
        units: Some(Units::Metric),
        apply: |day, v| day.max_wind.speed = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["maxwind", "degrees"],
        units: None,
        apply: |day, v| day.max_wind.degrees = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["maxwind", "dir"],
        units: None,
        apply: |day, v| day.max_wind.direction = Field::text(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["avewind", "mph"],
        units: Some(Units::Standard),
        apply: |day, v| day.ave_wind.speed = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["avewind", "kph"],
        units: Some(Units::Metric),
        apply: |day, v| day.ave_wind.speed = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["avewind", "degrees"],
        units: None,
        apply: |day, v| day.ave_wind.degrees = Field::parse(v),
    },
    Leaf {
        within: "simpleforecast",
        path: &["avewind", "dir"],
        units: None,
        apply: |day, v| day.ave_wind.direction = Field::text(v),
    },
];

#[derive(Debug, Clone, Default)]
struct OpenAlert {
    description: String,
    date: String,
    expires: String,
    message: String,
    warning_name: String,
    level_name: String,
    level_description: String,
    attribution: String,
    european: bool,
}

impl OpenAlert {
    fn into_alert(self) -> Alert {
        if self.european {
            Alert {
                region: AlertRegion::European,
                starts: self.date,
                expires: self.expires,
                title: self.warning_name,
                subtitle: self.level_name,
                message: self.level_description,
                detail: self.description,
                attribution: self.attribution,
            }
        } else {
            Alert {
                region: AlertRegion::Us,
                starts: self.date,
                expires: self.expires,
                title: self.description,
                message: self.message,
                ..Alert::default()
            }
        }
    }
}

const ALERT_FIELDS: &[Leaf<OpenAlert>] = &[
    Leaf {
        within: "alerts",
        path: &["alert", "description"],
        units: None,
        apply: |alert, v| alert.description = v.to_string(),
    },
    Leaf {
        within: "alerts",
        path: &["alert", "date"],
        units: None,
        apply: |alert, v| alert.date = v.to_string(),
    },
    Leaf {
        within: "alerts",
        path: &["alert", "expires"],
        units: None,
        apply: |alert, v| alert.expires = v.to_string(),
    },
    Leaf {
        within: "alerts",
        path: &["alert", "message"],
        units: None,
        apply: |alert, v| alert.message = v.to_string(),
    },
    Leaf {
        within: "alerts",
        path: &["alert", "wtype_meteoalarm_name"],
        units: None,
        apply: |alert, v| {
            alert.warning_name = v.to_string();
            alert.european = true;
        },
    },
    Leaf {
        within: "alerts",
        path: &["alert", "level_meteoalarm_name"],
        units: None,
        apply: |alert, v| {
            alert.level_name = v.to_string();
            alert.european = true;
        },
    },
    Leaf {
        within: "alerts",
        path: &["alert", "level_meteoalarm_description"],
        units: None,
        apply: |alert, v| {
            alert.level_description = v.to_string();
            alert.european = true;
        },
    },
    Leaf {
        within: "alerts",
        path: &["alert", "attribution"],
        units: None,
        apply: |alert, v| {
            alert.attribution = v.to_string();
            alert.european = true;
        },
    },
];

#[derive(Debug, Default)]
struct AlertSection {
    open: OpenAlert,
    alerts: Vec<Alert>,
    text: AlertText,
    identifier: Option<i32>,
}

#[derive(Debug, Default)]
struct Astronomy {
    sunrise_hour: Option<u32>,
    sunrise_minute: Option<u32>,
    sunset_hour: Option<u32>,
    sunset_minute: Option<u32>,
    age: Option<u8>,
}

const ASTRONOMY: &[Leaf<Astronomy>] = &[
    Leaf {
        within: "moon_phase",
        path: &["sunrise", "hour"],
        units: None,
        apply: |astro, v| astro.sunrise_hour = v.trim().parse().ok(),
    },
    Leaf {
        within: "moon_phase",
        path: &["sunrise", "minute"],
        units: None,
        apply: |astro, v| astro.sunrise_minute = v.trim().parse().ok(),
    },
    Leaf {
        within: "moon_phase",
        path: &["sunset", "hour"],
        units: None,
        apply: |astro, v| astro.sunset_hour = v.trim().parse().ok(),
    },
    Leaf {
        within: "moon_phase",
        path: &["sunset", "minute"],
        units: None,
        apply: |astro, v| astro.sunset_minute = v.trim().parse().ok(),
    },
    Leaf {
        within: "moon_phase",
        path: &["moon_phase", "ageOfMoon"],
        units: None,
        apply: |astro, v| astro.age = v.trim().parse().ok(),
    },
];

#[derive(Debug, Default)]
struct UpstreamError {
    kind: Option<String>,
    description: Option<String>,
}

impl UpstreamError {
    fn message(&self) -> String {
        let mut message = ERROR_STATUS.to_string();
        if let Some(kind) = &self.kind {
            message.push_str(&format!(" Type: {kind}"));
        }
        if let Some(description) = &self.description {
            message.push_str(&format!(" Description: {description}"));
        }
        message
    }
}

const ERROR_FIELDS: &[Leaf<UpstreamError>] = &[
    Leaf {
        within: "error",
        path: &["error", "type"],
        units: None,
        apply: |error, v| error.kind = Some(v.to_string()),
    },
    Leaf {
        within: "error",
        path: &["error", "description"],
        units: None,
        apply: |error, v| error.description = Some(v.to_string()),
    },
];

struct WuDocument {
    units: Units,
    found_root: bool,
    error: Option<UpstreamError>,
    observation: Option<Observation>,
    text_period: TextPeriod,
    text_periods: BTreeMap<u32, TextPeriod>,
    simple_day: SimpleDay,
    simple_days: Vec<SimpleDay>,
    alerts: Option<AlertSection>,
    astronomy: Option<Astronomy>,
    period_range: Option<PeriodRange>,
}

impl WuDocument {
    fn new(units: Units) -> Self {
        Self {
            units,
            found_root: false,
            error: None,
            observation: None,
            text_period: TextPeriod::default(),
            text_periods: BTreeMap::new(),
            simple_day: SimpleDay::default(),
            simple_days: Vec::new(),
            alerts: None,
            astronomy: None,
            period_range: None,
        }
    }

    fn commit_text_period(&mut self) {
        let mut period = std::mem::take(&mut self.text_period);
        let Some(index) = period.index else {
            return;
        };
        if index % 2 == 1 && period.icon != NA_ICON && !period.icon.starts_with(NIGHT_PREFIX) {
            period.icon = format!("{NIGHT_PREFIX}{}", period.icon);
        }
        self.period_range = Some(PeriodRange::include(self.period_range, index));
        self.text_periods.insert(index, period);
    }

    fn finish(self) -> Result<ForecastSet, FeedError> {
        if let Some(error) = &self.error {
            return Err(FeedError::Upstream(error.message()));
        }
        if !self.found_root {
            return Err(FeedError::Format(EMPTY_DOC.to_string()));
        }

        let units = self.units;
        let mut set = ForecastSet::new(FeedSource::Wu);
        set.period_range = self.period_range;

        if let Some(observation) = self.observation {
            let timezone: Option<Tz> = observation
                .timezone
                .value()
                .and_then(|name| name.parse().ok());
            let recorded_at = observation
                .epoch
                .and_then(|epoch| DateTime::from_timestamp(epoch, 0));

            let mut current = observation.period;
            let local_date = recorded_at.map(|at| match timezone {
                Some(tz) => at.with_timezone(&tz).date_naive(),
                None => at.date_naive(),
            });
            current.date = Field::or_invalid(local_date);

            let icon = observation
                .icon
                .or_else(|| observation.icon_url.as_deref().map(condition::icon_name_from_url))
                .unwrap_or_else(|| NA_ICON.to_string());
            current.code = condition::normalize_icon_name(&icon, Phase::Day);
            current.icon_name = Field::Value(icon);

            if let Some(astronomy) = &self.astronomy {
                apply_astronomy(&mut current, astronomy, timezone, local_date);
            }

            set.location_name = observation.location_name;
            set.timezone = observation.timezone;
            set.recorded_at = recorded_at;
            set.current = current;
        }

        let mut simple_days = self.simple_days;
        simple_days.sort_by_key(|day| day.index.unwrap_or(u32::MAX));

        let base = self
            .period_range
            .map(|range| range.start - range.start % 2)
            .unwrap_or_default();
        let text_days = self
            .period_range
            .map(|range| ((range.end - base) / 2 + 1) as usize)
            .unwrap_or_default();
        let day_count = simple_days.len().max(text_days);

        for n in 0..day_count {
            let simple = simple_days.get(n);
            let day_text = self.text_periods.get(&(base + 2 * n as u32));
            let night_text = self.text_periods.get(&(base + 2 * n as u32 + 1));

            let day = (simple.is_some() || day_text.is_some())
                .then(|| build_half(PeriodKind::Day, simple, day_text, units));
            let night = (simple.is_some() || night_text.is_some())
                .then(|| build_half(PeriodKind::Night, simple, night_text, units));
            set.forecasts.push(LongRangeForecast { day, night });
        }

        if let Some(section) = self.alerts {
            set.alerts = AlertSet {
                alerts: section.alerts,
                identifier: Some(section.identifier.unwrap_or_else(|| section.text.identifier())),
            };
        }

        Ok(set)
    }
}

impl ElementSink for WuDocument {
    fn open(&mut self, stack: &SectionStack, _attributes: &Attributes) -> Result<(), FeedError> {
        let name = stack.current();
        if stack.depth() == 1 && name == ROOT {
            self.found_root = true;
        }

        match name {
            "current_observation" => self.observation = Some(Observation::opened()),
            "forecastday" if stack.within("txt_forecast") => {
                self.text_period = TextPeriod::opened();
            }
            "forecastday" if stack.within("simpleforecast") => {
                self.simple_day = SimpleDay::opened();
            }
            "alerts" => self.alerts = Some(AlertSection::default()),
            "alert" => {
                if let Some(section) = self.alerts.as_mut() {
                    section.open = OpenAlert::default();
                    section.text.count_alert();
                }
            }
            "moon_phase" if stack.parent() == Some(ROOT) => {
                self.astronomy = Some(Astronomy::default());
            }
            "error" => self.error = Some(UpstreamError::default()),
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, stack: &SectionStack, text: &str) -> Result<(), FeedError> {
        let units = self.units;
        let name = stack.current();

        if let Some(error) = self.error.as_mut() {
            if apply_leaf(ERROR_FIELDS, stack, units, error, text) {
                return Ok(());
            }
        }

        if stack.within("current_observation") {
            if let Some(observation) = self.observation.as_mut() {
                apply_leaf(OBSERVATION, stack, units, observation, text);
            }
        } else if stack.within("txt_forecast") {
            if name == "forecastday" {
                self.commit_text_period();
            } else {
                apply_leaf(TEXT_FORECAST, stack, units, &mut self.text_period, text);
            }
        } else if stack.within("simpleforecast") {
            if name == "forecastday" {
                self.simple_days.push(std::mem::take(&mut self.simple_day));
            } else {
                apply_leaf(SIMPLE_FORECAST, stack, units, &mut self.simple_day, text);
            }
        } else if stack.within("alerts") {
            if let Some(section) = self.alerts.as_mut() {
                match name {
                    "alert" => {
                        let alert = std::mem::take(&mut section.open).into_alert();
                        section.alerts.push(alert);
                    }
                    "alerts" => section.identifier = Some(section.text.identifier()),
                    _ => {
                        apply_leaf(ALERT_FIELDS, stack, units, &mut section.open, text);
                        if stack.parent() == Some("alert") {
                            section.text.push_leaf(text);
                        }
                    }
                }
            }
        } else if stack.within("moon_phase") {
            if let Some(astronomy) = self.astronomy.as_mut() {
                apply_leaf(ASTRONOMY, stack, units, astronomy, text);
            }
        }
        Ok(())
    }
}

fn build_half(
    kind: PeriodKind,
    simple: Option<&SimpleDay>,
    text: Option<&TextPeriod>,
    units: Units,
) -> ForecastPeriod {
    let mut period = ForecastPeriod::new(kind);
    let mut icon = NA_ICON.to_string();

    if let Some(simple) = simple {
        period.date = simple.date();
        period.humidity = simple.humidity.clone().map(format_percent);
        period.precip_probability = simple.pop.clone();
        icon = simple.icon.clone();

        let (temperature, rain, snow, wind) = match kind {
            PeriodKind::Night => (
                &simple.low,
                &simple.qpf_night,
                &simple.snow_night,
                &simple.ave_wind,
            ),
            PeriodKind::Day | PeriodKind::Current => {
                period.condition = simple.conditions.clone();
                (
                    &simple.high,
                    &simple.qpf_day,
                    &simple.snow_day,
                    &simple.max_wind,
                )
            }
        };
        period.temperature = temperature.clone();
        apply_precipitation(&mut period, rain, snow, units);
        apply_wind(&mut period, wind);
    }

    if let Some(text) = text {
        period.title = text.title.clone();
        period.description = text.text.clone();
        if text.pop.is_value() {
            period.precip_probability = text.pop.clone();
        }
        if text.icon != NA_ICON {
            icon = text.icon.clone();
        }
    }

    period.code = condition::normalize_icon_name(&icon, Phase::from_kind(kind));
    period.icon_name = Field::Value(icon);
    period
}

fn apply_precipitation(period: &mut ForecastPeriod, rain: &Field<f64>, snow: &Field<f64>, units: Units) {
    let (rain_suffix, snow_suffix) = if units.is_metric() {
        ("mm", "cm")
    } else {
        ("in", "in")
    };

    match (rain.value().copied(), snow.value().copied()) {
        (_, Some(snow)) if snow > 0.0 => {
            period.precip_type = PrecipType::Snow;
            period.precip_accumulation = Field::Value(format!("{snow} {snow_suffix}"));
        }
        (Some(rain), _) if rain > 0.0 => {
            period.precip_type = PrecipType::Rain;
            period.precip_accumulation = Field::Value(format!("{rain} {rain_suffix}"));
        }
        (None, None) => {
            period.precip_type = PrecipType::None;
            period.precip_accumulation = Field::Invalid;
        }
        _ => {
            period.precip_type = PrecipType::None;
            period.precip_accumulation = Field::Value(PrecipType::None.as_str().to_string());
        }
    }
}

fn apply_wind(period: &mut ForecastPeriod, wind: &Wind) {
    period.wind_speed = wind.speed.clone();
    if wind.speed.value().is_some_and(|speed| *speed == 0.0) {
        period.wind_degrees = Field::Invalid;
        period.wind_direction = Field::Value(WIND_CALM.to_string());
    } else {
        period.wind_degrees = wind.degrees.clone();
        period.wind_direction = wind.direction.clone();
    }
}

fn apply_astronomy(
    period: &mut ForecastPeriod,
    astronomy: &Astronomy,
    timezone: Option<Tz>,
    local_date: Option<NaiveDate>,
) {
    period.moon_phase = Field::or_invalid(astronomy.age);

    let bounds = [
        (astronomy.sunrise_hour, astronomy.sunrise_minute),
        (astronomy.sunset_hour, astronomy.sunset_minute),
    ]
    .map(|(hour, minute)| hour.zip(minute));

    let [sunrise, sunset] = bounds;
    period.sunrise = Field::or_invalid(sunrise.map(|(h, m)| clock_text(h, m)));
    period.sunset = Field::or_invalid(sunset.map(|(h, m)| clock_text(h, m)));

    if let (Some(tz), Some(date)) = (timezone, local_date) {
        period.day_start = Field::or_invalid(sunrise.and_then(|(h, m)| local_instant(tz, date, h, m)));
        period.day_end = Field::or_invalid(sunset.and_then(|(h, m)| local_instant(tz, date, h, m)));
    }
}

/// 12-hour `h:mm` text.
fn clock_text(hour: u32, minute: u32) -> String {
    let hour = match hour % 12 {
        0 => 12,
        other => other,
    };
    format!("{hour}:{minute:02}")
}

fn local_instant(tz: Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let local = date.and_hms_opt(hour, minute, 0)?;
    tz.from_local_datetime(&local)
        .single()
        .map(|at| at.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../../tests/fixtures/wu_forecast.xml");

    fn parse_fixture(units: Units) -> ForecastSet {
        parse(FIXTURE.as_bytes(), units).expect("fixture parses")
    }

    #[test]
    fn current_observation_binds_standard_unit_leaves() {
        let set = parse_fixture(Units::Standard);
        let current = &set.current;

        assert_eq!(set.location_name, Field::Value("Kansas City, MO".to_string()));
        assert_eq!(set.timezone, Field::Value("America/Chicago".to_string()));
        assert_eq!(
            set.recorded_at,
            Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).single()
        );
        assert_eq!(current.kind, PeriodKind::Current);
        assert_eq!(current.temperature, Field::Value(71.6));
        assert_eq!(current.wind_speed, Field::Value(8.0));
        assert_eq!(current.wind_gust, Field::Invalid);
        assert_eq!(current.pressure, Field::Value("29.97".to_string()));
        assert_eq!(current.humidity, Field::Value("65%".to_string()));
        assert_eq!(current.code, 30);
        assert_eq!(current.icon_name, Field::Value("partlycloudy".to_string()));
        assert_eq!(current.date, Field::Value(NaiveDate::from_ymd_opt(2026, 6, 1).expect("date")));
    }

    #[test]
    fn metric_units_select_metric_siblings() {
        let set = parse_fixture(Units::Metric);
        assert_eq!(set.current.temperature, Field::Value(22.0));
        assert_eq!(set.current.wind_speed, Field::Value(12.9));
        assert_eq!(set.current.pressure, Field::Value("1015".to_string()));
        let day = set.forecasts[1].day.as_ref().expect("day");
        assert_eq!(day.temperature, Field::Value(27.0));
        assert_eq!(day.precip_accumulation, Field::Value("10 mm".to_string()));
    }

    #[test]
    fn astronomy_sets_daylight_bounds_in_local_zone() {
        let current = parse_fixture(Units::Standard).current;
        assert_eq!(current.sunrise, Field::Value("5:48".to_string()));
        assert_eq!(current.sunset, Field::Value("8:42".to_string()));
        assert_eq!(current.moon_phase, Field::Value(10));
        assert_eq!(
            current.day_start.value().copied(),
            Utc.with_ymd_and_hms(2026, 6, 1, 10, 48, 0).single()
        );
        assert_eq!(
            current.day_end.value().copied(),
            Utc.with_ymd_and_hms(2026, 6, 2, 1, 42, 0).single()
        );
    }

    #[test]
    fn text_and_simple_forecasts_merge_into_day_pairs() {
        let set = parse_fixture(Units::Standard);
        assert_eq!(set.forecasts.len(), 2);
        assert_eq!(set.period_range, Some(PeriodRange { start: 0, end: 3 }));

        let first = &set.forecasts[0];
        let day = first.day.as_ref().expect("day");
        assert_eq!(day.kind, PeriodKind::Day);
        assert_eq!(day.title, Field::Value("Monday".to_string()));
        assert_eq!(day.temperature, Field::Value(84.0));
        assert_eq!(day.precip_type, PrecipType::None);
        assert_eq!(day.precip_accumulation, Field::Value("None".to_string()));
        assert_eq!(day.humidity, Field::Value("58%".to_string()));
        assert_eq!(day.wind_direction, Field::Value("S".to_string()));

        let night = first.night.as_ref().expect("night");
        assert_eq!(night.temperature, Field::Value(63.0));
        assert_eq!(night.code, 31);
    }

    #[test]
    fn odd_text_period_is_night_with_prefixed_icon() {
        let set = parse_fixture(Units::Standard);
        let second = &set.forecasts[1];

        let night = second.night.as_ref().expect("night");
        assert_eq!(night.kind, PeriodKind::Night);
        assert_eq!(night.icon_name, Field::Value("nt_chancerain".to_string()));
        assert_eq!(night.code, 45);
        assert_eq!(night.precip_probability, Field::Value(40));
        assert_eq!(night.wind_direction, Field::Value("Calm".to_string()));
        assert_eq!(night.wind_degrees, Field::Invalid);

        let day = second.day.as_ref().expect("day");
        assert_eq!(day.precip_type, PrecipType::Rain);
        assert_eq!(day.precip_accumulation, Field::Value("0.4 in".to_string()));
    }

    #[test]
    fn us_alerts_are_collected_with_identifier() {
        let set = parse_fixture(Units::Standard);
        assert_eq!(set.alerts.alerts.len(), 1);
        let alert = &set.alerts.alerts[0];
        assert_eq!(alert.region, AlertRegion::Us);
        assert_eq!(alert.title, "Severe Thunderstorm Watch");
        assert_eq!(alert.expires, "10:00 PM CDT on June 1, 2026");
        assert!(set.alerts.identifier.is_some());

        let again = parse_fixture(Units::Standard);
        assert_eq!(set.alerts.identifier, again.alerts.identifier);
    }

    #[test]
    fn european_alert_fields_mark_region() {
        let doc = br#"<response><alerts><alert>
            <description>Wind</description>
            <date>2026-01-10 06:00:00 GMT</date>
            <expires>2026-01-10 18:00:00 GMT</expires>
            <message>Strong gusts expected.</message>
            <wtype_meteoalarm_name>Wind</wtype_meteoalarm_name>
            <level_meteoalarm_name>Orange</level_meteoalarm_name>
            <level_meteoalarm_description>Be prepared</level_meteoalarm_description>
            <attribution>meteoalarm.eu</attribution>
        </alert></alerts></response>"#;
        let set = parse(doc, Units::Metric).expect("parse");
        let alert = &set.alerts.alerts[0];
        assert_eq!(alert.region, AlertRegion::European);
        assert_eq!(alert.title, "Wind");
        assert_eq!(alert.subtitle, "Orange");
        assert_eq!(alert.message, "Be prepared");
        assert_eq!(alert.attribution, "meteoalarm.eu");
    }

    #[test]
    fn document_without_alerts_has_no_identifier() {
        let doc = b"<response><current_observation><temp_f>50</temp_f></current_observation></response>";
        let set = parse(doc, Units::Standard).expect("parse");
        assert_eq!(set.alerts.identifier, None);
        assert_eq!(set.current.temperature, Field::Value(50.0));
        assert_eq!(set.current.humidity, Field::Invalid);
        assert_eq!(set.current.code, -1);
    }

    #[test]
    fn cleared_alerts_section_differs_from_active_alerts() {
        let cleared = parse(b"<response><alerts/></response>", Units::Standard).expect("parse");
        let active = parse_fixture(Units::Standard);
        assert!(cleared.alerts.identifier.is_some());
        assert_ne!(cleared.alerts.identifier, active.alerts.identifier);
    }

    #[test]
    fn error_element_becomes_upstream_error() {
        let doc = b"<response><error><type>keynotfound</type><description>this key does not exist</description></error></response>";
        let error = parse(doc, Units::Standard).expect_err("error status");
        assert_eq!(
            error,
            FeedError::Upstream(
                "Weather Underground returned error status. Type: keynotfound Description: this key does not exist"
                    .to_string()
            )
        );
    }

    #[test]
    fn missing_root_is_format_error() {
        let error = parse(b"<html><body/></html>", Units::Standard).expect_err("no root");
        assert_eq!(error, FeedError::Format(EMPTY_DOC.to_string()));
    }

    #[test]
    fn na_text_icon_becomes_unknown_without_prefix() {
        let doc = b"<response><forecast><txt_forecast><forecastdays>
            <forecastday><period>1</period><icon>NA</icon><title>Tonight</title></forecastday>
        </forecastdays></txt_forecast></forecast></response>";
        let set = parse(doc, Units::Standard).expect("parse");
        assert_eq!(set.forecasts.len(), 1);
        assert!(set.forecasts[0].day.is_none());
        let night = set.forecasts[0].night.as_ref().expect("night");
        assert_eq!(night.icon_name, Field::Value("unknown".to_string()));
        assert_eq!(night.code, -1);
    }
}
