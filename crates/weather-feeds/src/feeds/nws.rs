//! NWS DWML dialect: time-layout keyed forecast parameters, plus the
//! zip-code lookup document.

use chrono::{DateTime, Utc};

use crate::condition::{self, Phase};
use crate::error::FeedError;
use crate::feeds::walker::{self, Attributes, ElementSink, SectionStack};
use crate::location::Coordinates;
use crate::model::{
    FeedSource, Field, ForecastPeriod, ForecastSet, LongRangeForecast, PeriodKind, PeriodRange,
    Units,
};

const ROOT: &str = "dwml";
const EMPTY_DOC: &str = "NWS Weather returned empty doc";
const ZIP_ERROR: &str = "NWS zip code search returned error status";
const CURRENT_OBSERVATIONS: &str = "current observations";

/// Reads the first coordinate pair of a zip-code lookup response.
pub fn parse_zip_lookup(document: &[u8]) -> Result<Coordinates, FeedError> {
    let mut sink = ZipLookup::default();
    walker::walk(document, &mut sink)?;

    if let Some(error) = sink.error {
        return Err(FeedError::Upstream(format!("{ZIP_ERROR} {}", error.trim())));
    }

    let pair = sink
        .lat_lon_list
        .as_deref()
        .and_then(|list| list.split_whitespace().next())
        .ok_or_else(|| FeedError::Format("NWS zip code search returned no coordinates".to_string()))?;

    let (latitude, longitude) = pair
        .split_once(',')
        .ok_or_else(|| FeedError::Format(format!("malformed coordinate pair: {pair}")))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| FeedError::Format(format!("malformed coordinate pair: {pair}")))
    };

    Ok(Coordinates::new(parse(latitude)?, parse(longitude)?))
}

#[derive(Debug, Default)]
struct ZipLookup {
    lat_lon_list: Option<String>,
    error: Option<String>,
}

impl ElementSink for ZipLookup {
    fn open(&mut self, stack: &SectionStack, _attributes: &Attributes) -> Result<(), FeedError> {
        if matches!(stack.current(), "error" | "err") && self.error.is_none() {
            self.error = Some(String::new());
        }
        Ok(())
    }

    fn close(&mut self, stack: &SectionStack, text: &str) -> Result<(), FeedError> {
        if stack.within("error") || stack.within("err") {
            if let Some(error) = self.error.as_mut() {
                if !text.is_empty() {
                    if !error.is_empty() {
                        error.push(' ');
                    }
                    error.push_str(text);
                }
            }
        } else if stack.current() == "latLonList" && self.lat_lon_list.is_none() {
            self.lat_lon_list = Some(text.to_string());
        }
        Ok(())
    }
}

pub fn parse_forecast(document: &[u8], units: Units) -> Result<ForecastSet, FeedError> {
    let mut sink = DwmlDocument::new(units);
    walker::walk(document, &mut sink)?;
    sink.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    TwelveHour,
    Daily,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LayoutKey {
    span: Span,
    count: usize,
}

/// Splits `k-p12h-n14-1` into its span and period count.
fn parse_layout_key(key: &str) -> Result<LayoutKey, FeedError> {
    let malformed = || FeedError::Format(format!("malformed layout key: {key}"));
    let parts: Vec<&str> = key.trim().split('-').collect();
    let (Some(span), Some(count)) = (parts.get(1), parts.get(2)) else {
        return Err(malformed());
    };

    let count = count
        .get(1..)
        .and_then(|digits| digits.parse::<usize>().ok())
        .ok_or_else(malformed)?;
    let span = match *span {
        "p12h" => Span::TwelveHour,
        "p24h" => Span::Daily,
        _ => Span::Other,
    };
    Ok(LayoutKey { span, count })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extreme {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parameter {
    Temperature { offset: usize, extreme: Extreme, celsius: bool },
    Precipitation,
    Weather,
    Icons,
    Worded,
    Ignored,
}

#[derive(Debug, Clone, Default)]
struct DwmlPeriod {
    name: Field<String>,
    date: Field<chrono::NaiveDate>,
    high: Field<f64>,
    low: Field<f64>,
    pop: Field<i32>,
    condition: Field<String>,
    icon_url: Option<String>,
    description: Field<String>,
}

impl DwmlPeriod {
    fn kind(&self, index: usize) -> PeriodKind {
        if self.low.is_value() {
            PeriodKind::Night
        } else if self.high.is_value() {
            PeriodKind::Day
        } else {
            PeriodKind::from_parity(index as u32)
        }
    }

    fn into_period(self, kind: PeriodKind) -> ForecastPeriod {
        let mut period = ForecastPeriod::new(kind);
        period.title = self.name;
        period.date = self.date;
        period.temperature = match kind {
            PeriodKind::Night => self.low,
            PeriodKind::Day | PeriodKind::Current => self.high,
        };
        period.precip_probability = self.pop;
        period.condition = self.condition;
        period.description = self.description;

        match self.icon_url {
            Some(url) => {
                period.code = condition::normalize_nws_icon(&url, Phase::from_kind(kind));
                period.icon_name = Field::Value(condition::icon_name_from_url(&url));
            }
            None => period.icon_name = Field::Invalid,
        }
        period
    }
}

struct DwmlDocument {
    units: Units,
    found_root: bool,
    skip_data: bool,
    location_name: Field<String>,
    area_description: Option<String>,
    recorded_at: Option<DateTime<Utc>>,
    open_layout: Option<String>,
    twelve_hour_key: Option<String>,
    daily_keys: Vec<String>,
    start_index: usize,
    parameter: Parameter,
    sequence: usize,
    periods: Vec<DwmlPeriod>,
}

impl DwmlDocument {
    fn new(units: Units) -> Self {
        Self {
            units,
            found_root: false,
            skip_data: false,
            location_name: Field::NotSupported,
            area_description: None,
            recorded_at: None,
            open_layout: None,
            twelve_hour_key: None,
            daily_keys: Vec::new(),
            start_index: 0,
            parameter: Parameter::Ignored,
            sequence: 0,
            periods: Vec::new(),
        }
    }

    fn slot(&mut self, index: usize) -> &mut DwmlPeriod {
        if self.periods.len() <= index {
            self.periods.resize_with(index + 1, DwmlPeriod::default);
        }
        &mut self.periods[index]
    }

    /// Index of the next sequential value of the open parameter.
    fn next_index(&mut self) -> usize {
        let index = self.sequence;
        self.sequence += 1;
        index
    }

    fn open_parameter(&mut self, name: &str, attributes: &Attributes) -> Parameter {
        let layout = attributes.get("time-layout").map(String::as_str);
        match name {
            "temperature" => {
                let offset = layout.and_then(|key| self.daily_keys.iter().position(|daily| daily == key));
                let extreme = match attributes.get("type").map(String::as_str) {
                    Some("maximum") => Some(Extreme::High),
                    Some("minimum") => Some(Extreme::Low),
                    _ => None,
                };
                let celsius = attributes
                    .get("units")
                    .is_some_and(|units| units.eq_ignore_ascii_case("celsius"));
                match (offset, extreme) {
                    (Some(offset), Some(extreme)) if offset < 2 => Parameter::Temperature {
                        offset,
                        extreme,
                        celsius,
                    },
                    _ => Parameter::Ignored,
                }
            }
            "probability-of-precipitation" => Parameter::Precipitation,
            "weather" => Parameter::Weather,
            "conditions-icon" => Parameter::Icons,
            "wordedForecast" => Parameter::Worded,
            _ => Parameter::Ignored,
        }
    }

    fn convert_temperature(&self, value: f64, celsius: bool) -> f64 {
        match (self.units, celsius) {
            (Units::Metric, false) => ((value - 32.0) * 5.0 / 9.0).round(),
            (Units::Standard, true) => (value * 9.0 / 5.0 + 32.0).round(),
            _ => value,
        }
    }

    fn finish(self) -> Result<ForecastSet, FeedError> {
        if !self.found_root {
            return Err(FeedError::Format(EMPTY_DOC.to_string()));
        }

        let mut set = ForecastSet::new(FeedSource::Nws);
        set.location_name = match (self.location_name, self.area_description) {
            (Field::Value(name), _) => Field::Value(name),
            (_, Some(area)) => Field::text(&area),
            (other, None) => other,
        };
        set.recorded_at = self.recorded_at;

        let periods: Vec<ForecastPeriod> = self
            .periods
            .into_iter()
            .enumerate()
            .map(|(index, period)| {
                let kind = period.kind(index);
                period.into_period(kind)
            })
            .collect();

        if let Some(first) = periods.first() {
            let mut current = first.clone();
            current.kind = PeriodKind::Current;
            set.current = current;
            set.period_range = Some(PeriodRange {
                start: 0,
                end: (periods.len() - 1) as u32,
            });
        }
        set.forecasts = pair_periods(periods);
        Ok(set)
    }
}

/// Groups a chronological period list into day/night pairs. A Night with
/// no preceding Day forms an entry on its own.
fn pair_periods(periods: Vec<ForecastPeriod>) -> Vec<LongRangeForecast> {
    let mut forecasts = Vec::new();
    let mut pending_day: Option<ForecastPeriod> = None;

    for period in periods {
        if period.kind == PeriodKind::Night {
            forecasts.push(LongRangeForecast {
                day: pending_day.take(),
                night: Some(period),
            });
        } else if let Some(day) = pending_day.replace(period) {
            forecasts.push(LongRangeForecast {
                day: Some(day),
                night: None,
            });
        }
    }

    if let Some(day) = pending_day {
        forecasts.push(LongRangeForecast {
            day: Some(day),
            night: None,
        });
    }
    forecasts
}

impl ElementSink for DwmlDocument {
    fn open(&mut self, stack: &SectionStack, attributes: &Attributes) -> Result<(), FeedError> {
        let name = stack.current();
        if stack.depth() == 1 && name == ROOT {
            self.found_root = true;
            return Ok(());
        }

        if name == "data" {
            self.skip_data = attributes
                .get("type")
                .is_some_and(|kind| kind == CURRENT_OBSERVATIONS);
            return Ok(());
        }
        if self.skip_data {
            return Ok(());
        }

        match name {
            "time-layout" => self.open_layout = None,
            "start-valid-time" => {
                let in_twelve_hour = self.open_layout.is_some()
                    && self.open_layout == self.twelve_hour_key;
                if in_twelve_hour {
                    let index = self.start_index;
                    self.start_index += 1;
                    let slot = self.slot(index);
                    slot.name = attributes
                        .get("period-name")
                        .map_or(Field::Invalid, |period| Field::text(period));
                }
            }
            "weather-conditions" if self.parameter == Parameter::Weather => {
                let index = self.next_index();
                let summary = attributes
                    .get("weather-summary")
                    .map_or(Field::Invalid, |summary| Field::text(summary));
                self.slot(index).condition = summary;
            }
            _ if stack.parent() == Some("parameters") => {
                self.parameter = self.open_parameter(name, attributes);
                self.sequence = 0;
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, stack: &SectionStack, text: &str) -> Result<(), FeedError> {
        let name = stack.current();

        if stack.ends_with(&["product", "creation-date"]) {
            self.recorded_at = DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|at| at.with_timezone(&Utc));
            return Ok(());
        }
        if name == "data" {
            self.skip_data = false;
            return Ok(());
        }
        if self.skip_data || !stack.within("data") {
            return Ok(());
        }

        match name {
            "city" if stack.ends_with(&["location", "city"]) => {
                self.location_name = Field::text(text);
            }
            "area-description" if stack.parent() == Some("location") => {
                self.area_description = Some(text.to_string());
            }
            "layout-key" if stack.parent() == Some("time-layout") => {
                let key = parse_layout_key(text)?;
                match key.span {
                    Span::TwelveHour if self.twelve_hour_key.is_none() => {
                        self.twelve_hour_key = Some(text.to_string());
                        self.periods.reserve(key.count);
                    }
                    Span::Daily => self.daily_keys.push(text.to_string()),
                    _ => {}
                }
                self.open_layout = Some(text.to_string());
            }
            "start-valid-time" => {
                let in_twelve_hour = self.open_layout.is_some()
                    && self.open_layout == self.twelve_hour_key;
                if in_twelve_hour && self.start_index > 0 {
                    let date = DateTime::parse_from_rfc3339(text)
                        .ok()
                        .map(|at| at.date_naive());
                    let index = self.start_index - 1;
                    self.slot(index).date = Field::or_invalid(date);
                }
            }
            "value" => self.close_value(text),
            "icon-link" if self.parameter == Parameter::Icons => {
                let index = self.next_index();
                self.slot(index).icon_url = crate::na::available(text).map(str::to_string);
            }
            "text" if self.parameter == Parameter::Worded => {
                let index = self.next_index();
                self.slot(index).description = Field::text(text);
            }
            _ if stack.parent() == Some("parameters") => self.parameter = Parameter::Ignored,
            _ => {}
        }
        Ok(())
    }
}

impl DwmlDocument {
    fn close_value(&mut self, text: &str) {
        match self.parameter {
            Parameter::Temperature {
                offset,
                extreme,
                celsius,
            } => {
                let index = offset + 2 * self.next_index();
                let value = Field::<f64>::parse(text).map(|value| self.convert_temperature(value, celsius));
                let slot = self.slot(index);
                match extreme {
                    Extreme::High => slot.high = value,
                    Extreme::Low => slot.low = value,
                }
            }
            Parameter::Precipitation => {
                let index = self.next_index();
                let pop = if text.is_empty() {
                    Field::Value(0)
                } else {
                    Field::parse(text)
                };
                self.slot(index).pop = pop;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};

    use super::*;

    const FORECAST: &str = include_str!("../../tests/fixtures/nws_forecast.xml");
    const ZIP: &str = include_str!("../../tests/fixtures/nws_zip.xml");

    fn parse_fixture(units: Units) -> ForecastSet {
        parse_forecast(FORECAST.as_bytes(), units).expect("fixture parses")
    }

    #[test]
    fn zip_lookup_reads_first_pair() {
        let coordinates = parse_zip_lookup(ZIP.as_bytes()).expect("coordinates");
        assert_eq!(coordinates, Coordinates::new(39.0997, -94.5786));
    }

    #[test]
    fn zip_lookup_error_element_is_upstream_error() {
        let doc = b"<error><h2>ERROR</h2><pre><problem>No data were found using the following input:</problem></pre></error>";
        let error = parse_zip_lookup(doc).expect_err("error status");
        assert_eq!(
            error,
            FeedError::Upstream(
                "NWS zip code search returned error status ERROR No data were found using the following input:"
                    .to_string()
            )
        );
    }

    #[test]
    fn zip_lookup_without_pair_is_format_error() {
        let error = parse_zip_lookup(b"<dwml><latLonList></latLonList></dwml>").expect_err("empty");
        assert!(matches!(error, FeedError::Format(_)));
    }

    #[test]
    fn layout_key_parts_are_split_on_dashes() {
        assert_eq!(
            parse_layout_key("k-p12h-n14-1").expect("key"),
            LayoutKey {
                span: Span::TwelveHour,
                count: 14
            }
        );
        assert_eq!(parse_layout_key("k-p24h-n7-2").expect("key").span, Span::Daily);
        assert!(parse_layout_key("k-p12h").is_err());
        assert!(parse_layout_key("k-p12h-nx-1").is_err());
    }

    #[test]
    fn temperatures_fill_alternating_periods_by_layout() {
        let set = parse_fixture(Units::Standard);
        assert_eq!(set.location_name, Field::Value("Kansas City".to_string()));
        assert_eq!(set.forecasts.len(), 3);
        assert_eq!(set.period_range, Some(PeriodRange { start: 0, end: 4 }));

        let first = &set.forecasts[0];
        let day = first.day.as_ref().expect("day");
        let night = first.night.as_ref().expect("night");
        assert_eq!(day.kind, PeriodKind::Day);
        assert_eq!(day.temperature, Field::Value(86.0));
        assert_eq!(day.title, Field::Value("This Afternoon".to_string()));
        assert_eq!(night.kind, PeriodKind::Night);
        assert_eq!(night.temperature, Field::Value(68.0));
        assert_eq!(night.precip_probability, Field::Value(60));

        let last = &set.forecasts[2];
        assert!(last.night.is_none());
        assert_eq!(
            last.day.as_ref().expect("day").temperature,
            Field::Value(79.0)
        );
    }

    #[test]
    fn sequential_parameters_follow_period_order() {
        let set = parse_fixture(Units::Standard);
        let second = &set.forecasts[1];
        let day = second.day.as_ref().expect("day");
        assert_eq!(day.precip_probability, Field::Value(0));
        assert_eq!(day.condition, Field::Value("Sunny".to_string()));
        assert_eq!(day.code, 32);
        assert_eq!(day.icon_name, Field::Value("skc".to_string()));
        assert_eq!(
            day.description,
            Field::Value("Sunny, with a high near 82.".to_string())
        );
        assert_eq!(
            day.date,
            Field::Value(NaiveDate::from_ymd_opt(2026, 6, 2).expect("date"))
        );

        let night = second.night.as_ref().expect("night");
        assert_eq!(night.code, 33);
    }

    #[test]
    fn current_comes_from_first_period() {
        let set = parse_fixture(Units::Standard);
        assert_eq!(set.current.kind, PeriodKind::Current);
        assert_eq!(set.current.temperature, Field::Value(86.0));
        assert_eq!(set.current.code, 35);
        assert_eq!(
            set.recorded_at,
            Utc.with_ymd_and_hms(2026, 6, 1, 15, 12, 40).single()
        );
    }

    #[test]
    fn metric_units_convert_fahrenheit_values() {
        let set = parse_fixture(Units::Metric);
        let first = &set.forecasts[0];
        assert_eq!(first.day.as_ref().expect("day").temperature, Field::Value(30.0));
        assert_eq!(first.night.as_ref().expect("night").temperature, Field::Value(20.0));
    }

    #[test]
    fn leading_night_forms_entry_without_day() {
        let doc = br#"<dwml><data>
            <time-layout><layout-key>k-p12h-n2-1</layout-key>
              <start-valid-time period-name="Tonight">2026-06-01T18:00:00-05:00</start-valid-time>
              <start-valid-time period-name="Tuesday">2026-06-02T06:00:00-05:00</start-valid-time>
            </time-layout>
            <time-layout><layout-key>k-p24h-n1-1</layout-key></time-layout>
            <time-layout><layout-key>k-p24h-n1-2</layout-key></time-layout>
            <parameters>
              <temperature type="minimum" units="Fahrenheit" time-layout="k-p24h-n1-1"><value>55</value></temperature>
              <temperature type="maximum" units="Fahrenheit" time-layout="k-p24h-n1-2"><value>75</value></temperature>
            </parameters>
        </data></dwml>"#;
        let set = parse_forecast(doc, Units::Standard).expect("parse");
        assert_eq!(set.forecasts.len(), 2);
        assert!(set.forecasts[0].day.is_none());
        assert_eq!(
            set.forecasts[0].night.as_ref().expect("night").temperature,
            Field::Value(55.0)
        );
        assert_eq!(
            set.forecasts[1].day.as_ref().expect("day").title,
            Field::Value("Tuesday".to_string())
        );
    }

    #[test]
    fn missing_root_is_format_error() {
        let error = parse_forecast(b"<html/>", Units::Standard).expect_err("no root");
        assert_eq!(error, FeedError::Format(EMPTY_DOC.to_string()));
    }

    #[test]
    fn malformed_layout_key_is_format_error() {
        let doc = b"<dwml><data><time-layout><layout-key>broken</layout-key></time-layout></data></dwml>";
        let error = parse_forecast(doc, Units::Standard).expect_err("bad key");
        assert!(matches!(error, FeedError::Format(_)));
    }
}
