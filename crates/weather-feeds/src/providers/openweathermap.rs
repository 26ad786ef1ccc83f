//! Request URLs for the OpenWeatherMap endpoints.

use reqwest::Url;

use crate::error::FeedError;
use crate::location::Coordinates;
use crate::model::Units;

const ONECALL_ENDPOINT: &str = "https://api.openweathermap.org/data/2.5/onecall";
const GEO_DIRECT_ENDPOINT: &str = "https://api.openweathermap.org/geo/1.0/direct";
const GEO_ZIP_ENDPOINT: &str = "https://api.openweathermap.org/geo/1.0/zip";
const ONECALL_EXCLUDE: &str = "hourly,alerts,minutely";
pub const GEO_DIRECT_LIMIT: u8 = 5;

pub fn units_param(units: Units) -> &'static str {
    match units {
        Units::Metric => "metric",
        Units::Standard => "imperial",
    }
}

pub fn onecall_url(coordinates: Coordinates, units: Units, api_key: &str) -> Result<String, FeedError> {
    build(
        ONECALL_ENDPOINT,
        &[
            ("lat", coordinates.latitude.to_string()),
            ("lon", coordinates.longitude.to_string()),
            ("exclude", ONECALL_EXCLUDE.to_string()),
            ("units", units_param(units).to_string()),
            ("appid", api_key.to_string()),
        ],
    )
}

pub fn geo_direct_url(place: &str, api_key: &str) -> Result<String, FeedError> {
    build(
        GEO_DIRECT_ENDPOINT,
        &[
            ("q", place.to_string()),
            ("limit", GEO_DIRECT_LIMIT.to_string()),
            ("appid", api_key.to_string()),
        ],
    )
}

pub fn geo_zip_url(zip: &str, api_key: &str) -> Result<String, FeedError> {
    build(
        GEO_ZIP_ENDPOINT,
        &[("zip", zip.to_string()), ("appid", api_key.to_string())],
    )
}

fn build(endpoint: &str, params: &[(&str, String)]) -> Result<String, FeedError> {
    Url::parse_with_params(endpoint, params)
        .map(String::from)
        .map_err(|error| FeedError::Configuration(format!("invalid request url: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onecall_url_carries_units_and_exclusions() {
        let url = onecall_url(Coordinates::new(39.1, -94.58), Units::Standard, "KEY")
            .expect("url");
        assert_eq!(
            url,
            "https://api.openweathermap.org/data/2.5/onecall?lat=39.1&lon=-94.58&exclude=hourly%2Calerts%2Cminutely&units=imperial&appid=KEY"
        );

        let metric = onecall_url(Coordinates::new(1.0, 2.5), Units::Metric, "KEY").expect("url");
        assert!(metric.contains("units=metric"));
    }

    #[test]
    fn geo_urls_encode_the_search_phrase() {
        let direct = geo_direct_url("St. Louis,US", "KEY").expect("url");
        assert_eq!(
            direct,
            "https://api.openweathermap.org/geo/1.0/direct?q=St.+Louis%2CUS&limit=5&appid=KEY"
        );

        let zip = geo_zip_url("64105,US", "KEY").expect("url");
        assert_eq!(
            zip,
            "https://api.openweathermap.org/geo/1.0/zip?zip=64105%2CUS&appid=KEY"
        );
    }
}
