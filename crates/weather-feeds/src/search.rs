//! Location search against the OpenWeatherMap geocoding endpoints.

use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::error::FeedError;
use crate::location::{Coordinates, Location};
use crate::model::Units;
use crate::providers::{FeedFetcher, openweathermap};

const POSTAL_PREFIX_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchKind {
    #[default]
    Name,
    Zip,
    Postal,
}

impl FromStr for SearchKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(SearchKind::Name),
            "zip" => Ok(SearchKind::Zip),
            "postal" => Ok(SearchKind::Postal),
            other => Err(format!("unknown search kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationQuery {
    pub kind: SearchKind,
    pub phrase: String,
    /// Two-letter country code.
    pub country: Option<String>,
}

impl LocationQuery {
    pub fn new(kind: SearchKind, phrase: impl Into<String>, country: Option<String>) -> Self {
        let country = country
            .map(|code| code.trim().to_ascii_uppercase())
            .filter(|code| !code.is_empty());
        let phrase: String = phrase.into();
        Self {
            kind,
            phrase: phrase.trim().to_string(),
            country,
        }
    }

    fn qualified(&self, phrase: &str) -> String {
        match &self.country {
            Some(country) => format!("{phrase},{country}"),
            None => phrase.to_string(),
        }
    }

    pub fn url(&self, api_key: &str) -> Result<String, FeedError> {
        if self.phrase.is_empty() {
            return Err(FeedError::Configuration("search phrase is empty".to_string()));
        }

        match self.kind {
            SearchKind::Name => openweathermap::geo_direct_url(&self.qualified(&self.phrase), api_key),
            SearchKind::Zip => openweathermap::geo_zip_url(&self.qualified(&self.phrase), api_key),
            SearchKind::Postal => {
                if self.country.is_none() {
                    return Err(FeedError::Configuration("Postal needs Country".to_string()));
                }
                let prefix: String = self.phrase.chars().take(POSTAL_PREFIX_CHARS).collect();
                openweathermap::geo_zip_url(&self.qualified(&prefix), api_key)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GeoResult {
    name: Option<String>,
    country: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub name: String,
    pub country: String,
    pub coordinates: Coordinates,
}

impl SearchResult {
    pub fn into_location(self, units: Units) -> Location {
        Location::new(self.name, self.country, self.coordinates, units)
    }
}

/// Name searches answer with an array, zip and postal searches with a
/// single object. Entries without coordinates are dropped.
pub fn parse_results(kind: SearchKind, body: &[u8]) -> Result<Vec<SearchResult>, FeedError> {
    let invalid = |error: serde_json::Error| FeedError::Format(format!("geocoding payload: {error}"));
    let raw: Vec<GeoResult> = match kind {
        SearchKind::Name => serde_json::from_slice(body).map_err(invalid)?,
        SearchKind::Zip | SearchKind::Postal => vec![serde_json::from_slice(body).map_err(invalid)?],
    };

    Ok(raw
        .into_iter()
        .filter_map(|result| {
            let coordinates = Coordinates::new(result.lat?, result.lon?);
            Some(SearchResult {
                name: result.name.unwrap_or_default(),
                country: result.country.unwrap_or_default(),
                coordinates,
            })
        })
        .collect())
}

pub fn search<F: FeedFetcher>(
    fetcher: &F,
    query: &LocationQuery,
    api_key: &str,
    units: Units,
) -> Result<Vec<Location>, FeedError> {
    let url = query.url(api_key)?;
    let body = fetcher.fetch(&url)?;
    let results = parse_results(query.kind, &body)?;
    debug!(kind = ?query.kind, found = results.len(), "location search finished");
    Ok(results
        .into_iter()
        .map(|result| result.into_location(units))
        .collect())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::providers::ProviderError;

    struct FakeFetcher {
        body: &'static [u8],
        requested: RefCell<Vec<String>>,
    }

    impl FeedFetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
            self.requested.borrow_mut().push(url.to_string());
            Ok(self.body.to_vec())
        }
    }

    #[test]
    fn name_search_appends_country_and_limit() {
        let query = LocationQuery::new(SearchKind::Name, " Springfield ", Some("us".to_string()));
        let url = query.url("KEY").expect("url");
        assert_eq!(
            url,
            "https://api.openweathermap.org/geo/1.0/direct?q=Springfield%2CUS&limit=5&appid=KEY"
        );
    }

    #[test]
    fn postal_search_uses_prefix_and_requires_country() {
        let query = LocationQuery::new(SearchKind::Postal, "K1A 0B1", Some("CA".to_string()));
        assert_eq!(
            query.url("KEY").expect("url"),
            "https://api.openweathermap.org/geo/1.0/zip?zip=K1A%2CCA&appid=KEY"
        );

        let missing = LocationQuery::new(SearchKind::Postal, "K1A 0B1", None);
        assert_eq!(
            missing.url("KEY").expect_err("country required"),
            FeedError::Configuration("Postal needs Country".to_string())
        );
    }

    #[test]
    fn name_results_without_coordinates_are_dropped() {
        let body = br#"[
            {"name":"Springfield","country":"US","lat":39.8,"lon":-89.64,"state":"Illinois"},
            {"name":"Nowhere","country":"US"}
        ]"#;
        let results = parse_results(SearchKind::Name, body).expect("results");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Springfield");
        assert_eq!(results[0].coordinates, Coordinates::new(39.8, -89.64));
    }

    #[test]
    fn zip_results_are_single_objects() {
        let body = br#"{"zip":"64105","name":"Kansas City","lat":39.1,"lon":-94.58,"country":"US"}"#;
        let results = parse_results(SearchKind::Zip, body).expect("results");
        assert_eq!(results.len(), 1);
        assert!(parse_results(SearchKind::Name, body).is_err());
    }

    #[test]
    fn search_builds_locations_with_requested_units() {
        let fetcher = FakeFetcher {
            body: br#"{"name":"Kansas City","lat":39.1,"lon":-94.58,"country":"US"}"#,
            requested: RefCell::new(Vec::new()),
        };
        let query = LocationQuery::new(SearchKind::Zip, "64105", None);
        let locations = search(&fetcher, &query, "KEY", Units::Metric).expect("search");

        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].id(), "801127616");
        assert_eq!(locations[0].units(), Units::Metric);
        assert_eq!(fetcher.requested.borrow().len(), 1);
    }
}
