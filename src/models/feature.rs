//! Feature rows as stored in a dataset file.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{StoreError, StoreResult};

static FEATURE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]\.[A-Z0-9]{1,10}$").expect("feature code pattern"));

/// Columns of the `features` table, in schema order.
pub const FEATURE_COLUMNS: &[&str] = &[
    "geoname_id",
    "name",
    "name_ascii",
    "feature_class",
    "feature_code",
    "latitude",
    "longitude",
    "country",
    "admin1",
    "admin2",
    "population",
    "elevation",
    "timezone",
    "modification_date",
    "search_tokens",
    "grid_lat",
    "grid_lng",
];

/// Columns of the `alternate_names` table.
pub const ALTERNATE_NAME_COLUMNS: &[&str] = &["geoname_id", "name", "name_ascii", "is_preferred"];

/// Columns returned by nearby searches.
pub const SEARCH_COLUMNS: &[&str] = &[
    "geoname_id",
    "name",
    "latitude",
    "longitude",
    "feature_class",
    "feature_code",
    "country",
    "admin1",
    "admin2",
    "population",
    "elevation",
    "timezone",
];

/// One named geographic entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Feature {
    pub geoname_id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub feature_class: Option<String>,
    pub feature_code: Option<String>,
    pub country: Option<String>,
    pub admin1: Option<String>,
    pub admin2: Option<String>,
    pub population: Option<i64>,
    /// Meters
    pub elevation: Option<f64>,
    pub timezone: Option<String>,
}

impl Feature {
    pub fn has_valid_coordinates(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A feature annotated with its distance from the query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyFeature {
    #[serde(flatten)]
    pub feature: Feature,
    pub distance_km: f64,
}

/// Full `features` row, used when copying between dataset files.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct FeatureRecord {
    pub geoname_id: i64,
    pub name: String,
    pub name_ascii: Option<String>,
    pub feature_class: Option<String>,
    pub feature_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub country: Option<String>,
    pub admin1: Option<String>,
    pub admin2: Option<String>,
    pub population: Option<i64>,
    pub elevation: Option<f64>,
    pub timezone: Option<String>,
    pub modification_date: Option<String>,
    pub search_tokens: Option<String>,
    pub grid_lat: Option<i64>,
    pub grid_lng: Option<i64>,
}

impl FeatureRecord {
    /// Minimal record with grid cells derived from the coordinates.
    pub fn new(geoname_id: i64, name: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            geoname_id,
            name: name.to_string(),
            name_ascii: None,
            feature_class: None,
            feature_code: None,
            latitude: Some(latitude),
            longitude: Some(longitude),
            country: None,
            admin1: None,
            admin2: None,
            population: None,
            elevation: None,
            timezone: None,
            modification_date: None,
            search_tokens: None,
            grid_lat: Some(latitude.floor() as i64),
            grid_lng: Some(longitude.floor() as i64),
        }
    }

    pub fn with_code(mut self, class: &str, code: &str) -> Self {
        self.feature_class = Some(class.to_string());
        self.feature_code = Some(code.to_string());
        self
    }

    pub fn with_admin(mut self, country: &str, admin1: &str, admin2: Option<&str>) -> Self {
        self.country = Some(country.to_string());
        self.admin1 = Some(admin1.to_string());
        self.admin2 = admin2.map(String::from);
        self
    }
}

/// Alternate display name owned by a feature.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct AlternateName {
    pub geoname_id: i64,
    pub name: String,
    pub name_ascii: Option<String>,
    pub is_preferred: Option<i64>,
}

/// Split a comma-separated `CLASS.CODE` list, dropping blank entries.
pub fn parse_feature_codes(raw: &str) -> StoreResult<Vec<String>> {
    split_list(raw)
        .map(|code| {
            if FEATURE_CODE.is_match(code) {
                Ok(code.to_string())
            } else {
                Err(StoreError::invalid(format!(
                    "Invalid feature code '{code}', expected CLASS.CODE such as H.LK"
                )))
            }
        })
        .collect()
}

/// Split a comma-separated list of single-letter feature classes.
pub fn parse_feature_classes(raw: &str) -> StoreResult<Vec<String>> {
    split_list(raw)
        .map(|class| match class.as_bytes() {
            [c] if c.is_ascii_uppercase() => Ok(class.to_string()),
            _ => Err(StoreError::invalid(format!(
                "Invalid feature class '{class}', expected a single letter such as P"
            ))),
        })
        .collect()
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty())
}
