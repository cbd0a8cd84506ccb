//! Query-string parameters and their boundary validation.

use serde::Deserialize;

use geolite::models::parse_feature_codes;
use geolite::{NearbyQuery, StoreError, StoreResult, SubsetFilter, SubsetOptions};

pub const DEFAULT_RADIUS_KM: f64 = 10.0;
pub const MAX_RADIUS_KM: f64 = 100.0;
pub const DEFAULT_LIMIT: usize = 25;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct NearbyParams {
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lng: f64,
    pub radius_km: Option<f64>,
    pub limit: Option<usize>,
    /// Comma-separated `CLASS.CODE` list, e.g. "H.LK,T.TRL"
    pub feature_codes: Option<String>,
}

impl NearbyParams {
    pub fn into_query(self) -> StoreResult<NearbyQuery> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(StoreError::invalid("lat must be within [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(StoreError::invalid("lng must be within [-180, 180]"));
        }

        let radius_km = self.radius_km.unwrap_or(DEFAULT_RADIUS_KM);
        if !(radius_km > 0.0 && radius_km <= MAX_RADIUS_KM) {
            return Err(StoreError::invalid(format!(
                "radius_km must be within (0, {MAX_RADIUS_KM}]"
            )));
        }

        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(StoreError::invalid(format!(
                "limit must be within [1, {MAX_LIMIT}]"
            )));
        }

        let codes = match self.feature_codes.as_deref() {
            Some(raw) => parse_feature_codes(raw)?,
            None => Vec::new(),
        };

        Ok(NearbyQuery::new(self.lat, self.lng, radius_km, limit).with_codes(codes))
    }
}

#[derive(Debug, Deserialize)]
pub struct LiteParams {
    /// ISO country code, e.g. "US"
    pub country: String,
    pub admin1: Option<String>,
    pub admin2: Option<String>,
    pub feature_codes: Option<String>,
    /// Recorded in the dataset metadata
    pub label: Option<String>,
}

/// A validated on-demand build request.
#[derive(Debug)]
pub struct LiteRequest {
    pub filter: SubsetFilter,
    pub options: SubsetOptions,
    /// Download name handed back to the client
    pub file_name: String,
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn check_len(name: &str, value: &str, max: usize) -> StoreResult<()> {
    if value.chars().count() > max {
        return Err(StoreError::invalid(format!(
            "{name} must be at most {max} characters"
        )));
    }
    Ok(())
}

impl LiteParams {
    pub fn into_request(self) -> StoreResult<LiteRequest> {
        let country = self.country.trim().to_uppercase();
        if !(2..=3).contains(&country.chars().count()) {
            return Err(StoreError::invalid("country must be a 2 or 3 letter code"));
        }

        let admin1 = trimmed(self.admin1.as_deref()).map(str::to_uppercase);
        if let Some(admin1) = &admin1 {
            check_len("admin1", admin1, 32)?;
        }
        let admin2 = trimmed(self.admin2.as_deref()).map(String::from);
        if let Some(admin2) = &admin2 {
            check_len("admin2", admin2, 64)?;
        }
        let label = trimmed(self.label.as_deref()).map(String::from);
        if let Some(label) = &label {
            check_len("label", label, 120)?;
        }

        let feature_codes = match self.feature_codes.as_deref() {
            Some(raw) => parse_feature_codes(raw)?,
            None => Vec::new(),
        };

        let file_name = lite_file_name(&country, admin1.as_deref(), admin2.as_deref());
        let mut filter = SubsetFilter::region(&country, admin1.as_deref(), admin2.as_deref());
        filter.feature_codes = feature_codes;

        Ok(LiteRequest {
            filter,
            options: SubsetOptions {
                label,
                ..Default::default()
            },
            file_name,
        })
    }
}

/// `geonames-lite-US-WA-King_County.db`
pub fn lite_file_name(country: &str, admin1: Option<&str>, admin2: Option<&str>) -> String {
    let mut parts = vec![country.to_string()];
    parts.extend(admin1.map(String::from));
    parts.extend(admin2.map(|a| a.replace(' ', "_")));

    let region: String = parts
        .join("-")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    format!("geonames-lite-{region}.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nearby(radius_km: Option<f64>, limit: Option<usize>) -> NearbyParams {
        NearbyParams {
            lat: 47.6,
            lng: -122.33,
            radius_km,
            limit,
            feature_codes: None,
        }
    }

    #[test]
    fn test_nearby_defaults() {
        let query = nearby(None, None).into_query().unwrap();
        assert_eq!(query.radius_km, DEFAULT_RADIUS_KM);
        assert_eq!(query.limit, DEFAULT_LIMIT);
        assert!(query.feature_codes.is_empty());
    }

    #[test]
    fn test_nearby_bounds() {
        assert!(nearby(Some(100.0), Some(100)).into_query().is_ok());
        for params in [
            nearby(Some(0.0), None),
            nearby(Some(100.5), None),
            nearby(None, Some(0)),
            nearby(None, Some(101)),
        ] {
            assert!(matches!(
                params.into_query(),
                Err(StoreError::InvalidArgument(_))
            ));
        }

        let mut params = nearby(None, None);
        params.lng = 181.0;
        assert!(params.into_query().is_err());
    }

    #[test]
    fn test_nearby_codes_are_checked() {
        let mut params = nearby(None, None);
        params.feature_codes = Some("H.LK, T.TRL,".into());
        assert_eq!(params.into_query().unwrap().feature_codes, vec!["H.LK", "T.TRL"]);

        let mut params = nearby(None, None);
        params.feature_codes = Some("H.LK') OR 1=1 --".into());
        assert!(params.into_query().is_err());
    }

    #[test]
    fn test_lite_request_normalizes_region() {
        let request = LiteParams {
            country: " us ".into(),
            admin1: Some("wa".into()),
            admin2: Some("King County".into()),
            feature_codes: Some("H.LK".into()),
            label: Some("  ".into()),
        }
        .into_request()
        .unwrap();

        assert_eq!(request.file_name, "geonames-lite-US-WA-King_County.db");
        assert_eq!(request.filter.country.as_deref(), Some("US"));
        assert_eq!(request.filter.admin1.as_deref(), Some("WA"));
        assert_eq!(request.filter.admin2.as_deref(), Some("King County"));
        assert_eq!(request.filter.feature_codes, vec!["H.LK"]);
        assert!(request.options.label.is_none());
        assert!(request.options.alternate_names);
    }

    #[test]
    fn test_lite_request_rejects_bad_country() {
        for country in ["U", "USAX", "  "] {
            let params = LiteParams {
                country: country.into(),
                admin1: None,
                admin2: None,
                feature_codes: None,
                label: None,
            };
            assert!(params.into_request().is_err(), "{country}");
        }
    }

    #[test]
    fn test_file_name_drops_path_characters() {
        assert_eq!(lite_file_name("US", None, None), "geonames-lite-US.db");
        assert_eq!(
            lite_file_name("US", Some("WA"), Some("../x\"y")),
            "geonames-lite-US-WA-..xy.db"
        );
    }
}
